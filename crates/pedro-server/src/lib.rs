pub mod config;
pub mod middleware;
pub mod observability;
pub mod rate_limit;
pub mod server;
pub mod session_store;

pub use config::{AppConfig, LoggingConfig, PostgresConfig, RedisConfig, ServerConfig};
pub use observability::{apply_logging_level, init_tracing, init_tracing_with_level};
pub use rate_limit::{RateLimitDecision, RateLimiter, rate_limit_middleware};
pub use server::{AppState, AuthStores, PedroServer, ServerBuilder, build_app};
pub use session_store::{RedisSessionStore, create_session_store};
