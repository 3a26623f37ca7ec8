//! Storage traits for authentication and authorization data.
//!
//! This module defines storage interfaces for:
//!
//! - Identities (users) and their credentials
//! - API keys and their usage log
//! - Issued refresh token records
//! - Ownership of patient, appointment and billing records
//! - Audit records
//! - Server-side sessions
//!
//! # Implementations
//!
//! - [`memory::MemoryStore`] - in-process, non-durable; used in tests and as
//!   the degraded session store
//! - `pedro-auth-postgres` - PostgreSQL credential store

pub mod api_key;
pub mod audit;
pub mod memory;
pub mod ownership;
pub mod refresh_token;
pub mod session;
pub mod user;

pub use api_key::ApiKeyStorage;
pub use audit::AuditStorage;
pub use memory::MemoryStore;
pub use ownership::ResourceOwnerStorage;
pub use refresh_token::RefreshTokenStorage;
pub use session::SessionStore;
pub use user::UserStorage;
