//! Token issuance, verification and lifecycle.
//!
//! - [`jwt`]: the stateless codec for access and refresh tokens
//! - [`password`]: password hashing and strength policy
//! - [`service`]: login, refresh rotation, logout and password change

pub mod jwt;
pub mod password;
pub mod service;

pub use jwt::{
    AccessTokenClaims, JwtError, REFRESH_MARKER, RefreshTokenClaims, TokenCodec, TokenPair,
};
pub use password::{hash_password, validate_password, verify_password};
pub use service::{IssuedTokens, TokenService};
