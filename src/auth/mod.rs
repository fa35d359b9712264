//! Authentication for Agora
//!
//! Provides:
//! - Password hashing with Argon2
//! - Published verification keys ([`KeyStore`])
//! - Session token issuance and verification with key rotation

pub mod keystore;
pub mod password;
pub mod token;

pub use keystore::{KeyStore, SqliteKeyStore};
pub use password::{hash_password, verify_password};
pub use token::{extract_token_from_header, Claims, IssuedToken, TokenService, VerifiedToken};
