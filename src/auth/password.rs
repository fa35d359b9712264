//! Account password storage
//!
//! Passwords are kept as Argon2id PHC strings (`$argon2id$v=19$m=..,t=..,p=..$salt$hash`).
//! Salt and cost travel with each hash, so rows written under older cost
//! settings keep verifying after the defaults change.

use argon2::password_hash::{self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::{AgoraError, Result};

fn argon2id() -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default())
}

/// Hash `password` under a fresh random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let phc = argon2id()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AgoraError::Internal(format!("password hashing failed: {e}")))?;
    Ok(phc.to_string())
}

/// `Ok(false)` on a wrong password. A stored value that is not a usable
/// Argon2 PHC string is `Internal`: the row is corrupt, not the caller.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let phc = PasswordHash::new(stored)
        .map_err(|e| AgoraError::Internal(format!("stored password hash unreadable: {e}")))?;

    match argon2id().verify_password(password.as_bytes(), &phc) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AgoraError::Internal(format!(
            "stored password hash unusable: {e}"
        ))),
    }
}
