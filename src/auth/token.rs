//! Session tokens signed with rotating Ed25519 keys
//!
//! Tokens are JWTs (`EdDSA`) whose header `kid` names the signing key and
//! whose claims carry the account id and the issue/expiry instants.
//!
//! - The public half of a key is published to the [`KeyStore`] before the
//!   first token is signed with it.
//! - Verification resolves the key solely from the token's `kid`. A key that
//!   is no longer published fails every token signed under it.
//! - Several keys may be published at once, so tokens signed before a
//!   rotation stay valid until their own expiry or until their key is revoked.
//! - Every rejection is reported as the same `Unauthenticated` error; the
//!   cause is only logged.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::keystore::KeyStore;
use crate::clock::Clock;
use crate::db::public_keys::PublicKeyRecord;
use crate::error::{AgoraError, Result};
use crate::snowflake::IdGenerator;

/// Claims carried by every session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id, decimal
    pub sub: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiration time (unix seconds)
    pub exp: i64,
}

/// A freshly signed token
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub key_id: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What a valid token proves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub account_id: u64,
    pub key_id: u64,
    pub expires_at: DateTime<Utc>,
}

struct SigningState {
    key_id: u64,
    encoding: EncodingKey,
}

/// Issues and verifies session tokens
pub struct TokenService {
    keystore: Arc<dyn KeyStore>,
    ids: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    active: RwLock<Arc<SigningState>>,
}

impl TokenService {
    /// Generate and publish a first signing key, then start issuing with it
    pub async fn provision(
        keystore: Arc<dyn KeyStore>,
        ids: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Result<Self> {
        if ttl.is_zero() {
            return Err(AgoraError::Config("session ttl must be positive".into()));
        }

        let active = publish_new_key(keystore.as_ref(), &ids, clock.as_ref()).await?;
        info!(key_id = active.key_id, "Token signing key provisioned");

        Ok(Self {
            keystore,
            ids,
            clock,
            ttl,
            active: RwLock::new(Arc::new(active)),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Id of the key new tokens are signed with
    pub fn active_key_id(&self) -> Result<u64> {
        Ok(self.active()?.key_id)
    }

    /// Sign a token for `account_id`, valid for the configured ttl
    pub fn issue(&self, account_id: u64) -> Result<IssuedToken> {
        let active = self.active()?;

        let iat = self.clock.now().timestamp();
        let exp = iat + self.ttl.as_secs() as i64;
        let claims = Claims {
            sub: account_id.to_string(),
            iat,
            exp,
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(active.key_id.to_string());

        let token = encode(&header, &claims, &active.encoding)
            .map_err(|e| AgoraError::Internal(format!("Failed to sign token: {}", e)))?;

        Ok(IssuedToken {
            token,
            key_id: active.key_id,
            issued_at: seconds(iat),
            expires_at: seconds(exp),
        })
    }

    /// Check a token's key, signature and expiry.
    ///
    /// `now == expires_at` is still valid.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken> {
        let header = decode_header(token).map_err(|e| rejected(&format!("bad header: {}", e)))?;
        if header.alg != Algorithm::EdDSA {
            return Err(rejected(&format!("unexpected algorithm {:?}", header.alg)));
        }

        let key_id: u64 = header
            .kid
            .as_deref()
            .ok_or_else(|| rejected("missing kid"))?
            .parse()
            .map_err(|_| rejected("non-numeric kid"))?;

        let record = self
            .keystore
            .get(key_id)
            .await?
            .ok_or_else(|| rejected(&format!("unknown key {}", key_id)))?;

        let decoding = DecodingKey::from_ed_components(&record.public_key)
            .map_err(|e| rejected(&format!("unusable public key {}: {}", key_id, e)))?;

        // Expiry is checked against the injected clock below
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &decoding, &validation)
            .map_err(|e| rejected(&format!("signature check failed: {}", e)))?
            .claims;

        if self.clock.now().timestamp() > claims.exp {
            return Err(rejected("expired"));
        }

        let account_id = claims
            .sub
            .parse()
            .map_err(|_| rejected("non-numeric subject"))?;

        Ok(VerifiedToken {
            account_id,
            key_id,
            expires_at: seconds(claims.exp),
        })
    }

    /// Publish a new key and switch issuance to it. Older keys stay published.
    pub async fn rotate(&self) -> Result<u64> {
        let next = publish_new_key(self.keystore.as_ref(), &self.ids, self.clock.as_ref()).await?;
        let key_id = next.key_id;

        let previous = {
            let mut active = self
                .active
                .write()
                .map_err(|e| AgoraError::Internal(format!("Lock poisoned: {}", e)))?;
            std::mem::replace(&mut *active, Arc::new(next)).key_id
        };

        info!(key_id, previous, "Token signing key rotated");
        Ok(key_id)
    }

    /// Unpublish a key, invalidating every token signed with it
    pub async fn revoke(&self, key_id: u64) -> Result<()> {
        if key_id == self.active_key_id()? {
            return Err(AgoraError::InvalidArgument(
                "cannot revoke the active signing key; rotate first".into(),
            ));
        }

        if !self.keystore.delete(key_id).await? {
            return Err(AgoraError::NotFound(format!("signing key {}", key_id)));
        }

        info!(key_id, "Token signing key revoked");
        Ok(())
    }

    /// Unpublish keys too old to back any unexpired token.
    ///
    /// With keys rotated every `rotation_interval`, a key stops signing at most
    /// that long after creation, and its last token expires one ttl later.
    pub async fn retire_stale_keys(&self, rotation_interval: Duration) -> Result<Vec<u64>> {
        let horizon = chrono::Duration::from_std(rotation_interval + self.ttl)
            .map_err(|e| AgoraError::Internal(format!("Retirement horizon out of range: {}", e)))?;
        let cutoff = self.clock.now() - horizon;

        let retired = self
            .keystore
            .delete_created_before(cutoff, self.active_key_id()?)
            .await?;

        if !retired.is_empty() {
            info!(count = retired.len(), ?retired, "Retired stale signing keys");
        }
        Ok(retired)
    }

    fn active(&self) -> Result<Arc<SigningState>> {
        self.active
            .read()
            .map(|active| Arc::clone(&active))
            .map_err(|e| AgoraError::Internal(format!("Lock poisoned: {}", e)))
    }
}

async fn publish_new_key(
    keystore: &dyn KeyStore,
    ids: &IdGenerator,
    clock: &dyn Clock,
) -> Result<SigningState> {
    let signing_key = SigningKey::generate(&mut OsRng);

    let der = signing_key
        .to_pkcs8_der()
        .map_err(|e| AgoraError::Internal(format!("Failed to encode signing key: {}", e)))?;
    let encoding = EncodingKey::from_ed_der(der.as_bytes());
    let public_key = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let key_id = ids.generate()?;
    keystore
        .create(PublicKeyRecord {
            id: key_id,
            public_key,
            created_at: clock.now(),
        })
        .await?;

    Ok(SigningState { key_id, encoding })
}

fn rejected(reason: &str) -> AgoraError {
    debug!(reason, "Token rejected");
    AgoraError::invalid_token()
}

fn seconds(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Extract a token from an `Authorization` header value.
///
/// Accepts `Bearer <token>` or a bare token.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    let token = match header.strip_prefix("Bearer ") {
        Some(rest) => rest.trim(),
        None if !header.contains(' ') => header.trim(),
        None => return None,
    };

    (!token.is_empty()).then_some(token)
}
