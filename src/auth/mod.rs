//! Credential validation and token mint/verify.
//!
//! The teacher compares plaintext passwords with a raw SQL equality check
//! (`login_register.rs`). This expansion routes password handling through a
//! [`PasswordHasher`] trait (backed by `argon2`) and token handling through a
//! [`TokenCodec`] trait (backed by `jsonwebtoken`), since both are named as
//! external collaborators the crate must talk to, not skip.

use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::domain::{Role, UserSnapshot};
use crate::error::{DomainError, DomainResult};
use crate::repository::UserRepository;

/// Claims embedded in an issued token: subject, role, and expiry, as named
/// in the spec's auth contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: i64,
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> DomainResult<String>;
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// `argon2` default params, the ecosystem-standard password hashing crate.
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> DomainResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| DomainError::Storage(format!("password hash failed: {e}")))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

pub trait TokenCodec: Send + Sync {
    fn mint(&self, claims: &Claims) -> DomainResult<String>;
    fn verify(&self, token: &str) -> DomainResult<Claims>;
}

/// HS256, signed with a process secret, per the spec's "HMAC-signed with a
/// process secret" contract.
pub struct JwtCodec {
    secret: String,
}

impl JwtCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        JwtCodec { secret: secret.into() }
    }
}

impl TokenCodec for JwtCodec {
    fn mint(&self, claims: &Claims) -> DomainResult<String> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| DomainError::AuthFailed(format!("token mint failed: {e}")))
    }

    fn verify(&self, token: &str) -> DomainResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| DomainError::AuthFailed("token expired or malformed".to_string()))
    }
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenCodec>,
    audit: Arc<AuditLog>,
    expiry: Duration,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenCodec>,
        audit: Arc<AuditLog>,
        expiry_hours: i64,
    ) -> Self {
        AuthService {
            users,
            hasher,
            tokens,
            audit,
            expiry: Duration::hours(expiry_hours),
        }
    }

    pub async fn authenticate_admin(&self, username: &str, password: &str) -> DomainResult<(String, UserSnapshot)> {
        self.authenticate(username, password, Role::Administrator).await
    }

    pub async fn authenticate_client(&self, username: &str, password: &str) -> DomainResult<(String, UserSnapshot)> {
        self.authenticate(username, password, Role::ClientUser).await
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &str,
        expected_role: Role,
    ) -> DomainResult<(String, UserSnapshot)> {
        let cancel = CancellationToken::new();
        let result = self.authenticate_inner(username, password, expected_role, &cancel).await;

        match &result {
            Ok((_, snapshot)) => {
                self.audit.record_best_effort(
                    "login_success",
                    Some(snapshot.user_id),
                    json!({ "username": username }),
                );
            }
            Err(_) => {
                self.audit.record_best_effort(
                    "login_failed",
                    None,
                    json!({ "username": username }),
                );
            }
        }
        result
    }

    async fn authenticate_inner(
        &self,
        username: &str,
        password: &str,
        expected_role: Role,
        cancel: &CancellationToken,
    ) -> DomainResult<(String, UserSnapshot)> {
        let user = self
            .users
            .find_by_username(username, cancel)
            .await?
            .ok_or_else(|| DomainError::AuthFailed("invalid credentials".to_string()))?;

        if !user.active {
            return Err(DomainError::AuthFailed("account inactive".to_string()));
        }
        if user.role != expected_role {
            return Err(DomainError::AuthFailed("role mismatch".to_string()));
        }
        if !self.hasher.verify(password, &user.password_hash) {
            return Err(DomainError::AuthFailed("invalid credentials".to_string()));
        }

        let claims = Claims {
            sub: user.user_id,
            username: user.username.clone(),
            role: user.role,
            exp: (Utc::now() + self.expiry).timestamp(),
        };
        let token = self.tokens.mint(&claims)?;
        Ok((token, UserSnapshot::from(&user)))
    }

    pub fn validate_token(&self, token: &str) -> DomainResult<Claims> {
        let claims = self.tokens.verify(token)?;
        if claims.exp < Utc::now().timestamp() {
            return Err(DomainError::AuthFailed("token expired".to_string()));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_hash_then_verify_round_trips() {
        let hasher = Argon2Hasher;
        let hash = hasher.hash("correct horse battery staple").unwrap();
        assert!(hasher.verify("correct horse battery staple", &hash));
        assert!(!hasher.verify("wrong password", &hash));
    }

    #[test]
    fn jwt_mint_then_verify_yields_same_subject() {
        let codec = JwtCodec::new("test-secret");
        let user_id = Uuid::new_v4();
        let claims = Claims {
            sub: user_id,
            username: "op1".to_string(),
            role: Role::Administrator,
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = codec.mint(&claims).unwrap();
        let decoded = codec.verify(&token).unwrap();
        assert_eq!(decoded.sub, user_id);
        assert_eq!(decoded.username, "op1");
    }

    #[test]
    fn jwt_rejects_tampered_token() {
        let codec = JwtCodec::new("test-secret");
        let other = JwtCodec::new("different-secret");
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "op1".to_string(),
            role: Role::Administrator,
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = codec.mint(&claims).unwrap();
        assert!(other.verify(&token).is_err());
    }
}
