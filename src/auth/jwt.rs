//! JWT issuance and validation (HS256).

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::{Role, User};

/// Claims embedded in every session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub username: String,
    pub role: Role,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
}

impl JwtManager {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Issue a token for `user`. Returns the token and its expiry timestamp.
    pub fn issue(&self, user: &User) -> Result<(String, i64), jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role: user.role,
            iat: now,
            exp: now + self.ttl_secs,
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, claims.exp))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data =
            jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 7,
            username: "ana".into(),
            password_hash: String::new(),
            email: None,
            full_name: None,
            role: Role::Admin,
            is_active: true,
            api_key: None,
            must_reset_password: false,
            reset_token: None,
            reset_token_expires_at: None,
            last_login: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issue_and_validate() {
        let jwt = JwtManager::new(b"test-secret", 3600);
        let (token, exp) = jwt.issue(&user()).unwrap();
        let claims = jwt.validate(&token).unwrap();
        assert_eq!(claims.user_id(), Some(7));
        assert_eq!(claims.username, "ana");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp, exp);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn wrong_secret_fails() {
        let (token, _) = JwtManager::new(b"one", 3600).issue(&user()).unwrap();
        assert!(JwtManager::new(b"two", 3600).validate(&token).is_err());
    }

    #[test]
    fn expired_token_fails() {
        // Well past the default validation leeway.
        let jwt = JwtManager::new(b"test-secret", -3600);
        let (token, _) = jwt.issue(&user()).unwrap();
        assert!(jwt.validate(&token).is_err());
    }

    #[test]
    fn garbage_fails() {
        let jwt = JwtManager::new(b"test-secret", 3600);
        assert!(jwt.validate("not-a-token").is_err());
    }
}
