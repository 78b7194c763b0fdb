//! Authentication: session tokens, API keys and HTTP Basic credentials.
//!
//! Extraction from headers is pure; resolution against the store runs inside
//! a store call so the lookup and the active-account check see one snapshot.

pub mod jwt;
pub mod password;

pub use jwt::{Claims, JwtManager};

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};
use crate::models::{Role, User};
use crate::store::Store;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The authenticated caller, attached to requests by the auth middleware.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

/// Credentials presented by a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    Bearer(String),
    ApiKey(String),
    Basic { username: String, password: String },
}

impl Credentials {
    /// Read credentials from headers. `X-API-Key` wins over `Authorization`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        if let Some(key) = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            return Some(Self::ApiKey(key.to_string()));
        }

        let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
        let (scheme, rest) = value.split_once(' ')?;
        let rest = rest.trim();
        if scheme.eq_ignore_ascii_case("bearer") && !rest.is_empty() {
            return Some(Self::Bearer(rest.to_string()));
        }
        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = STANDARD.decode(rest).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':')?;
            return Some(Self::Basic {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
        None
    }
}

/// Resolve credentials to an active user.
///
/// Bearer tokens must already be validated; pass their claims as `claims`.
pub fn authenticate(
    store: &mut dyn Store,
    credentials: &Credentials,
    claims: Option<&Claims>,
) -> Result<User> {
    let user = match credentials {
        Credentials::Bearer(_) => {
            let id = claims
                .and_then(Claims::user_id)
                .ok_or_else(|| Error::Unauthorized("Invalid token".into()))?;
            store.get_user(id)?
        }
        Credentials::ApiKey(key) => store.find_user_by_api_key(key)?,
        Credentials::Basic { username, password } => store
            .find_user_by_username(username)?
            .filter(|u| password::verify_password(password, &u.password_hash)),
    };
    let user = user.ok_or_else(|| Error::Unauthorized("Invalid credentials".into()))?;
    if !user.is_active {
        return Err(Error::Unauthorized("Account is disabled".into()));
    }
    Ok(user)
}

/// A fresh API key: `pk_` followed by 32 hex characters.
pub fn generate_api_key() -> String {
    format!("pk_{}", uuid::Uuid::new_v4().simple())
}

/// A fresh password-reset token. Only its hash is stored.
pub fn generate_reset_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::store::MemoryStore;
    use axum::http::HeaderValue;

    fn headers(name: &str, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        map
    }

    fn store_with_user(active: bool) -> (MemoryStore, User) {
        let mut store = MemoryStore::new();
        let user = store
            .create_user(NewUser {
                username: "ana".into(),
                password_hash: password::hash_password("segredo123").unwrap(),
                email: None,
                full_name: None,
                role: Role::User,
                api_key: Some("pk_abc".into()),
                must_reset_password: false,
            })
            .unwrap();
        if !active {
            store
                .update_user(
                    user.id,
                    crate::models::UserUpdate {
                        is_active: Some(false),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        (store, user)
    }

    #[test]
    fn parses_bearer_api_key_and_basic() {
        assert_eq!(
            Credentials::from_headers(&headers("authorization", "Bearer abc.def")),
            Some(Credentials::Bearer("abc.def".into()))
        );
        assert_eq!(
            Credentials::from_headers(&headers("x-api-key", "pk_1")),
            Some(Credentials::ApiKey("pk_1".into()))
        );
        let basic = format!("Basic {}", STANDARD.encode("ana:se:nha"));
        assert_eq!(
            Credentials::from_headers(&headers("authorization", &basic)),
            Some(Credentials::Basic {
                username: "ana".into(),
                password: "se:nha".into()
            })
        );
    }

    #[test]
    fn malformed_headers_yield_nothing() {
        assert_eq!(Credentials::from_headers(&HeaderMap::new()), None);
        assert_eq!(
            Credentials::from_headers(&headers("authorization", "Bearer")),
            None
        );
        assert_eq!(
            Credentials::from_headers(&headers("authorization", "Basic !!!")),
            None
        );
        assert_eq!(
            Credentials::from_headers(&headers("authorization", "Token abc")),
            None
        );
    }

    #[test]
    fn basic_and_api_key_resolve_users() {
        let (mut store, user) = store_with_user(true);
        let basic = Credentials::Basic {
            username: "ANA".into(),
            password: "segredo123".into(),
        };
        assert_eq!(authenticate(&mut store, &basic, None).unwrap().id, user.id);
        let key = Credentials::ApiKey("pk_abc".into());
        assert_eq!(authenticate(&mut store, &key, None).unwrap().id, user.id);

        let wrong = Credentials::Basic {
            username: "ana".into(),
            password: "nope".into(),
        };
        assert!(matches!(
            authenticate(&mut store, &wrong, None),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn bearer_requires_claims() {
        let (mut store, user) = store_with_user(true);
        let jwt = JwtManager::new(b"s", 60);
        let (token, _) = jwt.issue(&user).unwrap();
        let claims = jwt.validate(&token).unwrap();
        let creds = Credentials::Bearer(token);
        assert_eq!(
            authenticate(&mut store, &creds, Some(&claims)).unwrap().id,
            user.id
        );
        assert!(authenticate(&mut store, &creds, None).is_err());
    }

    #[test]
    fn inactive_users_are_rejected() {
        let (mut store, _) = store_with_user(false);
        let key = Credentials::ApiKey("pk_abc".into());
        assert!(matches!(
            authenticate(&mut store, &key, None),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn generated_secrets_have_expected_shape() {
        let key = generate_api_key();
        assert!(key.starts_with("pk_"));
        assert_eq!(key.len(), 35);
        assert_ne!(generate_reset_token(), generate_reset_token());
        assert_eq!(hash_token("a"), hash_token("a"));
        assert_eq!(hash_token("a").len(), 64);
    }
}
