//! Session-token validation and route policy evaluation.
//!
//! Token validation is framework-free: the authorize middleware extracts the
//! raw token from the request and hands it here. Successful validations are
//! cached by token digest with a bounded TTL so hot clients do not pay the
//! signature check on every request.

use ahash::HashMap as AHashMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::models::router::{AuthPolicy, RequireLogic};
use crate::models::settings::AuthSettings;
use crate::utils::route_table::Route;

/// Identity derived from a validated session token.
///
/// Absent entirely for anonymous requests.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// Token expiry as a Unix timestamp.
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token rejected: {0}")]
    InvalidToken(String),
    #[error("authorization misconfigured: {0}")]
    Config(String),
}

struct CacheEntry {
    user: UserContext,
    expires_at: Instant,
}

const CACHE_PRUNE_THRESHOLD: usize = 10_000;

/// Validates session tokens against the configured key material.
///
/// HS256 with a shared secret, or RS256 with a PEM public key. Signature,
/// `exp`, `nbf`, `iss` and `aud` checks are delegated to `jsonwebtoken`;
/// a cache keyed by token digest short-circuits repeat validations, with
/// entries expiring at `min(token exp, now + ttl)`.
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    cache: RwLock<AHashMap<String, CacheEntry>>,
    cache_ttl: Duration,
}

impl TokenValidator {
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthError> {
        let (decoding_key, algorithm) = match (&settings.secret, &settings.public_key) {
            (Some(secret), _) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
            (None, Some(pem)) => (
                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AuthError::Config(format!("bad public key: {e}")))?,
                Algorithm::RS256,
            ),
            (None, None) => {
                return Err(AuthError::Config(
                    "either secret or public_key must be set".to_string(),
                ))
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_nbf = true;
        if let Some(issuer) = &settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &settings.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            decoding_key,
            validation,
            cache: RwLock::new(AHashMap::default()),
            cache_ttl: Duration::from_secs(settings.cache_ttl_seconds),
        })
    }

    /// Validates a raw token and returns the user context it carries.
    pub fn validate(&self, token: &str) -> Result<UserContext, AuthError> {
        let digest = hex::encode(Sha256::digest(token.as_bytes()));

        if let Some(entry) = self
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&digest)
        {
            if entry.expires_at > Instant::now() {
                return Ok(entry.user.clone());
            }
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        let user = UserContext {
            user_id: claims.sub,
            roles: claims.roles,
            permissions: claims.permissions,
            expires_at: claims.exp,
        };

        let now_unix = chrono::Utc::now().timestamp();
        let until_exp = Duration::from_secs((claims.exp - now_unix).max(0) as u64);
        let cache_for = until_exp.min(self.cache_ttl);

        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if cache.len() >= CACHE_PRUNE_THRESHOLD {
            let now = Instant::now();
            cache.retain(|_, entry| entry.expires_at > now);
        }
        cache.insert(
            digest,
            CacheEntry {
                user: user.clone(),
                expires_at: Instant::now() + cache_for,
            },
        );

        Ok(user)
    }
}

/// Outcome of evaluating a route's policy against a user context.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Allow,
    /// Denied because no valid user was presented; maps to 401.
    DenyAnonymous { message: String },
    /// Denied because the authenticated user lacks the required grants;
    /// maps to 403. `details` lists required versus held grants and is only
    /// exposed to clients in debug builds.
    DenyForbidden {
        message: String,
        details: serde_json::Value,
    },
}

/// Applies a route's `auth_policy` to the (possibly absent) user context.
///
/// | policy             | rule                                                    |
/// |--------------------|---------------------------------------------------------|
/// | `public`           | allow always                                            |
/// | `authenticated`    | allow iff a user is present                             |
/// | `role_based`       | user present and roles satisfy `logic` over required    |
/// | `permission_based` | same over permissions                                   |
pub fn evaluate_policy(route: &Route, user: Option<&UserContext>) -> PolicyDecision {
    match route.auth_policy {
        AuthPolicy::Public => PolicyDecision::Allow,
        AuthPolicy::Authenticated => match user {
            Some(_) => PolicyDecision::Allow,
            None => PolicyDecision::DenyAnonymous {
                message: "authentication required".to_string(),
            },
        },
        AuthPolicy::RoleBased => require_grants(
            user,
            &route.required_roles,
            route.logic,
            "roles",
            |u| &u.roles,
        ),
        AuthPolicy::PermissionBased => require_grants(
            user,
            &route.required_permissions,
            route.logic,
            "permissions",
            |u| &u.permissions,
        ),
    }
}

fn require_grants<'a>(
    user: Option<&'a UserContext>,
    required: &[String],
    logic: RequireLogic,
    kind: &str,
    held_of: impl Fn(&'a UserContext) -> &'a Vec<String>,
) -> PolicyDecision {
    let Some(user) = user else {
        return PolicyDecision::DenyAnonymous {
            message: "authentication required".to_string(),
        };
    };

    let held = held_of(user);
    let satisfied = match logic {
        RequireLogic::All => required.iter().all(|r| held.contains(r)),
        RequireLogic::Any => required.iter().any(|r| held.contains(r)),
    };

    if satisfied {
        PolicyDecision::Allow
    } else {
        let mut details = serde_json::Map::new();
        details.insert(format!("required_{kind}"), json!(required));
        details.insert(format!("held_{kind}"), json!(held));
        details.insert(
            "logic".to_string(),
            json!(match logic {
                RequireLogic::All => "ALL",
                RequireLogic::Any => "ANY",
            }),
        );
        PolicyDecision::DenyForbidden {
            message: format!("insufficient {kind}"),
            details: serde_json::Value::Object(details),
        }
    }
}

/// Helper to sign HS256 tokens for tests.
pub fn create_test_token(
    user_id: &str,
    roles: &[&str],
    permissions: &[&str],
    exp: i64,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = json!({
        "sub": user_id,
        "exp": exp,
        "iat": chrono::Utc::now().timestamp(),
        "roles": roles,
        "permissions": permissions,
    });

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
