use gantry_core::config::AuthConfig;
use gantry_core::GantryError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Authenticated principal attached to the request context.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl Identity {
    /// Control-plane writes require the admin role claim.
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    user_id: Option<String>,
    email: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Identity payload returned by the identity service's validate endpoint.
#[derive(Debug, Deserialize)]
struct RemoteIdentity {
    user_id: Option<String>,
    sub: Option<String>,
    email: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Bearer-token verifier.
///
/// Two modes, tried in order: local decode with the shared secret, then
/// delegation to the identity service. A token the local key proves expired
/// is rejected outright; other local failures fall through to the remote
/// check when one is configured.
pub struct TokenVerifier {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
    remote_url: Option<String>,
    client: reqwest::Client,
}

/// Bounded backoff for the remote validate call.
const REMOTE_RETRIES: u32 = 2;
const REMOTE_BACKOFF: Duration = Duration::from_millis(100);
const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

impl TokenVerifier {
    pub fn new(cfg: &AuthConfig) -> Result<Self, GantryError> {
        let algorithm: Algorithm = cfg
            .token_algorithm
            .parse()
            .map_err(|_| GantryError::Config(format!("bad token_algorithm: {}", cfg.token_algorithm)))?;

        let decoding_key = if cfg.secret_key.is_empty() {
            None
        } else {
            let key = match algorithm {
                Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                    DecodingKey::from_secret(cfg.secret_key.as_bytes())
                }
                Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                    DecodingKey::from_rsa_pem(cfg.secret_key.as_bytes())
                        .map_err(|e| GantryError::Config(format!("bad RSA key: {e}")))?
                }
                _ => DecodingKey::from_ec_pem(cfg.secret_key.as_bytes())
                    .map_err(|e| GantryError::Config(format!("bad EC key: {e}")))?,
            };
            Some(key)
        };

        let remote_url = if cfg.identity_service_url.is_empty() {
            None
        } else {
            Some(cfg.identity_service_url.trim_end_matches('/').to_string())
        };

        let client = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|e| GantryError::Config(e.to_string()))?;

        Ok(Self { decoding_key, validation: Validation::new(algorithm), remote_url, client })
    }

    /// Validate an `Authorization` header value into an identity.
    pub async fn verify(&self, header: Option<&str>) -> Result<Identity, GantryError> {
        let header = header.ok_or(GantryError::AuthMissing)?;
        let token = header.strip_prefix("Bearer ").ok_or(GantryError::AuthMalformed)?;
        if token.is_empty() {
            return Err(GantryError::AuthMalformed);
        }

        let local_err = match self.verify_local(token) {
            Ok(identity) => return Ok(identity),
            // Expired is definitive: the signature checked out.
            Err(e @ GantryError::AuthExpired) => return Err(e),
            Err(e) => e,
        };

        if self.remote_url.is_some() {
            self.verify_remote(token).await
        } else {
            Err(local_err)
        }
    }

    fn verify_local(&self, token: &str) -> Result<Identity, GantryError> {
        let key = self.decoding_key.as_ref().ok_or(GantryError::AuthInvalidSignature)?;

        let data = decode::<Claims>(token, key, &self.validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind::*;
            match e.kind() {
                ExpiredSignature => GantryError::AuthExpired,
                InvalidSignature | InvalidAlgorithm | ImmatureSignature => {
                    GantryError::AuthInvalidSignature
                }
                _ => GantryError::AuthMalformed,
            }
        })?;

        let claims = data.claims;
        let user_id = claims
            .user_id
            .or(claims.sub)
            .ok_or(GantryError::AuthMalformed)?;
        Ok(Identity { user_id, email: claims.email, roles: claims.roles })
    }

    async fn verify_remote(&self, token: &str) -> Result<Identity, GantryError> {
        let url = self.remote_url.as_ref().expect("checked by caller");

        let mut attempt = 0;
        let response = loop {
            match self
                .client
                .get(url)
                .header("Authorization", format!("Bearer {token}"))
                .send()
                .await
            {
                Ok(resp) => break resp,
                Err(e) if attempt < REMOTE_RETRIES && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    debug!(attempt, error = %e, "identity service unreachable, retrying");
                    tokio::time::sleep(REMOTE_BACKOFF * attempt).await;
                }
                Err(_) => return Err(GantryError::AuthUnavailable),
            }
        };

        let status = response.status();
        if status.is_success() {
            let payload: RemoteIdentity =
                response.json().await.map_err(|_| GantryError::AuthUnavailable)?;
            let user_id =
                payload.user_id.or(payload.sub).ok_or(GantryError::AuthUnavailable)?;
            return Ok(Identity { user_id, email: payload.email, roles: payload.roles });
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let code = body
                .pointer("/error/code")
                .or_else(|| body.get("code"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            return Err(match code {
                "token_expired" | "expired" => GantryError::AuthExpired,
                "token_revoked" | "revoked" => GantryError::AuthRevoked,
                _ => GantryError::AuthInvalidSignature,
            });
        }

        Err(GantryError::AuthUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "unit-test-secret";

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(&AuthConfig {
            secret_key: SECRET.into(),
            token_algorithm: "HS256".into(),
            identity_service_url: String::new(),
        })
        .unwrap()
    }

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let t = token(json!({
            "sub": "user-7",
            "email": "u7@example.org",
            "roles": ["editor", "admin"],
            "exp": future_exp(),
        }));
        let id = verifier().verify(Some(&format!("Bearer {t}"))).await.unwrap();
        assert_eq!(id.user_id, "user-7");
        assert_eq!(id.email.as_deref(), Some("u7@example.org"));
        assert!(id.is_admin());
    }

    #[tokio::test]
    async fn test_missing_header() {
        assert!(matches!(verifier().verify(None).await, Err(GantryError::AuthMissing)));
    }

    #[tokio::test]
    async fn test_non_bearer_shape() {
        let result = verifier().verify(Some("Basic dXNlcjpwdw==")).await;
        assert!(matches!(result, Err(GantryError::AuthMalformed)));
        let result = verifier().verify(Some("Bearer ")).await;
        assert!(matches!(result, Err(GantryError::AuthMalformed)));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let t = token(json!({
            "sub": "user-7",
            "exp": chrono::Utc::now().timestamp() - 60,
        }));
        let result = verifier().verify(Some(&format!("Bearer {t}"))).await;
        assert!(matches!(result, Err(GantryError::AuthExpired)));
    }

    #[tokio::test]
    async fn test_wrong_signature() {
        let t = encode(
            &Header::default(),
            &json!({"sub": "user-7", "exp": future_exp()}),
            &EncodingKey::from_secret(b"some-other-secret"),
        )
        .unwrap();
        let result = verifier().verify(Some(&format!("Bearer {t}"))).await;
        assert!(matches!(result, Err(GantryError::AuthInvalidSignature)));
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let result = verifier().verify(Some("Bearer not.a.jwt")).await;
        assert!(matches!(result, Err(GantryError::AuthMalformed)));
    }

    #[tokio::test]
    async fn test_token_without_subject_is_malformed() {
        let t = token(json!({"email": "x@y.z", "exp": future_exp()}));
        let result = verifier().verify(Some(&format!("Bearer {t}"))).await;
        assert!(matches!(result, Err(GantryError::AuthMalformed)));
    }

    #[test]
    fn test_admin_role_check() {
        let id = Identity { user_id: "u".into(), email: None, roles: vec!["viewer".into()] };
        assert!(!id.is_admin());
    }
}
