//! Bootstrap token inspection and child token derivation.
//!
//! The bootstrap credential is looked up to learn its policies, origin
//! namespace and remaining lifetime. Unless disabled, a child token is then
//! derived from it that inherits its policies but expires after a fixed,
//! non-renewable bound. Anything downstream that persists secrets read with
//! the session credential is then exposed for at most that bound.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::auth::{AuthResponse, Credential, Lease};
use crate::client::{ConnectionHandle, HandleError};
use crate::config::LifecycleConfig;
use crate::namespace;

/// Tokens with less remaining lifetime than this trigger a warning.
pub const TOKEN_TTL_MIN_RECOMMENDED: Duration = Duration::from_secs(15 * 60);

/// Error type for token lookup and derivation.
#[derive(Debug, Error)]
pub enum TokenLifecycleError {
    /// `lookup-self` failed.
    #[error("failed to look up token: {0}")]
    Lookup(#[source] HandleError),

    /// `lookup-self` returned no token data.
    #[error("no token information returned from self lookup")]
    MissingLookupData,

    /// The child token could not be created.
    #[error("failed to create limited child token: {0}")]
    Derive(#[source] HandleError),

    /// The token-create response carried no auth section.
    #[error("child token response contained no auth data")]
    MissingChildAuth,

    /// The token-create response carried an empty token.
    #[error("child token response contained an empty token")]
    EmptyChildToken,

    /// The parent token's namespace cannot be used.
    #[error("invalid token namespace: {0}")]
    InvalidNamespace(#[source] HandleError),
}

/// What the server reports about a token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub policies: Vec<String>,

    /// Remaining lifetime in seconds; `0` for tokens without expiry.
    #[serde(default)]
    pub ttl: u64,

    #[serde(default)]
    pub namespace_path: Option<String>,

    #[serde(default)]
    pub expire_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub display_name: Option<String>,
}

impl TokenInfo {
    /// Namespace the token was issued in, normalized.
    pub fn namespace(&self) -> Option<&str> {
        namespace::normalize_opt(self.namespace_path.as_deref())
    }

    /// Remaining lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Whether the token carries the `root` policy.
    pub fn is_root(&self) -> bool {
        self.policies.iter().any(|p| p == "root")
    }

    /// Whether the lifetime is short enough to risk failures mid-run.
    ///
    /// Root tokens usually have no TTL and are never flagged.
    pub fn ttl_below_recommended(&self) -> bool {
        !self.is_root() && self.ttl() < TOKEN_TTL_MIN_RECOMMENDED
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    data: Option<TokenInfo>,
}

/// Parameters of a bounded child token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildTokenRequest {
    pub display_name: String,
    pub ttl: Duration,
    pub explicit_max_ttl: Duration,
    pub renewable: bool,
}

impl ChildTokenRequest {
    /// A non-renewable request whose TTL and explicit max TTL both equal `ttl`.
    pub fn bounded(display_name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            display_name: display_name.into(),
            ttl,
            explicit_max_ttl: ttl,
            renewable: false,
        }
    }

    /// JSON body for `auth/token/create`.
    ///
    /// Policies are omitted so the child inherits all of the parent's.
    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "display_name": self.display_name,
            "ttl": format!("{}s", self.ttl.as_secs()),
            "explicit_max_ttl": format!("{}s", self.explicit_max_ttl.as_secs()),
            "renewable": self.renewable,
        })
    }

    /// The lease a token created from this request carries.
    pub fn lease(&self) -> Lease {
        Lease {
            ttl: self.ttl,
            explicit_max_ttl: Some(self.explicit_max_ttl),
            renewable: self.renewable,
        }
    }
}

/// Turns a bootstrap credential into the credential a session uses.
#[derive(Debug, Clone)]
pub struct TokenLifecycleManager {
    max_lease_ttl: Duration,
    skip_child_token: bool,
    token_name: String,
}

impl TokenLifecycleManager {
    /// Create a manager from lifecycle settings.
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            max_lease_ttl: Duration::from_secs(config.max_lease_ttl_seconds),
            skip_child_token: config.skip_child_token,
            token_name: config.token_name.clone(),
        }
    }

    /// Request used when deriving a child token.
    pub fn child_request(&self) -> ChildTokenRequest {
        ChildTokenRequest::bounded(self.token_name.clone(), self.max_lease_ttl)
    }

    /// Look up the token carried by `handle`.
    pub async fn lookup_self(
        &self,
        handle: &ConnectionHandle,
    ) -> Result<TokenInfo, TokenLifecycleError> {
        let response: LookupResponse = handle
            .get("auth/token/lookup-self")
            .await
            .map_err(TokenLifecycleError::Lookup)?;
        response.data.ok_or(TokenLifecycleError::MissingLookupData)
    }

    /// Derive a bounded child token from the token carried by `handle`.
    ///
    /// The child is created in the parent token's own namespace.
    pub async fn derive(
        &self,
        handle: &ConnectionHandle,
        parent: &TokenInfo,
    ) -> Result<Credential, TokenLifecycleError> {
        let mut clone = handle.clone();
        match parent.namespace() {
            Some(ns) => {
                tracing::info!("Creating child token, namespace={:?}", ns);
                clone
                    .set_namespace(ns)
                    .map_err(TokenLifecycleError::InvalidNamespace)?;
            }
            None => clone.clear_namespace(),
        }

        let request = self.child_request();
        let response: AuthResponse = clone
            .post("auth/token/create", &request.to_body())
            .await
            .map_err(TokenLifecycleError::Derive)?;
        let auth = response.auth.ok_or(TokenLifecycleError::MissingChildAuth)?;
        if auth.client_token.is_blank() {
            return Err(TokenLifecycleError::EmptyChildToken);
        }

        if auth.lease_duration > 0 && auth.lease_duration != request.ttl.as_secs() {
            tracing::warn!(
                "Child token lease is {}s instead of the requested {}s",
                auth.lease_duration,
                request.ttl.as_secs()
            );
        }

        let policies = if auth.policies.is_empty() {
            parent.policies.clone()
        } else {
            auth.policies.clone()
        };
        let expires_at = chrono::Duration::from_std(request.ttl)
            .ok()
            .map(|ttl| Utc::now() + ttl);

        let mut credential = auth
            .into_credential(parent.namespace().map(str::to_string))
            .with_policies(policies)
            .with_lease(request.lease());
        credential.expires_at = expires_at;

        tracing::info!(
            "Using Vault token with the following policies: {}",
            credential.policies.join(", ")
        );

        Ok(credential)
    }

    /// Produce the session credential from the bootstrap credential.
    ///
    /// `handle` must already carry the bootstrap token. The returned
    /// credential records the bootstrap token's origin namespace.
    pub async fn establish(
        &self,
        handle: &ConnectionHandle,
        bootstrap: Credential,
    ) -> Result<Credential, TokenLifecycleError> {
        let info = self.lookup_self(handle).await?;

        if info.ttl_below_recommended() {
            tracing::warn!(
                "The token TTL {:?} is below the minimum recommended value of {:?}, \
                 this can result in unexpected permission denied failures",
                info.ttl(),
                TOKEN_TTL_MIN_RECOMMENDED
            );
        }

        if !self.skip_child_token {
            return self.derive(handle, &info).await;
        }

        tracing::info!("Skipping child token creation, using the bootstrap token as-is");

        let lease = (info.ttl > 0).then(|| Lease {
            ttl: info.ttl(),
            explicit_max_ttl: None,
            renewable: bootstrap.lease.is_some_and(|l| l.renewable),
        });
        let mut credential = bootstrap
            .with_policies(info.policies.clone())
            .with_namespace(info.namespace().map(str::to_string));
        credential.lease = lease.or(credential.lease);
        credential.expires_at = info.expire_time;
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientFactory;
    use crate::config::SessionConfig;
    use crate::secret::Secret;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(ttl: u64, skip: bool) -> TokenLifecycleManager {
        TokenLifecycleManager::new(&LifecycleConfig {
            max_lease_ttl_seconds: ttl,
            skip_child_token: skip,
            ..LifecycleConfig::default()
        })
    }

    fn handle_for(server: &MockServer, token: &str) -> ConnectionHandle {
        let mut handle =
            ClientFactory::build(&SessionConfig::new(server.uri()).with_max_retries(0)).unwrap();
        handle.set_token(Secret::new(token));
        handle
    }

    async fn mount_lookup(server: &MockServer, data: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/v1/auth/token/lookup-self"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_bounded_request() {
        for ttl in [1u64, 60, 1200, 3600, 86400] {
            let request = ChildTokenRequest::bounded("vaultline", Duration::from_secs(ttl));
            assert_eq!(request.ttl, request.explicit_max_ttl);
            assert!(!request.renewable);

            let body = request.to_body();
            assert_eq!(body["ttl"], format!("{}s", ttl));
            assert_eq!(body["explicit_max_ttl"], format!("{}s", ttl));
            assert_eq!(body["renewable"], false);
            assert!(body.get("policies").is_none());

            let lease = request.lease();
            assert_eq!(lease.ttl, Duration::from_secs(ttl));
            assert_eq!(lease.explicit_max_ttl, Some(Duration::from_secs(ttl)));
            assert!(!lease.renewable);
        }
    }

    #[test]
    fn test_ttl_warning_threshold() {
        let short = TokenInfo {
            ttl: 60,
            policies: vec!["default".to_string()],
            ..TokenInfo::default()
        };
        assert!(short.ttl_below_recommended());

        let root = TokenInfo {
            ttl: 0,
            policies: vec!["root".to_string()],
            ..TokenInfo::default()
        };
        assert!(!root.ttl_below_recommended());

        let long = TokenInfo {
            ttl: 3600,
            ..TokenInfo::default()
        };
        assert!(!long.ttl_below_recommended());
    }

    #[test]
    fn test_token_info_namespace_trimmed() {
        let info: TokenInfo =
            serde_json::from_value(json!({ "namespace_path": "ns1/sub/", "ttl": 10 })).unwrap();
        assert_eq!(info.namespace(), Some("ns1/sub"));

        let info: TokenInfo = serde_json::from_value(json!({ "namespace_path": "" })).unwrap();
        assert_eq!(info.namespace(), None);
    }

    #[tokio::test]
    async fn test_establish_derives_child_in_token_namespace() {
        let server = MockServer::start().await;
        mount_lookup(
            &server,
            json!({ "policies": ["default", "dev"], "ttl": 7200, "namespace_path": "ns1/" }),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token/create"))
            .and(header("X-Vault-Token", "s.parent"))
            .and(header("X-Vault-Namespace", "ns1"))
            .and(body_json(json!({
                "display_name": "vaultline",
                "ttl": "600s",
                "explicit_max_ttl": "600s",
                "renewable": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": {
                    "client_token": "s.child",
                    "policies": ["default", "dev"],
                    "lease_duration": 600,
                    "renewable": false
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let handle = handle_for(&server, "s.parent");
        let credential = manager(600, false)
            .establish(&handle, Credential::from_token("s.parent"))
            .await
            .unwrap();

        assert_eq!(credential.token.expose(), "s.child");
        assert_eq!(credential.namespace.as_deref(), Some("ns1"));
        assert_eq!(credential.policies, vec!["default", "dev"]);
        let lease = credential.lease.unwrap();
        assert_eq!(lease.ttl, Duration::from_secs(600));
        assert_eq!(lease.explicit_max_ttl, Some(Duration::from_secs(600)));
        assert!(!lease.renewable);
        assert!(credential.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_establish_skip_child_keeps_bootstrap() {
        let server = MockServer::start().await;
        mount_lookup(&server, json!({ "policies": ["root"], "ttl": 0 })).await;

        let handle = handle_for(&server, "s.root");
        let credential = manager(600, true)
            .establish(&handle, Credential::from_token("s.root"))
            .await
            .unwrap();

        assert_eq!(credential.token.expose(), "s.root");
        assert_eq!(credential.policies, vec!["root"]);
        assert!(credential.namespace.is_none());
        assert!(credential.lease.is_none());
    }

    #[tokio::test]
    async fn test_establish_fails_when_derivation_fails() {
        let server = MockServer::start().await;
        mount_lookup(&server, json!({ "policies": ["default"], "ttl": 7200 })).await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token/create"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({ "errors": ["permission denied"] })),
            )
            .mount(&server)
            .await;

        let handle = handle_for(&server, "s.parent");
        let result = manager(600, false)
            .establish(&handle, Credential::from_token("s.parent"))
            .await;
        assert!(matches!(result, Err(TokenLifecycleError::Derive(_))));
    }

    #[tokio::test]
    async fn test_establish_rejects_empty_child_token() {
        let server = MockServer::start().await;
        mount_lookup(&server, json!({ "policies": ["default"], "ttl": 7200 })).await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/token/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": { "client_token": "" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let handle = handle_for(&server, "s.parent");
        let result = manager(600, false)
            .establish(&handle, Credential::from_token("s.parent"))
            .await;
        assert!(matches!(result, Err(TokenLifecycleError::EmptyChildToken)));
    }

    #[tokio::test]
    async fn test_lookup_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/auth/token/lookup-self"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let handle = handle_for(&server, "s.bad");
        let result = manager(600, false)
            .establish(&handle, Credential::from_token("s.bad"))
            .await;
        assert!(matches!(result, Err(TokenLifecycleError::Lookup(_))));
    }
}
