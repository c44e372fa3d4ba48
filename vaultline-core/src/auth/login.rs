//! Built-in login methods.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{AuthError, AuthLogin, AuthResponse, Credential};
use crate::client::ConnectionHandle;
use crate::config::{LoginConfig, LoginMethod};
use crate::namespace;

/// Login using one of the methods described by [`LoginConfig`].
#[derive(Debug, Clone)]
pub struct MethodLogin {
    config: LoginConfig,
}

impl MethodLogin {
    /// Wrap a login configuration.
    pub fn new(config: LoginConfig) -> Self {
        Self { config }
    }

    /// Mount path of the auth method, without surrounding separators.
    pub fn mount(&self) -> &str {
        self.config
            .mount
            .as_deref()
            .map(namespace::normalize)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.method.name())
    }

    /// API path the login request is sent to.
    pub fn login_path(&self) -> String {
        match &self.config.method {
            LoginMethod::Userpass { username, .. } | LoginMethod::Ldap { username, .. } => {
                format!("auth/{}/login/{}", self.mount(), username)
            }
            _ => format!("auth/{}/login", self.mount()),
        }
    }

    /// Request body for the login.
    async fn login_body(&self) -> Result<Value, AuthError> {
        let body = match &self.config.method {
            LoginMethod::AppRole { role_id, secret_id } => match secret_id {
                Some(secret_id) => json!({ "role_id": role_id, "secret_id": secret_id.expose() }),
                None => json!({ "role_id": role_id }),
            },
            LoginMethod::Userpass { password, .. } | LoginMethod::Ldap { password, .. } => {
                json!({ "password": password.expose() })
            }
            LoginMethod::Jwt { role, jwt } | LoginMethod::Gcp { role, jwt } => {
                json!({ "role": role, "jwt": jwt.expose() })
            }
            LoginMethod::Kubernetes { role, jwt_file } => {
                let jwt = tokio::fs::read_to_string(jwt_file)
                    .await
                    .map_err(|source| AuthError::Io {
                        path: jwt_file.clone(),
                        source,
                    })?;
                json!({ "role": role, "jwt": jwt.trim() })
            }
            LoginMethod::Cert { name } => match name {
                Some(name) => json!({ "name": name }),
                None => json!({}),
            },
        };
        Ok(body)
    }
}

#[async_trait]
impl AuthLogin for MethodLogin {
    fn method(&self) -> &str {
        self.config.method.name()
    }

    fn namespace(&self) -> Option<&str> {
        self.config.namespace.as_deref()
    }

    async fn login(&self, handle: &ConnectionHandle) -> Result<Credential, AuthError> {
        let body = self.login_body().await?;
        let response: AuthResponse = handle
            .post(&self.login_path(), &body)
            .await
            .map_err(|source| AuthError::LoginFailed {
                method: self.method().to_string(),
                source,
            })?;

        let auth = response.auth.ok_or_else(|| AuthError::MissingAuth {
            method: self.method().to_string(),
        })?;

        Ok(auth.into_credential(handle.namespace().map(str::to_string)))
    }
}
