//! Authentication utilities for working with the API
use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Result, ViewingError},
    request::decode_json,
};

/// The application key and secret used to obtain access tokens
///
/// Supplied once when the client is constructed and never modified.
#[derive(Clone)]
pub struct Credential {
    client_key: String,
    client_secret: String,
}

// Custom implementation of Debug to avoid printing the secret
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("client_key", &self.client_key)
            .field("client_secret", &"**********")
            .finish()
    }
}

impl Credential {
    pub fn new(client_key: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Reads the key and secret from the named environment variables
    pub fn try_from_env(key_var: &str, secret_var: &str) -> Result<Self> {
        let read = |name: &str| {
            env::var(name)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    ViewingError::Configuration(format!(
                        "expected environment variable {name} to be set"
                    ))
                })
        };
        Ok(Self::new(read(key_var)?, read(secret_var)?))
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

/// A token as handed out by the authentication service
#[derive(Clone, Deserialize, Serialize)]
pub struct IssuedToken {
    /// The bearer token value
    #[serde(alias = "token")]
    pub access_token: String,
    /// Normally `Bearer`
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the token expires, counted from when it was issued
    #[serde(alias = "expiresInSeconds", alias = "expires")]
    pub expires_in: u64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"**********")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Something that can exchange a [`Credential`] for a fresh token
///
/// The client talks to the authentication service through [`HttpAuthenticator`].
/// Other implementations can be supplied to obtain tokens some other way, for
/// example from a broker that holds the secret on the client's behalf.
#[async_trait]
pub trait Authenticator: std::fmt::Debug + Send + Sync {
    async fn authenticate(&self, credential: &Credential) -> Result<IssuedToken>;
}

#[derive(Debug, Serialize)]
struct AuthenticateForm<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

/// Obtains tokens from the authentication endpoint with a client credentials grant
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    http: Client,
    auth_url: String,
}

impl HttpAuthenticator {
    pub fn new(http: Client, auth_url: impl Into<String>) -> Self {
        Self {
            http,
            auth_url: auth_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<IssuedToken> {
        debug!(url = %self.auth_url, client_key = %credential.client_key(), "authenticating");
        let outcome = self
            .http
            .post(&self.auth_url)
            .form(&AuthenticateForm {
                client_id: credential.client_key(),
                client_secret: credential.client_secret(),
                grant_type: "client_credentials",
            })
            .send()
            .await;
        let document = decode_json(outcome).await?;
        let issued = serde_json::from_value::<IssuedToken>(document)
            .map_err(|err| ViewingError::Decode(format!("malformed token response: {err}")))?;
        if issued.access_token.is_empty() {
            return Err(ViewingError::Decode(
                "token response carried an empty token".to_string(),
            ));
        }
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use all_asserts::assert_true;
    use mockito::Matcher;

    use super::*;

    fn authenticator(server: &mockito::ServerGuard) -> HttpAuthenticator {
        HttpAuthenticator::new(
            Client::new(),
            format!("{}/authentication/v1/authenticate", server.url()),
        )
    }

    #[test]
    fn debug_hides_secrets() {
        let credential = Credential::new("key", "hunter2");
        let printed = format!("{:?}", credential);
        assert_true!(printed.contains("key"));
        assert_true!(!printed.contains("hunter2"));

        let issued = IssuedToken {
            access_token: "secret-token".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 1799,
        };
        assert_true!(!format!("{:?}", issued).contains("secret-token"));
    }

    #[test]
    fn issued_token_accepts_either_field_naming() {
        let oauth: IssuedToken =
            serde_json::from_str(r#"{"access_token":"a","token_type":"Bearer","expires_in":1799}"#)
                .unwrap();
        assert_eq!(oauth.access_token, "a");
        assert_eq!(oauth.expires_in, 1799);

        let short: IssuedToken =
            serde_json::from_str(r#"{"token":"b","expiresInSeconds":60}"#).unwrap();
        assert_eq!(short.access_token, "b");
        assert_eq!(short.token_type, "Bearer");
        assert_eq!(short.expires_in, 60);
    }

    #[tokio::test]
    async fn posts_client_credentials_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/authentication/v1/authenticate")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "my-key".into()),
                Matcher::UrlEncoded("client_secret".into(), "my-secret".into()),
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token_type":"Bearer","expires_in":1799,"access_token":"xyz"}"#)
            .create_async()
            .await;

        let issued = authenticator(&server)
            .authenticate(&Credential::new("my-key", "my-secret"))
            .await
            .unwrap();

        assert_eq!(issued.access_token, "xyz");
        assert_eq!(issued.expires_in, 1799);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_credentials_surface_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/authentication/v1/authenticate")
            .with_status(401)
            .with_body(r#"{"developerMessage":"The client_id specified does not have access"}"#)
            .create_async()
            .await;

        let err = authenticator(&server)
            .authenticate(&Credential::new("bad", "bad"))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(401));
    }

    #[tokio::test]
    async fn malformed_token_response_is_a_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/authentication/v1/authenticate")
            .with_status(200)
            .with_body(r#"{"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let err = authenticator(&server)
            .authenticate(&Credential::new("k", "s"))
            .await
            .unwrap_err();

        assert_true!(matches!(err, ViewingError::Decode(_)));
    }
}
