//! A rust client for a document viewing service: upload files into object storage
//! buckets, register them for conversion, then fetch the conversion status and
//! the derived artifacts.
//!
//! To use the client all you need to do is instantiate a [`ViewingClient`] with
//! your application's key and secret:
//!
//! [`ViewingClient`]: crate::client::ViewingClient
//!
//! ```ignore
//! use viewing_client::auth::Credential;
//! use viewing_client::client::{ClientConfig, ViewingApi, ViewingClient};
//! use viewing_client::document::{encode_urn, BucketPolicy};
//!
//! let client = ViewingClient::new(ClientConfig::new(Credential::new("key", "secret")))?;
//!
//! client.create_bucket("transient_01", BucketPolicy::Transient).await?;
//! let object = client
//!     .upload_object("house.rvt", "transient_01", std::fs::read("house.rvt")?)
//!     .await?;
//!
//! let urn = encode_urn(object["objectId"].as_str().unwrap_or_default());
//! client.register_object(&urn).await?;
//! let info = client.get_object_info(&urn, "").await?;
//! dbg!(info["progress"].as_str());
//! ```
//!
//! Access tokens are obtained and refreshed behind the scenes.  A client keeps
//! one token for all of its calls and renews it shortly before it expires; see
//! [`TokenManager`] for the details.  If you obtain tokens some other way you
//! can supply your own [`Authenticator`]:
//!
//! [`TokenManager`]: crate::token::TokenManager
//! [`Authenticator`]: crate::auth::Authenticator
//!
//! ```ignore
//! use async_trait::async_trait;
//! use viewing_client::auth::{Authenticator, Credential, IssuedToken};
//! use viewing_client::error::ViewingError;
//!
//! #[derive(Debug)]
//! struct BrokerAuthenticator {
//!     broker_url: String,
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl Authenticator for BrokerAuthenticator {
//!     async fn authenticate(
//!         &self,
//!         _credential: &Credential,
//!     ) -> Result<IssuedToken, ViewingError> {
//!         let rsp = self.client.get(&self.broker_url).send().await?;
//!         Ok(rsp.json::<IssuedToken>().await?)
//!     }
//! }
//!
//! let http = reqwest::Client::new();
//! let client = ViewingClient::with_authenticator(
//!     ClientConfig::new(Credential::new("unused", "unused")),
//!     http.clone(),
//!     Arc::new(BrokerAuthenticator {
//!         broker_url: "http://localhost:3000/api/token".to_string(),
//!         client: http,
//!     }),
//!     Arc::new(TokioClock),
//! );
//! ```
//!
//! The client never retries.  Errors are returned as a [`ViewingError`] and it is
//! up to the caller to decide what to do with them.
//!
//! [`ViewingError`]: crate::error::ViewingError

pub mod auth;
pub mod client;
pub mod document;
pub mod error;
pub mod request;
pub mod token;
