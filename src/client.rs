//! A Rust definition of the API and a client to access it
use std::{env, sync::Arc};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderName, HeaderValue},
    Body, Client, Method, Request, Url,
};
use serde::Serialize;
use serde_json::Value;

use crate::{
    auth::{Authenticator, Credential, HttpAuthenticator},
    document::{
        classify_document, decode_urn, validate_bucket_key, BucketPolicy, DocumentKind,
        ObjectKeyPolicy,
    },
    error::{Result, ViewingError},
    request::{
        build_request, decode_binary, decode_empty, decode_json, dispatch, BinaryResponse,
        TransportConfig, JSON_CONTENT_TYPE, OCTET_STREAM_CONTENT_TYPE,
    },
    token::{Clock, TokenManager, TokioClock},
};

const DEFAULT_HOST: &str = "https://developer.api.autodesk.com";
const FORCE_HEADER: &str = "x-ads-force";

/// Where each of the services the client talks to lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceEndpoints {
    /// The endpoint that exchanges credentials for a token
    pub auth_url: String,
    /// The root of the object storage API (buckets and objects)
    pub storage_url: String,
    /// The root of the viewing and conversion API
    pub viewing_url: String,
}

impl ServiceEndpoints {
    /// Lays out all three services under a single host
    pub fn from_host(host: &str) -> Self {
        Self {
            auth_url: url_join(host.to_string(), "/authentication/v1/authenticate".to_string()),
            storage_url: url_join(host.to_string(), "/oss/v2".to_string()),
            viewing_url: url_join(host.to_string(), "/viewingservice/v1".to_string()),
        }
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self::from_host(DEFAULT_HOST)
    }
}

/// Everything needed to construct a [`ViewingClient`]
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoints: ServiceEndpoints,
    pub credential: Credential,
    pub transport: TransportConfig,
    /// How uploaded objects are named, see [`ObjectKeyPolicy`]
    pub object_key_policy: ObjectKeyPolicy,
}

impl ClientConfig {
    /// A configuration for the public service using the given credential
    pub fn new(credential: Credential) -> Self {
        Self {
            endpoints: ServiceEndpoints::default(),
            credential,
            transport: TransportConfig::default(),
            object_key_policy: ObjectKeyPolicy::default(),
        }
    }

    /// Reads the configuration from the environment
    ///
    /// `VIEWING_CLIENT_KEY` and `VIEWING_CLIENT_SECRET` are required.  The host
    /// can be overridden with `VIEWING_API_URL`.
    pub fn from_env() -> Result<Self> {
        let credential = Credential::try_from_env("VIEWING_CLIENT_KEY", "VIEWING_CLIENT_SECRET")?;
        let host = env::var("VIEWING_API_URL").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        Ok(Self {
            endpoints: ServiceEndpoints::from_host(&host),
            ..Self::new(credential)
        })
    }
}

/// A client for the object storage and viewing services
///
/// Each client holds its own access token, shared by every call made through
/// it, and its own HTTP connection pool.  Share a client across tasks by
/// wrapping it in an `Arc`.
#[derive(Debug)]
pub struct ViewingClient {
    http: Client,
    endpoints: ServiceEndpoints,
    object_key_policy: ObjectKeyPolicy,
    tokens: TokenManager,
}

impl ViewingClient {
    /// Creates a client that authenticates against the configured auth endpoint
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = config.transport.build_client()?;
        let authenticator = Arc::new(HttpAuthenticator::new(
            http.clone(),
            config.endpoints.auth_url.clone(),
        ));
        Ok(Self::with_authenticator(
            config,
            http,
            authenticator,
            Arc::new(TokioClock),
        ))
    }

    /// Creates a client configured from the environment, see [`ClientConfig::from_env`]
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Creates a client with a caller supplied HTTP client, token source and clock
    ///
    /// The `transport` section of `config` is ignored since `http` is already built.
    pub fn with_authenticator(
        config: ClientConfig,
        http: Client,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            endpoints: config.endpoints,
            object_key_policy: config.object_key_policy,
            tokens: TokenManager::new(config.credential, authenticator, clock),
        }
    }

    /// The token manager backing this client
    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    fn storage_url(&self, segments: &[&str]) -> Result<Url> {
        segment_url(&self.endpoints.storage_url, segments)
    }

    fn viewing_url(&self, segments: &[&str]) -> Result<Url> {
        segment_url(&self.endpoints.viewing_url, segments)
    }

    fn object_info_url(&self, base64_urn: &str, guid: &str) -> Result<Url> {
        let mut url = self.viewing_url(&[base64_urn, "all"])?;
        if !guid.is_empty() {
            url.query_pairs_mut().append_pair("guid", guid);
        }
        Ok(url)
    }

    fn object_item_url(&self, base64_urn_and_item_path: &str) -> String {
        // The item path is itself a path and is appended as-is
        url_join(
            self.endpoints.viewing_url.clone(),
            format!("/items/{base64_urn_and_item_path}"),
        )
    }

    /// Obtains a token and builds an authenticated request
    async fn authorized(
        &self,
        method: Method,
        url: &str,
        body: Option<Body>,
        content_type: &str,
    ) -> Result<Request> {
        let token = self.tokens.get_token().await?;
        build_request(&self.http, method, url, body, &token, content_type)
    }

    async fn authorized_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &T,
    ) -> Result<Request> {
        let body = serde_json::to_vec(body)
            .map_err(|err| ViewingError::Validation(format!("unable to encode request body: {err}")))?;
        self.authorized(method, url, Some(Body::from(body)), JSON_CONTENT_TYPE)
            .await
    }
}

/// Functions defined by the object storage and viewing APIs
#[async_trait]
pub trait ViewingApi {
    /// Creates a bucket to upload objects into
    ///
    /// # Arguments
    ///
    /// * `bucket_key` - The name of the bucket, 3 to 128 characters from
    ///                  lowercase letters, digits, `-`, `_` and `.`
    /// * `policy` - How long objects in the bucket are retained
    ///
    /// # Returns
    ///
    /// The bucket description returned by the service.  An invalid bucket key
    /// fails before anything is sent.
    async fn create_bucket(&self, bucket_key: &str, policy: BucketPolicy) -> Result<Value>;

    /// Deletes a bucket and everything in it
    async fn delete_bucket(&self, bucket_key: &str) -> Result<()>;

    /// Gets the details (owner, policy, permissions) of a bucket
    async fn get_bucket_details(&self, bucket_key: &str) -> Result<Value>;

    /// Lists the file formats the viewing service can convert
    async fn get_supported_formats(&self) -> Result<Value>;

    /// Uploads an object into a bucket
    ///
    /// # Arguments
    ///
    /// * `object_key` - The name of the object.  Depending on the configured
    ///                  [`ObjectKeyPolicy`] the stored name may carry a prefix.
    /// * `bucket_key` - The bucket to upload into
    /// * `body` - The contents of the object
    ///
    /// # Returns
    ///
    /// The object description returned by the service.  Its `objectId` can be
    /// turned into a URN with [`encode_urn`](crate::document::encode_urn).
    async fn upload_object(
        &self,
        object_key: &str,
        bucket_key: &str,
        body: impl Into<Body> + Send,
    ) -> Result<Value>;

    /// Deletes an object from a bucket
    async fn delete_object(&self, object_key: &str, bucket_key: &str) -> Result<()>;

    /// Registers an uploaded object for conversion
    ///
    /// # Arguments
    ///
    /// * `base64_urn` - The base64 encoded object id
    ///
    /// # Returns
    ///
    /// The registration result.  PDF documents are registered on the dedicated
    /// PDF viewing channel.
    async fn register_object(&self, base64_urn: &str) -> Result<Value>;

    /// Gets the conversion status and manifest of a registered object
    ///
    /// # Arguments
    ///
    /// * `base64_urn` - The base64 encoded object id
    /// * `guid` - Restricts the result to one item of the manifest, empty for everything
    async fn get_object_info(&self, base64_urn: &str, guid: &str) -> Result<Value>;

    /// Downloads a derived artifact (such as a sheet or thumbnail)
    ///
    /// # Arguments
    ///
    /// * `base64_urn_and_item_path` - The URN followed by the item's path, as
    ///                                found in the object info
    ///
    /// # Returns
    ///
    /// The response with its body still unread
    async fn get_object_item(&self, base64_urn_and_item_path: &str) -> Result<BinaryResponse>;

    /// Downloads the originally uploaded object
    ///
    /// # Returns
    ///
    /// The response with its body still unread
    async fn get_object_seed_file(
        &self,
        object_key: &str,
        bucket_key: &str,
    ) -> Result<BinaryResponse>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBucketBody<'a> {
    bucket_key: &'a str,
    policy_key: BucketPolicy,
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    urn: &'a str,
    #[serde(rename = "viewing-pdf-lmv", skip_serializing_if = "Option::is_none")]
    viewing_pdf_lmv: Option<&'static str>,
}

impl<'a> RegisterBody<'a> {
    fn new(urn: &'a str, kind: DocumentKind) -> Self {
        Self {
            urn,
            viewing_pdf_lmv: match kind {
                DocumentKind::Pdf => Some("channel"),
                DocumentKind::Standard => None,
            },
        }
    }
}

fn require(field_name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(ViewingError::required(field_name))
    } else {
        Ok(())
    }
}

/// Appends percent-encoded path segments to `base`
fn segment_url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|err| ViewingError::InvalidUrl(format!("{base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| ViewingError::InvalidUrl(format!("{base} cannot be used as a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn url_join(left: String, right: String) -> String {
    if left.ends_with('/') {
        if let Some(stripped) = right.strip_prefix('/') {
            left + stripped
        } else {
            left + &right
        }
    } else if right.starts_with('/') {
        left + &right
    } else {
        left + "/" + &right
    }
}

#[async_trait]
impl ViewingApi for ViewingClient {
    async fn create_bucket(&self, bucket_key: &str, policy: BucketPolicy) -> Result<Value> {
        validate_bucket_key(bucket_key)?;

        let url = self.storage_url(&["buckets"])?;
        let request = self
            .authorized_json(
                Method::POST,
                url.as_str(),
                &CreateBucketBody {
                    bucket_key,
                    policy_key: policy,
                },
            )
            .await?;
        decode_json(dispatch(&self.http, request).await).await
    }

    async fn delete_bucket(&self, bucket_key: &str) -> Result<()> {
        validate_bucket_key(bucket_key)?;

        let url = self.storage_url(&["buckets", bucket_key])?;
        let request = self
            .authorized(Method::DELETE, url.as_str(), None, "")
            .await?;
        decode_empty(dispatch(&self.http, request).await).await
    }

    async fn get_bucket_details(&self, bucket_key: &str) -> Result<Value> {
        require("bucket_key", bucket_key)?;

        let url = self.storage_url(&["buckets", bucket_key, "details"])?;
        let request = self.authorized(Method::GET, url.as_str(), None, "").await?;
        decode_json(dispatch(&self.http, request).await).await
    }

    async fn get_supported_formats(&self) -> Result<Value> {
        let url = self.viewing_url(&["supported"])?;
        let request = self.authorized(Method::GET, url.as_str(), None, "").await?;
        decode_json(dispatch(&self.http, request).await).await
    }

    async fn upload_object(
        &self,
        object_key: &str,
        bucket_key: &str,
        body: impl Into<Body> + Send,
    ) -> Result<Value> {
        require("object_key", object_key)?;
        require("bucket_key", bucket_key)?;

        let storage_key = self.object_key_policy.storage_key(object_key);
        let url = self.storage_url(&["buckets", bucket_key, "objects", &storage_key])?;
        let request = self
            .authorized(
                Method::PUT,
                url.as_str(),
                Some(body.into()),
                OCTET_STREAM_CONTENT_TYPE,
            )
            .await?;
        decode_json(dispatch(&self.http, request).await).await
    }

    async fn delete_object(&self, object_key: &str, bucket_key: &str) -> Result<()> {
        require("object_key", object_key)?;
        require("bucket_key", bucket_key)?;

        let url = self.storage_url(&["buckets", bucket_key, "objects", object_key])?;
        let request = self
            .authorized(Method::DELETE, url.as_str(), None, "")
            .await?;
        decode_empty(dispatch(&self.http, request).await).await
    }

    async fn register_object(&self, base64_urn: &str) -> Result<Value> {
        let kind = classify_document(&decode_urn(base64_urn)?);

        let url = self.viewing_url(&["register"])?;
        let mut request = self
            .authorized_json(
                Method::POST,
                url.as_str(),
                &RegisterBody::new(base64_urn, kind),
            )
            .await?;
        if kind == DocumentKind::Pdf {
            request
                .headers_mut()
                .insert(
                    HeaderName::from_static(FORCE_HEADER),
                    HeaderValue::from_static("true"),
                );
        }
        decode_json(dispatch(&self.http, request).await).await
    }

    async fn get_object_info(&self, base64_urn: &str, guid: &str) -> Result<Value> {
        require("urn", base64_urn)?;

        let url = self.object_info_url(base64_urn, guid)?;
        let request = self.authorized(Method::GET, url.as_str(), None, "").await?;
        decode_json(dispatch(&self.http, request).await).await
    }

    async fn get_object_item(&self, base64_urn_and_item_path: &str) -> Result<BinaryResponse> {
        require("urn", base64_urn_and_item_path)?;

        let url = self.object_item_url(base64_urn_and_item_path);
        let request = self.authorized(Method::GET, &url, None, "").await?;
        decode_binary(dispatch(&self.http, request).await).await
    }

    async fn get_object_seed_file(
        &self,
        object_key: &str,
        bucket_key: &str,
    ) -> Result<BinaryResponse> {
        require("object_key", object_key)?;
        require("bucket_key", bucket_key)?;

        let url = self.storage_url(&["buckets", bucket_key, "objects", object_key])?;
        let request = self.authorized(Method::GET, url.as_str(), None, "").await?;
        decode_binary(dispatch(&self.http, request).await).await
    }
}
