//! Naming and classification rules for the objects the service handles
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, ViewingError};

const BUCKET_KEY_PATTERN: &str = "^[-_.a-z0-9]{3,128}$";
static BUCKET_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(BUCKET_KEY_PATTERN).expect("bucket key pattern compiles"));

const PADDING_INDIFFERENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_URN: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, PADDING_INDIFFERENT);
const URL_SAFE_URN: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, PADDING_INDIFFERENT);

/// The retention policy requested when a bucket is created
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketPolicy {
    /// Objects are kept for about a day
    Transient,
    /// Objects are kept for about a month
    Temporary,
    /// Objects are kept until deleted
    Persistent,
}

impl BucketPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketPolicy::Transient => "transient",
            BucketPolicy::Temporary => "temporary",
            BucketPolicy::Persistent => "persistent",
        }
    }
}

impl std::fmt::Display for BucketPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks that a bucket key is 3 to 128 lowercase letters, digits, `-`, `_` or `.`
pub fn validate_bucket_key(bucket_key: &str) -> Result<()> {
    if BUCKET_KEY_REGEX.is_match(bucket_key) {
        Ok(())
    } else {
        Err(ViewingError::Validation(format!(
            "invalid bucket name: {bucket_key:?} must match {BUCKET_KEY_PATTERN}"
        )))
    }
}

/// How uploaded objects are named inside their bucket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ObjectKeyPolicy {
    /// Store the object under the key the caller supplied
    #[default]
    Verbatim,
    /// Prefix the key with a random UUID so uploads never overwrite each other
    UniquePrefix,
}

impl ObjectKeyPolicy {
    /// The key the object will be stored under
    pub fn storage_key(&self, object_key: &str) -> String {
        match self {
            ObjectKeyPolicy::Verbatim => object_key.to_string(),
            ObjectKeyPolicy::UniquePrefix => format!("{}{}", Uuid::new_v4(), object_key),
        }
    }
}

/// How the viewing service needs to be asked to process a document
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Standard,
    /// PDFs must be sent down the dedicated viewing channel and forced through
    Pdf,
}

/// Classifies a document by its decoded URN
///
/// The suffix match is case sensitive: only URNs ending in `.pdf` take the PDF path.
pub fn classify_document(decoded_urn: &str) -> DocumentKind {
    if decoded_urn.ends_with(".pdf") {
        DocumentKind::Pdf
    } else {
        DocumentKind::Standard
    }
}

/// Decodes a base64 URN into the identifier it wraps
///
/// Both the standard and URL safe alphabets are accepted, with or without padding.
pub fn decode_urn(base64_urn: &str) -> Result<String> {
    if base64_urn.is_empty() {
        return Err(ViewingError::required("urn"));
    }
    let bytes = STANDARD_URN
        .decode(base64_urn)
        .or_else(|_| URL_SAFE_URN.decode(base64_urn))
        .map_err(|err| {
            ViewingError::Validation(format!("urn {base64_urn:?} is not valid base64: {err}"))
        })?;
    String::from_utf8(bytes)
        .map_err(|_| ViewingError::Validation(format!("urn {base64_urn:?} is not valid utf-8")))
}

/// Encodes an object id (as returned by an upload) into the URN form the viewing service takes
pub fn encode_urn(object_id: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(object_id)
}
