//! Request classification for inbound push notifications.
//!
//! Turns the raw HTTP request into a [`NotificationEvent`] without making any
//! trust decisions; authentication happens later in [`crate::auth`].

use axum::body::Bytes;
use axum::http::HeaderMap;
use std::borrow::Cow;
use std::collections::HashMap;

/// Signature headers, most preferred first
pub const SIGNATURE_HEADERS: [&str; 2] = ["X-Hub-Signature-256", "X-Hub-Signature"];
pub const PROVIDER_TOKEN_HEADER: &str = "X-Gitlab-Token";
pub const COMMIT_HEADER: &str = "X-Checkout-Sha";

pub const TOKEN_PARAM: &str = "token";
pub const COMMIT_PARAM: &str = "sha";
pub const RESET_PARAM: &str = "reset";

const COMMIT_FIELD: &str = "checkout_sha";
const REF_FIELD: &str = "ref";

/// Everything the classifier reads, captured once per request
#[derive(Debug, Clone)]
pub struct RequestContext {
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: Bytes,
}

impl RequestContext {
    pub fn new(headers: HeaderMap, query: HashMap<String, String>, body: Bytes) -> Self {
        Self {
            headers,
            query,
            body,
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Credential headers count as present even when they are not visible
    /// ASCII, so a garbled one fails verification instead of being skipped.
    fn credential_header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers
            .get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("No content received.")]
    EmptyBody,

    #[error(
        "The content received was not a JSON object. Make sure the webhook content type is 'application/json'."
    )]
    InvalidPayload,

    #[error("Commit identifier '{0}' is not valid.")]
    InvalidCommit(String),
}

/// `algorithm=hexdigest` as sent in a signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedSignature {
    pub algorithm: String,
    pub digest: String,
}

impl PresentedSignature {
    /// Splits on the first `=`. A value without one yields an empty digest.
    pub fn parse(value: &str) -> Self {
        let (algorithm, digest) = value.split_once('=').unwrap_or((value, ""));
        Self {
            algorithm: algorithm.to_string(),
            digest: digest.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    ProviderHeader,
    QueryParameter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedToken {
    pub source: TokenSource,
    pub value: String,
}

/// The parsed notification. Immutable once built.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    raw_body: Bytes,
    git_ref: Option<String>,
    presented_signature: Option<PresentedSignature>,
    presented_token: Option<PresentedToken>,
    target_commit: Option<String>,
    reset_to_head: bool,
}

impl NotificationEvent {
    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref()
    }

    pub fn presented_signature(&self) -> Option<&PresentedSignature> {
        self.presented_signature.as_ref()
    }

    pub fn presented_token(&self) -> Option<&PresentedToken> {
        self.presented_token.as_ref()
    }

    pub fn target_commit(&self) -> Option<&str> {
        self.target_commit.as_deref()
    }

    pub fn reset_to_head(&self) -> bool {
        self.reset_to_head
    }
}

/// Classify an inbound request.
pub fn parse(request: &RequestContext) -> Result<NotificationEvent, ParseError> {
    if request.body.is_empty() {
        return Err(ParseError::EmptyBody);
    }

    let payload: serde_json::Value =
        serde_json::from_slice(&request.body).map_err(|_| ParseError::InvalidPayload)?;
    let payload = payload.as_object().ok_or(ParseError::InvalidPayload)?;

    let git_ref = payload
        .get(REF_FIELD)
        .and_then(|r| r.as_str())
        .map(String::from);

    let presented_signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| request.credential_header(name))
        .map(|value| PresentedSignature::parse(&value));

    let presented_token = request
        .credential_header(PROVIDER_TOKEN_HEADER)
        .map(|value| PresentedToken {
            source: TokenSource::ProviderHeader,
            value: value.into_owned(),
        })
        .or_else(|| {
            request.param(TOKEN_PARAM).map(|value| PresentedToken {
                source: TokenSource::QueryParameter,
                value: value.to_string(),
            })
        });

    let target_commit = payload
        .get(COMMIT_FIELD)
        .and_then(|v| v.as_str())
        .or_else(|| request.header(COMMIT_HEADER))
        .or_else(|| request.param(COMMIT_PARAM))
        .filter(|sha| !sha.is_empty());

    if let Some(sha) = target_commit {
        if !is_safe_commit(sha) {
            return Err(ParseError::InvalidCommit(sha.to_string()));
        }
    }

    Ok(NotificationEvent {
        raw_body: request.body.clone(),
        git_ref,
        presented_signature,
        presented_token,
        target_commit: target_commit.map(String::from),
        reset_to_head: request.param(RESET_PARAM) == Some("true"),
    })
}

/// The commit ends up as a git argument, so it must not look like an option.
fn is_safe_commit(sha: &str) -> bool {
    !sha.starts_with('-') && !sha.chars().any(|c| c.is_whitespace() || c.is_control())
}
