//! Authentication of push notifications against a target secret.
//!
//! Exactly one credential carrier is considered per request, in the order
//! signature header, provider token header, query token.

use constant_time_eq::constant_time_eq;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use tracing::debug;

use crate::webhook::{
    NotificationEvent, PROVIDER_TOKEN_HEADER, PresentedSignature, SIGNATURE_HEADERS, TOKEN_PARAM,
    TokenSource,
};

/// HMAC algorithms accepted in a signature header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

/// The closed set of credential carriers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// HMAC of the raw body in `X-Hub-Signature(-256)`
    HubSignature,
    /// Plain token in the provider token header
    ProviderToken,
    /// Plain token in the `token` query parameter
    QueryToken,
}

impl AuthScheme {
    /// Header or query field that carries this credential
    pub fn carrier(&self) -> &'static str {
        match self {
            AuthScheme::HubSignature => SIGNATURE_HEADERS[0],
            AuthScheme::ProviderToken => PROVIDER_TOKEN_HEADER,
            AuthScheme::QueryToken => TOKEN_PARAM,
        }
    }

    fn mismatch(&self) -> AuthError {
        match self {
            AuthScheme::HubSignature => AuthError::SignatureMismatch,
            AuthScheme::ProviderToken => AuthError::TokenMismatch,
            AuthScheme::QueryToken => AuthError::QueryTokenMismatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Signature mismatch: X-Hub-Signature does not match the secret key")]
    SignatureMismatch,

    #[error("Token mismatch: X-Gitlab-Token does not match the secret key")]
    TokenMismatch,

    #[error("Query token mismatch: query parameter 'token' does not match the secret key")]
    QueryTokenMismatch,

    #[error("No credential supplied to verify against the secret key")]
    NoCredential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The target has no secret
    Open,
    Verified(AuthScheme),
}

/// Authenticate `event` against `secret`.
pub fn authenticate(secret: &str, event: &NotificationEvent) -> Result<AuthOutcome, AuthError> {
    if secret.is_empty() {
        return Ok(AuthOutcome::Open);
    }

    let (scheme, valid) = if let Some(signature) = event.presented_signature() {
        (
            AuthScheme::HubSignature,
            verify_signature(secret, event.raw_body(), signature),
        )
    } else if let Some(token) = event.presented_token() {
        let scheme = match token.source {
            TokenSource::ProviderHeader => AuthScheme::ProviderToken,
            TokenSource::QueryParameter => AuthScheme::QueryToken,
        };
        (scheme, verify_token(secret, &token.value))
    } else {
        return Err(AuthError::NoCredential);
    };

    if valid {
        debug!("Request authenticated via {}", scheme.carrier());
        Ok(AuthOutcome::Verified(scheme))
    } else {
        Err(scheme.mismatch())
    }
}

/// Recompute the HMAC of `body` and compare it with the presented digest.
/// The digest must be the exact lowercase hex string; unknown algorithms
/// never match.
pub fn verify_signature(secret: &str, body: &[u8], signature: &PresentedSignature) -> bool {
    let Some(algorithm) = SignatureAlgorithm::from_name(&signature.algorithm) else {
        debug!("Unsupported signature algorithm '{}'", signature.algorithm);
        return false;
    };

    let expected = compute_signature(algorithm, secret, body);
    !expected.is_empty() && constant_time_eq(expected.as_bytes(), signature.digest.as_bytes())
}

/// Hex HMAC digest of `body`, the counterpart of [`verify_signature`].
pub fn compute_signature(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> String {
    let key = secret.as_bytes();
    match algorithm {
        SignatureAlgorithm::Sha1 => mac_hex::<Hmac<Sha1>>(key, body),
        SignatureAlgorithm::Sha256 => mac_hex::<Hmac<Sha256>>(key, body),
        SignatureAlgorithm::Sha512 => mac_hex::<Hmac<Sha512>>(key, body),
    }
}

fn verify_token(secret: &str, token: &str) -> bool {
    constant_time_eq(secret.as_bytes(), token.as_bytes())
}

fn mac_hex<M: Mac + KeyInit>(key: &[u8], body: &[u8]) -> String {
    match <M as KeyInit>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}
