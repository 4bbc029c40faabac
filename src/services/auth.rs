//! Identity seam to the authentication collaborator.
//!
//! The store consumes an already-verified owner identity and never issues
//! or validates credentials itself. `IdentityVerifier` is the seam the
//! host wires; the bundled implementation trusts the identity header the
//! fronting auth layer stamps on each request after token validation.

use crate::models::identity::OwnerId;
use axum::http::{HeaderMap, HeaderName};

/// Default header carrying the verified principal id.
pub const AUTH_USER_HEADER: &str = "x-auth-user";

/// Extracts the verified owner identity from a request, if any.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, headers: &HeaderMap) -> Option<OwnerId>;
}

/// Reads the principal from a header set upstream.
///
/// Only usable behind a proxy or middleware that strips the header from
/// client input and re-stamps it after real credential validation.
pub struct TrustedHeaderVerifier {
    header: HeaderName,
}

impl TrustedHeaderVerifier {
    pub fn new() -> Self {
        Self {
            header: HeaderName::from_static(AUTH_USER_HEADER),
        }
    }

    pub fn with_header(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for TrustedHeaderVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityVerifier for TrustedHeaderVerifier {
    fn verify(&self, headers: &HeaderMap) -> Option<OwnerId> {
        let raw = headers.get(&self.header)?.to_str().ok()?;
        OwnerId::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_identity_from_trusted_header() {
        let verifier = TrustedHeaderVerifier::new();
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_USER_HEADER, HeaderValue::from_static("user-9"));

        assert_eq!(
            verifier.verify(&headers).unwrap().as_str(),
            "user-9"
        );
    }

    #[test]
    fn absent_or_malformed_header_is_anonymous() {
        let verifier = TrustedHeaderVerifier::new();
        assert!(verifier.verify(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(AUTH_USER_HEADER, HeaderValue::from_static("not a/safe id"));
        assert!(verifier.verify(&headers).is_none());
    }
}
