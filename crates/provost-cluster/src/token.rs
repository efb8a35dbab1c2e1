//! Token production for cluster calls and unverified claims extraction.
//!
//! Token issuance is out of scope: the engine receives an opaque
//! [`TokenProducer`] callback that yields either the tenant user's token
//! or the privileged cluster token, depending on what the endpoint
//! definition (or the action) demands.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use provost_core::{ProvostError, ProvostResult};

/// Produces a bearer token: `producer(true)` returns the privileged
/// cluster token, `producer(false)` the tenant user's token.
pub type TokenProducer = Arc<dyn Fn(bool) -> String + Send + Sync>;

/// A producer over two fixed tokens, which is all the provisioning flows
/// need once the out-of-scope auth layer has resolved them.
pub fn static_token_producer(
    user_token: impl Into<String>,
    master_token: impl Into<String>,
) -> TokenProducer {
    let user_token = user_token.into();
    let master_token = master_token.into();
    Arc::new(move |force_master| {
        if force_master {
            master_token.clone()
        } else {
            user_token.clone()
        }
    })
}

#[derive(Debug, Deserialize)]
struct SubjectClaims {
    sub: Option<String>,
}

/// Extracts the `sub` claim from a JWT without verifying its signature.
///
/// The token was already validated by the auth layer in front of the
/// engine; here it is only mined for the identity variables some
/// templates interpolate.
pub fn unverified_subject(token: &str) -> ProvostResult<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<SubjectClaims>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|e| ProvostError::validation(format!("malformed JWT: {e}")))?;

    data.claims
        .sub
        .ok_or_else(|| ProvostError::validation("missing sub in JWT token"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An unsigned HS256 token with `{"sub": "tenant-identity"}`.
    fn token_with_sub() -> String {
        use jsonwebtoken::{encode, EncodingKey, Header};
        #[derive(serde::Serialize)]
        struct Claims {
            sub: String,
        }
        encode(
            &Header::default(),
            &Claims {
                sub: "tenant-identity".into(),
            },
            &EncodingKey::from_secret(b"irrelevant"),
        )
        .unwrap()
    }

    #[test]
    fn producer_switches_on_token_role() {
        let producer = static_token_producer("user-token", "master-token");
        assert_eq!(producer(false), "user-token");
        assert_eq!(producer(true), "master-token");
    }

    #[test]
    fn subject_is_extracted_without_verification() {
        let token = token_with_sub();
        assert_eq!(unverified_subject(&token).unwrap(), "tenant-identity");
    }

    #[test]
    fn garbage_token_is_a_validation_error() {
        assert!(matches!(
            unverified_subject("not-a-jwt"),
            Err(ProvostError::Validation { .. })
        ));
    }
}
