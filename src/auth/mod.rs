//! Credential verification and rule evaluation.
//!
//! [`Auth`] verifies RS256 bearer credentials against the public key named by
//! the credential's `kid` header and hands rule decisions to a
//! [`PolicyEngine`]. It holds no opinion about roles itself.

mod keystore;
mod policy;

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};

pub use keystore::{KeyError, KeyLookup, KeyStore};
pub use policy::{
    AdminOnly, AdminOrSubject, AnyRole, Policy, PolicyEngine, PolicyError, PolicyInput,
    ROLE_ADMIN, ROLE_USER, Rule, RuleSet, UserOnly,
};

/// The only accepted signing algorithm.
pub const ALGORITHM: Algorithm = Algorithm::RS256;

/// Identity asserted by a verified credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iss: String,
    /// Issued at (Unix timestamp).
    pub iat: u64,
    /// Expiration time (Unix timestamp).
    pub exp: u64,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Why a credential was rejected. Never shown to clients.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("expected authorization header format: Bearer <token>")]
    MalformedHeader,

    #[error("missing kid in token header")]
    MissingKid,

    #[error("unsupported signing method {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Token verifier and policy gateway shared by the auth middlewares.
#[derive(Clone)]
pub struct Auth {
    keys: Arc<dyn KeyLookup>,
    policy: Arc<dyn PolicyEngine>,
    issuer: String,
    validation: Validation,
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("Auth")
            .field("issuer", &self.issuer)
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

impl Auth {
    pub fn new(
        keys: Arc<dyn KeyLookup>,
        policy: Arc<dyn PolicyEngine>,
        issuer: impl Into<String>,
    ) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.validate_aud = false;

        Self { keys, policy, issuer, validation }
    }

    pub fn issuer(&self) -> &str { &self.issuer }

    pub fn policy(&self) -> &dyn PolicyEngine { self.policy.as_ref() }

    /// Signs `claims` with the private key `kid`, carrying `kid` in the header.
    pub fn generate_token(&self, kid: &str, claims: &Claims) -> Result<String, AuthError> {
        let key = self.keys.private_key(kid)?;
        let mut header = Header::new(ALGORITHM);
        header.kid = Some(kid.to_owned());
        Ok(jsonwebtoken::encode(&header, claims, &key)?)
    }

    /// Verifies a raw `Authorization` header value and returns its claims.
    pub fn authenticate(&self, authorization: &str) -> Result<Claims, AuthError> {
        let token = bearer_token(authorization).ok_or(AuthError::MalformedHeader)?;

        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != ALGORITHM {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }
        let kid = header.kid.ok_or(AuthError::MissingKid)?;
        let key = self.keys.public_key(&kid)?;

        let data = jsonwebtoken::decode::<Claims>(token, &key, &self.validation)?;
        Ok(data.claims)
    }
}

/// Extracts `<token>` from `Bearer <token>`. The scheme is case-insensitive.
fn bearer_token(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty() && !token.contains(' ')).then_some(token)
}
