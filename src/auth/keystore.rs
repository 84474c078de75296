//! Key material lookup by key id.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use jsonwebtoken::{DecodingKey, EncodingKey};

/// Failures looking up or loading key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("no key for kid {0:?}")]
    NotFound(String),

    #[error("invalid key {kid:?}: {source}")]
    Invalid {
        kid: String,
        #[source]
        source: jsonwebtoken::errors::Error,
    },

    #[error("reading keys: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves the key id carried in a credential header to key material.
pub trait KeyLookup: Send + Sync + 'static {
    fn public_key(&self, kid: &str) -> Result<DecodingKey, KeyError>;

    fn private_key(&self, kid: &str) -> Result<EncodingKey, KeyError>;
}

/// In-memory RSA key store.
///
/// `Debug` prints key ids only.
#[derive(Clone, Default)]
pub struct KeyStore {
    public: HashMap<String, DecodingKey>,
    private: HashMap<String, EncodingKey>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public_pem(mut self, kid: &str, pem: &str) -> Result<Self, KeyError> {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|source| KeyError::Invalid { kid: kid.to_owned(), source })?;
        self.public.insert(kid.to_owned(), key);
        Ok(self)
    }

    pub fn with_private_pem(mut self, kid: &str, pem: &str) -> Result<Self, KeyError> {
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|source| KeyError::Invalid { kid: kid.to_owned(), source })?;
        self.private.insert(kid.to_owned(), key);
        Ok(self)
    }

    /// Loads every `<kid>.pem` (private) and `<kid>.pub.pem` (public) file in
    /// `dir`. Other files are ignored.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, KeyError> {
        let mut store = Self::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(kid) = name.strip_suffix(".pub.pem") {
                let kid = kid.to_owned();
                store = store.with_public_pem(&kid, &fs::read_to_string(&path)?)?;
            } else if let Some(kid) = name.strip_suffix(".pem") {
                let kid = kid.to_owned();
                store = store.with_private_pem(&kid, &fs::read_to_string(&path)?)?;
            }
        }
        Ok(store)
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.public.keys().map(String::as_str)
    }
}

impl KeyLookup for KeyStore {
    fn public_key(&self, kid: &str) -> Result<DecodingKey, KeyError> {
        self.public.get(kid).cloned().ok_or_else(|| KeyError::NotFound(kid.to_owned()))
    }

    fn private_key(&self, kid: &str) -> Result<EncodingKey, KeyError> {
        self.private.get(kid).cloned().ok_or_else(|| KeyError::NotFound(kid.to_owned()))
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kids: Vec<_> = self.public.keys().chain(self.private.keys()).collect();
        kids.sort();
        kids.dedup();
        f.debug_struct("KeyStore").field("kids", &kids).finish_non_exhaustive()
    }
}
