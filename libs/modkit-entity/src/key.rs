//! Datastore keys.
//!
//! A key is a non-empty path of `(kind, id)` pairs, the last pair naming the
//! record itself and the earlier ones its ancestors. Only the last pair may
//! be incomplete (no id yet); the store assigns one on put.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyId {
    Int(i64),
    Name(String),
}

impl From<i64> for KeyId {
    fn from(v: i64) -> Self {
        KeyId::Int(v)
    }
}

impl From<&str> for KeyId {
    fn from(v: &str) -> Self {
        KeyId::Name(v.to_owned())
    }
}

impl From<String> for KeyId {
    fn from(v: String) -> Self {
        KeyId::Name(v)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Int(i) => write!(f, "{i}"),
            KeyId::Name(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPair {
    pub kind: String,
    pub id: Option<KeyId>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key path is empty")]
    Empty,

    #[error("ancestor {0} of the key has no id")]
    IncompleteAncestor(String),

    #[error("invalid key id for kind {0}")]
    InvalidId(String),

    #[error("invalid key token")]
    InvalidToken,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    path: Vec<KeyPair>,
}

impl Key {
    /// Complete root key.
    pub fn new(kind: impl Into<String>, id: impl Into<KeyId>) -> Self {
        Self {
            path: vec![KeyPair {
                kind: kind.into(),
                id: Some(id.into()),
            }],
        }
    }

    /// Root key without an id; the store allocates one on put.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            path: vec![KeyPair {
                kind: kind.into(),
                id: None,
            }],
        }
    }

    /// Key of a child of `self` (which becomes the ancestor).
    #[must_use]
    pub fn child(&self, kind: impl Into<String>, id: Option<KeyId>) -> Self {
        let mut path = self.path.clone();
        path.push(KeyPair {
            kind: kind.into(),
            id,
        });
        Self { path }
    }

    /// Build a key from an explicit path.
    ///
    /// # Errors
    /// Returns `KeyError::Empty` for an empty path, `KeyError::IncompleteAncestor`
    /// when an ancestor pair has no id and `KeyError::InvalidId` for a zero
    /// integer id or an empty name.
    pub fn from_path(path: Vec<KeyPair>) -> Result<Self, KeyError> {
        let Some((_, ancestors)) = path.split_last() else {
            return Err(KeyError::Empty);
        };
        if let Some(pair) = ancestors.iter().find(|p| p.id.is_none()) {
            return Err(KeyError::IncompleteAncestor(pair.kind.clone()));
        }
        for pair in &path {
            match &pair.id {
                Some(KeyId::Int(0)) => return Err(KeyError::InvalidId(pair.kind.clone())),
                Some(KeyId::Name(n)) if n.is_empty() => {
                    return Err(KeyError::InvalidId(pair.kind.clone()));
                }
                _ => {}
            }
        }
        Ok(Self { path })
    }

    #[must_use]
    pub fn pairs(&self) -> &[KeyPair] {
        &self.path
    }

    fn last(&self) -> &KeyPair {
        // `path` is never empty: every constructor pushes at least one pair.
        &self.path[self.path.len() - 1]
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.last().kind
    }

    #[must_use]
    pub fn id(&self) -> Option<&KeyId> {
        self.last().id.as_ref()
    }

    #[must_use]
    pub fn integer_id(&self) -> Option<i64> {
        match self.id() {
            Some(KeyId::Int(i)) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn string_id(&self) -> Option<&str> {
        match self.id() {
            Some(KeyId::Name(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() < 2 {
            return None;
        }
        Some(Self {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Every pair carries an id.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.path.iter().all(|p| p.id.is_some())
    }

    /// Completes the last pair with `id`.
    #[must_use]
    pub fn with_id(&self, id: impl Into<KeyId>) -> Self {
        let mut path = self.path.clone();
        let last = path.len() - 1;
        path[last].id = Some(id.into());
        Self { path }
    }

    /// True when `ancestor` is a strict or non-strict prefix of this key's path.
    #[must_use]
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.path.len() >= ancestor.path.len() && self.path[..ancestor.path.len()] == ancestor.path[..]
    }

    /// Opaque url-safe token that round-trips through [`Key::from_urlsafe`].
    #[must_use]
    pub fn urlsafe(&self) -> String {
        let wire: Vec<(&str, Option<&KeyId>)> = self
            .path
            .iter()
            .map(|p| (p.kind.as_str(), p.id.as_ref()))
            .collect();
        // Serializing strings and integers into JSON cannot fail.
        let bytes = serde_json::to_vec(&wire).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Parse a token produced by [`Key::urlsafe`].
    ///
    /// # Errors
    /// Returns `KeyError::InvalidToken` when the token is not valid base64url
    /// JSON, or any path validation error from [`Key::from_path`].
    pub fn from_urlsafe(token: &str) -> Result<Self, KeyError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| KeyError::InvalidToken)?;
        let wire: Vec<(String, Option<KeyId>)> =
            serde_json::from_slice(&bytes).map_err(|_| KeyError::InvalidToken)?;
        Self::from_path(
            wire.into_iter()
                .map(|(kind, id)| KeyPair { kind, id })
                .collect(),
        )
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(")?;
        for (i, pair) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &pair.id {
                Some(id) => write!(f, "'{}', {id}", pair.kind)?,
                None => write!(f, "'{}', None", pair.kind)?,
            }
        }
        write!(f, ")")
    }
}
