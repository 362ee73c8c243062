//! Key descriptors
//!
//! A [`KeyId`] addresses one piece of remote (or local) state: a domain, a
//! parameter inside that domain, and an optional sub-index (camera 0, battery 1,
//! ...). A [`Key<T>`] is the same descriptor tagged with the value type carried
//! by that state, so binding a key to a processor of another type does not
//! compile.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Well-known domains
pub mod domain {
    pub const PRODUCT: &str = "Product";
    pub const FLIGHT_CONTROLLER: &str = "FlightController";
    pub const CAMERA: &str = "Camera";
    pub const GIMBAL: &str = "Gimbal";
    pub const BATTERY: &str = "Battery";
    pub const REMOTE_CONTROLLER: &str = "RemoteController";
    /// Local persisted preferences, routed to the preference store
    pub const PREFERENCES: &str = "Preferences";
}

/// Values that can travel through a key binding
///
/// Values cross the transport boundary as JSON and are compared structurally
/// for change suppression.
pub trait KeyValue:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> KeyValue for T where
    T: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Untyped key descriptor
///
/// Equality and hashing use (domain, parameter, index) only, so two keys
/// built independently from the same fields address the same subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId {
    domain: String,
    parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<u32>,
}

impl KeyId {
    pub fn new(domain: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            parameter: parameter.into(),
            index: None,
        }
    }

    pub fn indexed(domain: impl Into<String>, parameter: impl Into<String>, index: u32) -> Self {
        Self {
            domain: domain.into(),
            parameter: parameter.into(),
            index: Some(index),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// `Domain.Parameter` without the index
    pub fn name(&self) -> String {
        format!("{}.{}", self.domain, self.parameter)
    }

    /// Parse `Domain.Parameter` or `Domain.Parameter[index]`
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let (name, index) = match spec.strip_suffix(']') {
            Some(rest) => {
                let (name, idx) = rest.split_once('[')?;
                (name, Some(idx.trim().parse::<u32>().ok()?))
            }
            None => (spec, None),
        };

        let (domain, parameter) = name.split_once('.')?;
        if domain.is_empty() || parameter.is_empty() || parameter.contains('.') {
            return None;
        }

        Some(Self {
            domain: domain.to_string(),
            parameter: parameter.to_string(),
            index,
        })
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}.{}[{}]", self.domain, self.parameter, index),
            None => write!(f, "{}.{}", self.domain, self.parameter),
        }
    }
}

/// Typed key
pub struct Key<T> {
    id: KeyId,
    _value: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub fn new(domain: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self::from_id(KeyId::new(domain, parameter))
    }

    pub fn indexed(domain: impl Into<String>, parameter: impl Into<String>, index: u32) -> Self {
        Self::from_id(KeyId::indexed(domain, parameter, index))
    }

    pub fn from_id(id: KeyId) -> Self {
        Self {
            id,
            _value: PhantomData,
        }
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// Same parameter, different sub-index
    pub fn with_index(&self, index: u32) -> Self {
        Self::indexed(self.id.domain.clone(), self.id.parameter.clone(), index)
    }
}

// Manual impls: derive would require bounds on T.
impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self::from_id(self.id.clone())
    }
}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Key<T> {}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.id).finish()
    }
}

impl<T> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

impl<T> From<Key<T>> for KeyId {
    fn from(key: Key<T>) -> Self {
        key.id
    }
}
