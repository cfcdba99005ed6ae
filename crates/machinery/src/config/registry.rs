//! Maps `kind` and `version` discriminators to document decoders.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use serde_yaml::Value;

use super::document::{
    Document, DocumentMeta, DocumentSpec, ExtensionServiceConfig, KubeletOverlayConfig, NetworkRuleConfig,
    SideroLinkConfig, Typed,
};
use super::schema::{KnownKeys, Schema};
use super::v1alpha1;

/// How to decode one `(kind, version)`.
#[derive(Clone, Copy)]
pub struct Entry {
    /// Accepted keys of the spec.
    pub schema: fn() -> Schema,
    /// Builds the document from its metadata and spec.
    pub decode: fn(DocumentMeta, Value) -> Result<Document, serde_yaml::Error>,
}

impl Entry {
    /// The entry for a named document kind.
    pub fn of<T: DocumentSpec>() -> Self {
        Entry {
            schema: T::schema,
            decode: |meta, spec| {
                let spec: T = serde_yaml::from_value(spec)?;
                Ok(T::wrap(Typed { meta, spec }))
            },
        }
    }

    fn v1alpha1() -> Self {
        Entry {
            schema: v1alpha1::Config::schema,
            decode: |_, spec| {
                let config: v1alpha1::Config = serde_yaml::from_value(spec)?;
                Ok(Document::V1Alpha1(Box::new(config)))
            },
        }
    }
}

/// Registered document kinds.
#[derive(Clone, Default)]
pub struct Registry {
    kinds: BTreeMap<String, BTreeMap<String, Entry>>,
}

lazy_static! {
    static ref DEFAULT: Registry = Registry::with_defaults();
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in document kind.
    pub fn with_defaults() -> Self {
        let mut registry = Registry::new();
        registry.register(v1alpha1::VERSION, "", Entry::v1alpha1());
        registry.register(v1alpha1::VERSION, v1alpha1::VERSION, Entry::v1alpha1());
        registry.register_spec::<SideroLinkConfig>();
        registry.register_spec::<NetworkRuleConfig>();
        registry.register_spec::<KubeletOverlayConfig>();
        registry.register_spec::<ExtensionServiceConfig>();
        registry
    }

    /// The process-wide registry used by [`decode`](super::decode).
    pub fn global() -> &'static Registry {
        &DEFAULT
    }

    /// Registers a decoder.
    ///
    /// # Panics
    ///
    /// Registering the same `(kind, version)` twice is a programming error
    /// and panics.
    pub fn register(&mut self, kind: &str, version: &str, entry: Entry) {
        let versions = self.kinds.entry(kind.to_string()).or_default();
        if versions.insert(version.to_string(), entry).is_some() {
            panic!("document kind {:?} version {:?} is already registered", kind, version);
        }
    }

    /// Registers a named document kind.
    pub fn register_spec<T: DocumentSpec>(&mut self) {
        self.register(T::KIND, T::VERSION, Entry::of::<T>());
    }

    /// Looks up the decoder for `(kind, version)`.
    pub fn lookup(&self, kind: &str, version: &str) -> Option<Entry> {
        self.kinds.get(kind)?.get(version).copied()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.kinds.keys().cloned().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builtin_kinds_are_registered() {
        let registry = Registry::global();
        assert!(registry.lookup("SideroLinkConfig", "v1alpha1").is_some());
        assert!(registry.lookup("v1alpha1", "").is_some());
        assert!(registry.lookup("SideroLinkConfig", "v1alpha2").is_none());
        assert!(registry.kinds().contains(&"NetworkRuleConfig".to_string()));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut registry = Registry::with_defaults();
        registry.register_spec::<SideroLinkConfig>();
    }
}
