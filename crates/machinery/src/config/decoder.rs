//! Decoding of multi-document configuration streams.

use std::panic::{self, AssertUnwindSafe};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::document::{Document, DocumentMeta};
use super::registry::Registry;
use super::schema::{unknown_keys, KnownKeys, Schema};
use super::v1alpha1;
use crate::encoding::{split_documents, to_yaml};

/// Errors decoding a configuration stream.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    /// Malformed YAML or a value of the wrong type.
    #[error("failed to decode config: {0}")]
    Decode(String),
    /// `kind` is absent or empty.
    #[error("missing kind")]
    MissingKind,
    /// `version` is absent or empty.
    #[error("missing version")]
    MissingVersion,
    /// `spec` is absent.
    #[error("missing spec")]
    MissingSpec,
    /// `spec` is present but empty.
    #[error("missing spec content")]
    MissingSpecContent,
    /// Keys that no field accepts; carries the offending subtree as YAML.
    #[error("unknown keys found during decoding:\n{0}")]
    UnknownKeys(String),
    /// No decoder is registered for the discriminators.
    #[error("unknown document type: kind={kind:?}, version={version:?}")]
    UnknownDocument {
        /// Document kind.
        kind: String,
        /// Document version.
        version: String,
    },
    /// A second monolithic document.
    #[error("duplicate v1alpha1.Config")]
    DuplicateV1Alpha1,
    /// Two documents share kind and name.
    #[error("duplicate document: {0}")]
    Duplicate(String),
}

/// Decodes a configuration stream with the global registry.
pub fn decode(source: &[u8]) -> Result<Vec<Document>, DecodeError> {
    Decoder::new(Registry::global()).decode(source)
}

/// Decodes documents with a given registry.
pub struct Decoder<'a> {
    registry: &'a Registry,
}

impl<'a> Decoder<'a> {
    /// A decoder backed by `registry`.
    pub fn new(registry: &'a Registry) -> Self {
        Decoder { registry }
    }

    /// Decodes every document of `source`, in order. Empty documents are
    /// skipped.
    pub fn decode(&self, source: &[u8]) -> Result<Vec<Document>, DecodeError> {
        let text = std::str::from_utf8(source).map_err(|e| DecodeError::Decode(e.to_string()))?;

        let mut documents = Vec::new();
        for value in guarded(|| split_documents(text))? {
            documents.push(self.decode_value(value)?);
        }
        debug!(documents = documents.len(), "decoded config");
        Ok(documents)
    }

    fn decode_value(&self, value: Value) -> Result<Document, DecodeError> {
        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            _ => return Err(DecodeError::Decode("document is not a mapping".to_string())),
        };

        if is_legacy(&mapping) {
            let version = string_field(&mapping, "version").unwrap_or_default();
            let entry = self
                .registry
                .lookup(v1alpha1::VERSION, &version)
                .ok_or_else(|| DecodeError::UnknownDocument {
                    kind: v1alpha1::VERSION.to_string(),
                    version: version.clone(),
                })?;
            let value = Value::Mapping(mapping);
            check_unknown(&value, &(entry.schema)())?;
            return guarded(|| (entry.decode)(DocumentMeta::default(), value));
        }

        let kind = string_field(&mapping, "kind")
            .filter(|k| !k.is_empty())
            .ok_or(DecodeError::MissingKind)?;
        let version = string_field(&mapping, "version")
            .filter(|v| !v.is_empty())
            .ok_or(DecodeError::MissingVersion)?;
        let spec = mapping.get(&key("spec")).cloned().ok_or(DecodeError::MissingSpec)?;
        if is_empty(&spec) {
            return Err(DecodeError::MissingSpecContent);
        }

        let entry = self
            .registry
            .lookup(&kind, &version)
            .ok_or_else(|| DecodeError::UnknownDocument {
                kind: kind.clone(),
                version: version.clone(),
            })?;

        check_unknown(&spec, &(entry.schema)())?;
        check_unknown(&Value::Mapping(mapping.clone()), &envelope_schema())?;

        let meta = match mapping.get(&key("metadata")) {
            Some(meta) => guarded(|| serde_yaml::from_value::<DocumentMeta>(meta.clone()))?,
            None => DocumentMeta::default(),
        };
        guarded(|| (entry.decode)(meta, spec))
    }
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn string_field(mapping: &Mapping, name: &str) -> Option<String> {
    mapping.get(&key(name)).and_then(Value::as_str).map(String::from)
}

/// A document without `kind` that carries the machine or cluster sections
/// directly is the legacy monolithic form.
fn is_legacy(mapping: &Mapping) -> bool {
    if mapping.contains_key(&key("kind")) {
        return false;
    }
    mapping.contains_key(&key("machine"))
        || mapping.contains_key(&key("cluster"))
        || (string_field(mapping, "version").as_deref() == Some(v1alpha1::VERSION)
            && !mapping.contains_key(&key("spec")))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Mapping(m) => m.is_empty(),
        Value::Sequence(s) => s.is_empty(),
        _ => false,
    }
}

fn envelope_schema() -> Schema {
    Schema::Struct(vec![
        ("kind", Schema::Scalar),
        ("version", Schema::Scalar),
        ("metadata", DocumentMeta::schema()),
        ("spec", Schema::Any),
    ])
}

fn check_unknown(value: &Value, schema: &Schema) -> Result<(), DecodeError> {
    match unknown_keys(value, schema) {
        None => Ok(()),
        Some(unknown) => {
            let rendered = to_yaml(&unknown).map_err(|e| DecodeError::Decode(e.to_string()))?;
            Err(DecodeError::UnknownKeys(rendered))
        }
    }
}

/// Runs a YAML operation, turning both its errors and any panic from the
/// YAML layer into [`DecodeError::Decode`].
fn guarded<T, F>(f: F) -> Result<T, DecodeError>
where
    F: FnOnce() -> Result<T, serde_yaml::Error>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(|e| DecodeError::Decode(e.to_string())),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic while decoding".to_string());
            Err(DecodeError::Decode(message))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::document::Typed;
    use crate::config::registry::Entry;
    use crate::config::schema::field;
    use std::collections::BTreeMap;

    struct MockItem {
        value: String,
    }

    impl KnownKeys for MockItem {
        fn schema() -> Schema {
            Schema::Struct(vec![("value", field(|s: &MockItem| &s.value))])
        }
    }

    struct MockSpec {
        map: BTreeMap<String, MockItem>,
    }

    impl KnownKeys for MockSpec {
        fn schema() -> Schema {
            Schema::Struct(vec![("map", field(|s: &MockSpec| &s.map))])
        }
    }

    fn mock_registry() -> Registry {
        let mut registry = Registry::with_defaults();
        registry.register(
            "mock",
            "v1alpha2",
            Entry {
                schema: MockSpec::schema,
                decode: |meta, _| Ok(Document::ExtensionService(Typed { meta, spec: Default::default() })),
            },
        );
        registry
    }

    #[test]
    fn unknown_keys_are_reported_with_their_path() {
        let registry = mock_registry();
        let source = "kind: mock\nversion: v1alpha2\nspec:\n  map:\n    first:\n      value: ok\n      extra: me\n";
        let err = Decoder::new(&registry).decode(source.as_bytes()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown keys found during decoding"));
        assert!(message.contains("map:\n  first:\n    extra: me\n"));
    }

    #[test]
    fn envelope_fields_are_required() {
        let registry = mock_registry();
        let decoder = Decoder::new(&registry);
        let cases = [
            ("version: v1alpha2\nspec:\n  map: {}\n", DecodeError::MissingKind),
            ("kind: mock\nspec:\n  map: {}\n", DecodeError::MissingVersion),
            ("kind: mock\nversion: v1alpha2\n", DecodeError::MissingSpec),
            ("kind: mock\nversion: v1alpha2\nspec: {}\n", DecodeError::MissingSpecContent),
        ];
        for (source, expected) in cases.iter() {
            assert_eq!(*expected, decoder.decode(source.as_bytes()).unwrap_err(), "{}", source);
        }
    }

    #[test]
    fn legacy_document_is_v1alpha1() {
        let docs = decode(b"machine:\n  type: worker\n").unwrap();
        match &docs[..] {
            [Document::V1Alpha1(config)] => assert_eq!("worker", config.machine().type_),
            other => panic!("unexpected documents {:?}", other),
        }
    }

    #[test]
    fn stream_keeps_document_order() {
        let source = "version: v1alpha1\nmachine:\n  type: controlplane\n---\nkind: SideroLinkConfig\nversion: v1alpha1\nmetadata:\n  name: link\nspec:\n  apiUrl: https://siderolink.api/join\n---\n";
        let docs = decode(source.as_bytes()).unwrap();
        assert_eq!(2, docs.len());
        assert_eq!("v1alpha1", docs[0].kind());
        assert_eq!("SideroLinkConfig", docs[1].kind());
        assert_eq!("link", docs[1].name());
    }

    #[test]
    fn unregistered_kind_is_rejected() {
        let err = decode(b"kind: Nope\nversion: v1\nspec:\n  a: b\n").unwrap_err();
        assert_eq!(
            DecodeError::UnknownDocument {
                kind: "Nope".into(),
                version: "v1".into()
            },
            err
        );
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(matches!(decode(b"machine: [unclosed\n"), Err(DecodeError::Decode(_))));
        assert!(matches!(decode(b"- a\n- b\n"), Err(DecodeError::Decode(_))));
        assert!(matches!(decode(&[0xff, 0xfe]), Err(DecodeError::Decode(_))));
        assert!(decode(b"").unwrap().is_empty());
    }

    #[test]
    fn misspelled_legacy_key() {
        let err = decode(b"version: v1alpha1\nmachine:\n  tipe: worker\n").unwrap_err();
        assert_eq!(DecodeError::UnknownKeys("machine:\n  tipe: worker\n".to_string()), err);
    }
}
