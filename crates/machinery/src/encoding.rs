//! YAML helpers shared by the config encoder and the manifest renderers.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::config::merge::{Merge, MergeError};
use crate::config::schema::{KnownKeys, Schema};

const DOCUMENT_MARKER: &str = "---\n";

/// Bytes that travel through YAML as a base64 string.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Wraps raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Base64Bytes(bytes.into())
    }

    /// True when no bytes are held.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The raw bytes as UTF-8, lossily.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl fmt::Debug for Base64Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base64Bytes({} bytes)", self.0.len())
    }
}

impl From<&str> for Base64Bytes {
    fn from(s: &str) -> Self {
        Base64Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Base64Bytes {
    fn from(s: String) -> Self {
        Base64Bytes(s.into_bytes())
    }
}

impl Serialize for Base64Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(&self.0))
    }
}

struct Base64Visitor;

impl<'de> Visitor<'de> for Base64Visitor {
    type Value = Base64Bytes;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a base64 encoded string")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Base64Bytes, E> {
        let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        base64::decode(&compact)
            .map(Base64Bytes)
            .map_err(|e| E::custom(format!("invalid base64 value: {}", e)))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Base64Bytes, E> {
        Ok(Base64Bytes::default())
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(Base64Visitor)
    }
}

impl Merge for Base64Bytes {
    fn merge(&mut self, other: Self, _path: &str) -> Result<(), MergeError> {
        if !other.is_empty() {
            *self = other;
        }
        Ok(())
    }
}

impl KnownKeys for Base64Bytes {
    fn schema() -> Schema {
        Schema::Scalar
    }
}

/// Removes the leading `---` line serde_yaml puts in front of every
/// document.
pub fn strip_document_marker(yaml: &str) -> &str {
    yaml.strip_prefix(DOCUMENT_MARKER).unwrap_or(yaml)
}

/// Serializes a value as a single YAML document without a leading marker.
pub fn to_yaml<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_yaml::Error> {
    let encoded = serde_yaml::to_string(value)?;
    let mut out = strip_document_marker(&encoded).to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

/// Serializes values as a multi-document YAML stream separated by `---`.
pub fn to_yaml_documents<T: Serialize>(values: &[T]) -> Result<String, serde_yaml::Error> {
    let mut docs = Vec::with_capacity(values.len());
    for value in values {
        docs.push(to_yaml(value)?);
    }
    Ok(join_documents(docs))
}

/// Joins already encoded documents with `---` separators.
pub fn join_documents<I: IntoIterator<Item = String>>(docs: I) -> String {
    docs.into_iter().collect::<Vec<_>>().join(DOCUMENT_MARKER)
}

/// Parses a YAML stream into its documents, dropping empty ones.
pub fn split_documents(stream: &str) -> Result<Vec<serde_yaml::Value>, serde_yaml::Error> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(stream) {
        let value = serde_yaml::Value::deserialize(document)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        ca: Base64Bytes,
    }

    #[test]
    fn base64_bytes_travel_as_strings() {
        let holder = Holder {
            ca: Base64Bytes::from("hello"),
        };
        let yaml = to_yaml(&holder).unwrap();
        assert_eq!("ca: aGVsbG8=\n", yaml);
        let back: Holder = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(holder, back);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = serde_yaml::from_str::<Holder>("ca: '!!!'\n").unwrap_err();
        assert!(err.to_string().contains("invalid base64 value"));
    }

    #[test]
    fn documents_are_joined_and_split() {
        let mut a = BTreeMap::new();
        a.insert("a", 1);
        let mut b = BTreeMap::new();
        b.insert("b", 2);
        let stream = to_yaml_documents(&[a, b]).unwrap();
        assert_eq!("a: 1\n---\nb: 2\n", stream);
        let docs = split_documents(&stream).unwrap();
        assert_eq!(2, docs.len());
        assert_eq!(Some(2), docs[1]["b"].as_u64());
    }

    #[test]
    fn splitting_follows_yaml_stream_rules() {
        let stream = "a: 1\n...\n--- \nscript: |\n  ---\n  echo hi\n---\n---\nb: 2\n";
        let docs = split_documents(stream).unwrap();
        assert_eq!(3, docs.len());
        assert_eq!(Some(1), docs[0]["a"].as_u64());
        assert_eq!(Some("---\necho hi\n"), docs[1]["script"].as_str());
        assert_eq!(Some(2), docs[2]["b"].as_u64());
        assert!(split_documents("a: [1\n").is_err());
    }
}
