use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::merge::{child_path, Merge, MergeError};
use super::schema::{KnownKeys, Schema};

/// Free-form YAML carried through the config untouched, such as kubelet
/// `extraConfig` or admission plugin configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unstructured(pub Value);

impl Unstructured {
    /// An empty mapping.
    pub fn empty_map() -> Self {
        Unstructured(Value::Mapping(Mapping::new()))
    }

    /// True for null and empty mappings.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Mapping(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Recursive copy of the value.
    pub fn deep_copy(&self) -> Unstructured {
        Unstructured(deep_copy_value(&self.0))
    }

    /// The top-level mapping, if the value is one.
    pub fn as_mapping(&self) -> Option<&Mapping> {
        self.0.as_mapping()
    }

    /// Top-level keys, if the value is a mapping.
    pub fn keys(&self) -> Vec<String> {
        match &self.0 {
            Value::Mapping(m) => m.iter().filter_map(|(k, _)| k.as_str().map(String::from)).collect(),
            _ => Vec::new(),
        }
    }
}

fn deep_copy_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(*b),
        Value::Number(n) => Value::Number(n.clone()),
        Value::String(s) => Value::String(s.clone()),
        Value::Sequence(items) => Value::Sequence(items.iter().map(deep_copy_value).collect()),
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .iter()
                .map(|(k, v)| (deep_copy_value(k), deep_copy_value(v)))
                .collect(),
        ),
    }
}

/// Deep merge of YAML values: mappings merge by key, anything else is
/// replaced by a non-null patch. A mapping can't be merged with a
/// non-mapping.
pub fn merge_values(base: &mut Value, patch: Value, path: &str) -> Result<(), MergeError> {
    match (base, patch) {
        (_, Value::Null) => Ok(()),
        (base @ Value::Null, patch) => {
            *base = patch;
            Ok(())
        }
        (Value::Mapping(base), Value::Mapping(patch)) => {
            for (key, value) in patch {
                let child = child_path(path, key.as_str().unwrap_or("?"));
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value, &child)?,
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        (Value::Mapping(_), _) | (_, Value::Mapping(_)) => Err(MergeError {
            path: path.to_string(),
            reason: "can't merge a mapping with a non-mapping value".to_string(),
        }),
        (base, patch) => {
            *base = patch;
            Ok(())
        }
    }
}

impl Merge for Unstructured {
    fn merge(&mut self, other: Self, path: &str) -> Result<(), MergeError> {
        merge_values(&mut self.0, other.0, path)
    }
}

impl KnownKeys for Unstructured {
    fn schema() -> Schema {
        Schema::Any
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn yaml(s: &str) -> Unstructured {
        Unstructured(serde_yaml::from_str(s).unwrap())
    }

    #[test]
    fn deep_copy_is_independent() {
        let original = yaml("a:\n  b: [1, 2]\n  c: true\n");
        let mut copy = original.deep_copy();
        assert_eq!(original, copy);
        copy.merge(yaml("a:\n  c: false\n"), "").unwrap();
        assert_ne!(original, copy);
    }

    #[test]
    fn mappings_merge_recursively() {
        let mut base = yaml("a:\n  b: 1\n  c: 2\nlist: [1]\n");
        base.merge(yaml("a:\n  c: 3\n  d: 4\nlist: [2]\n"), "").unwrap();
        assert_eq!(yaml("a:\n  b: 1\n  c: 3\n  d: 4\nlist: [2]\n"), base);
    }

    #[test]
    fn mapping_conflict_names_the_path() {
        let mut base = yaml("a:\n  b:\n    c: 1\n");
        let err = base.merge(yaml("a:\n  b: scalar\n"), "").unwrap_err();
        assert_eq!("a.b", err.path);
    }
}
