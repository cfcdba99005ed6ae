//! Static description of the keys each config type accepts, used to report
//! unknown keys when decoding.
use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

/// Shape of a config value.
#[derive(Clone, Debug, PartialEq)]
pub enum Schema {
    /// Arbitrary content; nothing below is checked.
    Any,
    /// A scalar.
    Scalar,
    /// A list of values of the inner shape.
    Seq(Box<Schema>),
    /// A map with arbitrary keys and values of the inner shape.
    Map(Box<Schema>),
    /// A struct with a fixed set of keys.
    Struct(Vec<(&'static str, Schema)>),
}

/// Types that can describe their accepted keys.
pub trait KnownKeys {
    /// Shape of this type.
    fn schema() -> Schema;
}

/// Shape of a struct field, inferred from an accessor.
pub fn field<S, T: KnownKeys>(_accessor: fn(&S) -> &T) -> Schema {
    T::schema()
}

macro_rules! scalar_keys {
    ($($t:ty),*) => {
        $(impl KnownKeys for $t {
            fn schema() -> Schema {
                Schema::Scalar
            }
        })*
    };
}

scalar_keys!(String, bool, u8, u16, u32, u64, i32, i64, f64);

impl<T: KnownKeys> KnownKeys for Option<T> {
    fn schema() -> Schema {
        T::schema()
    }
}

impl<T: KnownKeys> KnownKeys for Box<T> {
    fn schema() -> Schema {
        T::schema()
    }
}

impl<T: KnownKeys> KnownKeys for Vec<T> {
    fn schema() -> Schema {
        Schema::Seq(Box::new(T::schema()))
    }
}

impl<T: KnownKeys> KnownKeys for BTreeMap<String, T> {
    fn schema() -> Schema {
        Schema::Map(Box::new(T::schema()))
    }
}

/// Returns the part of `value` that `schema` doesn't know about, keeping the
/// path of keys leading to it. `None` when every key is known.
pub fn unknown_keys(value: &Value, schema: &Schema) -> Option<Value> {
    match (schema, value) {
        (Schema::Struct(fields), Value::Mapping(mapping)) => {
            let mut unknown = Mapping::new();
            for (key, child) in mapping {
                let known = key
                    .as_str()
                    .and_then(|k| fields.iter().find(|(name, _)| *name == k));
                match known {
                    Some((_, child_schema)) => {
                        if let Some(sub) = unknown_keys(child, child_schema) {
                            unknown.insert(key.clone(), sub);
                        }
                    }
                    None => {
                        unknown.insert(key.clone(), child.clone());
                    }
                }
            }
            if unknown.is_empty() {
                None
            } else {
                Some(Value::Mapping(unknown))
            }
        }
        (Schema::Map(inner), Value::Mapping(mapping)) => {
            let mut unknown = Mapping::new();
            for (key, child) in mapping {
                if let Some(sub) = unknown_keys(child, inner) {
                    unknown.insert(key.clone(), sub);
                }
            }
            if unknown.is_empty() {
                None
            } else {
                Some(Value::Mapping(unknown))
            }
        }
        (Schema::Seq(inner), Value::Sequence(items)) => {
            let unknown: Vec<Value> = items.iter().filter_map(|item| unknown_keys(item, inner)).collect();
            if unknown.is_empty() {
                None
            } else {
                Some(Value::Sequence(unknown))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Inner {
        first: String,
    }

    impl KnownKeys for Inner {
        fn schema() -> Schema {
            Schema::Struct(vec![("first", field(|s: &Inner| &s.first))])
        }
    }

    struct Outer {
        inner: Option<Inner>,
        list: Vec<Inner>,
        labels: BTreeMap<String, String>,
    }

    impl KnownKeys for Outer {
        fn schema() -> Schema {
            Schema::Struct(vec![
                ("inner", field(|s: &Outer| &s.inner)),
                ("list", field(|s: &Outer| &s.list)),
                ("labels", field(|s: &Outer| &s.labels)),
            ])
        }
    }

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn known_document_has_no_unknowns() {
        let v = yaml("inner:\n  first: a\nlist:\n  - first: b\nlabels:\n  anything: goes\n");
        assert_eq!(None, unknown_keys(&v, &Outer::schema()));
    }

    #[test]
    fn unknown_keys_keep_their_path() {
        let v = yaml("inner:\n  first: a\n  extra: me\nlist:\n  - first: b\n  - first: c\n    bad: 1\nother: x\n");
        let unknown = unknown_keys(&v, &Outer::schema()).unwrap();
        assert_eq!(
            yaml("inner:\n  extra: me\nlist:\n  - bad: 1\nother: x\n"),
            unknown
        );
    }
}
