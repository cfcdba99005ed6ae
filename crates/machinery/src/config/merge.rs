//! Strategic merge of config values.
//!
//! Scalars are replaced by non-zero values, options merge their contents,
//! lists append, maps merge by key and structs merge field by field.
use std::collections::BTreeMap;

/// A failed merge, naming the first conflicting path.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("merge conflict at {path:?}: {reason}")]
pub struct MergeError {
    /// Dotted path of the conflicting value.
    pub path: String,
    /// What conflicted.
    pub reason: String,
}

/// Types that can merge another value of the same type into themselves.
pub trait Merge: Sized {
    /// Merges `other` into `self`. `path` names `self` in error messages.
    fn merge(&mut self, other: Self, path: &str) -> Result<(), MergeError>;
}

/// Path of a child value.
pub fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

impl Merge for String {
    fn merge(&mut self, other: Self, _path: &str) -> Result<(), MergeError> {
        if !other.is_empty() {
            *self = other;
        }
        Ok(())
    }
}

impl Merge for bool {
    fn merge(&mut self, other: Self, _path: &str) -> Result<(), MergeError> {
        if other {
            *self = true;
        }
        Ok(())
    }
}

macro_rules! numeric_merge {
    ($($t:ty),*) => {
        $(impl Merge for $t {
            fn merge(&mut self, other: Self, _path: &str) -> Result<(), MergeError> {
                if other != 0 as $t {
                    *self = other;
                }
                Ok(())
            }
        })*
    };
}

numeric_merge!(u8, u16, u32, u64, i32, i64, f64);

impl<T: Merge> Merge for Option<T> {
    fn merge(&mut self, other: Self, path: &str) -> Result<(), MergeError> {
        let other = match other {
            Some(other) => other,
            None => return Ok(()),
        };
        match self {
            Some(current) => current.merge(other, path),
            None => {
                *self = Some(other);
                Ok(())
            }
        }
    }
}

impl<T: Merge> Merge for Box<T> {
    fn merge(&mut self, other: Self, path: &str) -> Result<(), MergeError> {
        self.as_mut().merge(*other, path)
    }
}

impl<T> Merge for Vec<T> {
    fn merge(&mut self, other: Self, _path: &str) -> Result<(), MergeError> {
        self.extend(other);
        Ok(())
    }
}

impl<T: Merge> Merge for BTreeMap<String, T> {
    fn merge(&mut self, other: Self, path: &str) -> Result<(), MergeError> {
        for (key, value) in other {
            let child = child_path(path, &key);
            match self.get_mut(&key) {
                Some(current) => current.merge(value, &child)?,
                None => {
                    self.insert(key, value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_values_do_not_override() {
        let mut s = "a".to_string();
        s.merge(String::new(), "s").unwrap();
        assert_eq!("a", s);

        let mut n = 5u32;
        n.merge(0, "n").unwrap();
        assert_eq!(5, n);
        n.merge(7, "n").unwrap();
        assert_eq!(7, n);

        let mut b = true;
        b.merge(false, "b").unwrap();
        assert!(b);
    }

    #[test]
    fn lists_append_and_maps_merge_by_key() {
        let mut list = vec![1u32, 2];
        list.merge(vec![3], "list").unwrap();
        assert_eq!(vec![1, 2, 3], list);

        let mut map: BTreeMap<String, String> = vec![("a".into(), "1".into()), ("b".into(), "2".into())]
            .into_iter()
            .collect();
        let patch: BTreeMap<String, String> = vec![("b".into(), "3".into()), ("c".into(), "4".into())]
            .into_iter()
            .collect();
        map.merge(patch, "map").unwrap();
        assert_eq!(Some(&"1".to_string()), map.get("a"));
        assert_eq!(Some(&"3".to_string()), map.get("b"));
        assert_eq!(Some(&"4".to_string()), map.get("c"));
    }

    #[test]
    fn options_merge_contents() {
        let mut o: Option<String> = None;
        o.merge(Some("x".into()), "o").unwrap();
        assert_eq!(Some("x".to_string()), o);
        o.merge(None, "o").unwrap();
        assert_eq!(Some("x".to_string()), o);
    }
}
