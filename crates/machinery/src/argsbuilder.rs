//! Command line argument maps with per-key merge policies.
//!
//! Component arguments are built from defaults and then merged with the
//! `extraArgs` a user supplied. Every key has a [`MergePolicy`]: most keys
//! are overwritten, list-like keys accumulate values and keys that carry
//! machine managed paths are denied.

use std::collections::{BTreeMap, HashMap};

/// A user argument overrides a key that may not be changed.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("extra arg {0:?} is not allowed")]
pub struct DeniedError(pub String);

/// How a value for an existing key is combined with the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
    /// The new value replaces the current one.
    Overwrite,
    /// Values are appended, duplicates dropped.
    Additive,
    /// The key may not be set by a merge.
    Denied,
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy::Overwrite
    }
}

/// Per-key merge policies. Keys without an entry are overwritten.
#[derive(Clone, Debug, Default)]
pub struct MergePolicies(HashMap<String, MergePolicy>);

impl MergePolicies {
    /// No special policies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `policy` for every key of `keys`.
    pub fn with(mut self, policy: MergePolicy, keys: &[&str]) -> Self {
        for key in keys {
            self.0.insert(key.to_string(), policy);
        }
        self
    }

    /// Policy of `key`.
    pub fn get(&self, key: &str) -> MergePolicy {
        self.0.get(key).copied().unwrap_or_default()
    }
}

/// An argument map. Values are lists, written joined by `,`.
///
/// Plain values are kept verbatim as a single element; only keys merged
/// under [`MergePolicy::Additive`] are split into their `,` separated parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args(BTreeMap<String, Vec<String>>);

/// Splits a comma separated value, trimming every element.
fn split_value(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

impl Args {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl AsRef<str>) -> &mut Self {
        self.0.insert(key.into(), vec![value.as_ref().to_string()]);
        self
    }

    /// Sets `key` to a list of values.
    pub fn set_list<I, S>(&mut self, key: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// The value of `key`, joined.
    pub fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|v| v.join(","))
    }

    /// The values of `key`.
    pub fn values(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True if `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(key)
    }

    /// Merges `other` into the map under `policies`.
    ///
    /// Fails on the first denied key; keys merged before it stay merged.
    pub fn merge(&mut self, other: impl Into<Args>, policies: &MergePolicies) -> Result<(), DeniedError> {
        for (key, values) in other.into().0 {
            match policies.get(&key) {
                MergePolicy::Denied => return Err(DeniedError(key)),
                MergePolicy::Overwrite => {
                    self.0.insert(key, values);
                }
                MergePolicy::Additive => {
                    let current = self.0.entry(key).or_default();
                    let mut merged: Vec<String> = Vec::new();
                    for value in current.iter().chain(values.iter()).flat_map(|v| split_value(v)) {
                        if !merged.contains(&value) {
                            merged.push(value);
                        }
                    }
                    *current = merged;
                }
            }
        }
        Ok(())
    }

    /// Every argument as `--key=value`, ordered by key.
    pub fn args(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(key, values)| format!("--{}={}", key, values.join(",")))
            .collect()
    }

    /// Key and joined value pairs, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, String)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.join(",")))
    }
}

impl From<BTreeMap<String, String>> for Args {
    fn from(map: BTreeMap<String, String>) -> Self {
        Args(map.into_iter().map(|(k, v)| (k, vec![v])).collect())
    }
}

impl From<&BTreeMap<String, String>> for Args {
    fn from(map: &BTreeMap<String, String>) -> Self {
        Args(map.iter().map(|(k, v)| (k.clone(), vec![v.clone()])).collect())
    }
}

impl<'a> From<Vec<(&'a str, &'a str)>> for Args {
    fn from(pairs: Vec<(&'a str, &'a str)>) -> Self {
        Args(pairs.into_iter().map(|(k, v)| (k.to_string(), vec![v.to_string()])).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn single(value: &str) -> Args {
        let mut args = Args::new();
        args.set("param", value);
        args
    }

    #[test]
    fn additive_keys_accumulate_unique_values() {
        let mut args = single("value1,value2,value3");
        let policies = MergePolicies::new().with(MergePolicy::Additive, &["param"]);
        args.merge(single("value2, value10"), &policies).unwrap();
        assert_eq!(Some("value1,value2,value3,value10".to_string()), args.get("param"));
    }

    #[test]
    fn denied_keys_fail() {
        let mut args = single("value1");
        let policies = MergePolicies::new().with(MergePolicy::Denied, &["param"]);
        let err = args.merge(single("value2"), &policies).unwrap_err();
        assert_eq!(r#"extra arg "param" is not allowed"#, err.to_string());
        assert_eq!(Some("value1".to_string()), args.get("param"));
    }

    #[test]
    fn other_keys_are_overwritten() {
        let mut args = single("value1");
        args.merge(single("value2"), &MergePolicies::new()).unwrap();
        assert_eq!(Some("value2".to_string()), args.get("param"));
    }

    #[test]
    fn plain_values_keep_their_commas() {
        let mut args = single("a=1,b=2");
        args.merge(
            vec![("feature-gates", "Foo=true,Bar=false"), ("param", "x, y")],
            &MergePolicies::new(),
        )
        .unwrap();
        assert_eq!(vec!["Foo=true,Bar=false".to_string()], args.values("feature-gates"));
        assert_eq!(vec!["x, y".to_string()], args.values("param"));
        assert_eq!(vec!["--feature-gates=Foo=true,Bar=false", "--param=x, y"], args.args());
    }

    #[test]
    fn additive_merge_splits_set_lists_too() {
        let mut args = Args::new();
        args.set_list("node-ip", vec!["10.0.0.0/8"]);
        let policies = MergePolicies::new().with(MergePolicy::Additive, &["node-ip"]);
        args.merge(vec![("node-ip", "10.0.0.0/8,fd00::/8")], &policies).unwrap();
        assert_eq!(vec!["10.0.0.0/8".to_string(), "fd00::/8".to_string()], args.values("node-ip"));
    }

    #[test]
    fn args_are_sorted_flags() {
        let args: Args = vec![("b", "2"), ("a", "1,x"), ("c", "")].into();
        assert_eq!(vec!["--a=1,x", "--b=2", "--c="], args.args());
    }
}
