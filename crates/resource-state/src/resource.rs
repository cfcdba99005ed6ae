use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::metadata::Metadata;

/// A typed resource spec.
///
/// `TYPE` names the resource type in the store and `NAMESPACE` is the
/// namespace resources of this type live in by default.
pub trait ResourceSpec:
    Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
    /// Resource type name, e.g. `KubeletSpecs.kubernetes.talos.dev`.
    const TYPE: &'static str;
    /// Default namespace.
    const NAMESPACE: &'static str;
}

/// A resource with a typed spec.
#[derive(Clone, Debug, PartialEq)]
pub struct Resource<S> {
    metadata: Metadata,
    spec: S,
}

impl<S: ResourceSpec> Resource<S> {
    /// A new resource `id` in the default namespace of `S`.
    pub fn new(id: impl Into<String>, spec: S) -> Self {
        Resource {
            metadata: Metadata::new(S::NAMESPACE, S::TYPE, id),
            spec,
        }
    }

    /// A new resource `id` in an explicit namespace.
    pub fn new_in(namespace: impl Into<String>, id: impl Into<String>, spec: S) -> Self {
        Resource {
            metadata: Metadata::new(namespace, S::TYPE, id),
            spec,
        }
    }

    /// Metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Typed spec.
    pub fn spec(&self) -> &S {
        &self.spec
    }

    /// Mutable typed spec.
    pub fn spec_mut(&mut self) -> &mut S {
        &mut self.spec
    }

    /// Consumes the resource returning its spec.
    pub fn into_spec(self) -> S {
        self.spec
    }

    /// Type-erased form, as kept by the store.
    pub fn to_raw(&self) -> Result<RawResource> {
        let spec = serde_json::to_value(&self.spec).map_err(|source| Error::SchemaMismatch {
            pointer: self.metadata.pointer(),
            source,
        })?;
        Ok(RawResource {
            metadata: self.metadata.clone(),
            spec,
        })
    }

    /// Recovers the typed form from a type-erased resource.
    pub fn from_raw(raw: RawResource) -> Result<Self> {
        let spec = serde_json::from_value(raw.spec).map_err(|source| Error::SchemaMismatch {
            pointer: raw.metadata.pointer(),
            source,
        })?;
        Ok(Resource {
            metadata: raw.metadata,
            spec,
        })
    }
}

/// A type-erased resource: metadata plus the spec as a JSON value.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResource {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec in its serialized form.
    pub spec: serde_json::Value,
}

impl RawResource {
    /// Converts to a typed resource.
    pub fn typed<S: ResourceSpec>(&self) -> Result<Resource<S>> {
        Resource::from_raw(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: u32,
    }

    impl ResourceSpec for Sample {
        const TYPE: &'static str = "Samples.test";
        const NAMESPACE: &'static str = "test";
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Other {
        name: String,
    }

    impl ResourceSpec for Other {
        const TYPE: &'static str = "Others.test";
        const NAMESPACE: &'static str = "test";
    }

    #[test]
    fn raw_conversion_keeps_metadata_and_spec() {
        let resource = Resource::new("a", Sample { value: 7 });
        let raw = resource.to_raw().unwrap();
        assert_eq!(serde_json::json!({"value": 7}), raw.spec);
        let back: Resource<Sample> = raw.typed().unwrap();
        assert_eq!(resource, back);
    }

    #[test]
    fn mismatched_schema_is_reported() {
        let raw = Resource::new("a", Sample { value: 7 }).to_raw().unwrap();
        let err = raw.typed::<Other>().unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }
}
