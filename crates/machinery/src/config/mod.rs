//! The machine configuration model.
//!
//! A configuration is a stream of YAML documents. Each document is
//! identified by its `kind` and `version` and decodes into one arm of
//! [`Document`]. The monolithic [`v1alpha1::Config`] document describes the
//! machine and the cluster; the other kinds carry narrower settings. A
//! [`Container`] holds the documents of one configuration, validates them
//! and encodes them back.

/// Implements [`schema::KnownKeys`] and [`merge::Merge`] for a config
/// struct from the list of its fields and their YAML keys. The keys must
/// match the serde names of the fields.
macro_rules! config_type {
    ($ty:ident { $($field:ident => $key:literal $(| $alias:literal)*),* $(,)? }) => {
        impl $crate::config::schema::KnownKeys for $ty {
            fn schema() -> $crate::config::schema::Schema {
                $crate::config::schema::Schema::Struct(vec![
                    $(
                        ($key, $crate::config::schema::field(|s: &$ty| &s.$field)),
                        $( ($alias, $crate::config::schema::field(|s: &$ty| &s.$field)), )*
                    )*
                ])
            }
        }

        impl $crate::config::merge::Merge for $ty {
            #[allow(unused_variables)]
            fn merge(
                &mut self,
                other: Self,
                path: &str,
            ) -> Result<(), $crate::config::merge::MergeError> {
                $(
                    $crate::config::merge::Merge::merge(
                        &mut self.$field,
                        other.$field,
                        &$crate::config::merge::child_path(path, $key),
                    )?;
                )*
                Ok(())
            }
        }
    };
}

pub mod container;
pub mod contract;
pub mod decoder;
pub mod document;
pub mod encoder;
pub mod merge;
pub mod registry;
pub mod schema;
pub mod units;
pub mod unstructured;
pub mod v1alpha1;
pub mod validation;

pub use container::Container;
pub use contract::{Contract, Features};
pub use decoder::{decode, DecodeError};
pub use document::{Document, DocumentMeta};
pub use encoder::{CommentsMode, EncoderOptions};
pub use unstructured::Unstructured;
pub use validation::{RuntimeMode, ValidationError, ValidationOptions, Warnings};

/// Skips serializing values equal to their default.
pub(crate) fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}
