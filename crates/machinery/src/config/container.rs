//! A set of documents forming one machine configuration.

use anyhow::Context;
use tracing::debug;

use super::decoder::{decode, DecodeError};
use super::document::{
    Document, DocumentSpec, ExtensionServiceConfig, KubeletOverlayConfig, NetworkRuleConfig, SideroLinkConfig,
    Typed,
};
use super::encoder::{encode_documents, EncoderOptions};
use super::merge::{Merge, MergeError};
use super::v1alpha1::Config;
use super::validation::{RuntimeMode, ValidationError, ValidationOptions, Warnings};

/// Documents of one configuration, with at most one `v1alpha1` document.
///
/// A container decoded with [`Container::from_bytes`] is read-only and keeps
/// its source; [`Container::bytes`] returns those bytes verbatim. Every
/// derived container (patched, merged, redacted or cloned) is mutable and
/// re-encodes on demand. Equality compares the documents only.
#[derive(Debug)]
pub struct Container {
    /// The `v1alpha1` document, when present, is kept first.
    documents: Vec<Document>,
    source: Option<Vec<u8>>,
}

impl Container {
    /// A mutable container holding `documents`.
    pub fn new(documents: Vec<Document>) -> Result<Self, DecodeError> {
        let mut container = Container {
            documents: Vec::with_capacity(documents.len()),
            source: None,
        };
        for document in documents {
            container.add(document)?;
        }
        Ok(container)
    }

    /// Decodes `source` into a read-only container.
    pub fn from_bytes(source: &[u8]) -> Result<Self, DecodeError> {
        let mut container = Container::new(decode(source)?)?;
        container.source = Some(source.to_vec());
        debug!(documents = container.documents.len(), "loaded config container");
        Ok(container)
    }

    /// An empty mutable container.
    pub fn empty() -> Self {
        Container {
            documents: Vec::new(),
            source: None,
        }
    }

    fn add(&mut self, document: Document) -> Result<(), DecodeError> {
        match &document {
            Document::V1Alpha1(_) => {
                if self.raw_v1alpha1().is_some() {
                    return Err(DecodeError::DuplicateV1Alpha1);
                }
                self.documents.insert(0, document);
            }
            _ => {
                if self.documents.iter().any(|d| same_identity(d, &document)) {
                    return Err(DecodeError::Duplicate(format!("{}/{}", document.kind(), document.name())));
                }
                self.documents.push(document);
            }
        }
        Ok(())
    }

    /// True if the container preserves its source bytes.
    pub fn readonly(&self) -> bool {
        self.source.is_some()
    }

    /// A deep copy that is always mutable.
    pub fn to_mutable(&self) -> Container {
        Container {
            documents: self.documents.clone(),
            source: None,
        }
    }

    /// Every document, `v1alpha1` first.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// The monolithic document, if any.
    pub fn raw_v1alpha1(&self) -> Option<&Config> {
        match self.documents.first() {
            Some(Document::V1Alpha1(config)) => Some(config.as_ref()),
            _ => None,
        }
    }

    /// The first document of kind `T`.
    pub fn first_document_of<T: DocumentSpec>(&self) -> Option<&Typed<T>> {
        self.documents.iter().find_map(T::unwrap)
    }

    /// Every document of kind `T`, in insertion order.
    pub fn documents_of<T: DocumentSpec>(&self) -> Vec<&Typed<T>> {
        self.documents.iter().filter_map(T::unwrap).collect()
    }

    /// The SideroLink connection, if configured.
    pub fn siderolink(&self) -> Option<&Typed<SideroLinkConfig>> {
        self.first_document_of()
    }

    /// Ingress firewall rules.
    pub fn network_rules(&self) -> Vec<&Typed<NetworkRuleConfig>> {
        self.documents_of()
    }

    /// Kubelet configuration overlays.
    pub fn kubelet_overlays(&self) -> Vec<&Typed<KubeletOverlayConfig>> {
        self.documents_of()
    }

    /// Extension service configurations.
    pub fn extension_services(&self) -> Vec<&Typed<ExtensionServiceConfig>> {
        self.documents_of()
    }

    /// Applies `patch` to a copy of the `v1alpha1` document (created empty
    /// when absent) and returns the patched mutable container.
    pub fn patch_v1alpha1<F>(&self, patch: F) -> anyhow::Result<Container>
    where
        F: FnOnce(&mut Config) -> anyhow::Result<()>,
    {
        let mut patched = self.to_mutable();
        match patched.documents.first_mut() {
            Some(Document::V1Alpha1(config)) => patch(config.as_mut())?,
            _ => {
                let mut config = Config {
                    version: super::v1alpha1::VERSION.to_string(),
                    ..Default::default()
                };
                patch(&mut config)?;
                patched.documents.insert(0, Document::V1Alpha1(Box::new(config)));
            }
        }
        Ok(patched)
    }

    /// Strategic merge of `other` over this container. The `v1alpha1`
    /// documents merge field by field; a named document replaces the one with
    /// the same kind and name, or is appended.
    pub fn merge(&self, other: &Container) -> Result<Container, MergeError> {
        let mut merged = self.to_mutable();
        for document in &other.documents {
            match (document, merged.documents.first_mut()) {
                (Document::V1Alpha1(patch), Some(Document::V1Alpha1(base))) => {
                    base.merge(patch.clone(), "")?;
                }
                (Document::V1Alpha1(_), _) => merged.documents.insert(0, document.clone()),
                _ => match merged.documents.iter_mut().find(|d| same_identity(d, document)) {
                    Some(existing) => *existing = document.clone(),
                    None => merged.documents.push(document.clone()),
                },
            }
        }
        Ok(merged)
    }

    /// Validates every document. Errors are prefixed with the kind of the
    /// document that raised them; strict mode turns warnings into errors.
    pub fn validate(&self, mode: RuntimeMode, opts: &ValidationOptions) -> Result<Warnings, ValidationError> {
        let mut result = ValidationError::new();
        for document in &self.documents {
            document.validate_into(mode, opts, &mut result);
        }
        result.finish(opts.strict)
    }

    /// A mutable copy with every secret replaced by `placeholder`.
    pub fn redact(&self, placeholder: &str) -> Container {
        Container {
            documents: self.documents.iter().map(|d| d.redact(placeholder)).collect(),
            source: None,
        }
    }

    /// Encodes the documents with the given options, `v1alpha1` first.
    pub fn encode(&self, opts: &EncoderOptions) -> Result<String, serde_yaml::Error> {
        encode_documents(&self.documents, opts)
    }

    /// The configuration bytes: the preserved source for a read-only
    /// container, the plain encoding otherwise.
    pub fn bytes(&self) -> anyhow::Result<Vec<u8>> {
        match &self.source {
            Some(source) => Ok(source.clone()),
            None => Ok(self
                .encode(&EncoderOptions::default())
                .context("failed to encode config")?
                .into_bytes()),
        }
    }
}

impl Clone for Container {
    fn clone(&self) -> Self {
        self.to_mutable()
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.documents == other.documents
    }
}

fn same_identity(a: &Document, b: &Document) -> bool {
    if a.kind() != b.kind() {
        return false;
    }
    match (a.meta(), b.meta()) {
        (Some(a), Some(b)) => a.namespace == b.namespace && a.name == b.name,
        _ => true,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::document::DocumentMeta;
    use crate::config::v1alpha1::{ClusterConfig, MachineConfig};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn siderolink(name: &str, url: &str) -> Document {
        Document::SideroLink(Typed::new(
            name,
            SideroLinkConfig {
                api_url: url.to_string(),
                ..Default::default()
            },
        ))
    }

    fn v1alpha1(machine_type: &str) -> Document {
        Document::V1Alpha1(Box::new(Config {
            version: "v1alpha1".into(),
            machine: Some(MachineConfig {
                type_: machine_type.into(),
                token: "abcdef.0123456789abcdef".into(),
                ..Default::default()
            }),
            cluster: Some(ClusterConfig::default()),
            ..Default::default()
        }))
    }

    #[test]
    fn duplicates_are_rejected() {
        assert_eq!(
            DecodeError::DuplicateV1Alpha1,
            Container::new(vec![v1alpha1("worker"), v1alpha1("worker")]).unwrap_err()
        );
        assert_eq!(
            DecodeError::Duplicate("SideroLinkConfig/".into()),
            Container::new(vec![siderolink("", "https://a"), siderolink("", "https://b")]).unwrap_err()
        );
    }

    #[test]
    fn v1alpha1_is_kept_first() {
        let container = Container::new(vec![siderolink("", "https://a"), v1alpha1("worker")]).unwrap();
        assert_eq!("v1alpha1", container.documents()[0].kind());
        assert_eq!("worker", container.raw_v1alpha1().unwrap().machine().type_);
        assert_eq!("https://a", container.siderolink().unwrap().spec.api_url);
    }

    #[test]
    fn empty_container_is_valid() {
        let container = Container::empty();
        assert!(container.validate(RuntimeMode::Container, &ValidationOptions::default()).is_ok());
        assert!(container.raw_v1alpha1().is_none());
    }

    #[test]
    fn validation_errors_carry_the_kind() {
        let container = Container::new(vec![siderolink("", "")]).unwrap();
        let err = container
            .validate(RuntimeMode::Container, &ValidationOptions::default())
            .unwrap_err();
        assert_eq!("1 error occurred:\n\t* SideroLinkConfig: apiUrl is required\n\n", err.to_string());
    }

    #[test]
    fn readonly_container_keeps_its_bytes() {
        let source = b"version: v1alpha1\nmachine:\n    type: worker   # odd indent\n";
        let container = Container::from_bytes(source).unwrap();
        assert!(container.readonly());
        assert_eq!(source.to_vec(), container.bytes().unwrap());

        let mutable = container.to_mutable();
        assert!(!mutable.readonly());
        assert_eq!(b"version: v1alpha1\nmachine:\n  type: worker\n".to_vec(), mutable.bytes().unwrap());
    }

    #[test]
    fn patching_leaves_the_source_alone() {
        let container = Container::new(vec![v1alpha1("worker")]).unwrap();
        let patched = container
            .patch_v1alpha1(|config| {
                config.debug = true;
                Ok(())
            })
            .unwrap();
        assert!(patched.raw_v1alpha1().unwrap().debug);
        assert!(!container.raw_v1alpha1().unwrap().debug);

        let created = Container::empty()
            .patch_v1alpha1(|config| {
                config.debug = true;
                Ok(())
            })
            .unwrap();
        assert_eq!("v1alpha1", created.raw_v1alpha1().unwrap().version);
    }

    #[test]
    fn redaction_returns_a_copy() {
        let container = Container::new(vec![v1alpha1("worker")]).unwrap();
        let redacted = container.redact("XXX");
        assert_eq!("XXX", redacted.raw_v1alpha1().unwrap().machine().token);
        assert_eq!("abcdef.0123456789abcdef", container.raw_v1alpha1().unwrap().machine().token);
    }

    #[test]
    fn merge_replaces_named_documents_and_merges_v1alpha1() {
        let base = Container::new(vec![v1alpha1("worker"), siderolink("link", "https://a")]).unwrap();
        let mut patch_config = Config::default();
        patch_config.debug = true;
        let mut rule = Typed::<NetworkRuleConfig>::default();
        rule.meta = DocumentMeta::named("kubelet");
        let patch = Container::new(vec![
            Document::V1Alpha1(Box::new(patch_config)),
            siderolink("link", "https://b"),
            Document::NetworkRule(rule),
        ])
        .unwrap();

        let merged = base.merge(&patch).unwrap();
        let config = merged.raw_v1alpha1().unwrap();
        assert!(config.debug);
        assert_eq!("worker", config.machine().type_);
        assert_eq!("https://b", merged.siderolink().unwrap().spec.api_url);
        assert_eq!(1, merged.network_rules().len());
        assert_eq!(3, merged.documents().len());
    }

    #[test]
    fn encoding_round_trips() {
        let container = Container::new(vec![siderolink("link", "https://a"), v1alpha1("controlplane")]).unwrap();
        let encoded = container.encode(&EncoderOptions::default()).unwrap();
        assert!(encoded.starts_with("version: v1alpha1\n"));
        assert!(encoded.contains("---\nkind: SideroLinkConfig\n"));
        let decoded = Container::from_bytes(encoded.as_bytes()).unwrap();
        assert_eq!(container.documents(), decoded.documents());
    }

    #[test]
    fn clones_are_mutable() {
        let source = b"version: v1alpha1\nmachine:\n    type: worker\n";
        let container = Container::from_bytes(source).unwrap();
        let cloned = container.clone();
        assert!(!cloned.readonly());
        assert_eq!(container, cloned);
        assert_eq!(b"version: v1alpha1\nmachine:\n  type: worker\n".to_vec(), cloned.bytes().unwrap());
    }

    fn machine(machine_type: &str, token: &str, debug: bool) -> Document {
        Document::V1Alpha1(Box::new(Config {
            version: "v1alpha1".into(),
            debug,
            machine: Some(MachineConfig {
                type_: machine_type.into(),
                token: token.into(),
                ..Default::default()
            }),
            cluster: Some(ClusterConfig::default()),
            ..Default::default()
        }))
    }

    proptest! {
        #[test]
        fn decoding_reverses_encoding(
            machine_type in prop::sample::select(vec!["worker", "controlplane", "init"]),
            token in "[a-z][a-z0-9]{5}\\.[a-z0-9]{16}",
            debug in any::<bool>(),
            links in prop::collection::btree_map("[a-z][a-z0-9-]{0,10}", "[a-z]{1,10}", 0..4),
            comments in any::<bool>(),
        ) {
            let mut documents = vec![machine(machine_type, &token, debug)];
            let links: BTreeMap<String, String> = links;
            for (name, host) in &links {
                documents.push(siderolink(name, &format!("https://{}.example.com", host)));
            }
            let container = Container::new(documents).unwrap();
            let opts = if comments { EncoderOptions::with_comments() } else { EncoderOptions::default() };

            let encoded = container.encode(&opts).unwrap();
            let decoded = Container::from_bytes(encoded.as_bytes()).unwrap();
            prop_assert_eq!(&container, &decoded);
            prop_assert_eq!(encoded.as_bytes(), &decoded.bytes().unwrap()[..]);
        }
    }
}
