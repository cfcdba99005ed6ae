//! Typed configuration documents.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::schema::KnownKeys;
use super::unstructured::Unstructured;
use super::v1alpha1;
use super::validation::{RuntimeMode, ValidationError, ValidationOptions};
use crate::constants;
use crate::net::Cidr;

/// Identity of a named document, next to its `kind` and `version`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMeta {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

config_type!(DocumentMeta {
    name => "name",
    namespace => "namespace",
    labels => "labels",
});

impl DocumentMeta {
    /// Metadata carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        DocumentMeta {
            name: name.into(),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        *self == DocumentMeta::default()
    }
}

/// The spec of a document kind other than `v1alpha1`.
pub trait DocumentSpec: Serialize + DeserializeOwned + KnownKeys + Clone + PartialEq + Debug + Default {
    /// Value of the `kind` field.
    const KIND: &'static str;
    /// Value of the `version` field.
    const VERSION: &'static str;

    /// Wraps the typed document into its [`Document`] arm.
    fn wrap(doc: Typed<Self>) -> Document;

    /// The typed document, if `doc` is of this kind.
    fn unwrap(doc: &Document) -> Option<&Typed<Self>>;

    /// Records problems with the document.
    fn validate(&self, meta: &DocumentMeta, result: &mut ValidationError);

    /// Replaces secrets with `placeholder`.
    fn redact(&mut self, _placeholder: &str) {}
}

/// A document with its metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Typed<T> {
    /// Name, namespace and labels.
    pub meta: DocumentMeta,
    /// The typed spec.
    pub spec: T,
}

impl<T: DocumentSpec> Typed<T> {
    /// A document `name` with the given spec.
    pub fn new(name: impl Into<String>, spec: T) -> Self {
        Typed {
            meta: DocumentMeta::named(name),
            spec,
        }
    }

    fn encode(&self) -> Result<Value, serde_yaml::Error> {
        let mut mapping = Mapping::new();
        mapping.insert("kind".into(), T::KIND.into());
        mapping.insert("version".into(), T::VERSION.into());
        if !self.meta.is_empty() {
            mapping.insert("metadata".into(), serde_yaml::to_value(&self.meta)?);
        }
        mapping.insert("spec".into(), serde_yaml::to_value(&self.spec)?);
        Ok(Value::Mapping(mapping))
    }

    fn validate(&self, result: &mut ValidationError) {
        let mut own = ValidationError::new();
        self.spec.validate(&self.meta, &mut own);
        for error in own.errors {
            result.push(format!("{}: {}", T::KIND, error));
        }
        for warning in own.warnings {
            result.warn(format!("{}: {}", T::KIND, warning));
        }
    }

    fn redacted(&self, placeholder: &str) -> Self {
        let mut copy = self.clone();
        copy.spec.redact(placeholder);
        copy
    }
}

/// One configuration document.
#[derive(Clone, Debug, PartialEq)]
pub enum Document {
    /// The monolithic machine and cluster document.
    V1Alpha1(Box<v1alpha1::Config>),
    /// Connection to the management API.
    SideroLink(Typed<SideroLinkConfig>),
    /// An ingress firewall rule.
    NetworkRule(Typed<NetworkRuleConfig>),
    /// Extra kubelet configuration layered over the machine config.
    Kubelet(Typed<KubeletOverlayConfig>),
    /// Configuration of an extension service.
    ExtensionService(Typed<ExtensionServiceConfig>),
}

impl Document {
    /// The `kind` discriminator. The monolithic document reports `v1alpha1`.
    pub fn kind(&self) -> &'static str {
        match self {
            Document::V1Alpha1(_) => v1alpha1::VERSION,
            Document::SideroLink(_) => SideroLinkConfig::KIND,
            Document::NetworkRule(_) => NetworkRuleConfig::KIND,
            Document::Kubelet(_) => KubeletOverlayConfig::KIND,
            Document::ExtensionService(_) => ExtensionServiceConfig::KIND,
        }
    }

    /// Metadata, `None` for the monolithic document.
    pub fn meta(&self) -> Option<&DocumentMeta> {
        match self {
            Document::V1Alpha1(_) => None,
            Document::SideroLink(d) => Some(&d.meta),
            Document::NetworkRule(d) => Some(&d.meta),
            Document::Kubelet(d) => Some(&d.meta),
            Document::ExtensionService(d) => Some(&d.meta),
        }
    }

    /// Document name, empty when unnamed.
    pub fn name(&self) -> &str {
        self.meta().map(|m| m.name.as_str()).unwrap_or("")
    }

    /// The YAML form of the document. The monolithic document keeps its
    /// legacy shape without `kind` and `spec`.
    pub fn to_value(&self) -> Result<Value, serde_yaml::Error> {
        match self {
            Document::V1Alpha1(config) => serde_yaml::to_value(config.as_ref()),
            Document::SideroLink(d) => d.encode(),
            Document::NetworkRule(d) => d.encode(),
            Document::Kubelet(d) => d.encode(),
            Document::ExtensionService(d) => d.encode(),
        }
    }

    /// A copy with every secret replaced by `placeholder`.
    pub fn redact(&self, placeholder: &str) -> Document {
        match self {
            Document::V1Alpha1(config) => Document::V1Alpha1(Box::new(config.redact_secrets(placeholder))),
            Document::SideroLink(d) => Document::SideroLink(d.redacted(placeholder)),
            Document::NetworkRule(d) => Document::NetworkRule(d.redacted(placeholder)),
            Document::Kubelet(d) => Document::Kubelet(d.redacted(placeholder)),
            Document::ExtensionService(d) => Document::ExtensionService(d.redacted(placeholder)),
        }
    }

    /// Records the problems of this document into `result`, prefixed with
    /// the document kind.
    pub fn validate_into(&self, mode: RuntimeMode, opts: &ValidationOptions, result: &mut ValidationError) {
        match self {
            Document::V1Alpha1(config) => {
                let lenient = ValidationOptions {
                    strict: false,
                    ..opts.clone()
                };
                match config.validate(mode, &lenient) {
                    Ok(warnings) => {
                        for warning in warnings {
                            result.warn(warning);
                        }
                    }
                    Err(e) => {
                        result.push(format!("v1alpha1.Config: {}", e));
                        for warning in e.warnings {
                            result.warn(warning);
                        }
                    }
                }
            }
            Document::SideroLink(d) => d.validate(result),
            Document::NetworkRule(d) => d.validate(result),
            Document::Kubelet(d) => d.validate(result),
            Document::ExtensionService(d) => d.validate(result),
        }
    }
}

/// Connection to the management API over SideroLink.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SideroLinkConfig {
    /// API endpoint, may carry a `jointoken` query parameter.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_url: String,
    /// Token identifying this machine across reinstalls.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unique_token: String,
}

config_type!(SideroLinkConfig {
    api_url => "apiUrl",
    unique_token => "uniqueToken",
});

impl DocumentSpec for SideroLinkConfig {
    const KIND: &'static str = "SideroLinkConfig";
    const VERSION: &'static str = "v1alpha1";

    fn wrap(doc: Typed<Self>) -> Document {
        Document::SideroLink(doc)
    }

    fn unwrap(doc: &Document) -> Option<&Typed<Self>> {
        match doc {
            Document::SideroLink(d) => Some(d),
            _ => None,
        }
    }

    fn validate(&self, _meta: &DocumentMeta, result: &mut ValidationError) {
        if self.api_url.is_empty() {
            result.push("apiUrl is required");
            return;
        }
        if let Err(e) = url::Url::parse(&self.api_url) {
            result.push(format!("apiUrl is invalid: {}", e));
        }
    }

    fn redact(&mut self, placeholder: &str) {
        self.api_url = v1alpha1::redact::redact_url_token(&self.api_url, placeholder);
        if !self.unique_token.is_empty() {
            self.unique_token = placeholder.to_string();
        }
    }
}

/// Ports a network rule applies to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RulePortSelector {
    /// Single ports (`80`) or inclusive ranges (`8000-8100`).
    pub ports: Vec<String>,
    /// `tcp` or `udp`.
    pub protocol: String,
}

config_type!(RulePortSelector {
    ports => "ports",
    protocol => "protocol",
});

impl RulePortSelector {
    /// Parsed port ranges.
    pub fn ranges(&self) -> Result<Vec<(u16, u16)>, String> {
        self.ports.iter().map(|p| parse_port_range(p)).collect()
    }
}

fn parse_port_range(raw: &str) -> Result<(u16, u16), String> {
    let invalid = || format!("invalid port range: {:?}", raw);
    let (lo, hi) = match raw.split_once('-') {
        Some((lo, hi)) => (lo.trim(), hi.trim()),
        None => (raw.trim(), raw.trim()),
    };
    let lo: u16 = lo.parse().map_err(|_| invalid())?;
    let hi: u16 = hi.parse().map_err(|_| invalid())?;
    if lo > hi {
        return Err(invalid());
    }
    Ok((lo, hi))
}

/// A subnet allowed by a network rule.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressRule {
    pub subnet: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub except: String,
}

config_type!(IngressRule {
    subnet => "subnet",
    except => "except",
});

/// Ingress firewall rule.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkRuleConfig {
    pub port_selector: RulePortSelector,
    pub ingress: Vec<IngressRule>,
}

config_type!(NetworkRuleConfig {
    port_selector => "portSelector",
    ingress => "ingress",
});

impl DocumentSpec for NetworkRuleConfig {
    const KIND: &'static str = "NetworkRuleConfig";
    const VERSION: &'static str = "v1alpha1";

    fn wrap(doc: Typed<Self>) -> Document {
        Document::NetworkRule(doc)
    }

    fn unwrap(doc: &Document) -> Option<&Typed<Self>> {
        match doc {
            Document::NetworkRule(d) => Some(d),
            _ => None,
        }
    }

    fn validate(&self, meta: &DocumentMeta, result: &mut ValidationError) {
        if meta.name.is_empty() {
            result.push("name is required");
        }
        match self.port_selector.protocol.as_str() {
            "tcp" | "udp" => {}
            other => result.push(format!("invalid protocol: {:?}", other)),
        }
        if self.port_selector.ports.is_empty() {
            result.push("portSelector.ports is required");
        }
        if let Err(e) = self.port_selector.ranges() {
            result.push(e);
        }
        for rule in &self.ingress {
            if rule.subnet.parse::<Cidr>().is_err() {
                result.push(format!("invalid subnet: {:?}", rule.subnet));
            }
            if !rule.except.is_empty() && rule.except.parse::<Cidr>().is_err() {
                result.push(format!("invalid except: {:?}", rule.except));
            }
        }
    }
}

/// KubeletConfiguration fields layered over the machine config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeletOverlayConfig {
    pub extra_config: Unstructured,
}

config_type!(KubeletOverlayConfig {
    extra_config => "extraConfig",
});

impl DocumentSpec for KubeletOverlayConfig {
    const KIND: &'static str = "KubeletConfig";
    const VERSION: &'static str = "v1alpha1";

    fn wrap(doc: Typed<Self>) -> Document {
        Document::Kubelet(doc)
    }

    fn unwrap(doc: &Document) -> Option<&Typed<Self>> {
        match doc {
            Document::Kubelet(d) => Some(d),
            _ => None,
        }
    }

    fn validate(&self, _meta: &DocumentMeta, result: &mut ValidationError) {
        for key in self.extra_config.keys() {
            if constants::KUBELET_LOCKED_FIELDS.contains(&key.as_str()) {
                result.push(format!("kubelet configuration field {:?} can't be overridden", key));
            }
        }
    }
}

/// A file mounted into an extension service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionConfigFile {
    pub content: String,
    pub mount_path: String,
}

config_type!(ExtensionConfigFile {
    content => "content",
    mount_path => "mountPath",
});

/// Configuration of an extension service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionServiceConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config_files: Vec<ExtensionConfigFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
}

config_type!(ExtensionServiceConfig {
    config_files => "configFiles",
    environment => "environment",
});

impl DocumentSpec for ExtensionServiceConfig {
    const KIND: &'static str = "ExtensionServiceConfig";
    const VERSION: &'static str = "v1alpha1";

    fn wrap(doc: Typed<Self>) -> Document {
        Document::ExtensionService(doc)
    }

    fn unwrap(doc: &Document) -> Option<&Typed<Self>> {
        match doc {
            Document::ExtensionService(d) => Some(d),
            _ => None,
        }
    }

    fn validate(&self, meta: &DocumentMeta, result: &mut ValidationError) {
        if meta.name.is_empty() {
            result.push("name is required");
        }
        for file in &self.config_files {
            if !file.mount_path.starts_with('/') {
                result.push(format!("mountPath {:?} must be absolute", file.mount_path));
            }
        }
        for var in &self.environment {
            match var.split_once('=') {
                Some((name, _)) if !name.is_empty() => {}
                _ => result.push(format!("environment variable {:?} should be in the KEY=VALUE format", var)),
            }
        }
    }
}
