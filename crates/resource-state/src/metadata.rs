use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::ResourceSpec;

/// Monotonic per-resource version token.
///
/// [`Version::UNDEFINED`] is reserved for creation intent: a resource built
/// locally carries it until the store assigns the first real version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a resource that hasn't been stored yet.
    pub const UNDEFINED: Version = Version(0);

    pub(crate) fn initial() -> Version {
        Version(1)
    }

    pub(crate) fn next(self) -> Version {
        Version(self.0 + 1)
    }

    /// Raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// True for [`Version::UNDEFINED`].
    pub fn is_undefined(self) -> bool {
        self == Version::UNDEFINED
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::UNDEFINED
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "undefined")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Lifecycle phase of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Normal state.
    Running,
    /// Destroy was requested while finalizers were still attached.
    TearingDown,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Running
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Running => write!(f, "running"),
            Phase::TearingDown => write!(f, "tearing-down"),
        }
    }
}

/// Identity of a single resource: `(namespace, type, id)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pointer {
    /// Resource namespace.
    pub namespace: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub type_: String,
    /// Resource id.
    pub id: String,
}

impl Pointer {
    /// Builds a pointer from its parts.
    pub fn new(namespace: impl Into<String>, type_: impl Into<String>, id: impl Into<String>) -> Self {
        Pointer {
            namespace: namespace.into(),
            type_: type_.into(),
            id: id.into(),
        }
    }

    /// Points at the resource `id` of spec type `S` in its default namespace.
    pub fn of<S: ResourceSpec>(id: impl Into<String>) -> Self {
        Pointer::new(S::NAMESPACE, S::TYPE, id)
    }

    /// The `(namespace, type)` part of the pointer.
    pub fn kind(&self) -> Kind {
        Kind::new(self.namespace.clone(), self.type_.clone())
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}/{})", self.type_, self.namespace, self.id)
    }
}

/// A `(namespace, type)` pair: the unit of storage and locking.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Kind {
    /// Resource namespace.
    pub namespace: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub type_: String,
}

impl Kind {
    /// Builds a kind from its parts.
    pub fn new(namespace: impl Into<String>, type_: impl Into<String>) -> Self {
        Kind {
            namespace: namespace.into(),
            type_: type_.into(),
        }
    }

    /// The kind of spec type `S` in its default namespace.
    pub fn of<S: ResourceSpec>() -> Self {
        Kind::new(S::NAMESPACE, S::TYPE)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_, self.namespace)
    }
}

/// Watch target: a kind, optionally narrowed to one id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Selector {
    /// Kind to watch.
    pub kind: Kind,
    /// Single id to watch, `None` for every resource of the kind.
    pub id: Option<String>,
}

impl Selector {
    /// Watches every resource of spec type `S`.
    pub fn kind<S: ResourceSpec>() -> Self {
        Selector {
            kind: Kind::of::<S>(),
            id: None,
        }
    }

    /// Watches the single resource `id` of spec type `S`.
    pub fn resource<S: ResourceSpec>(id: impl Into<String>) -> Self {
        Selector {
            kind: Kind::of::<S>(),
            id: Some(id.into()),
        }
    }

    /// Watches exactly the resource behind `pointer`.
    pub fn pointer(pointer: &Pointer) -> Self {
        Selector {
            kind: pointer.kind(),
            id: Some(pointer.id.clone()),
        }
    }

    pub(crate) fn matches(&self, id: &str) -> bool {
        match &self.id {
            Some(wanted) => wanted == id,
            None => true,
        }
    }
}

impl From<Kind> for Selector {
    fn from(kind: Kind) -> Self {
        Selector { kind, id: None }
    }
}

/// Resource metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    namespace: String,
    #[serde(rename = "type")]
    type_: String,
    id: String,
    version: Version,
    phase: Phase,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    finalizers: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    owner: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Metadata {
    /// Fresh metadata for a resource that hasn't been stored yet.
    pub fn new(namespace: impl Into<String>, type_: impl Into<String>, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Metadata {
            namespace: namespace.into(),
            type_: type_.into(),
            id: id.into(),
            version: Version::UNDEFINED,
            phase: Phase::Running,
            finalizers: BTreeSet::new(),
            owner: String::new(),
            created: now,
            updated: now,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            error: None,
        }
    }

    /// Resource namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resource type.
    pub fn type_(&self) -> &str {
        &self.type_
    }

    /// Resource id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Attached finalizers.
    pub fn finalizers(&self) -> &BTreeSet<String> {
        &self.finalizers
    }

    /// Producer that owns the resource, empty if unowned.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Creation timestamp.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Last update timestamp.
    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    /// Labels.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Annotations.
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// Reconcile error reported by the owner. `None` when the spec reflects
    /// the latest inputs.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Identity of the resource.
    pub fn pointer(&self) -> Pointer {
        Pointer::new(self.namespace.clone(), self.type_.clone(), self.id.clone())
    }

    /// Sets the owner presented on store calls.
    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    /// Sets the version the caller believes is current (used for update
    /// conflict detection).
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Sets a label.
    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }

    /// Sets an annotation.
    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    /// Records or clears a reconcile error.
    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn finalizers_mut(&mut self) -> &mut BTreeSet<String> {
        &mut self.finalizers
    }

    pub(crate) fn stamp_created(&mut self) {
        let now = Utc::now();
        self.version = Version::initial();
        self.created = now;
        self.updated = now;
    }

    pub(crate) fn stamp_updated(&mut self, previous: &Metadata) {
        self.version = previous.version.next();
        self.created = previous.created;
        self.updated = Utc::now();
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}/{}@{})",
            self.type_, self.namespace, self.id, self.version
        )
    }
}
