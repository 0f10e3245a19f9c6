//! Resource model
//!
//! Calico v1 records as read from etcd ([`LegacyResource`]) and their
//! `projectcalico.org/v3` counterparts ([`ModernResource`]).
//!
//! # Module Structure
//!
//! - [`convert`] - maps one legacy record to one conversion outcome
//! - [`fields`] - field extraction helpers that report field paths
//! - [`rules`] - v1 policy/profile rule conversion
//!
//! Both kind enums are closed: adding a legacy kind means adding a variant and
//! a match arm in [`convert::convert`], which the compiler checks.

pub mod convert;
pub mod fields;
pub mod rules;

pub use convert::{convert, convert_name};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// API version written on every v3 resource
pub const API_VERSION_V3: &str = "projectcalico.org/v3";

// =============================================================================
// Legacy (v1)
// =============================================================================

/// Kinds found in the v1 datastore
///
/// The declaration order is the report and write order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LegacyKind {
    BgpConfig,
    FelixConfig,
    Node,
    BgpPeer,
    IpPool,
    Profile,
    Policy,
    HostEndpoint,
    WorkloadEndpoint,
    /// Data with no v3 mapping, named by its key segment
    Unsupported(String),
}

impl LegacyKind {
    /// Human readable kind name
    pub fn display_name(&self) -> &str {
        match self {
            Self::BgpConfig => "BGP configuration",
            Self::FelixConfig => "Felix configuration",
            Self::Node => "Node",
            Self::BgpPeer => "BGP peer",
            Self::IpPool => "IP pool",
            Self::Profile => "Profile",
            Self::Policy => "Policy",
            Self::HostEndpoint => "Host endpoint",
            Self::WorkloadEndpoint => "Workload endpoint",
            Self::Unsupported(name) => name,
        }
    }

    /// Stable, filesystem-safe section name used for report files
    pub fn section_name(&self) -> String {
        match self {
            Self::BgpConfig => "bgpconfig".to_string(),
            Self::FelixConfig => "felixconfig".to_string(),
            Self::Node => "nodes".to_string(),
            Self::BgpPeer => "bgppeers".to_string(),
            Self::IpPool => "ippools".to_string(),
            Self::Profile => "profiles".to_string(),
            Self::Policy => "policies".to_string(),
            Self::HostEndpoint => "hostendpoints".to_string(),
            Self::WorkloadEndpoint => "workloadendpoints".to_string(),
            Self::Unsupported(name) => format!("unsupported-{}", sanitize_segment(name)),
        }
    }
}

impl fmt::Display for LegacyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(name) => write!(f, "unsupported ({})", name),
            other => f.write_str(other.display_name()),
        }
    }
}

/// One v1 record, immutable once read
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyResource {
    pub kind: LegacyKind,
    /// etcd key, or the key directory for records grouped from several keys
    pub key: String,
    /// Name of the record within its kind
    ///
    /// Workload endpoints use `<orchestrator>/<workload>/<endpoint>`.
    pub name: String,
    /// Owning node for host-scoped records
    pub node: Option<String>,
    /// Raw v1 field set
    pub fields: Value,
}

impl LegacyResource {
    pub fn new(kind: LegacyKind, key: impl Into<String>, name: impl Into<String>, fields: Value) -> Self {
        Self {
            kind,
            key: key.into(),
            name: name.into(),
            node: None,
            fields,
        }
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }
}

// =============================================================================
// Modern (v3)
// =============================================================================

/// v3 resource kinds written by the migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModernKind {
    #[serde(rename = "BGPConfiguration")]
    BgpConfiguration,
    FelixConfiguration,
    Node,
    #[serde(rename = "BGPPeer")]
    BgpPeer,
    #[serde(rename = "IPPool")]
    IpPool,
    Profile,
    GlobalNetworkPolicy,
    HostEndpoint,
    WorkloadEndpoint,
}

impl ModernKind {
    pub const ALL: [ModernKind; 9] = [
        Self::BgpConfiguration,
        Self::FelixConfiguration,
        Self::Node,
        Self::BgpPeer,
        Self::IpPool,
        Self::Profile,
        Self::GlobalNetworkPolicy,
        Self::HostEndpoint,
        Self::WorkloadEndpoint,
    ];

    /// Kind as written in the `kind` field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BgpConfiguration => "BGPConfiguration",
            Self::FelixConfiguration => "FelixConfiguration",
            Self::Node => "Node",
            Self::BgpPeer => "BGPPeer",
            Self::IpPool => "IPPool",
            Self::Profile => "Profile",
            Self::GlobalNetworkPolicy => "GlobalNetworkPolicy",
            Self::HostEndpoint => "HostEndpoint",
            Self::WorkloadEndpoint => "WorkloadEndpoint",
        }
    }

    /// Lowercase plural used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            Self::BgpConfiguration => "bgpconfigurations",
            Self::FelixConfiguration => "felixconfigurations",
            Self::Node => "nodes",
            Self::BgpPeer => "bgppeers",
            Self::IpPool => "ippools",
            Self::Profile => "profiles",
            Self::GlobalNetworkPolicy => "globalnetworkpolicies",
            Self::HostEndpoint => "hostendpoints",
            Self::WorkloadEndpoint => "workloadendpoints",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::WorkloadEndpoint)
    }
}

impl fmt::Display for ModernKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a v3 resource: kind, optional namespace and name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    pub kind: ModernKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceId {
    /// Identity of a cluster-scoped resource
    pub fn cluster(kind: ModernKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    /// Identity of a namespaced resource
    pub fn namespaced(kind: ModernKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}({}/{})", self.kind, ns, self.name),
            None => write!(f, "{}({})", self.kind, self.name),
        }
    }
}

/// v3 object metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A v3 resource, produced only by the converter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModernResource {
    pub api_version: String,
    pub kind: ModernKind,
    pub metadata: ObjectMeta,
    pub spec: Value,
}

impl ModernResource {
    pub fn new(kind: ModernKind, name: impl Into<String>, spec: Value) -> Self {
        Self {
            api_version: API_VERSION_V3.to_string(),
            kind,
            metadata: ObjectMeta {
                name: name.into(),
                namespace: None,
                labels: BTreeMap::new(),
            },
            spec,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.metadata.labels = labels;
        self
    }

    pub fn id(&self) -> ResourceId {
        ResourceId {
            kind: self.kind,
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect()
}
