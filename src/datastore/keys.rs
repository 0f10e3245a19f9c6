//! v1 key layout
//!
//! Turns the flattened etcd v2 key tree into [`LegacyResource`] records.
//! Most records are one key holding a JSON document; profiles, nodes and the
//! global Felix/BGP settings are spread over several keys and are grouped
//! into a single record per directory, at the position of their first key.

use crate::resource::{LegacyKind, LegacyResource};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Key prefixes holding v1 data
pub const LEGACY_PREFIXES: &[&str] = &["/calico/v1", "/calico/bgp/v1"];

/// The Felix readiness flag used to pause networking
pub const READY_KEY: &str = "/calico/v1/Ready";

/// A node in an etcd v2 keys API response
#[derive(Debug, Clone, Deserialize)]
pub struct EtcdNode {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub nodes: Vec<EtcdNode>,
}

impl EtcdNode {
    /// Leaf `(key, value)` pairs, depth first in response order
    pub fn leaves(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<(String, String)>) {
        if self.dir {
            for child in &self.nodes {
                child.collect_leaves(out);
            }
        } else if let Some(value) = &self.value {
            out.push((self.key.clone(), value.clone()));
        }
    }
}

/// How one key contributes to a record
enum Classified {
    /// A whole record in one key
    Record(LegacyResource),
    /// One field of a grouped record
    Field {
        kind: LegacyKind,
        group_key: String,
        name: String,
        field: String,
        value: Value,
    },
    Ignore,
}

/// Build legacy records from leaf `(key, value)` pairs
pub fn parse_leaves(leaves: &[(String, String)]) -> Vec<LegacyResource> {
    let mut records: Vec<LegacyResource> = Vec::new();
    let mut groups: HashMap<String, usize> = HashMap::new();

    for (key, value) in leaves {
        match classify(key, value) {
            Classified::Record(record) => records.push(record),
            Classified::Field {
                kind,
                group_key,
                name,
                field,
                value,
            } => {
                let idx = *groups.entry(group_key.clone()).or_insert_with(|| {
                    records.push(LegacyResource::new(kind, group_key, name, Value::Object(Map::new())));
                    records.len() - 1
                });
                if let Value::Object(fields) = &mut records[idx].fields {
                    fields.insert(field, value);
                }
            }
            Classified::Ignore => {}
        }
    }

    records
}

/// JSON document values; anything unparseable is kept raw for the converter to reject
fn document(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Pool keys encode the CIDR with `-` in place of `/`
fn pool_cidr(segment: &str) -> String {
    match segment.rsplit_once('-') {
        Some((addr, len)) => format!("{}/{}", addr, len),
        None => segment.to_string(),
    }
}

fn plain(raw: &str) -> Value {
    Value::String(raw.to_string())
}

fn classify(key: &str, raw: &str) -> Classified {
    let segments: Vec<&str> = key.trim_start_matches('/').split('/').collect();

    match segments.as_slice() {
        ["calico", "v1", "Ready"] => Classified::Ignore,

        ["calico", "v1", "ipam", "v4" | "v6", "pool", pool] => Classified::Record(LegacyResource::new(
            LegacyKind::IpPool,
            key,
            pool_cidr(pool),
            document(raw),
        )),

        ["calico", "v1", "policy", "tier", "default", "policy", name] => {
            Classified::Record(LegacyResource::new(LegacyKind::Policy, key, *name, document(raw)))
        }
        ["calico", "v1", "policy", "tier", "default", "metadata"] => Classified::Ignore,
        ["calico", "v1", "policy", "tier", tier, ..] => Classified::Record(LegacyResource::new(
            LegacyKind::Unsupported("tier".to_string()),
            key,
            *tier,
            document(raw),
        )),

        ["calico", "v1", "policy", "profile", name, field @ ("rules" | "labels" | "tags")] => Classified::Field {
            kind: LegacyKind::Profile,
            group_key: format!("/calico/v1/policy/profile/{}", name),
            name: name.to_string(),
            field: field.to_string(),
            value: document(raw),
        },

        ["calico", "v1", "host", node, "endpoint", id] => Classified::Record(
            LegacyResource::new(LegacyKind::HostEndpoint, key, *id, document(raw)).on_node(*node),
        ),
        ["calico", "v1", "host", node, "workload", orchestrator, workload, "endpoint", id] => Classified::Record(
            LegacyResource::new(
                LegacyKind::WorkloadEndpoint,
                key,
                format!("{}/{}/{}", orchestrator, workload, id),
                document(raw),
            )
            .on_node(*node),
        ),
        // Per-host runtime state (bird_ip, host config, status) is owned by the node agents
        ["calico", "v1", "host", ..] => Classified::Ignore,

        ["calico", "v1", "config", name] => Classified::Field {
            kind: LegacyKind::FelixConfig,
            group_key: "/calico/v1/config".to_string(),
            name: "default".to_string(),
            field: name.to_string(),
            value: plain(raw),
        },

        ["calico", "bgp", "v1", "global", "peer_v4" | "peer_v6", ip] => {
            Classified::Record(LegacyResource::new(LegacyKind::BgpPeer, key, *ip, document(raw)))
        }
        ["calico", "bgp", "v1", "global", field @ ("as_num" | "node_mesh" | "loglevel")] => Classified::Field {
            kind: LegacyKind::BgpConfig,
            group_key: "/calico/bgp/v1/global".to_string(),
            name: "default".to_string(),
            field: field.to_string(),
            value: plain(raw),
        },

        ["calico", "bgp", "v1", "host", node, "peer_v4" | "peer_v6", ip] => Classified::Record(
            LegacyResource::new(LegacyKind::BgpPeer, key, *ip, document(raw)).on_node(*node),
        ),
        ["calico", "bgp", "v1", "host", node, field @ ("ip_addr_v4" | "ip_addr_v6" | "as_num")] => {
            Classified::Field {
                kind: LegacyKind::Node,
                group_key: format!("/calico/bgp/v1/host/{}", node),
                name: node.to_string(),
                field: field.to_string(),
                value: plain(raw),
            }
        }
        ["calico", "bgp", "v1", "host", ..] => Classified::Ignore,

        ["calico", "v1", segment, ..] | ["calico", "bgp", "v1", segment, ..] => Classified::Record(
            LegacyResource::new(LegacyKind::Unsupported(segment.to_string()), key, key, document(raw)),
        ),

        _ => Classified::Record(LegacyResource::new(
            LegacyKind::Unsupported("unknown".to_string()),
            key,
            key,
            document(raw),
        )),
    }
}
