//! Resource Converter
//!
//! Maps one v1 record to exactly one [`ConversionOutcome`]. Conversion is pure:
//! everything it needs (the record and the identities already present in the
//! v3 datastore) is passed in, and nothing is read or written here.

use super::fields::{parse_as_number, parse_cidr, parse_ip, Fields};
use super::rules::convert_rules;
use super::{LegacyKind, LegacyResource, ModernKind, ModernResource};
use crate::datastore::ModernIdentities;
use crate::error::ConversionError;
use crate::report::ConversionOutcome;
use serde_json::{json, Map, Value};

type Result<T> = std::result::Result<T, ConversionError>;

/// Maximum length of a v3 resource name
const MAX_NAME_LENGTH: usize = 253;

/// Namespace given to converted workload endpoints
const DEFAULT_NAMESPACE: &str = "default";

/// Result of a per-kind conversion before the collision check
enum Mapping {
    Resource(ModernResource),
    Skip(String),
}

/// Convert one legacy record
///
/// When `existing` holds the converted identity and `ignore_existing_v3` is
/// false the outcome is a collision failure, so that v3 data written by an
/// operator is never overwritten silently.
pub fn convert(
    legacy: &LegacyResource,
    existing: Option<&ModernIdentities>,
    ignore_existing_v3: bool,
) -> ConversionOutcome {
    let source = legacy.into();

    let mapping = match convert_kind(legacy) {
        Ok(mapping) => mapping,
        Err(error) => {
            tracing::debug!("Conversion of {} failed: {}", legacy.key, error);
            return ConversionOutcome::failed(source, error);
        }
    };

    match mapping {
        Mapping::Skip(reason) => ConversionOutcome::Skipped { source, reason },
        Mapping::Resource(resource) => {
            let id = resource.id();
            if !ignore_existing_v3 && existing.is_some_and(|ids| ids.contains(&id)) {
                return ConversionOutcome::failed(source, ConversionError::Collision { id });
            }
            ConversionOutcome::Converted { source, resource }
        }
    }
}

fn convert_kind(legacy: &LegacyResource) -> Result<Mapping> {
    match &legacy.kind {
        LegacyKind::BgpConfig => bgp_config(legacy).map(Mapping::Resource),
        LegacyKind::FelixConfig => felix_config(legacy).map(Mapping::Resource),
        LegacyKind::Node => node(legacy).map(Mapping::Resource),
        LegacyKind::BgpPeer => bgp_peer(legacy).map(Mapping::Resource),
        LegacyKind::IpPool => ip_pool(legacy).map(Mapping::Resource),
        LegacyKind::Profile => profile(legacy).map(Mapping::Resource),
        LegacyKind::Policy => policy(legacy).map(Mapping::Resource),
        LegacyKind::HostEndpoint => host_endpoint(legacy).map(Mapping::Resource),
        LegacyKind::WorkloadEndpoint => workload_endpoint(legacy),
        LegacyKind::Unsupported(kind) => Ok(Mapping::Skip(format!(
            "no v3 equivalent for '{}' data",
            kind
        ))),
    }
}

/// Convert a v1 name to a valid v3 resource name
///
/// Lowercases, replaces anything outside `[a-z0-9.-]` with `-` and trims
/// leading/trailing punctuation. Returns `None` if nothing usable remains.
pub fn convert_name(raw: &str) -> Option<String> {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = mapped.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        return None;
    }

    let mut name: String = trimmed.chars().take(MAX_NAME_LENGTH).collect();
    while name.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        name.pop();
    }
    Some(name)
}

fn require_name(field: &str, raw: &str) -> Result<String> {
    convert_name(raw)
        .ok_or_else(|| ConversionError::invalid(field, raw, "cannot be converted to a valid v3 resource name"))
}

/// Name form of an address or CIDR: separators become dashes
fn address_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '.' | ':' | '/') { '-' } else { c })
        .collect()
}

fn require_node(legacy: &LegacyResource) -> Result<&str> {
    legacy.node.as_deref().ok_or_else(|| ConversionError::Malformed {
        message: format!("{} has no owning node", legacy.key),
    })
}

// =============================================================================
// IP pools and policy
// =============================================================================

fn ip_pool(legacy: &LegacyResource) -> Result<ModernResource> {
    let f = Fields::root(&legacy.fields)?;
    let cidr = parse_cidr(&f.path("cidr"), f.str_req("cidr")?, false)?;
    let name = require_name("cidr", &address_name(&cidr))?;

    let ipip_mode = match f.str_opt("ipip_mode")? {
        Some("always") => "Always",
        Some("cross-subnet") => "CrossSubnet",
        Some("") | None => {
            if f.str_opt("ipip")?.is_some_and(|tunnel| !tunnel.is_empty()) {
                "Always"
            } else {
                "Never"
            }
        }
        Some(other) => {
            return Err(ConversionError::invalid(
                "ipip_mode",
                other,
                "must be 'always' or 'cross-subnet'",
            ))
        }
    };

    if ipip_mode != "Never" && cidr.contains(':') {
        return Err(ConversionError::invalid("ipip_mode", ipip_mode, "IP-in-IP is not supported for IPv6 pools"));
    }

    let spec = json!({
        "cidr": cidr,
        "ipipMode": ipip_mode,
        "natOutgoing": f.bool_opt("masquerade")?.unwrap_or(false),
        "disabled": f.bool_opt("disabled")?.unwrap_or(false),
    });
    Ok(ModernResource::new(ModernKind::IpPool, name, spec))
}

fn policy(legacy: &LegacyResource) -> Result<ModernResource> {
    let f = Fields::root(&legacy.fields)?;
    let name = require_name("name", &legacy.name)?;

    let ingress = convert_rules(&f, "inbound_rules")?;
    let egress = convert_rules(&f, "outbound_rules")?;
    let pre_dnat = f.bool_opt("pre_dnat")?.unwrap_or(false);
    if pre_dnat && !egress.is_empty() {
        return Err(ConversionError::invalid(
            "outbound_rules",
            format!("{} rules", egress.len()),
            "pre-DNAT policy may only contain inbound rules",
        ));
    }

    let mut types = vec!["Ingress"];
    if !egress.is_empty() {
        types.push("Egress");
    }

    let mut spec = Map::new();
    if let Some(order) = f.f64_opt("order")? {
        spec.insert("order".to_string(), json!(order));
    }
    spec.insert("selector".to_string(), json!(f.str_opt("selector")?.unwrap_or("")));
    spec.insert("types".to_string(), json!(types));
    spec.insert("ingress".to_string(), Value::Array(ingress));
    spec.insert("egress".to_string(), Value::Array(egress));
    spec.insert("doNotTrack".to_string(), json!(f.bool_opt("untracked")?.unwrap_or(false)));
    spec.insert("preDNAT".to_string(), json!(pre_dnat));
    if let Some(forward) = f.bool_opt("apply_on_forward")? {
        spec.insert("applyOnForward".to_string(), json!(forward));
    }

    Ok(ModernResource::new(ModernKind::GlobalNetworkPolicy, name, Value::Object(spec)))
}

fn profile(legacy: &LegacyResource) -> Result<ModernResource> {
    let f = Fields::root(&legacy.fields)?;
    let name = require_name("name", &legacy.name)?;

    let (ingress, egress) = match f.object_opt("rules")? {
        Some(rules) => (
            convert_rules(&rules, "inbound_rules")?,
            convert_rules(&rules, "outbound_rules")?,
        ),
        None => (Vec::new(), Vec::new()),
    };

    let mut labels = f.string_map("labels")?;
    for tag in f.str_list("tags")? {
        labels.entry(tag).or_default();
    }

    let mut spec = Map::new();
    spec.insert("ingress".to_string(), Value::Array(ingress));
    spec.insert("egress".to_string(), Value::Array(egress));
    if !labels.is_empty() {
        spec.insert("labelsToApply".to_string(), json!(labels));
    }

    Ok(ModernResource::new(ModernKind::Profile, name, Value::Object(spec)))
}

// =============================================================================
// Endpoints
// =============================================================================

fn host_endpoint(legacy: &LegacyResource) -> Result<ModernResource> {
    let node = require_node(legacy)?;
    let f = Fields::root(&legacy.fields)?;
    let name = require_name("name", &format!("{}.{}", node, legacy.name))?;

    let interface = f.str_opt("name")?.filter(|s| !s.is_empty());
    let mut expected_ips = Vec::new();
    for key in ["expected_ipv4_addrs", "expected_ipv6_addrs"] {
        for (idx, addr) in f.str_list(key)?.iter().enumerate() {
            expected_ips.push(parse_ip(&format!("{}[{}]", key, idx), addr)?.to_string());
        }
    }
    if interface.is_none() && expected_ips.is_empty() {
        return Err(ConversionError::missing("name"));
    }

    let mut spec = Map::new();
    spec.insert("node".to_string(), json!(node));
    if let Some(interface) = interface {
        spec.insert("interfaceName".to_string(), json!(interface));
    }
    if !expected_ips.is_empty() {
        spec.insert("expectedIPs".to_string(), json!(expected_ips));
    }
    spec.insert("profiles".to_string(), json!(f.str_list("profile_ids")?));

    Ok(ModernResource::new(ModernKind::HostEndpoint, name, Value::Object(spec))
        .with_labels(f.string_map("labels")?))
}

fn workload_endpoint(legacy: &LegacyResource) -> Result<Mapping> {
    let node = require_node(legacy)?;
    let parts: Vec<&str> = legacy.name.split('/').collect();
    let [orchestrator, workload, endpoint] = parts[..] else {
        return Err(ConversionError::Malformed {
            message: format!("unexpected workload endpoint key {}", legacy.key),
        });
    };

    if orchestrator == "k8s" {
        return Ok(Mapping::Skip(
            "Kubernetes workload endpoints are recreated by the Calico CNI plugin".to_string(),
        ));
    }

    let f = Fields::root(&legacy.fields)?;
    let name = require_name("name", &format!("{}-{}-{}-{}", node, orchestrator, workload, endpoint))?;
    let interface = f.str_req("name")?;

    let mut networks = Vec::new();
    for key in ["ipv4_nets", "ipv6_nets"] {
        for (idx, net) in f.str_list(key)?.iter().enumerate() {
            networks.push(parse_cidr(&format!("{}[{}]", key, idx), net, true)?);
        }
    }

    let mut spec = Map::new();
    spec.insert("node".to_string(), json!(node));
    spec.insert("orchestrator".to_string(), json!(orchestrator));
    spec.insert("workload".to_string(), json!(workload));
    spec.insert("endpoint".to_string(), json!(endpoint));
    spec.insert("interfaceName".to_string(), json!(interface));
    if let Some(mac) = f.str_opt("mac")?.filter(|m| !m.is_empty()) {
        if !is_valid_mac(mac) {
            return Err(ConversionError::invalid("mac", mac, "not a valid MAC address"));
        }
        spec.insert("mac".to_string(), json!(mac.to_ascii_lowercase()));
    }
    spec.insert("ipNetworks".to_string(), json!(networks));
    spec.insert("profiles".to_string(), json!(f.str_list("profile_ids")?));

    let resource = ModernResource::new(ModernKind::WorkloadEndpoint, name, Value::Object(spec))
        .in_namespace(DEFAULT_NAMESPACE)
        .with_labels(f.string_map("labels")?);
    Ok(Mapping::Resource(resource))
}

fn is_valid_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

// =============================================================================
// BGP and nodes
// =============================================================================

fn bgp_peer(legacy: &LegacyResource) -> Result<ModernResource> {
    let f = Fields::root(&legacy.fields)?;
    let ip = parse_ip(&f.path("ip"), f.str_req("ip")?)?;
    let as_number = match f.raw("as_num") {
        Some(value) => parse_as_number("as_num", value)?,
        None => return Err(ConversionError::missing("as_num")),
    };

    let ip_name = address_name(&ip.to_string());
    let mut spec = Map::new();
    let raw_name = match legacy.node.as_deref() {
        Some(node) => {
            spec.insert("node".to_string(), json!(node));
            format!("{}-{}", node, ip_name)
        }
        None => format!("global-{}", ip_name),
    };
    spec.insert("peerIP".to_string(), json!(ip.to_string()));
    spec.insert("asNumber".to_string(), json!(as_number));

    let name = require_name("ip", &raw_name)?;
    Ok(ModernResource::new(ModernKind::BgpPeer, name, Value::Object(spec)))
}

fn node(legacy: &LegacyResource) -> Result<ModernResource> {
    let f = Fields::root(&legacy.fields)?;
    let name = require_name("name", &legacy.name)?;

    let mut bgp = Map::new();
    if let Some(v4) = f.str_opt("ip_addr_v4")?.filter(|s| !s.is_empty()) {
        bgp.insert("ipv4Address".to_string(), json!(parse_cidr("ip_addr_v4", v4, true)?));
    }
    if let Some(v6) = f.str_opt("ip_addr_v6")?.filter(|s| !s.is_empty()) {
        bgp.insert("ipv6Address".to_string(), json!(parse_cidr("ip_addr_v6", v6, true)?));
    }
    if bgp.is_empty() {
        return Err(ConversionError::missing("ip_addr_v4"));
    }
    if let Some(value) = f.raw("as_num").filter(|v| v.as_str() != Some("")) {
        bgp.insert("asNumber".to_string(), json!(parse_as_number("as_num", value)?));
    }

    Ok(ModernResource::new(ModernKind::Node, name, json!({ "bgp": bgp })))
}

fn bgp_config(legacy: &LegacyResource) -> Result<ModernResource> {
    let f = Fields::root(&legacy.fields)?;
    let mut spec = Map::new();

    if let Some(value) = f.raw("as_num") {
        spec.insert("asNumber".to_string(), json!(parse_as_number("as_num", value)?));
    }

    if let Some(raw) = f.str_opt("node_mesh")? {
        let enabled = serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|mesh| mesh.get("enabled").and_then(Value::as_bool))
            .ok_or_else(|| ConversionError::invalid("node_mesh", raw, "expected {\"enabled\": true|false}"))?;
        spec.insert("nodeToNodeMeshEnabled".to_string(), json!(enabled));
    }

    if let Some(level) = f.str_opt("loglevel")? {
        if let Some(severity) = log_severity("loglevel", level)? {
            spec.insert("logSeverityScreen".to_string(), json!(severity));
        }
    }

    Ok(ModernResource::new(ModernKind::BgpConfiguration, "default", Value::Object(spec)))
}

// =============================================================================
// Felix configuration
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum FelixValue {
    Text,
    Bool,
    Int,
    Port,
    Seconds,
    Severity,
    Action,
}

/// v1 config key, v3 FelixConfiguration field, value type
const FELIX_FIELDS: &[(&str, &str, FelixValue)] = &[
    ("LogSeverityScreen", "logSeverityScreen", FelixValue::Severity),
    ("LogSeverityFile", "logSeverityFile", FelixValue::Severity),
    ("LogSeveritySys", "logSeveritySys", FelixValue::Severity),
    ("LogFilePath", "logFilePath", FelixValue::Text),
    ("InterfacePrefix", "interfacePrefix", FelixValue::Text),
    ("IpInIpEnabled", "ipipEnabled", FelixValue::Bool),
    ("IpInIpMtu", "ipipMTU", FelixValue::Int),
    ("ReportingIntervalSecs", "reportingInterval", FelixValue::Seconds),
    ("ReportingTTLSecs", "reportingTTL", FelixValue::Seconds),
    ("IptablesRefreshInterval", "iptablesRefreshInterval", FelixValue::Seconds),
    ("MetadataAddr", "metadataAddr", FelixValue::Text),
    ("MetadataPort", "metadataPort", FelixValue::Port),
    ("DefaultEndpointToHostAction", "defaultEndpointToHostAction", FelixValue::Action),
    ("PrometheusMetricsEnabled", "prometheusMetricsEnabled", FelixValue::Bool),
    ("PrometheusMetricsPort", "prometheusMetricsPort", FelixValue::Port),
];

fn felix_config(legacy: &LegacyResource) -> Result<ModernResource> {
    let f = Fields::root(&legacy.fields)?;
    let mut spec = Map::new();

    if let Value::Object(entries) = &legacy.fields {
        for key in entries.keys() {
            if !FELIX_FIELDS.iter().any(|(v1, _, _)| *v1 == key.as_str()) {
                tracing::debug!("Dropping Felix config key with no v3 mapping: {}", key);
            }
        }
    }

    for (v1_key, v3_key, kind) in FELIX_FIELDS {
        let Some(raw) = f.str_opt(v1_key)? else {
            continue;
        };
        if let Some(value) = felix_value(v1_key, raw, *kind)? {
            spec.insert((*v3_key).to_string(), value);
        }
    }

    Ok(ModernResource::new(ModernKind::FelixConfiguration, "default", Value::Object(spec)))
}

fn felix_value(field: &str, raw: &str, kind: FelixValue) -> Result<Option<Value>> {
    let raw = raw.trim();
    let value = match kind {
        FelixValue::Text => json!(raw),
        FelixValue::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" => json!(true),
            "false" => json!(false),
            _ => return Err(ConversionError::invalid(field, raw, "expected true or false")),
        },
        FelixValue::Int => json!(raw
            .parse::<u64>()
            .map_err(|_| ConversionError::invalid(field, raw, "expected an integer"))?),
        FelixValue::Port => json!(raw
            .parse::<u16>()
            .map_err(|_| ConversionError::invalid(field, raw, "expected a port number"))?),
        FelixValue::Seconds => {
            let secs = raw
                .parse::<u64>()
                .map_err(|_| ConversionError::invalid(field, raw, "expected a number of seconds"))?;
            json!(format!("{}s", secs))
        }
        FelixValue::Severity => match log_severity(field, raw)? {
            Some(severity) => json!(severity),
            None => return Ok(None),
        },
        FelixValue::Action => match raw.to_ascii_uppercase().as_str() {
            "DROP" => json!("Drop"),
            "RETURN" => json!("Return"),
            "ACCEPT" => json!("Accept"),
            _ => return Err(ConversionError::invalid(field, raw, "must be DROP, RETURN or ACCEPT")),
        },
    };
    Ok(Some(value))
}

/// Map a v1 log level to a v3 severity; `none` disables the setting
fn log_severity(field: &str, raw: &str) -> Result<Option<&'static str>> {
    let severity = match raw.to_ascii_lowercase().as_str() {
        "none" => return Ok(None),
        "debug" => "Debug",
        "info" => "Info",
        "warning" | "warn" => "Warning",
        "error" => "Error",
        "fatal" | "critical" => "Fatal",
        _ => return Err(ConversionError::invalid(field, raw, "unknown log level")),
    };
    Ok(Some(severity))
}
