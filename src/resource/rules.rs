//! v1 policy/profile rule conversion
//!
//! v1 rules are flat (`src_net`, `!dst_ports`, `src_tag` ...); v3 rules group
//! match criteria under `source` and `destination`. Tags have no v3
//! equivalent and become `has(<tag>)` selector terms.

use super::fields::{describe, parse_cidr, Fields};
use crate::error::ConversionError;
use serde_json::{json, Map, Value};

type Result<T> = std::result::Result<T, ConversionError>;

/// Convert the rule list stored under `key`
pub fn convert_rules(fields: &Fields<'_>, key: &str) -> Result<Vec<Value>> {
    fields
        .object_list(key)?
        .iter()
        .map(convert_rule)
        .collect()
}

/// Convert a single v1 rule
pub fn convert_rule(rule: &Fields<'_>) -> Result<Value> {
    let mut out = Map::new();

    let action = rule.str_req("action")?;
    out.insert("action".to_string(), Value::String(convert_action(rule, action)?));

    if let Some(version) = rule.u64_opt("ip_version")? {
        if version != 4 && version != 6 {
            return Err(ConversionError::invalid(rule.path("ip_version"), version.to_string(), "must be 4 or 6"));
        }
        out.insert("ipVersion".to_string(), json!(version));
    }

    if let Some(proto) = rule.raw("protocol") {
        out.insert("protocol".to_string(), convert_protocol(&rule.path("protocol"), proto)?);
    }
    if let Some(proto) = rule.raw("!protocol") {
        out.insert("notProtocol".to_string(), convert_protocol(&rule.path("!protocol"), proto)?);
    }

    if let Some(icmp) = convert_icmp(rule, "")? {
        out.insert("icmp".to_string(), icmp);
    }
    if let Some(icmp) = convert_icmp(rule, "!")? {
        out.insert("notICMP".to_string(), icmp);
    }

    let source = convert_entity(rule, "src")?;
    if !source.is_empty() {
        out.insert("source".to_string(), Value::Object(source));
    }
    let destination = convert_entity(rule, "dst")?;
    if !destination.is_empty() {
        out.insert("destination".to_string(), Value::Object(destination));
    }

    Ok(Value::Object(out))
}

fn convert_action(rule: &Fields<'_>, action: &str) -> Result<String> {
    let mapped = match action.to_ascii_lowercase().as_str() {
        "allow" => "Allow",
        "deny" => "Deny",
        "log" => "Log",
        "next-tier" => "Pass",
        _ => {
            return Err(ConversionError::invalid(
                rule.path("action"),
                action,
                "must be one of allow, deny, log, next-tier",
            ))
        }
    };
    Ok(mapped.to_string())
}

fn convert_protocol(field: &str, value: &Value) -> Result<Value> {
    match value {
        Value::String(name) => {
            let upper = name.to_ascii_uppercase();
            match upper.as_str() {
                "TCP" | "UDP" | "ICMP" | "ICMPV6" | "SCTP" | "UDPLITE" => Ok(Value::String(upper)),
                _ => match name.parse::<u8>() {
                    Ok(n) if n > 0 => Ok(json!(n)),
                    _ => Err(ConversionError::invalid(field, name.as_str(), "unknown protocol")),
                },
            }
        }
        Value::Number(n) => match n.as_u64() {
            Some(p) if (1..=255).contains(&p) => Ok(json!(p)),
            _ => Err(ConversionError::invalid(field, n.to_string(), "protocol number must be 1-255")),
        },
        other => Err(ConversionError::invalid(field, describe(other), "expected a protocol name or number")),
    }
}

fn convert_icmp(rule: &Fields<'_>, negation: &str) -> Result<Option<Value>> {
    let type_key = format!("{}icmp_type", negation);
    let code_key = format!("{}icmp_code", negation);
    let icmp_type = rule.u64_opt(&type_key)?;
    let icmp_code = rule.u64_opt(&code_key)?;

    if let Some(t) = icmp_type.filter(|t| *t > 254) {
        return Err(ConversionError::invalid(rule.path(&type_key), t.to_string(), "ICMP type must be 0-254"));
    }
    if let Some(c) = icmp_code.filter(|c| *c > 255) {
        return Err(ConversionError::invalid(rule.path(&code_key), c.to_string(), "ICMP code must be 0-255"));
    }

    match (icmp_type, icmp_code) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(ConversionError::missing(rule.path(&type_key))),
        (Some(t), code) => {
            let mut icmp = Map::new();
            icmp.insert("type".to_string(), json!(t));
            if let Some(c) = code {
                icmp.insert("code".to_string(), json!(c));
            }
            Ok(Some(Value::Object(icmp)))
        }
    }
}

/// Build the v3 `source`/`destination` block for the `src`/`dst` prefix
fn convert_entity(rule: &Fields<'_>, side: &str) -> Result<Map<String, Value>> {
    let mut entity = Map::new();

    for (negation, nets_key, selector_key, ports_key) in [
        ("", "nets", "selector", "ports"),
        ("!", "notNets", "notSelector", "notPorts"),
    ] {
        let nets = collect_nets(rule, negation, side)?;
        if !nets.is_empty() {
            entity.insert(nets_key.to_string(), json!(nets));
        }

        if let Some(selector) = combine_selector(rule, negation, side)? {
            entity.insert(selector_key.to_string(), Value::String(selector));
        }

        let ports_field = format!("{}{}_ports", negation, side);
        if let Some(ports) = rule.raw(&ports_field) {
            entity.insert(ports_key.to_string(), convert_ports(&rule.path(&ports_field), ports)?);
        }
    }

    Ok(entity)
}

fn collect_nets(rule: &Fields<'_>, negation: &str, side: &str) -> Result<Vec<String>> {
    let single_key = format!("{}{}_net", negation, side);
    let list_key = format!("{}{}_nets", negation, side);

    let mut nets = Vec::new();
    if let Some(net) = rule.str_opt(&single_key)? {
        nets.push(parse_cidr(&rule.path(&single_key), net, true)?);
    }
    for (idx, net) in rule.str_list(&list_key)?.iter().enumerate() {
        let field = format!("{}[{}]", rule.path(&list_key), idx);
        nets.push(parse_cidr(&field, net, true)?);
    }
    Ok(nets)
}

fn combine_selector(rule: &Fields<'_>, negation: &str, side: &str) -> Result<Option<String>> {
    let selector = rule.str_opt(&format!("{}{}_selector", negation, side))?;
    let tag = rule.str_opt(&format!("{}{}_tag", negation, side))?;

    Ok(match (selector.filter(|s| !s.is_empty()), tag.filter(|t| !t.is_empty())) {
        (None, None) => None,
        (Some(sel), None) => Some(sel.to_string()),
        (None, Some(tag)) => Some(format!("has({})", tag)),
        (Some(sel), Some(tag)) => Some(format!("({}) && has({})", sel, tag)),
    })
}

fn convert_ports(field: &str, value: &Value) -> Result<Value> {
    let Value::Array(items) = value else {
        return Err(ConversionError::invalid(field, describe(value), "expected a list of ports"));
    };

    let mut ports = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let item_field = format!("{}[{}]", field, idx);
        ports.push(convert_port(&item_field, item)?);
    }
    Ok(Value::Array(ports))
}

fn convert_port(field: &str, value: &Value) -> Result<Value> {
    let invalid = || ConversionError::invalid(field, describe(value), "expected a port (0-65535) or range 'min:max'");
    match value {
        Value::Number(n) => n
            .as_u64()
            .filter(|p| *p <= 65535)
            .map(|p| json!(p))
            .ok_or_else(invalid),
        Value::String(s) => {
            if let Ok(p) = s.parse::<u16>() {
                return Ok(json!(p));
            }
            let (min, max) = s.split_once(':').ok_or_else(invalid)?;
            let min: u16 = min.parse().map_err(|_| invalid())?;
            let max: u16 = max.parse().map_err(|_| invalid())?;
            if min > max {
                return Err(invalid());
            }
            Ok(Value::String(format!("{}:{}", min, max)))
        }
        _ => Err(invalid()),
    }
}
