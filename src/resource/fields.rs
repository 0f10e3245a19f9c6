//! Field access for v1 records
//!
//! Every accessor reports failures with the full dotted field path
//! (`inbound_rules[2].src_net`) and the offending value, which the report
//! shows verbatim.

use crate::error::ConversionError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::IpAddr;

type Result<T> = std::result::Result<T, ConversionError>;

/// A JSON object plus the path it was reached by
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
    prefix: String,
}

impl<'a> Fields<'a> {
    /// Wrap the top-level value of a record
    pub fn root(value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                map,
                prefix: String::new(),
            }),
            Value::String(raw) => Err(ConversionError::Malformed {
                message: format!("value is not a JSON object: {}", truncate(raw)),
            }),
            other => Err(ConversionError::Malformed {
                message: format!("value is not a JSON object: {}", describe(other)),
            }),
        }
    }

    /// Full path of a field under this object
    pub fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.get(key).is_some_and(|v| !v.is_null())
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    pub fn str_opt(&self, key: &str) -> Result<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(ConversionError::invalid(self.path(key), describe(other), "expected a string")),
        }
    }

    pub fn str_req(&self, key: &str) -> Result<&'a str> {
        match self.str_opt(key)? {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(ConversionError::missing(self.path(key))),
        }
    }

    pub fn bool_opt(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(ConversionError::invalid(self.path(key), describe(other), "expected a boolean")),
        }
    }

    pub fn u64_opt(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| ConversionError::invalid(self.path(key), n.to_string(), "expected a non-negative integer")),
            Some(other) => Err(ConversionError::invalid(self.path(key), describe(other), "expected an integer")),
        }
    }

    pub fn f64_opt(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(other) => Err(ConversionError::invalid(self.path(key), describe(other), "expected a number")),
        }
    }

    /// Optional list of strings; absent means empty
    pub fn str_list(&self, key: &str) -> Result<Vec<String>> {
        let Some(value) = self.get(key) else {
            return Ok(Vec::new());
        };
        let Value::Array(items) = value else {
            return Err(ConversionError::invalid(self.path(key), describe(value), "expected a list of strings"));
        };
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(ConversionError::invalid(
                    format!("{}[{}]", self.path(key), idx),
                    describe(other),
                    "expected a string",
                )),
            })
            .collect()
    }

    /// Optional string-to-string map; absent means empty
    pub fn string_map(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let Some(value) = self.get(key) else {
            return Ok(BTreeMap::new());
        };
        let Value::Object(map) = value else {
            return Err(ConversionError::invalid(self.path(key), describe(value), "expected a map of strings"));
        };
        map.iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                other => Err(ConversionError::invalid(
                    format!("{}.{}", self.path(key), k),
                    describe(other),
                    "expected a string",
                )),
            })
            .collect()
    }

    /// Optional list of objects; absent means empty
    pub fn object_list(&self, key: &str) -> Result<Vec<Fields<'a>>> {
        let Some(value) = self.get(key) else {
            return Ok(Vec::new());
        };
        let Value::Array(items) = value else {
            return Err(ConversionError::invalid(self.path(key), describe(value), "expected a list"));
        };
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let path = format!("{}[{}]", self.path(key), idx);
                match item {
                    Value::Object(map) => Ok(Fields { map, prefix: path }),
                    other => Err(ConversionError::invalid(path, describe(other), "expected an object")),
                }
            })
            .collect()
    }

    /// Optional nested object
    pub fn object_opt(&self, key: &str) -> Result<Option<Fields<'a>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Fields {
                map,
                prefix: self.path(key),
            })),
            Some(other) => Err(ConversionError::invalid(self.path(key), describe(other), "expected an object")),
        }
    }

    /// Raw value, if present
    pub fn raw(&self, key: &str) -> Option<&'a Value> {
        self.get(key)
    }
}

/// Validate a CIDR, or a bare address when `allow_bare` is set
///
/// Returns the canonical `addr/prefix` form.
pub fn parse_cidr(field: &str, raw: &str, allow_bare: bool) -> Result<String> {
    let (addr_part, prefix_part) = match raw.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (raw, None),
    };

    let addr: IpAddr = addr_part
        .parse()
        .map_err(|_| ConversionError::invalid(field, raw, "not a valid IP address or CIDR"))?;
    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };

    let prefix = match prefix_part {
        Some(p) => p
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= max_prefix)
            .ok_or_else(|| ConversionError::invalid(field, raw, format!("prefix length must be 0-{}", max_prefix)))?,
        None if allow_bare => max_prefix,
        None => return Err(ConversionError::invalid(field, raw, "expected a CIDR (address/prefix)")),
    };

    Ok(format!("{}/{}", addr, prefix))
}

/// Validate an IP address
pub fn parse_ip(field: &str, raw: &str) -> Result<IpAddr> {
    raw.parse()
        .map_err(|_| ConversionError::invalid(field, raw, "not a valid IP address"))
}

/// Validate a BGP AS number, given as a number or a decimal string
pub fn parse_as_number(field: &str, value: &Value) -> Result<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if (1..=u64::from(u32::MAX)).contains(&n) => Ok(n),
        _ => Err(ConversionError::invalid(
            field,
            describe(value),
            "AS number must be between 1 and 4294967295",
        )),
    }
}

/// Render a value for an error message: strings unquoted, everything else as JSON
pub fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => truncate(s),
        other => truncate(&other.to_string()),
    }
}

fn truncate(raw: &str) -> String {
    const MAX: usize = 80;
    if raw.chars().count() > MAX {
        format!("{}...", raw.chars().take(MAX).collect::<String>())
    } else {
        raw.to_string()
    }
}
