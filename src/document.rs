//! Validated model of the part of a Kea `Dhcp4` configuration this crate
//! edits.
//!
//! Only the subnet list is typed. Every other key, at any level, is carried
//! through untouched so that writing a document back changes nothing but
//! what was mutated.

use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::address::{self, AddressRange, AddressV4, MacAddress};
use crate::error::{Error, Result};

const DHCP_SECTION: &str = "Dhcp4";
const SUBNET_LIST: &str = "subnet4";
// Typed subnet lists; skipped when empty unless the file spelled them out.
const LIST_KEYS: [&str; 3] = ["pools", "reservations", "option-data"];

/// A static host reservation as stored in a subnet's `reservations` list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    #[serde(rename = "hw-address", default, skip_serializing_if = "String::is_empty")]
    pub hw_address: String,
    #[serde(rename = "ip-address", default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reservation {
    pub fn new(mac: MacAddress, addr: AddressV4, hostname: Option<String>) -> Reservation {
        Reservation {
            hw_address: mac.to_string(),
            ip_address: addr.to_string(),
            hostname,
            extra: Map::new(),
        }
    }

    pub fn mac(&self) -> Option<MacAddress> {
        address::parse_mac(&self.hw_address).ok()
    }

    pub fn address(&self) -> Option<AddressV4> {
        address::parse_address(&self.ip_address).ok()
    }

    /// Whether this entry holds the given hardware address.
    ///
    /// Entries whose stored text is not a parseable MAC still match on a
    /// case-insensitive text comparison.
    pub fn has_mac(&self, mac: &MacAddress, text: &str) -> bool {
        match self.mac() {
            Some(own) => own == *mac,
            None => !self.hw_address.is_empty() && self.hw_address.eq_ignore_ascii_case(text),
        }
    }

    /// Dual-key identity: hardware address (case-insensitive) or IP address
    /// (exact).
    pub fn matches(&self, identifier: &str) -> bool {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return false;
        }
        if self.ip_address == identifier {
            return true;
        }
        match address::parse_mac(identifier) {
            Ok(mac) => self.has_mac(&mac, identifier),
            Err(_) => self.hw_address.eq_ignore_ascii_case(identifier),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub pool: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pools: Vec<Pool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reservations: Vec<Reservation>,
    #[serde(rename = "option-data", default, skip_serializing_if = "Vec::is_empty")]
    pub option_data: Vec<OptionData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Subnet {
    /// The dynamic pool range: the first pool entry that parses.
    pub fn pool_range(&self) -> Option<AddressRange> {
        self.pools
            .iter()
            .find_map(|p| address::parse_pool(&p.pool).ok())
    }

    /// Data of the named option, e.g. `routers`.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.option_data
            .iter()
            .find(|o| o.name.as_deref() == Some(name))
            .and_then(|o| o.data.as_deref())
    }
}

/// A configuration document with at least one subnet.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigDocument {
    // Whole document with the subnet list slot left as `null`.
    root: Map<String, Value>,
    subnets: Vec<Subnet>,
    // Key order of each subnet as read.
    layouts: Vec<Vec<String>>,
}

impl ConfigDocument {
    /// Parse raw file contents.
    ///
    /// The file may carry comments or other noise around the JSON object;
    /// everything outside the first `{` and the last `}` is ignored.
    pub fn load(raw: &str) -> Result<ConfigDocument> {
        let body = extract_object(raw)?;
        let value: Value = serde_json::from_str(body)
            .map_err(|e| Error::MalformedConfig(format!("invalid JSON: {}", e)))?;
        ConfigDocument::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<ConfigDocument> {
        let mut root = match value {
            Value::Object(map) => map,
            _ => {
                return Err(Error::MalformedConfig(
                    "top level is not an object".to_string(),
                ))
            }
        };
        let section = root
            .get_mut(DHCP_SECTION)
            .ok_or_else(|| Error::MalformedConfig(format!("missing {} section", DHCP_SECTION)))?
            .as_object_mut()
            .ok_or_else(|| {
                Error::MalformedConfig(format!("{} section is not an object", DHCP_SECTION))
            })?;
        let slot = section.get_mut(SUBNET_LIST).ok_or_else(|| {
            Error::MalformedConfig(format!("missing {}.{}", DHCP_SECTION, SUBNET_LIST))
        })?;
        if !slot.is_array() {
            return Err(Error::MalformedConfig(format!(
                "{}.{} is not a list",
                DHCP_SECTION, SUBNET_LIST
            )));
        }
        let layouts = slot
            .as_array()
            .map(|list| list.iter().map(key_order).collect())
            .unwrap_or_default();
        let subnets: Vec<Subnet> = serde_json::from_value(slot.take())
            .map_err(|e| Error::MalformedConfig(format!("invalid subnet entry: {}", e)))?;
        if subnets.is_empty() {
            return Err(Error::MalformedConfig(format!(
                "{}.{} is empty",
                DHCP_SECTION, SUBNET_LIST
            )));
        }
        Ok(ConfigDocument {
            root,
            subnets,
            layouts,
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut subnets = Vec::with_capacity(self.subnets.len());
        for (idx, subnet) in self.subnets.iter().enumerate() {
            let value = match serde_json::to_value(subnet)? {
                Value::Object(fields) => {
                    let layout = self.layouts.get(idx).map(Vec::as_slice).unwrap_or(&[]);
                    Value::Object(with_layout(fields, layout))
                }
                other => other,
            };
            subnets.push(value);
        }
        let mut root = self.root.clone();
        if let Some(Value::Object(section)) = root.get_mut(DHCP_SECTION) {
            section.insert(SUBNET_LIST.to_string(), Value::Array(subnets));
        }
        Ok(Value::Object(root))
    }

    /// Serialize for writing, indented with four spaces.
    pub fn render(&self) -> Result<String> {
        use serde::Serialize;

        let value = self.to_value()?;
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut ser)?;
        out.push(b'\n');
        String::from_utf8(out).map_err(|e| Error::MalformedConfig(e.to_string()))
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    /// Mutable access to the subnets. A slice so the list cannot be emptied.
    pub fn subnets_mut(&mut self) -> &mut [Subnet] {
        &mut self.subnets
    }

    /// Reservations and pools are only ever placed in subnet 0.
    pub fn first_subnet(&self) -> &Subnet {
        // non-empty by construction
        &self.subnets[0]
    }

    pub fn first_subnet_mut(&mut self) -> &mut Subnet {
        &mut self.subnets[0]
    }
}

fn key_order(subnet: &Value) -> Vec<String> {
    subnet
        .as_object()
        .map(|fields| fields.keys().cloned().collect())
        .unwrap_or_default()
}

/// Reorder serialized subnet fields to follow `layout`; keys not in it go
/// last. A list key present in `layout` stays, as `[]` if it is now empty.
fn with_layout(fields: Map<String, Value>, layout: &[String]) -> Map<String, Value> {
    let mut ordered = Map::new();
    for key in layout {
        if let Some(value) = fields.get(key) {
            ordered.insert(key.clone(), value.clone());
        } else if LIST_KEYS.contains(&key.as_str()) {
            ordered.insert(key.clone(), Value::Array(Vec::new()));
        }
    }
    for (key, value) in fields {
        if !ordered.contains_key(&key) {
            ordered.insert(key, value);
        }
    }
    ordered
}

fn extract_object(raw: &str) -> Result<&str> {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(first), Some(last)) if last > first => Ok(&raw[first..=last]),
        _ => Err(Error::MalformedConfig(
            "no JSON object found in configuration".to_string(),
        )),
    }
}
