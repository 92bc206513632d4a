//! Reconciliation of the Kea memfile lease log.
//!
//! The log keeps every renewal a client made, so the same hardware address
//! shows up many times. Reconciling keeps, per hardware address, only the
//! newest row that is both valid and unexpired.

use std::collections::HashMap;

use serde_derive::Serialize;

use crate::address::{self, AddressV4};
use crate::error::Result;

/// Kea's memfile column order, used when the log has no header row.
const DEFAULT_COLUMNS: &[&str] = &[
    "address",
    "hwaddr",
    "client_id",
    "valid_lifetime",
    "expire",
    "subnet_id",
    "fqdn_fwd",
    "fqdn_rev",
    "hostname",
    "state",
    "user_context",
    "pool_id",
];

/// Where the raw lease log comes from.
pub trait LeaseSource: Send + Sync {
    /// Log contents, or `None` when no log exists yet.
    fn read_raw(&self) -> Result<Option<String>>;
}

/// Lease state for a valid, assigned lease.
pub const STATE_DEFAULT: u32 = 0;

/// One row of the lease log.
#[derive(Clone, Debug, PartialEq)]
pub struct LeaseRecord {
    pub address: String,
    pub hw_address: String,
    pub expire: u64,
    pub state: u32,
    pub hostname: String,
}

impl LeaseRecord {
    pub fn active(&self, now: u64) -> bool {
        self.state == STATE_DEFAULT && self.expire > now
    }
}

/// A client's current lease.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LeaseView {
    #[serde(rename = "ip-address")]
    pub ip_address: String,
    #[serde(rename = "hw-address")]
    pub hw_address: String,
    pub hostname: String,
    pub expire: u64,
    pub state: u32,
}

impl From<LeaseRecord> for LeaseView {
    fn from(record: LeaseRecord) -> Self {
        LeaseView {
            ip_address: record.address,
            hw_address: record.hw_address,
            hostname: record.hostname,
            expire: record.expire,
            state: record.state,
        }
    }
}

struct Columns {
    address: usize,
    hwaddr: usize,
    expire: usize,
    hostname: Option<usize>,
    state: usize,
}

impl Columns {
    fn from_names(names: &[&str]) -> Option<Columns> {
        let idx = |name: &str| names.iter().position(|n| n.trim() == name);
        Some(Columns {
            address: idx("address")?,
            hwaddr: idx("hwaddr")?,
            expire: idx("expire")?,
            hostname: idx("hostname"),
            state: idx("state")?,
        })
    }

    fn parse(&self, line: &str) -> Option<LeaseRecord> {
        let fields: Vec<&str> = line.split(',').collect();
        let field = |i: usize| fields.get(i).map(|f| f.trim());
        Some(LeaseRecord {
            address: field(self.address)?.to_string(),
            hw_address: field(self.hwaddr)?.to_lowercase(),
            expire: field(self.expire)?.parse().ok()?,
            state: field(self.state)?.parse().ok()?,
            hostname: self
                .hostname
                .and_then(field)
                .map(unescape)
                .unwrap_or_default(),
        })
    }
}

// Kea writes commas inside a field as "&#x2c".
fn unescape(text: &str) -> String {
    text.replace("&#x2c", ",")
}

/// The parsed lease log.
pub struct LeaseLog {
    pub records: Vec<LeaseRecord>,
    /// Rows dropped because a required field was missing or unparseable.
    pub skipped: usize,
}

impl LeaseLog {
    pub fn parse(raw: &str) -> LeaseLog {
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty()).peekable();
        let mut columns = Columns::from_names(DEFAULT_COLUMNS);
        if let Some(first) = lines.peek().copied() {
            let names: Vec<&str> = first.split(',').collect();
            if names.first().map(|n| n.trim()) == Some("address") {
                columns = Columns::from_names(&names);
                lines.next();
            }
        }

        let mut log = LeaseLog {
            records: Vec::new(),
            skipped: 0,
        };
        let columns = match columns {
            Some(c) => c,
            None => {
                log.skipped = lines.count();
                return log;
            }
        };
        for line in lines {
            match columns.parse(line) {
                Some(record) => log.records.push(record),
                None => log.skipped += 1,
            }
        }
        log
    }
}

/// Reduce a lease log to one active lease per hardware address.
///
/// Output is ordered by address so repeated queries are stable.
pub fn reconcile(records: Vec<LeaseRecord>, now: u64) -> Vec<LeaseView> {
    let mut newest: HashMap<String, LeaseRecord> = HashMap::new();
    for record in records {
        if record.hw_address.is_empty() || !record.active(now) {
            continue;
        }
        match newest.get(&record.hw_address) {
            Some(kept) if kept.expire >= record.expire => {}
            _ => {
                newest.insert(record.hw_address.clone(), record);
            }
        }
    }

    let mut views: Vec<LeaseView> = newest.into_values().map(LeaseView::from).collect();
    views.sort_by_key(|v| {
        (
            address::parse_address(&v.ip_address).map_or(u32::MAX, |a: AddressV4| a.ordinal()),
            v.hw_address.clone(),
        )
    });
    views
}
