//! Reservation CRUD over a [`ConfigDocument`].
//!
//! The document itself does not enforce uniqueness; every mutation goes
//! through this module, which rejects a change before touching the document
//! when it would break one of:
//!
//! - a hardware address appears in at most one reservation
//! - an IP address appears in at most one reservation
//! - newly placed addresses lie in the reserved range
//!
//! New reservations are always appended to subnet 0. Reads and removals see
//! every subnet.

use std::collections::HashSet;

use crate::address::{self, AddressRange, AddressV4};
use crate::document::{ConfigDocument, Reservation};
use crate::error::{Error, Result};

pub struct ReservationEngine {
    reserved: AddressRange,
}

impl ReservationEngine {
    pub fn new(reserved: AddressRange) -> ReservationEngine {
        ReservationEngine { reserved }
    }

    pub fn reserved_range(&self) -> AddressRange {
        self.reserved
    }

    /// Highest free address in the reserved range, scanning downwards.
    pub fn allocate(&self, doc: &ConfigDocument) -> Result<AddressV4> {
        let used = used_addresses(doc);
        self.reserved
            .descending()
            .find(|addr| !used.contains(addr))
            .ok_or(Error::RangeExhausted(self.reserved))
    }

    pub fn add(
        &self,
        doc: &mut ConfigDocument,
        hw_address: &str,
        ip_address: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<Reservation> {
        let mac = address::parse_mac(hw_address)
            .map_err(|_| Error::InvalidMac(hw_address.to_string()))?;
        if list_reservations(doc)
            .iter()
            .any(|r| r.has_mac(&mac, hw_address))
        {
            return Err(Error::DuplicateMac(mac.to_string()));
        }

        let requested = match ip_address.map(str::trim).filter(|s| !s.is_empty()) {
            Some(text) => Some(
                address::parse_address(text)
                    .map_err(|_| Error::InvalidAddress(text.to_string()))?,
            ),
            None => None,
        };
        let pool = doc.first_subnet().pool_range();
        let addr = match requested {
            None => self.allocate(doc)?,
            Some(addr) if pool.map_or(false, |p| p.contains(addr)) => self.allocate(doc)?,
            Some(addr) if self.reserved.contains(addr) => addr,
            Some(addr) => {
                return Err(Error::OutOfRange {
                    address: addr,
                    range: self.reserved,
                })
            }
        };
        if used_addresses(doc).contains(&addr) {
            return Err(Error::DuplicateAddress(addr));
        }

        let hostname = hostname
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let reservation = Reservation::new(mac, addr, hostname);
        doc.first_subnet_mut()
            .reservations
            .push(reservation.clone());
        Ok(reservation)
    }

    /// Move the reservation matching `identifier` to `new_address`.
    ///
    /// Unlike [`add`](Self::add), an address inside the pool is rejected
    /// rather than redirected.
    pub fn update_address(
        &self,
        doc: &mut ConfigDocument,
        identifier: &str,
        new_address: &str,
    ) -> Result<Reservation> {
        let addr = address::parse_address(new_address)
            .map_err(|_| Error::InvalidAddress(new_address.to_string()))?;
        if !self.reserved.contains(addr) {
            return Err(Error::OutOfRange {
                address: addr,
                range: self.reserved,
            });
        }

        let (subnet_idx, res_idx) = find(doc, identifier)
            .ok_or_else(|| Error::NotFound(identifier.to_string()))?;
        let collides = doc.subnets().iter().enumerate().any(|(si, subnet)| {
            subnet
                .reservations
                .iter()
                .enumerate()
                .any(|(ri, r)| (si, ri) != (subnet_idx, res_idx) && r.address() == Some(addr))
        });
        if collides {
            return Err(Error::DuplicateAddress(addr));
        }

        let reservation = &mut doc.subnets_mut()[subnet_idx].reservations[res_idx];
        reservation.ip_address = addr.to_string();
        Ok(reservation.clone())
    }
}

/// Every reservation in the document, subnet by subnet, in source order.
pub fn list_reservations(doc: &ConfigDocument) -> Vec<Reservation> {
    doc.subnets()
        .iter()
        .flat_map(|s| s.reservations.iter().cloned())
        .collect()
}

/// Remove the first entry matching `identifier` from each subnet.
pub fn remove_reservation(doc: &mut ConfigDocument, identifier: &str) -> bool {
    let mut removed = false;
    for subnet in doc.subnets_mut() {
        if let Some(pos) = subnet.reservations.iter().position(|r| r.matches(identifier)) {
            subnet.reservations.remove(pos);
            removed = true;
        }
    }
    removed
}

fn find(doc: &ConfigDocument, identifier: &str) -> Option<(usize, usize)> {
    doc.subnets().iter().enumerate().find_map(|(si, subnet)| {
        subnet
            .reservations
            .iter()
            .position(|r| r.matches(identifier))
            .map(|ri| (si, ri))
    })
}

fn used_addresses(doc: &ConfigDocument) -> HashSet<AddressV4> {
    list_reservations(doc)
        .iter()
        .filter_map(Reservation::address)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::SAMPLE;
    use pretty_assertions::assert_eq;

    const EMPTY: &str = r#"{
        "Dhcp4": {
            "subnet4": [
                {
                    "subnet": "192.168.123.0/24",
                    "pools": [ { "pool": "192.168.123.50 - 192.168.123.254" } ]
                }
            ]
        }
    }"#;

    fn engine() -> ReservationEngine {
        ReservationEngine::new(
            AddressRange::new(
                AddressV4::from([192, 168, 123, 2]),
                AddressV4::from([192, 168, 123, 49]),
            )
            .unwrap(),
        )
    }

    fn mac_for(i: u32) -> String {
        format!("02:00:00:00:00:{:02x}", i)
    }

    /// Fill the reserved range except for the given last octets.
    fn filled_except(free: &[u8]) -> ConfigDocument {
        let mut doc = ConfigDocument::load(EMPTY).unwrap();
        for octet in 2..=49u8 {
            if free.contains(&octet) {
                continue;
            }
            doc.first_subnet_mut().reservations.push(Reservation {
                hw_address: mac_for(u32::from(octet)),
                ip_address: format!("192.168.123.{}", octet),
                ..Reservation::default()
            });
        }
        doc
    }

    #[test]
    fn auto_allocates_from_the_top() {
        let engine = engine();
        let mut doc = ConfigDocument::load(EMPTY).unwrap();
        let first = engine.add(&mut doc, "AA:BB:CC:DD:EE:FF", None, None).unwrap();
        assert_eq!(first.ip_address, "192.168.123.49");
        assert_eq!(first.hw_address, "aa:bb:cc:dd:ee:ff");
        let second = engine
            .add(&mut doc, "aa:bb:cc:dd:ee:01", None, Some("laptop"))
            .unwrap();
        assert_eq!(second.ip_address, "192.168.123.48");
        assert_eq!(second.hostname.as_deref(), Some("laptop"));
        assert_eq!(list_reservations(&doc), vec![first, second]);
    }

    #[test]
    fn allocates_last_free_address() {
        let mut doc = filled_except(&[2]);
        let r = engine().add(&mut doc, "aa:bb:cc:dd:ee:ff", None, None).unwrap();
        assert_eq!(r.ip_address, "192.168.123.2");
    }

    #[test]
    fn exhausted_range() {
        let mut doc = filled_except(&[]);
        let before = doc.clone();
        match engine().add(&mut doc, "aa:bb:cc:dd:ee:ff", None, None) {
            Err(Error::RangeExhausted(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        match engine().add(&mut doc, "aa:bb:cc:dd:ee:ff", Some("192.168.123.100"), None) {
            Err(Error::RangeExhausted(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(doc, before);
    }

    #[test]
    fn duplicate_mac_wins_over_address_checks() {
        let engine = engine();
        let mut doc = ConfigDocument::load(SAMPLE).unwrap();
        for ip in &[None, Some("192.168.123.30"), Some("bogus"), Some("8.8.8.8")] {
            match engine.add(&mut doc, "00-11-22-33-44-55", *ip, None) {
                Err(Error::DuplicateMac(mac)) => assert_eq!(mac, "00:11:22:33:44:55"),
                other => panic!("unexpected {:?}", other),
            }
        }
        // MAC held in a subnet other than 0 is still a duplicate.
        assert!(matches!(
            engine.add(&mut doc, "66:77:88:99:AA:BB", None, None),
            Err(Error::DuplicateMac(_))
        ));
    }

    #[test]
    fn pool_address_is_redirected() {
        let engine = engine();
        let mut doc = ConfigDocument::load(EMPTY).unwrap();
        let r = engine
            .add(&mut doc, "aa:bb:cc:dd:ee:ff", Some("192.168.123.100"), None)
            .unwrap();
        assert_eq!(r.ip_address, "192.168.123.49");
        assert!(engine.reserved_range().contains(r.address().unwrap()));
    }

    #[test]
    fn explicit_address_rules() {
        let engine = engine();
        let mut doc = ConfigDocument::load(SAMPLE).unwrap();
        let r = engine
            .add(&mut doc, "aa:bb:cc:dd:ee:ff", Some("192.168.123.20"), None)
            .unwrap();
        assert_eq!(r.ip_address, "192.168.123.20");

        match engine.add(&mut doc, "aa:bb:cc:dd:ee:01", Some("10.0.0.9"), None) {
            Err(Error::OutOfRange { address, range }) => {
                assert_eq!(address.to_string(), "10.0.0.9");
                assert_eq!(range, engine.reserved_range());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            engine.add(&mut doc, "aa:bb:cc:dd:ee:01", Some("192.168.123.256"), None),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            engine.add(&mut doc, "aa:bb:cc:dd:ee:01", Some("192.168.123.10"), None),
            Err(Error::DuplicateAddress(_))
        ));
        assert!(matches!(
            engine.add(&mut doc, "not-a-mac", None, None),
            Err(Error::InvalidMac(_))
        ));
    }

    #[test]
    fn allocation_skips_addresses_used_in_any_subnet() {
        let engine = engine();
        let mut doc = ConfigDocument::load(EMPTY).unwrap();
        doc.first_subnet_mut().reservations.push(Reservation {
            hw_address: mac_for(1),
            ip_address: "192.168.123.49".to_string(),
            ..Reservation::default()
        });
        let r = engine.add(&mut doc, "aa:bb:cc:dd:ee:ff", None, None).unwrap();
        assert_eq!(r.ip_address, "192.168.123.48");
    }

    #[test]
    fn remove_by_either_key() {
        let engine = engine();
        for key in &["192.168.123.49", "AA:BB:CC:DD:EE:FF"] {
            let mut doc = ConfigDocument::load(EMPTY).unwrap();
            engine.add(&mut doc, "aa:bb:cc:dd:ee:ff", None, None).unwrap();
            engine.add(&mut doc, "aa:bb:cc:dd:ee:01", None, None).unwrap();
            assert!(remove_reservation(&mut doc, key));
            let left = list_reservations(&doc);
            assert_eq!(left.len(), 1);
            assert_eq!(left[0].hw_address, "aa:bb:cc:dd:ee:01");
            assert!(!remove_reservation(&mut doc, key));
        }
    }

    #[test]
    fn remove_searches_every_subnet() {
        let mut doc = ConfigDocument::load(SAMPLE).unwrap();
        assert!(remove_reservation(&mut doc, "10.0.0.5"));
        assert!(doc.subnets()[1].reservations.is_empty());
        assert_eq!(doc.first_subnet().reservations.len(), 1);
    }

    #[test]
    fn update_moves_within_reserved_range() {
        let engine = engine();
        let mut doc = ConfigDocument::load(SAMPLE).unwrap();
        let r = engine
            .update_address(&mut doc, "00:11:22:33:44:55", "192.168.123.30")
            .unwrap();
        assert_eq!(r.ip_address, "192.168.123.30");
        assert_eq!(r.hostname.as_deref(), Some("printer"));
        // Re-assigning its own address is not a collision.
        engine
            .update_address(&mut doc, "192.168.123.30", "192.168.123.30")
            .unwrap();
    }

    #[test]
    fn update_rejects_pool_and_foreign_addresses() {
        let engine = engine();
        let mut doc = ConfigDocument::load(SAMPLE).unwrap();
        engine
            .add(&mut doc, "aa:bb:cc:dd:ee:ff", Some("192.168.123.20"), None)
            .unwrap();
        let before = doc.clone();

        assert!(matches!(
            engine.update_address(&mut doc, "00:11:22:33:44:55", "192.168.123.100"),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            engine.update_address(&mut doc, "00:11:22:33:44:55", "192.168.123.20"),
            Err(Error::DuplicateAddress(_))
        ));
        assert!(matches!(
            engine.update_address(&mut doc, "00:11:22:33:44:55", "192.168.123"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            engine.update_address(&mut doc, "de:ad:be:ef:00:00", "192.168.123.30"),
            Err(Error::NotFound(_))
        ));
        assert_eq!(doc, before);
    }
}
