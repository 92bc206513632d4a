//! IPv4 and hardware address arithmetic.
//!
//! Addresses are handled as 32-bit ordinals so that range membership and
//! range scans are plain integer comparisons.

use nom::branch::alt;
use nom::bytes::complete::take_while_m_n;
use nom::character::complete::{char, digit1, one_of, space0};
use nom::combinator::{all_consuming, map, map_res};
use nom::multi::separated_list1;
use nom::sequence::{preceded, separated_pair, tuple};
use nom::IResult;
use serde::{Deserializer, Serializer};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// An IPv4 address ordered by its integer value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressV4(u32);

impl AddressV4 {
    pub fn ordinal(&self) -> u32 {
        self.0
    }
}

impl From<u32> for AddressV4 {
    fn from(ordinal: u32) -> Self {
        AddressV4(ordinal)
    }
}

impl From<[u8; 4]> for AddressV4 {
    fn from(octets: [u8; 4]) -> Self {
        AddressV4(u32::from_be_bytes(octets))
    }
}

impl From<Ipv4Addr> for AddressV4 {
    fn from(addr: Ipv4Addr) -> Self {
        AddressV4(u32::from(addr))
    }
}

impl From<AddressV4> for Ipv4Addr {
    fn from(addr: AddressV4) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl fmt::Display for AddressV4 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(self.0))
    }
}

impl std::str::FromStr for AddressV4 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_address(s)
    }
}

impl serde::Serialize for AddressV4 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for AddressV4 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        parse_address(&text).map_err(serde::de::Error::custom)
    }
}

/// A closed interval of addresses, `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: AddressV4,
    pub end: AddressV4,
}

impl AddressRange {
    pub fn new(start: AddressV4, end: AddressV4) -> Result<AddressRange> {
        if start > end {
            return Err(Error::InvalidFormat(format!(
                "range start {} is after range end {}",
                start, end
            )));
        }
        Ok(AddressRange { start, end })
    }

    pub fn contains(&self, addr: AddressV4) -> bool {
        in_range(addr, self)
    }

    /// Number of addresses in the range, both ends included.
    pub fn capacity(&self) -> u64 {
        u64::from(self.end.0) - u64::from(self.start.0) + 1
    }

    /// Every address in the range from the highest ordinal to the lowest.
    pub fn descending(&self) -> impl Iterator<Item = AddressV4> {
        (self.start.0..=self.end.0).rev().map(AddressV4)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// A six-octet hardware address.
///
/// Displays in the canonical lowercase, colon-delimited form which is also
/// the form written back into the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl serde::Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn octet(input: &str) -> IResult<&str, u8> {
    map_res(digit1, |s: &str| s.parse::<u8>())(input)
}

fn dotted_quad(input: &str) -> IResult<&str, AddressV4> {
    map(
        tuple((
            octet,
            preceded(char('.'), octet),
            preceded(char('.'), octet),
            preceded(char('.'), octet),
        )),
        |(a, b, c, d)| AddressV4::from([a, b, c, d]),
    )(input)
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(
        take_while_m_n(1, 2, |c: char| c.is_ascii_hexdigit()),
        |s: &str| u8::from_str_radix(s, 16),
    )(input)
}

fn pool_span(input: &str) -> IResult<&str, (AddressV4, AddressV4)> {
    separated_pair(dotted_quad, tuple((space0, char('-'), space0)), dotted_quad)(input)
}

fn pool_prefix(input: &str) -> IResult<&str, (AddressV4, u8)> {
    separated_pair(dotted_quad, char('/'), map_res(digit1, |s: &str| s.parse::<u8>()))(input)
}

/// Parse a dotted-quad address: exactly four decimal components in `0..=255`.
pub fn parse_address(text: &str) -> Result<AddressV4> {
    all_consuming(dotted_quad)(text.trim())
        .map(|(_, addr)| addr)
        .map_err(|_| Error::InvalidFormat(format!("not a dotted-quad IPv4 address: {:?}", text)))
}

/// Parse a hardware address written with `:` or `-` between six hex octets.
pub fn parse_mac(text: &str) -> Result<MacAddress> {
    let invalid = || Error::InvalidFormat(format!("not a six-octet MAC address: {:?}", text));
    let (_, parts) = all_consuming(separated_list1(one_of(":-"), hex_byte))(text.trim())
        .map_err(|_| invalid())?;
    let octets: [u8; 6] = parts.try_into().map_err(|_| invalid())?;
    Ok(MacAddress(octets))
}

/// Parse a Kea pool string, either `start - end` or `network/len`.
pub fn parse_pool(text: &str) -> Result<AddressRange> {
    let invalid = || Error::InvalidFormat(format!("not a pool range: {:?}", text));
    let (_, range) = all_consuming(alt((
        map(pool_span, |(start, end)| AddressRange::new(start, end)),
        map(pool_prefix, |(network, len)| prefix_range(network, len)),
    )))(text.trim())
    .map_err(|_| invalid())?;
    range
}

fn prefix_range(network: AddressV4, len: u8) -> Result<AddressRange> {
    if len > 32 {
        return Err(Error::InvalidFormat(format!("prefix length {} exceeds 32", len)));
    }
    let mask = if len == 0 { 0 } else { u32::MAX << (32 - u32::from(len)) };
    let start = network.0 & mask;
    AddressRange::new(AddressV4(start), AddressV4(start | !mask))
}

pub fn in_range(addr: AddressV4, range: &AddressRange) -> bool {
    range.start <= addr && addr <= range.end
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn range(start: [u8; 4], end: [u8; 4]) -> AddressRange {
        AddressRange::new(AddressV4::from(start), AddressV4::from(end)).unwrap()
    }

    #[test]
    fn parses_dotted_quad() {
        assert_eq!(
            parse_address("192.168.123.49").unwrap(),
            AddressV4::from([192, 168, 123, 49])
        );
        assert_eq!(parse_address(" 10.0.0.1 ").unwrap().to_string(), "10.0.0.1");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for text in &[
            "",
            "1.2.3",
            "1.2.3.4.5",
            "256.1.1.1",
            "1.2.3.-4",
            "a.b.c.d",
            "1..2.3",
            "1.2.3.4/24",
        ] {
            assert!(
                matches!(parse_address(text), Err(Error::InvalidFormat(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn parses_mac_with_either_delimiter() {
        let colon = parse_mac("AA:BB:CC:DD:EE:FF").unwrap();
        let hyphen = parse_mac("aa-bb-cc-dd-ee-ff").unwrap();
        assert_eq!(colon, hyphen);
        assert_eq!(colon.to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(parse_mac("1:2:3:4:5:6").unwrap().to_string(), "01:02:03:04:05:06");
    }

    #[test]
    fn rejects_malformed_macs() {
        for text in &[
            "aa:bb:cc:dd:ee",
            "aa:bb:cc:dd:ee:ff:00",
            "aa:bb:cc:dd:ee:gg",
            "aabb:cc:dd:ee:ff",
            "aa bb cc dd ee ff",
            "",
        ] {
            assert!(parse_mac(text).is_err(), "accepted {:?}", text);
        }
    }

    #[test]
    fn parses_pool_forms() {
        assert_eq!(
            parse_pool("192.168.123.50 - 192.168.123.254").unwrap(),
            range([192, 168, 123, 50], [192, 168, 123, 254])
        );
        assert_eq!(
            parse_pool("192.168.123.50-192.168.123.254").unwrap(),
            range([192, 168, 123, 50], [192, 168, 123, 254])
        );
        assert_eq!(
            parse_pool("10.1.2.0/24").unwrap(),
            range([10, 1, 2, 0], [10, 1, 2, 255])
        );
        assert!(parse_pool("10.1.2.9 - 10.1.2.1").is_err());
        assert!(parse_pool("10.1.2.0/33").is_err());
    }

    #[test]
    fn range_capacity_and_scan_order() {
        let reserved = range([192, 168, 123, 2], [192, 168, 123, 49]);
        assert_eq!(reserved.capacity(), 48);
        let scan: Vec<AddressV4> = reserved.descending().take(2).collect();
        assert_eq!(
            scan,
            vec![
                AddressV4::from([192, 168, 123, 49]),
                AddressV4::from([192, 168, 123, 48])
            ]
        );
        assert_eq!(range([0, 0, 0, 0], [255, 255, 255, 255]).capacity(), 1 << 32);
    }

    proptest! {
        #[test]
        fn dotted_quad_round_trips(a: u8, b: u8, c: u8, d: u8) {
            let text = format!("{}.{}.{}.{}", a, b, c, d);
            prop_assert_eq!(parse_address(&text).unwrap().to_string(), text);
        }

        #[test]
        fn membership_is_boundary_inclusive(x: u32, y: u32, addr: u32) {
            let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
            let r = AddressRange::new(AddressV4::from(lo), AddressV4::from(hi)).unwrap();
            prop_assert_eq!(in_range(AddressV4::from(addr), &r), lo <= addr && addr <= hi);
            prop_assert!(r.contains(r.start));
            prop_assert!(r.contains(r.end));
        }
    }
}
