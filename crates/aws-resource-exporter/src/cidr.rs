//! Subnet capacity math.

use std::{
    error, fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

/// Addresses reserved by the provider in each subnet: network, router, DNS, future use
/// and broadcast.
pub const RESERVED_ADDRESSES: u64 = 5;
/// Smallest supported subnet prefix length.
pub const MIN_PREFIX: u8 = 16;
/// Largest supported subnet prefix length.
pub const MAX_PREFIX: u8 = 28;

/// Error computing subnet capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    /// CIDR cannot be parsed.
    Malformed(String),
    /// CIDR is a valid IPv6 block.
    NotIpv4(String),
    /// Prefix length is outside of the supported range.
    PrefixOutOfRange(u8),
}

impl fmt::Display for CidrError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(cidr) => write!(formatter, "malformed CIDR block `{cidr}`"),
            Self::NotIpv4(cidr) => write!(formatter, "CIDR block `{cidr}` is not IPv4"),
            Self::PrefixOutOfRange(prefix) => write!(
                formatter,
                "prefix length /{prefix} is outside of supported range /{MIN_PREFIX}../{MAX_PREFIX}"
            ),
        }
    }
}

impl error::Error for CidrError {}

/// Returns the number of usable IPv4 addresses in a subnet with the specified CIDR block.
///
/// # Errors
///
/// Returns an error if the block is not a valid IPv4 CIDR, or its prefix length is outside
/// of `16..=28`.
pub fn subnet_capacity(cidr: &str) -> Result<u64, CidrError> {
    let (address, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| CidrError::Malformed(cidr.to_owned()))?;
    if address.parse::<Ipv4Addr>().is_err() {
        return Err(if address.parse::<Ipv6Addr>().is_ok() {
            CidrError::NotIpv4(cidr.to_owned())
        } else {
            CidrError::Malformed(cidr.to_owned())
        });
    }

    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|&prefix| prefix <= 32)
        .ok_or_else(|| CidrError::Malformed(cidr.to_owned()))?;
    if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
        return Err(CidrError::PrefixOutOfRange(prefix));
    }
    Ok((1_u64 << (32 - prefix)) - RESERVED_ADDRESSES)
}

/// Returns the number of used addresses given the subnet capacity and the number
/// of available addresses reported by the provider. Never negative.
pub fn subnet_usage(capacity: u64, available: i32) -> u64 {
    capacity.saturating_sub(u64::try_from(available).unwrap_or(0))
}
