//! Announcement and route types shared by the store client, the speaker
//! adapter and the reconciler.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Store-assigned version stamp. Strictly increases with every store write.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The revision of an empty store.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw revision number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw revision number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The revision immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an announcement in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnnouncementKey {
    pub project: String,
    pub name: String,
}

impl AnnouncementKey {
    /// Create a key from project and name.
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AnnouncementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.name)
    }
}

/// An IP prefix in canonical form (host bits cleared).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    /// Build a prefix, clearing any host bits.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPrefix` if `len` exceeds the address width.
    pub fn new(addr: IpAddr, len: u8) -> Result<Self> {
        let max = max_len(addr);
        if len > max {
            return Err(Error::invalid_prefix(
                format!("{addr}/{len}"),
                format!("length exceeds {max}"),
            ));
        }
        Ok(Self {
            addr: network(addr, len),
            len,
        })
    }

    /// Network address.
    #[must_use]
    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits.
    #[must_use]
    pub const fn len(&self) -> u8 {
        self.len
    }

    #[must_use]
    pub const fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }
}

const fn max_len(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn network(addr: IpAddr, len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let shift = u32::from(32u8.saturating_sub(len));
            let mask = u32::MAX.checked_shl(shift).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let shift = u32::from(128u8.saturating_sub(len));
            let mask = u128::MAX.checked_shl(shift).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| Error::invalid_prefix(s, "missing '/<length>'"))?;
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|e| Error::invalid_prefix(s, format!("bad address: {e}")))?;
        let len: u8 = len
            .trim()
            .parse()
            .map_err(|e| Error::invalid_prefix(s, format!("bad length: {e}")))?;
        Self::new(addr, len)
    }
}

impl TryFrom<String> for Prefix {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Prefix> for String {
    fn from(prefix: Prefix) -> Self {
        prefix.to_string()
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

/// Standard BGP community (`ASN:VALUE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Community {
    pub asn: u16,
    pub value: u16,
}

impl Community {
    #[must_use]
    pub const fn new(asn: u16, value: u16) -> Self {
        Self { asn, value }
    }
}

impl FromStr for Community {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (asn, value) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_community(s, "expected ASN:VALUE"))?;
        let asn = asn
            .trim()
            .parse()
            .map_err(|e| Error::invalid_community(s, format!("bad ASN: {e}")))?;
        let value = value
            .trim()
            .parse()
            .map_err(|e| Error::invalid_community(s, format!("bad value: {e}")))?;
        Ok(Self { asn, value })
    }
}

impl TryFrom<String> for Community {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Community> for String {
    fn from(community: Community) -> Self {
        community.to_string()
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asn, self.value)
    }
}

/// Desired-state record: a route some project wants advertised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub project: String,
    pub name: String,
    pub prefix: Prefix,
    pub next_hop: IpAddr,
    #[serde(default)]
    pub communities: Vec<Community>,
    #[serde(default)]
    pub as_path: Vec<u32>,
    /// Assigned by the store; ignored on create.
    #[serde(default)]
    pub revision: Revision,
}

impl Announcement {
    /// Create an announcement with no extra attributes at revision zero.
    pub fn new(
        project: impl Into<String>,
        name: impl Into<String>,
        prefix: Prefix,
        next_hop: IpAddr,
    ) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            prefix,
            next_hop,
            communities: Vec::new(),
            as_path: Vec::new(),
            revision: Revision::ZERO,
        }
    }

    #[must_use]
    pub fn with_communities(mut self, communities: Vec<Community>) -> Self {
        self.communities = communities;
        self
    }

    #[must_use]
    pub fn with_as_path(mut self, as_path: Vec<u32>) -> Self {
        self.as_path = as_path;
        self
    }

    #[must_use]
    pub const fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    #[must_use]
    pub fn with_next_hop(mut self, next_hop: IpAddr) -> Self {
        self.next_hop = next_hop;
        self
    }

    /// Store identity of this announcement.
    #[must_use]
    pub fn key(&self) -> AnnouncementKey {
        AnnouncementKey::new(self.project.clone(), self.name.clone())
    }

    /// The route this announcement asks the speaker to advertise.
    #[must_use]
    pub fn route(&self) -> Route {
        Route {
            key: RouteKey::new(self.prefix, self.next_hop),
            attributes: RouteAttributes {
                communities: self.communities.clone(),
                as_path: self.as_path.clone(),
            },
        }
    }

    /// Check the record is usable by the speaker.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAnnouncement` for empty identifiers or a
    /// next hop whose address family differs from the prefix.
    pub fn validate(&self) -> Result<()> {
        if self.project.is_empty() || self.name.is_empty() {
            return Err(Error::invalid_announcement(
                self.key().to_string(),
                "project and name must be non-empty",
            ));
        }
        if self.prefix.is_ipv4() != self.next_hop.is_ipv4() {
            return Err(Error::invalid_announcement(
                self.key().to_string(),
                format!(
                    "next hop {} does not match the address family of {}",
                    self.next_hop, self.prefix
                ),
            ));
        }
        Ok(())
    }
}

/// Identity of a route on the wire: prefix plus next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub prefix: Prefix,
    pub next_hop: IpAddr,
}

impl RouteKey {
    #[must_use]
    pub const fn new(prefix: Prefix, next_hop: IpAddr) -> Self {
        Self { prefix, next_hop }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.prefix, self.next_hop)
    }
}

/// Path attributes pushed alongside a route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteAttributes {
    pub communities: Vec<Community>,
    pub as_path: Vec<u32>,
}

/// A complete route as handed to the speaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub key: RouteKey,
    pub attributes: RouteAttributes,
}

impl Route {
    #[must_use]
    pub const fn prefix(&self) -> Prefix {
        self.key.prefix
    }

    #[must_use]
    pub const fn next_hop(&self) -> IpAddr {
        self.key.next_hop
    }
}
