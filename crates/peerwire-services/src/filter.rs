//! Spam filtering: accept/reject decisions over peer addresses.
//!
//! A `SpamFilter` is an immutable pair of network sets: `deny` and `allow`.
//! An address is accepted when it is a usable endpoint and either appears in
//! `allow` or does not appear in `deny`. Filters are never mutated in place;
//! reloading builds a new one and swaps the `Arc`.
//!
//! Rule syntax (config lists and the IP range file):
//!   1.2.3.4          single address
//!   10.0.0.0/8       CIDR network (IPv4 or IPv6)
//!   192.168.*.*      trailing dotted wildcard (IPv4 only)
//!   # comment        ignored, as are blank lines

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use peerwire_core::PeerAddress;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("invalid filter rule: {0}")]
    Invalid(String),
    #[error("wildcards must be trailing octets: {0}")]
    Wildcard(String),
}

/// Parse one rule into a network.
pub fn parse_rule(rule: &str) -> Result<IpNet, RuleParseError> {
    let rule = rule.trim();
    if rule.contains('/') {
        return IpNet::from_str(rule)
            .map(|n| n.trunc())
            .map_err(|_| RuleParseError::Invalid(rule.to_string()));
    }
    if rule.contains('*') {
        return parse_wildcard(rule);
    }
    IpAddr::from_str(rule)
        .map(|ip| IpNet::from(ip.to_canonical()))
        .map_err(|_| RuleParseError::Invalid(rule.to_string()))
}

fn parse_wildcard(rule: &str) -> Result<IpNet, RuleParseError> {
    let parts: Vec<&str> = rule.split('.').collect();
    if parts.len() != 4 {
        return Err(RuleParseError::Invalid(rule.to_string()));
    }
    let mut octets = [0u8; 4];
    let mut prefix = 0u8;
    let mut in_wildcard = false;
    for (i, part) in parts.iter().enumerate() {
        if *part == "*" {
            in_wildcard = true;
            continue;
        }
        if in_wildcard {
            return Err(RuleParseError::Wildcard(rule.to_string()));
        }
        octets[i] = part
            .parse()
            .map_err(|_| RuleParseError::Invalid(rule.to_string()))?;
        prefix += 8;
    }
    Ipv4Net::new(Ipv4Addr::from(octets), prefix)
        .map(IpNet::V4)
        .map_err(|_| RuleParseError::Invalid(rule.to_string()))
}

// ── Range sets ────────────────────────────────────────────────────────────────

/// A set of IP networks with O(log n) membership tests.
///
/// Networks are aggregated on construction, so the stored lists are sorted
/// and non-overlapping.
#[derive(Debug, Clone, Default)]
pub struct IpRangeSet {
    v4: Vec<Ipv4Net>,
    v6: Vec<Ipv6Net>,
}

/// Result of parsing a rule list: the set, plus how many lines were unusable.
#[derive(Debug, Clone, Default)]
pub struct RangeLoad {
    pub set: IpRangeSet,
    pub skipped: usize,
}

impl IpRangeSet {
    pub fn from_nets(nets: impl IntoIterator<Item = IpNet>) -> Self {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for net in nets {
            match net {
                IpNet::V4(n) => v4.push(n),
                IpNet::V6(n) => v6.push(n),
            }
        }
        let mut v4 = Ipv4Net::aggregate(&v4);
        let mut v6 = Ipv6Net::aggregate(&v6);
        v4.sort_by_key(|n| n.network());
        v6.sort_by_key(|n| n.network());
        Self { v4, v6 }
    }

    /// Parse a rule list. Unparseable rules are skipped and counted.
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a str>) -> RangeLoad {
        let mut nets = Vec::new();
        let mut skipped = 0;
        for line in rules {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_rule(line) {
                Ok(net) => nets.push(net),
                Err(e) => {
                    tracing::trace!(error = %e, "skipping filter rule");
                    skipped += 1;
                }
            }
        }
        RangeLoad {
            set: Self::from_nets(nets),
            skipped,
        }
    }

    /// Parse the contents of an IP range file.
    pub fn parse(text: &str) -> RangeLoad {
        Self::from_rules(text.lines())
    }

    /// Union of two sets.
    pub fn union(&self, other: &IpRangeSet) -> IpRangeSet {
        let nets = self
            .v4
            .iter()
            .chain(other.v4.iter())
            .copied()
            .map(IpNet::V4)
            .chain(self.v6.iter().chain(other.v6.iter()).copied().map(IpNet::V6));
        Self::from_nets(nets)
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match ip.to_canonical() {
            IpAddr::V4(v4) => contains_v4(&self.v4, v4),
            IpAddr::V6(v6) => contains_v6(&self.v6, v6),
        }
    }

    /// Number of aggregated networks.
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

fn contains_v4(nets: &[Ipv4Net], ip: Ipv4Addr) -> bool {
    let idx = nets.partition_point(|n| n.network() <= ip);
    idx > 0 && nets[idx - 1].contains(&ip)
}

fn contains_v6(nets: &[Ipv6Net], ip: Ipv6Addr) -> bool {
    let idx = nets.partition_point(|n| n.network() <= ip);
    idx > 0 && nets[idx - 1].contains(&ip)
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Binary accept/reject decision over a peer address.
#[derive(Debug, Clone, Default)]
pub struct SpamFilter {
    deny: IpRangeSet,
    allow: IpRangeSet,
}

impl SpamFilter {
    pub fn new(deny: IpRangeSet, allow: IpRangeSet) -> Self {
        Self { deny, allow }
    }

    /// Accepts every usable address.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Filter that only denies the given rules. Bad rules are skipped.
    pub fn deny_rules<'a>(rules: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            deny: IpRangeSet::from_rules(rules).set,
            allow: IpRangeSet::default(),
        }
    }

    pub fn allow(&self, addr: &PeerAddress) -> bool {
        if !addr.is_valid() {
            return false;
        }
        let ip = addr.ip();
        self.allow.contains(&ip) || !self.deny.contains(&ip)
    }

    pub fn deny_len(&self) -> usize {
        self.deny.len()
    }

    pub fn allow_len(&self) -> usize {
        self.allow.len()
    }
}
