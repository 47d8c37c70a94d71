//! IPv4 allow-list engine.
//!
//! Policy files list address prefixes in the cloud-provider "ip ranges"
//! layout:
//!
//! ```json
//! { "prefixes": [ { "ipv4Prefix": "10.0.0.0/8" }, { "ipv6Prefix": "fd00::/8" } ] }
//! ```
//!
//! Only IPv4 entries are enforced; other entries are skipped. A provider
//! map file assigns one such list to a set of providers:
//!
//! ```json
//! { "ipblocks": [ { "providers": ["sys.auth.aws"], "filename": "/etc/aws-ips.json" },
//!                 { "providers": ["sys.auth.test"] } ] }
//! ```
//!
//! An entry without `filename` allows those providers from any address.

use std::{
    collections::HashMap,
    fmt,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Deserialize;

use crate::error::{IpBlockError, ManagerError, Result};

/// An inclusive range of IPv4 addresses.
///
/// Parsed from CIDR notation (`10.0.0.0/8`), an explicit range
/// (`10.0.0.1-10.0.0.9`) or a single address. Host bits in a CIDR are
/// masked off, so `10.1.2.3/8` covers `10.0.0.0..=10.255.255.255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpBlock {
    low: u32,
    high: u32,
}

impl IpBlock {
    /// Creates a block from its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`IpBlockError::InvertedRange`] if `low > high`.
    pub fn new(low: Ipv4Addr, high: Ipv4Addr) -> std::result::Result<Self, IpBlockError> {
        let (low, high) = (u32::from(low), u32::from(high));
        if low > high {
            return Err(IpBlockError::InvertedRange(format!(
                "{}-{}",
                Ipv4Addr::from(low),
                Ipv4Addr::from(high)
            )));
        }
        Ok(Self { low, high })
    }

    /// Lowest address in the block.
    #[must_use]
    pub fn low(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.low)
    }

    /// Highest address in the block.
    #[must_use]
    pub fn high(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.high)
    }

    /// Returns `true` if `addr` falls inside the block.
    #[must_use]
    pub fn contains(&self, addr: u32) -> bool {
        (self.low..=self.high).contains(&addr)
    }
}

fn parse_addr(value: &str, entry: &str) -> std::result::Result<Ipv4Addr, IpBlockError> {
    value.trim().parse().map_err(|_| IpBlockError::InvalidAddress(entry.to_owned()))
}

impl FromStr for IpBlock {
    type Err = IpBlockError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let entry = s.trim();
        if let Some((addr, bits)) = entry.split_once('/') {
            let addr = u32::from(parse_addr(addr, entry)?);
            let bits: u32 = bits
                .trim()
                .parse()
                .ok()
                .filter(|bits| *bits <= 32)
                .ok_or_else(|| IpBlockError::InvalidPrefixLength(entry.to_owned()))?;
            let mask = u32::MAX.checked_shl(32 - bits).unwrap_or(0);
            let low = addr & mask;
            return Ok(Self { low, high: low | !mask });
        }
        if let Some((low, high)) = entry.split_once('-') {
            let low = parse_addr(low, entry)?;
            let high = parse_addr(high, entry)?;
            return Self::new(low, high).map_err(|_| IpBlockError::InvertedRange(entry.to_owned()));
        }
        let addr = parse_addr(entry, entry)?;
        Ok(Self { low: addr.into(), high: addr.into() })
    }
}

impl fmt::Display for IpBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low())
        } else {
            write!(f, "{}-{}", self.low(), self.high())
        }
    }
}

#[derive(Deserialize)]
struct IpPrefixes {
    #[serde(default)]
    prefixes: Option<Vec<IpPrefix>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpPrefix {
    #[serde(default)]
    ipv4_prefix: Option<String>,
}

#[derive(Deserialize)]
struct ProviderIpBlocks {
    ipblocks: Vec<ProviderIpBlock>,
}

#[derive(Deserialize)]
struct ProviderIpBlock {
    providers: Vec<String>,
    #[serde(default)]
    filename: Option<PathBuf>,
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| ManagerError::file_read(path, e))
}

/// An ordered list of IPv4 ranges.
///
/// An empty list is used by callers to mean "unrestricted"; membership on
/// its own is plain range lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowList {
    blocks: Vec<IpBlock>,
}

impl IpAllowList {
    /// Creates a list from already parsed blocks.
    #[must_use]
    pub fn new(blocks: Vec<IpBlock>) -> Self {
        Self { blocks }
    }

    /// Loads a prefix file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, lists no prefixes at all,
    /// or contains an invalid IPv4 prefix.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = read_file(path)?;
        let prefixes: IpPrefixes =
            serde_json::from_slice(&data).map_err(|e| ManagerError::parse(path, e))?;

        let entries = prefixes.prefixes.unwrap_or_default();
        if entries.is_empty() {
            return Err(ManagerError::NoEntries { path: path.to_owned() });
        }

        let mut blocks = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(prefix) = entry.ipv4_prefix else {
                continue;
            };
            let block = prefix.parse::<IpBlock>().map_err(|source| {
                tracing::error!(path = %path.display(), entry = %prefix, "invalid ip block entry");
                ManagerError::InvalidIpBlock { path: path.to_owned(), source }
            })?;
            blocks.push(block);
        }
        Ok(Self { blocks })
    }

    /// Loads `path` if configured, otherwise returns an empty list.
    ///
    /// # Errors
    ///
    /// See [`from_file`](Self::from_file).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Returns `true` if the list holds no ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if `ip` is a valid IPv4 address inside any range.
    #[must_use]
    pub fn contains(&self, ip: &str) -> bool {
        let Ok(addr) = ip.trim().parse::<Ipv4Addr>() else {
            return false;
        };
        let addr = u32::from(addr);
        self.blocks.iter().any(|block| block.contains(addr))
    }

    /// Cert-refresh rule: an empty list allows everything.
    #[must_use]
    pub fn allows(&self, ip: &str) -> bool {
        self.is_empty() || self.contains(ip)
    }
}

/// Per-provider allow lists for instance registration.
///
/// A provider with no entry is allowed only when no provider has one, so
/// once the map is configured every provider must be listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderIpPolicy {
    providers: HashMap<String, IpAllowList>,
}

impl ProviderIpPolicy {
    /// Creates a policy from an explicit map.
    #[must_use]
    pub fn new(providers: HashMap<String, IpAllowList>) -> Self {
        Self { providers }
    }

    /// Loads a provider map file and every prefix file it references.
    ///
    /// # Errors
    ///
    /// Fails if the map or any referenced prefix file fails to load.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = read_file(path)?;
        let map: ProviderIpBlocks =
            serde_json::from_slice(&data).map_err(|e| ManagerError::parse(path, e))?;

        let mut providers = HashMap::new();
        for entry in map.ipblocks {
            let list = match &entry.filename {
                Some(filename) => IpAllowList::from_file(filename).inspect_err(|err| {
                    tracing::error!(
                        path = %path.display(),
                        filename = %filename.display(),
                        error = %err,
                        "invalid provider ip file"
                    );
                })?,
                None => IpAllowList::default(),
            };
            for provider in entry.providers {
                providers.insert(provider, list.clone());
            }
        }
        Ok(Self { providers })
    }

    /// Loads `path` if configured, otherwise returns an empty policy.
    ///
    /// # Errors
    ///
    /// See [`from_file`](Self::from_file).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Returns `true` if no provider is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Allow list registered for `provider`.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<&IpAllowList> {
        self.providers.get(provider)
    }

    /// Returns `true` if `provider` may register instances from `ip`.
    #[must_use]
    pub fn allows(&self, provider: &str, ip: &str) -> bool {
        match self.providers.get(provider) {
            None => self.providers.is_empty(),
            Some(list) => list.allows(ip),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn write_json(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[rstest]
    #[case("10.0.0.0/8", "10.0.0.0", "10.255.255.255")]
    #[case("10.1.2.3/8", "10.0.0.0", "10.255.255.255")]
    #[case("192.168.1.7/32", "192.168.1.7", "192.168.1.7")]
    #[case("0.0.0.0/0", "0.0.0.0", "255.255.255.255")]
    #[case("10.0.0.1-10.0.0.9", "10.0.0.1", "10.0.0.9")]
    #[case(" 172.16.0.5 ", "172.16.0.5", "172.16.0.5")]
    fn test_parse_forms(#[case] input: &str, #[case] low: &str, #[case] high: &str) {
        let block: IpBlock = input.parse().unwrap();
        assert_eq!(block.low(), low.parse::<Ipv4Addr>().unwrap());
        assert_eq!(block.high(), high.parse::<Ipv4Addr>().unwrap());
    }

    #[rstest]
    #[case("10.0.0.0/33")]
    #[case("10.0.0.0/abc")]
    #[case("10.0.0/8")]
    #[case("256.0.0.1")]
    #[case("10.0.0.9-10.0.0.1")]
    #[case("fd00::/8")]
    #[case("")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(input.parse::<IpBlock>().is_err(), "{input} should be rejected");
    }

    #[test]
    fn test_inverted_range_error_names_entry() {
        let err = "10.0.0.9-10.0.0.1".parse::<IpBlock>().unwrap_err();
        assert_eq!(err, IpBlockError::InvertedRange("10.0.0.9-10.0.0.1".into()));
    }

    #[test]
    fn test_display() {
        assert_eq!("10.0.0.0/30".parse::<IpBlock>().unwrap().to_string(), "10.0.0.0-10.0.0.3");
        assert_eq!("10.0.0.7".parse::<IpBlock>().unwrap().to_string(), "10.0.0.7");
    }

    #[test]
    fn test_invalid_candidate_never_matches() {
        let list = IpAllowList::new(vec!["0.0.0.0/0".parse().unwrap()]);
        assert!(list.contains("10.0.0.1"));
        assert!(!list.contains("not-an-ip"));
        assert!(!list.contains("::1"));
        assert!(!list.allows("not-an-ip"));
    }

    #[test]
    fn test_empty_list_allows_everything() {
        let list = IpAllowList::default();
        assert!(!list.contains("10.0.0.1"));
        assert!(list.allows("10.0.0.1"));
        assert!(list.allows("garbage"));
    }

    #[test]
    fn test_from_file_skips_ipv6_entries() {
        let file = write_json(
            r#"{"syncToken":"1","prefixes":[{"ipv4Prefix":"10.0.0.0/8","region":"us-west-2"},{"ipv6Prefix":"fd00::/8"}]}"#,
        );
        let list = IpAllowList::from_file(file.path()).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.contains("10.20.30.40"));
    }

    #[test]
    fn test_from_file_only_ipv6_yields_empty_list() {
        let file = write_json(r#"{"prefixes":[{"ipv6Prefix":"fd00::/8"}]}"#);
        let list = IpAllowList::from_file(file.path()).unwrap();
        assert!(list.is_empty());
    }

    #[rstest]
    #[case(r#"{"prefixes":[]}"#)]
    #[case(r#"{}"#)]
    fn test_from_file_without_prefixes_is_fatal(#[case] json: &str) {
        let file = write_json(json);
        assert!(matches!(IpAllowList::from_file(file.path()), Err(ManagerError::NoEntries { .. })));
    }

    #[test]
    fn test_from_file_malformed_json_is_fatal() {
        let file = write_json("{ prefixes: ");
        assert!(matches!(IpAllowList::from_file(file.path()), Err(ManagerError::Parse { .. })));
    }

    #[test]
    fn test_from_file_invalid_prefix_is_fatal() {
        let file = write_json(r#"{"prefixes":[{"ipv4Prefix":"10.0.0.0/8"},{"ipv4Prefix":"10.0.0/40"}]}"#);
        assert!(matches!(
            IpAllowList::from_file(file.path()),
            Err(ManagerError::InvalidIpBlock { .. })
        ));
    }

    #[test]
    fn test_load_unconfigured_is_empty() {
        assert!(IpAllowList::load(None).unwrap().is_empty());
        assert!(ProviderIpPolicy::load(None).unwrap().is_empty());
    }

    #[test]
    fn test_provider_policy_rules() {
        let aws_ips = write_json(r#"{"prefixes":[{"ipv4Prefix":"10.0.0.0/8"}]}"#);
        let map = write_json(&format!(
            r#"{{"ipblocks":[{{"providers":["aws"],"filename":"{}"}},{{"providers":["gcp"]}}]}}"#,
            aws_ips.path().display()
        ));
        let policy = ProviderIpPolicy::from_file(map.path()).unwrap();

        assert!(policy.allows("aws", "10.1.1.1"));
        assert!(!policy.allows("aws", "192.168.1.1"));
        assert!(policy.allows("gcp", "1.2.3.4"));
        assert!(!policy.allows("unknown", "10.1.1.1"));
    }

    #[test]
    fn test_empty_provider_policy_allows_everyone() {
        let policy = ProviderIpPolicy::default();
        assert!(policy.allows("anyone", "1.2.3.4"));
    }

    #[test]
    fn test_provider_policy_bad_referenced_file_is_fatal() {
        let map = write_json(
            r#"{"ipblocks":[{"providers":["aws"],"filename":"/nonexistent/aws-ips.json"}]}"#,
        );
        assert!(matches!(
            ProviderIpPolicy::from_file(map.path()),
            Err(ManagerError::FileRead { .. })
        ));
    }

    #[rstest]
    #[case::misspelled_top_level_key(r#"{"ipBlocks":[{"providers":["aws"]}]}"#)]
    #[case::missing_top_level_key(r#"{}"#)]
    #[case::missing_providers(r#"{"ipblocks":[{"filename":"/etc/aws-ips.json"}]}"#)]
    fn test_provider_policy_missing_keys_are_fatal(#[case] json: &str) {
        let map = write_json(json);
        assert!(matches!(
            ProviderIpPolicy::from_file(map.path()),
            Err(ManagerError::Parse { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_cidr_contains_its_network(addr: u32, bits in 0u32..=32) {
            let text = format!("{}/{}", Ipv4Addr::from(addr), bits);
            let block: IpBlock = text.parse().unwrap();
            prop_assert!(block.contains(addr));
            prop_assert!(block.low() <= block.high());
            let size = u64::from(u32::from(block.high()) - u32::from(block.low())) + 1;
            prop_assert_eq!(size, 1u64 << (32 - bits));
        }

        #[test]
        fn prop_range_membership_matches_bounds(a: u32, b: u32, probe: u32) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let block = IpBlock::new(Ipv4Addr::from(low), Ipv4Addr::from(high)).unwrap();
            prop_assert_eq!(block.contains(probe), low <= probe && probe <= high);

            let list = IpAllowList::new(vec![block]);
            prop_assert_eq!(list.contains(&Ipv4Addr::from(probe).to_string()), block.contains(probe));
        }
    }
}
