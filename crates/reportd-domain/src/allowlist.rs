//! Remote endpoint validation.
//!
//! Every upstream destination a batch job may contact goes through
//! [`AllowlistValidator::resolve`] before any job record exists. The rules,
//! in order:
//!
//! 1. A relative designator is resolved against the configured base URL.
//! 2. A destination that resolves to a loopback, link-local, or private
//!    address is denied unconditionally. No allowlist entry or base URL
//!    overrides this.
//! 3. An absolute designator fails closed when no allowlist is configured.
//! 4. Otherwise an absolute designator is permitted only when its host
//!    matches an allowlist entry (exact host, IP, or IPv4 CIDR).
//!
//! Deny reasons stay distinguishable so callers can report limit, config,
//! and security failures separately; see [`AllowlistError`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::Url;

use crate::error::AllowlistError;

/// One permitted remote destination pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowlistEntry {
    /// Exact host name. `example.com` does not imply `api.example.com`;
    /// every permitted host is listed explicitly.
    Host(String),
    /// Exact IP literal.
    Ip(IpAddr),
    /// IPv4 network in CIDR notation.
    Cidr { network: Ipv4Addr, prefix: u8 },
}

impl AllowlistEntry {
    /// Parses a single allowlist pattern.
    pub fn parse(raw: &str) -> Result<Self, AllowlistError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AllowlistError::InvalidUrl {
                message: "empty allowlist entry".to_string(),
            });
        }

        if let Some((addr, prefix)) = raw.split_once('/') {
            let network: Ipv4Addr =
                addr.parse()
                    .map_err(|_| AllowlistError::InvalidUrl {
                        message: format!("invalid CIDR network: {raw}"),
                    })?;
            let prefix: u8 = prefix
                .parse()
                .ok()
                .filter(|p| *p <= 32)
                .ok_or_else(|| AllowlistError::InvalidUrl {
                    message: format!("invalid CIDR prefix: {raw}"),
                })?;
            return Ok(AllowlistEntry::Cidr { network, prefix });
        }

        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Ok(AllowlistEntry::Ip(ip));
        }

        Ok(AllowlistEntry::Host(raw.to_ascii_lowercase()))
    }

    /// Parses a comma-separated allowlist (the configuration format).
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, AllowlistError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            AllowlistEntry::Host(entry) => host.eq_ignore_ascii_case(entry),
            AllowlistEntry::Ip(entry) => host.parse::<IpAddr>().is_ok_and(|ip| ip == *entry),
            AllowlistEntry::Cidr { network, prefix } => host
                .parse::<Ipv4Addr>()
                .is_ok_and(|ip| cidr_contains(*network, *prefix, ip)),
        }
    }
}

fn cidr_contains(network: Ipv4Addr, prefix: u8, ip: Ipv4Addr) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = 32 - u32::from(prefix);
    (u32::from(ip) >> shift) == (u32::from(network) >> shift)
}

/// Returns true when the host must never be contacted: loopback,
/// link-local, private-range, unique-local, or unspecified addresses,
/// plus the `localhost` name itself.
fn is_private_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    // Bracketed IPv6 hosts come back without brackets from url, but accept
    // both forms for direct callers.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_private_v4(ip),
        Ok(IpAddr::V6(ip)) => is_private_v6(ip),
        Err(_) => false,
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_private_v4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Decides whether a candidate remote destination may be contacted and
/// resolves it to an absolute URL.
#[derive(Debug, Clone)]
pub struct AllowlistValidator {
    base_url: Option<Url>,
    /// `None` means no allowlist is configured: absolute destinations
    /// fail closed.
    entries: Option<Vec<AllowlistEntry>>,
}

impl AllowlistValidator {
    pub fn new(base_url: Option<Url>, entries: Option<Vec<AllowlistEntry>>) -> Self {
        Self { base_url, entries }
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Builds a validator from raw configuration strings.
    pub fn from_config(
        base_url: Option<&str>,
        allowlist: Option<&str>,
    ) -> Result<Self, AllowlistError> {
        let base_url = match base_url.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(Url::parse(raw).map_err(|e| AllowlistError::InvalidUrl {
                message: format!("invalid base url '{raw}': {e}"),
            })?),
            None => None,
        };
        let entries = match allowlist.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(AllowlistEntry::parse_list(raw)?),
            None => None,
        };
        Ok(Self::new(base_url, entries))
    }

    /// Resolves an endpoint designator to a permitted absolute URL, or
    /// returns the distinct reason it was denied.
    pub fn resolve(&self, designator: &str) -> Result<Url, AllowlistError> {
        let resolved = match Url::parse(designator) {
            Ok(url) => {
                let host = url
                    .host_str()
                    .ok_or_else(|| AllowlistError::InvalidUrl {
                        message: format!("endpoint '{designator}' has no host"),
                    })?
                    .to_string();

                // The private-address block dominates every other rule,
                // including the fail-closed no-allowlist denial.
                if is_private_host(&host) {
                    return Err(AllowlistError::PrivateAddressBlocked { host });
                }

                let entries = self.entries.as_ref().ok_or_else(|| {
                    AllowlistError::NoAllowlistConfigured { host: host.clone() }
                })?;

                if !entries.iter().any(|entry| entry.matches(&host)) {
                    return Err(AllowlistError::NotAllowlisted { host });
                }
                url
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .base_url
                    .as_ref()
                    .ok_or(AllowlistError::MissingBaseUrl)?;
                base.join(designator)
                    .map_err(|e| AllowlistError::InvalidUrl {
                        message: format!("cannot resolve '{designator}': {e}"),
                    })?
            }
            Err(e) => {
                return Err(AllowlistError::InvalidUrl {
                    message: format!("invalid endpoint '{designator}': {e}"),
                })
            }
        };

        // Final gate on the resolved destination, relative designators
        // included: a private base URL is still a private destination.
        if let Some(host) = resolved.host_str() {
            if is_private_host(host) {
                return Err(AllowlistError::PrivateAddressBlocked {
                    host: host.to_string(),
                });
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(base: Option<&str>, allowlist: Option<&str>) -> AllowlistValidator {
        AllowlistValidator::from_config(base, allowlist).unwrap()
    }

    #[test]
    fn relative_designator_resolves_against_base() {
        let v = validator(Some("http://example.com"), None);
        let url = v.resolve("/dtj/api/plan").unwrap();
        assert_eq!(url.as_str(), "http://example.com/dtj/api/plan");
    }

    #[test]
    fn relative_designator_without_base_fails() {
        let v = validator(None, Some("example.com"));
        assert_eq!(
            v.resolve("/dtj/api/plan").unwrap_err(),
            AllowlistError::MissingBaseUrl
        );
    }

    #[test]
    fn absolute_designator_fails_closed_without_allowlist() {
        let v = validator(Some("http://example.com"), None);
        let err = v.resolve("https://other.example.org/api").unwrap_err();
        assert!(matches!(err, AllowlistError::NoAllowlistConfigured { host } if host == "other.example.org"));
    }

    #[test]
    fn allowlisted_host_is_permitted() {
        let v = validator(None, Some("example.com, reports.internal.org"));
        assert!(v.resolve("https://example.com/dtj/api/report").is_ok());
        assert!(v.resolve("https://reports.internal.org/x").is_ok());
    }

    #[test]
    fn host_entries_do_not_imply_subdomains() {
        let v = validator(None, Some("example.com"));
        let err = v.resolve("https://api.example.com/x").unwrap_err();
        assert!(matches!(err, AllowlistError::NotAllowlisted { host } if host == "api.example.com"));
    }

    #[test]
    fn unlisted_host_is_denied() {
        let v = validator(None, Some("example.com"));
        let err = v.resolve("https://evil.org/api").unwrap_err();
        assert!(matches!(err, AllowlistError::NotAllowlisted { host } if host == "evil.org"));
        // Suffix trickery does not match.
        assert!(v.resolve("https://notexample.com/x").is_err());
    }

    #[test]
    fn loopback_is_denied_even_when_allowlisted() {
        let v = validator(None, Some("127.0.0.1, localhost, example.com"));
        let err = v.resolve("http://127.0.0.1/x").unwrap_err();
        assert!(matches!(err, AllowlistError::PrivateAddressBlocked { .. }));
        let err = v.resolve("http://localhost:8080/private").unwrap_err();
        assert!(matches!(err, AllowlistError::PrivateAddressBlocked { .. }));
    }

    #[test]
    fn private_ranges_are_denied() {
        let v = validator(None, Some("10.0.0.0/8, 192.168.1.5, example.com"));
        for host in ["10.1.2.3", "192.168.1.5", "172.16.0.1", "169.254.10.10"] {
            let err = v.resolve(&format!("http://{host}/api")).unwrap_err();
            assert!(
                matches!(err, AllowlistError::PrivateAddressBlocked { .. }),
                "{host} should be blocked as private"
            );
        }
    }

    #[test]
    fn ipv6_loopback_and_local_are_denied() {
        let v = validator(None, Some("::1, example.com"));
        for host in ["[::1]", "[fc00::1]", "[fe80::1]"] {
            let err = v.resolve(&format!("http://{host}/api")).unwrap_err();
            assert!(
                matches!(err, AllowlistError::PrivateAddressBlocked { .. }),
                "{host} should be blocked as private"
            );
        }
    }

    #[test]
    fn cidr_entry_matches_public_range() {
        let v = validator(None, Some("203.0.113.0/24"));
        assert!(v.resolve("http://203.0.113.7/api").is_ok());
        let err = v.resolve("http://203.0.114.7/api").unwrap_err();
        assert!(matches!(err, AllowlistError::NotAllowlisted { .. }));
    }

    #[test]
    fn private_destination_without_allowlist_reports_the_security_block() {
        // The private block applies before the fail-closed no-allowlist
        // denial, so the deny reason names the security rule.
        let v = validator(Some("http://example.com"), None);
        let err = v.resolve("http://192.168.0.10/x").unwrap_err();
        assert!(matches!(err, AllowlistError::PrivateAddressBlocked { .. }));
    }

    #[test]
    fn private_base_url_is_still_blocked_for_relative_designators() {
        let v = validator(Some("http://127.0.0.1:9000"), None);
        let err = v.resolve("/dtj/api/plan").unwrap_err();
        assert!(matches!(err, AllowlistError::PrivateAddressBlocked { .. }));
    }

    #[test]
    fn invalid_entries_are_rejected() {
        assert!(AllowlistEntry::parse("10.0.0.0/33").is_err());
        assert!(AllowlistEntry::parse("not-an-ip/8").is_err());
        assert!(AllowlistEntry::parse("").is_err());
    }

    #[test]
    fn parse_list_skips_blank_segments() {
        let entries = AllowlistEntry::parse_list("example.com, ,10.0.0.0/8,").unwrap();
        assert_eq!(entries.len(), 2);
    }
}
