//! CIDR host-counting for the default-shard materializer (spec §3, §4.3
//! step 5, §8 P7): `max_session_count = Σ (|hosts(prefix)| − |exclude ∩
//! hosts(prefix)|)`.

use ipnetwork::IpNetwork;
use std::collections::HashSet;
use std::net::IpAddr;

/// Parses `exclude`, dropping (and logging) entries that aren't valid IP
/// addresses. Called once per materialization entry, ahead of the
/// per-prefix loop.
pub fn parse_exclusions(exclude: &[String]) -> HashSet<IpAddr> {
    exclude
        .iter()
        .filter_map(|raw| match raw.parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(err) => {
                tracing::warn!(exclude = %raw, error = %err, "invalid exclude address, ignoring");
                None
            }
        })
        .collect()
}

/// Number of usable hosts in `prefix`, minus any member of `exclude`.
/// Returns `Err` if `prefix` doesn't parse as a CIDR; callers skip the
/// prefix and continue accumulating from the rest (spec §4.3 step 5, §7.4).
pub fn host_count(prefix: &str, exclude: &HashSet<IpAddr>) -> Result<u64, ipnetwork::IpNetworkError> {
    let network: IpNetwork = prefix.parse()?;
    let total = total_hosts(&network);
    let excluded = exclude.iter().filter(|addr| is_host(&network, addr)).count() as u64;
    Ok(total.saturating_sub(excluded))
}

/// Mirrors Python's `ipaddress.ip_network(...).hosts()` cardinality: all
/// addresses except network/broadcast for IPv4 (with /31, /32 special
/// cases for point-to-point and host routes), and all addresses except
/// the network address for IPv6.
fn total_hosts(network: &IpNetwork) -> u64 {
    match network {
        IpNetwork::V4(n) => match n.prefix() {
            32 => 1,
            31 => 2,
            p => (1u64 << (32 - p)) - 2,
        },
        IpNetwork::V6(n) => {
            if n.prefix() == 128 {
                1
            } else {
                let bits = (128 - n.prefix()).min(63);
                (1u64 << bits).saturating_sub(1)
            }
        }
    }
}

fn is_host(network: &IpNetwork, addr: &IpAddr) -> bool {
    if !network.contains(*addr) {
        return false;
    }
    match network {
        IpNetwork::V4(n) => {
            if n.prefix() >= 31 {
                true
            } else {
                *addr != IpAddr::V4(n.network()) && *addr != IpAddr::V4(n.broadcast())
            }
        }
        IpNetwork::V6(n) => n.prefix() == 128 || *addr != IpAddr::V6(n.network()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_30_minus_one_exclusion() {
        let exclude = parse_exclusions(&["10.0.0.1".to_string()]);
        assert_eq!(host_count("10.0.0.0/30", &exclude).unwrap(), 1);
    }

    #[test]
    fn slash_30_no_exclusion() {
        let exclude = parse_exclusions(&[]);
        assert_eq!(host_count("10.0.0.0/30", &exclude).unwrap(), 2);
    }

    #[test]
    fn slash_32_is_single_host() {
        let exclude = parse_exclusions(&[]);
        assert_eq!(host_count("10.0.0.5/32", &exclude).unwrap(), 1);
    }

    #[test]
    fn slash_31_is_two_hosts() {
        let exclude = parse_exclusions(&[]);
        assert_eq!(host_count("10.0.0.0/31", &exclude).unwrap(), 2);
    }

    #[test]
    fn exclusion_outside_prefix_has_no_effect() {
        let exclude = parse_exclusions(&["192.168.0.1".to_string()]);
        assert_eq!(host_count("10.0.0.0/30", &exclude).unwrap(), 2);
    }

    #[test]
    fn malformed_prefix_is_an_error() {
        let exclude = parse_exclusions(&[]);
        assert!(host_count("not-a-cidr", &exclude).is_err());
    }

    #[test]
    fn malformed_exclusion_is_dropped_not_fatal() {
        let exclude = parse_exclusions(&["not-an-ip".to_string(), "10.0.0.1".to_string()]);
        assert_eq!(exclude.len(), 1);
    }
}
