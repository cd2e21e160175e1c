//! Domain allowlist and private-network deny logic.

use std::net::IpAddr;

use url::Url;

/// Return the hostname from a URL, or None if unparseable.
pub fn extract_host(raw: &str) -> Option<String> {
    Url::parse(raw).ok()?.host_str().map(str::to_string)
}

/// Check a hostname against an allowlist. Empty list = allow all.
/// A host matches an entry exactly or as a sub-domain (`"." + entry` suffix).
pub fn is_domain_allowed(host: &str, allowed_domains: &[String]) -> bool {
    if allowed_domains.is_empty() {
        return true;
    }
    allowed_domains
        .iter()
        .any(|entry| host == entry || host.ends_with(&format!(".{entry}")))
}

/// RFC-1918, loopback, link-local, and unique-local ranges.
pub fn is_private_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 10
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
                || o[0] == 127
                || (o[0] == 169 && o[1] == 254)
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            v6.is_loopback()
                || (seg[0] & 0xfe00) == 0xfc00 // fc00::/7
                || (seg[0] & 0xffc0) == 0xfe80 // fe80::/10
        }
    }
}

/// Resolve a hostname and check whether any address falls in a private range.
///
/// Unresolvable hostnames are treated as non-private (logged) — a DNS outage
/// must not flip every request to denied.
pub async fn resolves_to_private(host: &str) -> bool {
    // Literal addresses skip DNS entirely.
    if let Ok(addr) = host.parse::<IpAddr>() {
        return is_private_addr(addr);
    }

    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => {
            for sock in addrs {
                if is_private_addr(sock.ip()) {
                    tracing::warn!(host, addr = %sock.ip(), "hostname resolves to private address");
                    return true;
                }
            }
            false
        }
        Err(err) => {
            tracing::warn!(host, error = %err, "could not resolve hostname");
            false
        }
    }
}

/// Return a denial reason string, or None if the URL is allowed.
pub async fn check_url_policy(
    raw: &str,
    allowed_domains: &[String],
    block_private: bool,
) -> Option<String> {
    let Some(host) = extract_host(raw) else {
        return Some(format!("unparseable URL: {raw}"));
    };

    if !is_domain_allowed(&host, allowed_domains) {
        return Some(format!("domain '{host}' not in allowlist"));
    }

    if block_private && resolves_to_private(&host).await {
        return Some(format!("domain '{host}' resolves to private/loopback address"));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_matching_uses_dot_suffix() {
        let allowed = vec!["example.com".to_string()];
        assert!(is_domain_allowed("example.com", &allowed));
        assert!(is_domain_allowed("docs.example.com", &allowed));
        // "notexample.com" must not match via bare suffix.
        assert!(!is_domain_allowed("notexample.com", &allowed));
        assert!(!is_domain_allowed("other.org", &allowed));
    }

    #[test]
    fn empty_allowlist_allows_everything() {
        assert!(is_domain_allowed("anything.net", &[]));
    }

    #[test]
    fn private_v4_ranges() {
        for addr in ["10.0.0.1", "172.16.0.1", "172.31.255.255", "192.168.1.1", "127.0.0.1", "169.254.10.10"] {
            assert!(is_private_addr(addr.parse().unwrap()), "{addr} should be private");
        }
        for addr in ["8.8.8.8", "172.32.0.1", "172.15.0.1", "1.1.1.1"] {
            assert!(!is_private_addr(addr.parse().unwrap()), "{addr} should be public");
        }
    }

    #[test]
    fn private_v6_ranges() {
        for addr in ["::1", "fc00::1", "fd12:3456::1", "fe80::1"] {
            assert!(is_private_addr(addr.parse().unwrap()), "{addr} should be private");
        }
        assert!(!is_private_addr("2001:4860:4860::8888".parse::<IpAddr>().unwrap()));
    }

    #[tokio::test]
    async fn literal_private_address_is_denied() {
        let denial = check_url_policy("http://192.168.1.1/admin", &[], true).await;
        assert!(denial.unwrap().contains("private"));
    }

    #[tokio::test]
    async fn unparseable_url_is_denied() {
        let denial = check_url_policy("not a url", &[], true).await;
        assert!(denial.unwrap().contains("unparseable"));
    }
}
