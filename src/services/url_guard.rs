//! Outbound URL vetting for provider-returned media.
//!
//! Providers hand back CDN URLs we did not choose. Before anything is fetched
//! the URL must be `https` and every address its host resolves to must be
//! publicly routable. The vetted addresses are returned so the fetch can be
//! pinned to them instead of resolving the host a second time.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

/// Host name resolution, injectable so tests do not depend on DNS.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system's `getaddrinfo` through tokio.
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// A URL that passed the guard, together with the addresses that were vetted.
#[derive(Debug, Clone)]
pub struct SafeUrl {
    pub url: Url,
    pub host: String,
    pub addrs: Vec<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SsrfRejected {
    #[error("URL could not be parsed: {0}")]
    Malformed(String),

    #[error("scheme {0:?} is not allowed, only https")]
    Scheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("host {0} could not be resolved")]
    Unresolvable(String),

    #[error("host {host} resolves to non-public address {addr}")]
    ForbiddenAddress { host: String, addr: IpAddr },
}

#[derive(Clone)]
pub struct UrlGuard {
    resolver: Arc<dyn Resolver>,
}

impl UrlGuard {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemResolver))
    }

    /// Reject `raw` unless it is an https URL whose host only resolves to public addresses.
    pub async fn assert_safe_external_url(&self, raw: &str) -> Result<SafeUrl, SsrfRejected> {
        let url = Url::parse(raw).map_err(|e| SsrfRejected::Malformed(e.to_string()))?;

        if url.scheme() != "https" {
            return Err(SsrfRejected::Scheme(url.scheme().to_string()));
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(SsrfRejected::MissingHost)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let ips = match host.parse::<IpAddr>() {
            Ok(literal) => vec![literal],
            Err(_) => self
                .resolver
                .resolve(&host, port)
                .await
                .map_err(|_| SsrfRejected::Unresolvable(host.clone()))?,
        };

        if ips.is_empty() {
            return Err(SsrfRejected::Unresolvable(host));
        }

        // Every answer must be public: a mixed answer set is how rebinding starts.
        if let Some(bad) = ips.iter().find(|ip| is_forbidden_ip(**ip)) {
            return Err(SsrfRejected::ForbiddenAddress {
                host,
                addr: *bad,
            });
        }

        let addrs = ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect();
        Ok(SafeUrl { url, host, addrs })
    }
}

/// Private, loopback, link-local, multicast and otherwise reserved space.
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => is_forbidden_v6(v6),
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..=127).contains(&b))
        // 192.0.0.0/24 IETF protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b == 18 || b == 19))
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_forbidden_v4(mapped);
    }

    let segments = ip.segments();
    // 64:ff9b::/96 NAT64 embeds an IPv4 address in the low 32 bits.
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        let [.., hi, lo] = segments;
        let embedded = Ipv4Addr::new((hi >> 8) as u8, hi as u8, (lo >> 8) as u8, lo as u8);
        return is_forbidden_v4(embedded);
    }

    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80
        // fec0::/10 deprecated site-local
        || (segments[0] & 0xffc0) == 0xfec0
        // 2001:db8::/32 documentation
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
        // ::/96 IPv4-compatible (deprecated)
        || segments[..6] == [0, 0, 0, 0, 0, 0]
}
