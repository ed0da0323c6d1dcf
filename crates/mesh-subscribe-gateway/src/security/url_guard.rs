//! Webhook target validation (SSRF guard).
//!
//! A push URL must parse, use an accepted scheme and name a host whose
//! addresses are all outside the configured IPv4/IPv6 denylists. Host names
//! are resolved and every resolved address is checked. IPv4-mapped IPv6
//! addresses are checked against the IPv4 list.
//!
//! The vetted addresses travel with the URL as a [`WebhookTarget`] so the
//! handshake connects to them instead of resolving the name a second time.

use crate::domain::config::{ConfigError, SecurityConfig, WebhookConfig};
use crate::ports::WebhookTarget;
use ipnetwork::{Ipv4Network, Ipv6Network};
use std::net::{IpAddr, SocketAddr};
use url::{Host, Url};

/// Why a webhook URL was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlRejection {
    #[error("malformed URL: {0}")]
    Malformed(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("address {0} is denylisted")]
    Denylisted(IpAddr),
    #[error("host {0} did not resolve")]
    Unresolvable(String),
}

/// Validates webhook targets against the denylists
#[derive(Debug, Clone)]
pub struct UrlGuard {
    ipv4_denylist: Vec<Ipv4Network>,
    ipv6_denylist: Vec<Ipv6Network>,
    allow_http: bool,
    resolve_hostnames: bool,
}

impl UrlGuard {
    pub fn new(
        ipv4_denylist: Vec<Ipv4Network>,
        ipv6_denylist: Vec<Ipv6Network>,
        allow_http: bool,
        resolve_hostnames: bool,
    ) -> Self {
        Self {
            ipv4_denylist,
            ipv6_denylist,
            allow_http,
            resolve_hostnames,
        }
    }

    pub fn from_config(
        security: &SecurityConfig,
        webhook: &WebhookConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            security.ipv4_networks()?,
            security.ipv6_networks()?,
            security.allow_http,
            webhook.resolve_hostnames,
        ))
    }

    /// Whether `ip` falls inside a denylisted range
    pub fn is_denied(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.ipv4_denylist.iter().any(|net| net.contains(v4)),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => self.ipv4_denylist.iter().any(|net| net.contains(v4)),
                None => self.ipv6_denylist.iter().any(|net| net.contains(v6)),
            },
        }
    }

    /// Syntactic checks only: parse, scheme, host present.
    pub fn parse(&self, raw: &str) -> Result<Url, UrlRejection> {
        let url = Url::parse(raw.trim()).map_err(|e| UrlRejection::Malformed(e.to_string()))?;
        match url.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            scheme => return Err(UrlRejection::UnsupportedScheme(scheme.to_string())),
        }
        match url.host() {
            None => Err(UrlRejection::MissingHost),
            Some(Host::Domain(domain)) if domain.is_empty() => Err(UrlRejection::MissingHost),
            Some(_) => Ok(url),
        }
    }

    /// Full check including DNS resolution of host names. Returns the URL
    /// together with every address that passed the denylists.
    pub async fn check(&self, raw: &str) -> Result<WebhookTarget, UrlRejection> {
        let url = self.parse(raw)?;
        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = match url.host() {
            Some(Host::Ipv4(v4)) => self.check_literal(IpAddr::V4(v4), port)?,
            Some(Host::Ipv6(v6)) => self.check_literal(IpAddr::V6(v6), port)?,
            Some(Host::Domain(domain)) => match domain.parse::<IpAddr>() {
                Ok(ip) => self.check_literal(ip, port)?,
                Err(_) if self.resolve_hostnames => self.check_resolved(domain, port).await?,
                Err(_) => Vec::new(),
            },
            None => return Err(UrlRejection::MissingHost),
        };
        Ok(WebhookTarget::new(url, addrs))
    }

    fn check_addr(&self, ip: IpAddr) -> Result<(), UrlRejection> {
        if self.is_denied(ip) {
            return Err(UrlRejection::Denylisted(ip));
        }
        Ok(())
    }

    fn check_literal(&self, ip: IpAddr, port: u16) -> Result<Vec<SocketAddr>, UrlRejection> {
        self.check_addr(ip)?;
        Ok(vec![SocketAddr::new(ip, port)])
    }

    async fn check_resolved(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, UrlRejection> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| UrlRejection::Unresolvable(host.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(UrlRejection::Unresolvable(host.to_string()));
        }
        for addr in &addrs {
            self.check_addr(addr.ip())?;
        }
        Ok(addrs)
    }
}
