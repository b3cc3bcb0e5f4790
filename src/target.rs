use std::fmt;
use std::net::IpAddr;
use tokio::net::lookup_host;
use url::{Host, Url};

use crate::error::ScanError;

/// A scan target: the user's input and the single address it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub original: String,
    pub target_type: TargetType,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetType {
    Url(Url),
    Domain(String),
    IpAddress(IpAddr),
}

impl TargetType {
    pub fn parse(input: &str) -> Result<Self, ScanError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ScanError::Argument("target must not be empty".into()));
        }

        // Try URL first (must have scheme)
        if input.contains("://") {
            let url = Url::parse(input)
                .map_err(|e| ScanError::Argument(format!("invalid URL {}: {}", input, e)))?;
            if url.host().is_none() {
                return Err(ScanError::Argument(format!("URL {} has no host", input)));
            }
            return Ok(TargetType::Url(url));
        }

        if let Ok(ip) = input.parse::<IpAddr>() {
            return Ok(TargetType::IpAddress(ip));
        }

        Ok(TargetType::Domain(input.to_string()))
    }

    /// Host part to hand to the resolver, or the address itself when no
    /// lookup is needed.
    fn host(&self) -> HostToResolve<'_> {
        match self {
            TargetType::IpAddress(ip) => HostToResolve::Ip(*ip),
            TargetType::Domain(domain) => HostToResolve::Name(domain),
            TargetType::Url(url) => match url.host() {
                Some(Host::Ipv4(ip)) => HostToResolve::Ip(IpAddr::V4(ip)),
                Some(Host::Ipv6(ip)) => HostToResolve::Ip(IpAddr::V6(ip)),
                Some(Host::Domain(domain)) => HostToResolve::Name(domain),
                None => HostToResolve::Name(""),
            },
        }
    }
}

enum HostToResolve<'a> {
    Ip(IpAddr),
    Name(&'a str),
}

impl Target {
    /// Parses `input` and resolves it to one address.
    ///
    /// IP literals are used as-is. Names get exactly one lookup through the
    /// system resolver and the first address returned wins.
    pub async fn resolve(input: &str) -> Result<Self, ScanError> {
        let target_type = TargetType::parse(input)?;
        log::debug!("[target] resolve: input={} type={:?}", input, target_type);

        let ip = match target_type.host() {
            HostToResolve::Ip(ip) => ip,
            HostToResolve::Name(name) => resolve_name(name).await?,
        };

        log::info!("[target] resolved: input={} ip={}", input, ip);
        Ok(Self {
            original: input.to_string(),
            target_type,
            ip,
        })
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            original: ip.to_string(),
            target_type: TargetType::IpAddress(ip),
            ip,
        }
    }

    /// Get the hostname/domain for display purposes
    pub fn display_name(&self) -> &str {
        match &self.target_type {
            TargetType::Url(url) => url.host_str().unwrap_or(&self.original),
            TargetType::Domain(domain) => domain,
            TargetType::IpAddress(_) => &self.original,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.ip)
    }
}

async fn resolve_name(name: &str) -> Result<IpAddr, ScanError> {
    // lookup_host wants a socket address; the port is irrelevant here
    let lookup_addr = format!("{}:0", name);
    let mut addresses = lookup_host(&lookup_addr).await.map_err(|e| {
        log::error!("[target] lookup_failed: name={} error={}", name, e);
        ScanError::Resolution {
            target: name.to_string(),
            reason: e.to_string(),
        }
    })?;

    addresses
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| ScanError::Resolution {
            target: name.to_string(),
            reason: "no addresses found".to_string(),
        })
}
