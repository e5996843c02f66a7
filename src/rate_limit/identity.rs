use crate::domain::NORMAL_TIER;
use std::net::{IpAddr, SocketAddr};

/// Identifier used when neither a principal nor a usable address is available
pub const UNKNOWN_IDENTIFIER: &str = "ip:unknown";

/// Subject authenticated by an upstream layer, attached as a request extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub id: String,
    pub tier: Option<String>,
}

impl AuthenticatedPrincipal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: None,
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

/// Inputs needed to evaluate one request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub path: String,
    pub principal: Option<AuthenticatedPrincipal>,
    /// Raw X-Forwarded-For value
    pub forwarded_for: Option<String>,
    pub peer_addr: Option<SocketAddr>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_principal(mut self, principal: AuthenticatedPrincipal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Principal id, else first forwarded-for entry, else peer address, else unknown
    pub fn identifier(&self) -> String {
        if let Some(principal) = &self.principal {
            let id = principal.id.trim();
            if !id.is_empty() {
                return format!("user:{}", id);
            }
        }

        if let Some(ip) = self.forwarded_for.as_deref().and_then(first_forwarded_ip) {
            return format!("ip:{}", ip);
        }

        match self.peer_addr {
            Some(addr) => format!("ip:{}", addr.ip()),
            None => UNKNOWN_IDENTIFIER.to_string(),
        }
    }

    pub fn tier(&self) -> &str {
        self.principal
            .as_ref()
            .and_then(|p| p.tier.as_deref())
            .filter(|tier| !tier.is_empty())
            .unwrap_or(NORMAL_TIER)
    }
}

/// First entry of a comma separated forwarded-for list, if it is an address
fn first_forwarded_ip(value: &str) -> Option<IpAddr> {
    let first = value.split(',').next()?.trim();
    first
        .parse::<IpAddr>()
        .ok()
        .or_else(|| first.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}
