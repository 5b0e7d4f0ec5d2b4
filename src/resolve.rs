//! Host name resolution ahead of a ping run.
//!
//! Sessions only take addresses. These helpers turn the host names a user
//! typed into that list.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::net::IpAddr;

/// Turns host names into addresses.
pub trait Resolver {
    fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;

    /// Name for an address, if one is known.
    fn reverse(&self, _addr: &IpAddr) -> Option<String> {
        None
    }
}

/// Resolver backed by the system's `getaddrinfo`/`getnameinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        dns_lookup::lookup_host(host).map_err(|e| Error::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })
    }

    fn reverse(&self, addr: &IpAddr) -> Option<String> {
        dns_lookup::lookup_addr(addr).ok()
    }
}

/// Outcome of resolving a list of hosts.
#[derive(Debug, Default)]
pub struct ResolvedTargets {
    /// One address per host, first seen first, without duplicates.
    pub addresses: Vec<IpAddr>,
    /// Every host name that resolved to each address.
    pub hosts: HashMap<IpAddr, Vec<String>>,
    /// Hosts that could not be resolved.
    pub failures: Vec<Error>,
}

impl ResolvedTargets {
    /// Display name for an address: the first host that resolved to it.
    pub fn name_of(&self, addr: &IpAddr) -> Option<&str> {
        self.hosts.get(addr).and_then(|names| names.first()).map(|s| s.as_str())
    }
}

/// Resolves `hosts`, keeping the first address of each.
///
/// Literal addresses are taken as they are. Hosts that land on an address
/// already in the list are merged into it.
pub fn resolve_targets<R, S>(resolver: &R, hosts: &[S]) -> ResolvedTargets
where
    R: Resolver + ?Sized,
    S: AsRef<str>,
{
    let mut resolved = ResolvedTargets::default();
    for host in hosts {
        let host = host.as_ref();
        let addr = match host.parse::<IpAddr>() {
            Ok(addr) => addr,
            Err(_) => match resolver.resolve(host) {
                Ok(addrs) => match addrs.first() {
                    Some(addr) => *addr,
                    None => {
                        resolved.failures.push(Error::Resolve {
                            host: host.to_string(),
                            reason: "no addresses".to_string(),
                        });
                        continue;
                    }
                },
                Err(e) => {
                    tracing::debug!("{}", e);
                    resolved.failures.push(e);
                    continue;
                }
            },
        };
        let names = resolved.hosts.entry(addr).or_default();
        if names.is_empty() {
            resolved.addresses.push(addr);
        }
        names.push(host.to_string());
    }
    resolved
}
