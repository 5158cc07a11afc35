//! Filter engine
//!
//! Listing options are compiled once into a [`Filter`], which is then
//! evaluated against every record a backend returns. All configured groups
//! must pass; an absent group imposes no constraint. Evaluation performs no
//! I/O and never mutates the object.

use crate::error::{Error, Result};
use crate::model::{Endpoint, Metadata, Namespace, Object, Resource, Service};
use std::any::Any;
use std::collections::HashSet;
use std::net::IpAddr;

/// Options accepted by every `list` call
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Page size requested from the backend (0 = registry default)
    pub results_per_page: u32,
    pub name_filters: Option<NameFilters>,
    pub metadata_filters: Option<MetadataFilters>,
    /// Endpoint listings only
    pub address_filters: Option<AddressFilters>,
    /// Endpoint listings only
    pub port_filters: Option<PortFilters>,
}

#[derive(Debug, Clone, Default)]
pub struct NameFilters {
    pub name_in: Vec<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataFilters {
    /// Only resources without any metadata
    pub no_metadata: bool,
    /// Required keys; a non-empty value must also match exactly
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

#[derive(Debug, Clone, Default)]
pub struct AddressFilters {
    /// Network in CIDR notation, e.g. `10.10.10.0/24`
    pub cidr: Option<String>,
    pub family: Option<AddressFamily>,
}

#[derive(Debug, Clone, Default)]
pub struct PortFilters {
    pub port_in: Vec<u16>,
    /// Inclusive `(lo, hi)` ranges
    pub ranges: Vec<(u16, u16)>,
}

impl ListOptions {
    pub fn with_page_size(mut self, results_per_page: u32) -> Self {
        self.results_per_page = results_per_page;
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filters = self.name_filters.get_or_insert_with(NameFilters::default);
        filters.name_in.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_filters
            .get_or_insert_with(NameFilters::default)
            .prefix = Some(prefix.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_filters
            .get_or_insert_with(MetadataFilters::default)
            .metadata
            .insert(key.into(), value.into());
        self
    }

    pub fn without_metadata(mut self) -> Self {
        self.metadata_filters
            .get_or_insert_with(MetadataFilters::default)
            .no_metadata = true;
        self
    }

    pub fn with_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.address_filters
            .get_or_insert_with(AddressFilters::default)
            .cidr = Some(cidr.into());
        self
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.address_filters
            .get_or_insert_with(AddressFilters::default)
            .family = Some(family);
        self
    }

    pub fn with_ports<I: IntoIterator<Item = u16>>(mut self, ports: I) -> Self {
        self.port_filters
            .get_or_insert_with(PortFilters::default)
            .port_in
            .extend(ports);
        self
    }

    pub fn with_port_range(mut self, lo: u16, hi: u16) -> Self {
        self.port_filters
            .get_or_insert_with(PortFilters::default)
            .ranges
            .push((lo, hi));
        self
    }
}

/// IP network parsed from CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Network {
    addr: IpAddr,
    prefix: u8,
}

impl Network {
    fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = cidr.trim().split_once('/')?;
        let addr: IpAddr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        let width = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > width {
            return None;
        }
        Some(Self { addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Compiled predicate set
#[derive(Debug, Clone, Default)]
pub struct Filter {
    name_in: Option<HashSet<String>>,
    prefix: Option<String>,
    no_metadata: bool,
    metadata: Metadata,
    network: Option<Network>,
    family: Option<AddressFamily>,
    port_in: HashSet<u16>,
    port_ranges: Vec<(u16, u16)>,
}

impl Filter {
    /// A filter that lets everything through
    pub fn none() -> Self {
        Self::default()
    }

    /// Compile and validate listing options
    pub fn from_options(options: &ListOptions) -> Result<Self> {
        let mut filter = Filter::default();

        if let Some(names) = &options.name_filters {
            let prefix = names.prefix.as_deref().filter(|p| !p.is_empty());
            if !names.name_in.is_empty() && prefix.is_some() {
                return Err(Error::InvalidFilter(
                    "name_in and prefix are mutually exclusive".to_string(),
                ));
            }
            if !names.name_in.is_empty() {
                filter.name_in = Some(names.name_in.iter().cloned().collect());
            }
            filter.prefix = prefix.map(str::to_string);
        }

        if let Some(meta) = &options.metadata_filters {
            if meta.no_metadata && !meta.metadata.is_empty() {
                return Err(Error::InvalidFilter(
                    "no_metadata and metadata key/values are mutually exclusive".to_string(),
                ));
            }
            filter.no_metadata = meta.no_metadata;
            filter.metadata = meta.metadata.clone();
        }

        if let Some(address) = &options.address_filters {
            if let Some(cidr) = address.cidr.as_deref().filter(|c| !c.trim().is_empty()) {
                let network = Network::parse(cidr)
                    .ok_or_else(|| Error::InvalidFilter(format!("invalid CIDR: {}", cidr)))?;
                filter.network = Some(network);
            }
            filter.family = address.family;
        }

        if let Some(ports) = &options.port_filters {
            if let Some((lo, hi)) = ports.ranges.iter().find(|(lo, hi)| lo > hi) {
                return Err(Error::InvalidFilter(format!(
                    "invalid port range: {}-{}",
                    lo, hi
                )));
            }
            filter.port_in = ports.port_in.iter().copied().collect();
            filter.port_ranges = ports.ranges.clone();
        }

        Ok(filter)
    }

    /// Restrict the filter to a single name, intersecting any existing Name-In set
    pub fn with_name(mut self, name: &str) -> Self {
        let scoped = match self.name_in.take() {
            Some(names) if !names.contains(name) => HashSet::new(),
            _ => HashSet::from([name.to_string()]),
        };
        self.name_in = Some(scoped);
        self
    }

    /// Evaluate against an arbitrary value; only resource kinds are accepted
    pub fn filter(&self, object: &dyn Any) -> Result<bool> {
        if let Some(ns) = object.downcast_ref::<Namespace>() {
            return Ok(self.passes(ns));
        }
        if let Some(svc) = object.downcast_ref::<Service>() {
            return Ok(self.passes(svc));
        }
        if let Some(ep) = object.downcast_ref::<Endpoint>() {
            return Ok(self.passes(ep));
        }
        if let Some(object) = object.downcast_ref::<Object>() {
            return Ok(match object {
                Object::Namespace(ns) => self.passes(ns),
                Object::Service(svc) => self.passes(svc),
                Object::Endpoint(ep) => self.passes(ep),
            });
        }
        Err(Error::InvalidObjectToFilter)
    }

    /// Typed evaluation used by the iterator
    pub fn passes<R: Resource>(&self, resource: &R) -> bool {
        if let Some(names) = &self.name_in {
            if !names.contains(resource.name()) {
                return false;
            }
        }

        if let Some(prefix) = &self.prefix {
            if !resource.name().starts_with(prefix.as_str()) {
                return false;
            }
        }

        let metadata = resource.metadata();
        if self.no_metadata && !metadata.is_empty() {
            return false;
        }

        let metadata_ok = self.metadata.iter().all(|(key, wanted)| match metadata.get(key) {
            Some(actual) => wanted.is_empty() || actual == wanted,
            None => false,
        });
        if !metadata_ok {
            return false;
        }

        match resource.as_endpoint() {
            Some(endpoint) => self.passes_endpoint(endpoint),
            None => true,
        }
    }

    fn passes_endpoint(&self, endpoint: &Endpoint) -> bool {
        if self.network.is_some() || self.family.is_some() {
            // Fail closed on anything that is not an IP literal
            let Ok(ip) = endpoint.address.parse::<IpAddr>() else {
                return false;
            };

            if let Some(network) = &self.network {
                if !network.contains(ip) {
                    return false;
                }
            }

            match self.family {
                Some(AddressFamily::IPv4) if !ip.is_ipv4() => return false,
                Some(AddressFamily::IPv6) if !ip.is_ipv6() => return false,
                _ => {}
            }
        }

        if !self.port_in.is_empty() && endpoint.port != 0 && !self.port_in.contains(&endpoint.port)
        {
            return false;
        }

        if !self.port_ranges.is_empty()
            && !self
                .port_ranges
                .iter()
                .any(|(lo, hi)| (*lo..=*hi).contains(&endpoint.port))
        {
            return false;
        }

        true
    }

    // Accessors for adapters that can push part of the filter server-side

    pub fn name_in(&self) -> Option<&HashSet<String>> {
        self.name_in.as_ref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn requires_no_metadata(&self) -> bool {
        self.no_metadata
    }

    pub fn port_in(&self) -> &HashSet<u16> {
        &self.port_in
    }
}
