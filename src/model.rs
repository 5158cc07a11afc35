//! Resource model
//!
//! The three entity kinds of the registry hierarchy and the path type that
//! addresses them. Entities are plain values: equality and cloning ignore the
//! vendor payload an adapter may attach to them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Free-form key/value metadata attached to every resource
pub type Metadata = HashMap<String, String>;

/// Vendor-native payload kept next to a converted resource
///
/// Never compared, never deep-cloned: clones share the same payload, which
/// denotes "same backend record". Advanced callers can downcast it back to
/// the adapter's own type.
#[derive(Clone, Default)]
pub struct OriginalObject(Option<Arc<dyn Any + Send + Sync>>);

impl OriginalObject {
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self(Some(Arc::new(payload)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|payload| payload.downcast_ref::<T>())
    }

    /// True when both sides point at the same payload allocation
    pub fn shares_payload_with(&self, other: &OriginalObject) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for OriginalObject {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for OriginalObject {}

impl fmt::Debug for OriginalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("OriginalObject(..)"),
            None => f.write_str("OriginalObject(None)"),
        }
    }
}

/// Top-level grouping, unique by name within the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(skip)]
    pub original_object: OriginalObject,
}

/// Application inside a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(skip)]
    pub original_object: OriginalObject,
}

/// Reachable address of a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub service: String,
    pub namespace: String,
    /// Empty, or an IPv4/IPv6 literal
    #[serde(default)]
    pub address: String,
    /// 0 means unset
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(skip)]
    pub original_object: OriginalObject,
}

/// Any of the three resource kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Namespace(Namespace),
    Service(Service),
    Endpoint(Endpoint),
}

impl Object {
    pub fn path(&self) -> ResourcePath {
        match self {
            Object::Namespace(ns) => ns.path(),
            Object::Service(svc) => svc.path(),
            Object::Endpoint(ep) => ep.path(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Object::Namespace(ns) => &ns.name,
            Object::Service(svc) => &svc.name,
            Object::Endpoint(ep) => &ep.name,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Object::Namespace(ns) => &ns.metadata,
            Object::Service(svc) => &svc.metadata,
            Object::Endpoint(ep) => &ep.metadata,
        }
    }

    /// Overwrite the name fields with the ones `path` carries
    ///
    /// Adapters do not always echo parent names back; the path a record was
    /// read from is authoritative. A path of another kind leaves the object as is.
    pub fn stamp(&mut self, path: &ResourcePath) {
        match (self, path) {
            (Object::Namespace(ns), ResourcePath::Namespace { namespace }) => {
                ns.name.clone_from(namespace);
            }
            (Object::Service(svc), ResourcePath::Service { namespace, service }) => {
                svc.namespace.clone_from(namespace);
                svc.name.clone_from(service);
            }
            (
                Object::Endpoint(ep),
                ResourcePath::Endpoint {
                    namespace,
                    service,
                    endpoint,
                },
            ) => {
                ep.namespace.clone_from(namespace);
                ep.service.clone_from(service);
                ep.name.clone_from(endpoint);
            }
            _ => {}
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Object::Namespace(_) => "namespace",
            Object::Service(_) => "service",
            Object::Endpoint(_) => "endpoint",
        }
    }
}

/// Behaviour shared by the three resource kinds
pub trait Resource: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;
    fn metadata(&self) -> &Metadata;
    fn path(&self) -> ResourcePath;
    fn into_object(self) -> Object;
    fn from_object(object: Object) -> Option<Self>;

    fn as_endpoint(&self) -> Option<&Endpoint> {
        None
    }
}

impl Resource for Namespace {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn path(&self) -> ResourcePath {
        ResourcePath::namespace(&self.name)
    }

    fn into_object(self) -> Object {
        Object::Namespace(self)
    }

    fn from_object(object: Object) -> Option<Self> {
        match object {
            Object::Namespace(ns) => Some(ns),
            _ => None,
        }
    }
}

impl Resource for Service {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn path(&self) -> ResourcePath {
        ResourcePath::service(&self.namespace, &self.name)
    }

    fn into_object(self) -> Object {
        Object::Service(self)
    }

    fn from_object(object: Object) -> Option<Self> {
        match object {
            Object::Service(svc) => Some(svc),
            _ => None,
        }
    }
}

impl Resource for Endpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn path(&self) -> ResourcePath {
        ResourcePath::endpoint(&self.namespace, &self.service, &self.name)
    }

    fn into_object(self) -> Object {
        Object::Endpoint(self)
    }

    fn from_object(object: Object) -> Option<Self> {
        match object {
            Object::Endpoint(ep) => Some(ep),
            _ => None,
        }
    }

    fn as_endpoint(&self) -> Option<&Endpoint> {
        Some(self)
    }
}

/// A single path segment: non-empty and free of `/`
pub(crate) fn check_name(name: &str, empty: Error) -> Result<()> {
    if name.is_empty() {
        return Err(empty);
    }
    if name.contains('/') {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Location of one node in the Namespace → Service → Endpoint hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourcePath {
    Namespace {
        namespace: String,
    },
    Service {
        namespace: String,
        service: String,
    },
    Endpoint {
        namespace: String,
        service: String,
        endpoint: String,
    },
}

impl ResourcePath {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        ResourcePath::Namespace {
            namespace: namespace.into(),
        }
    }

    pub fn service(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        ResourcePath::Service {
            namespace: namespace.into(),
            service: service.into(),
        }
    }

    pub fn endpoint(
        namespace: impl Into<String>,
        service: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        ResourcePath::Endpoint {
            namespace: namespace.into(),
            service: service.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Parse `ns`, `ns/svc` or `ns/svc/ep`
    pub fn parse(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.trim_matches('/').split('/').collect();
        match parts.as_slice() {
            [ns] if !ns.is_empty() => Some(Self::namespace(*ns)),
            [ns, svc] => Some(Self::service(*ns, *svc)),
            [ns, svc, ep] => Some(Self::endpoint(*ns, *svc, *ep)),
            _ => None,
        }
    }

    pub fn namespace_name(&self) -> &str {
        match self {
            ResourcePath::Namespace { namespace }
            | ResourcePath::Service { namespace, .. }
            | ResourcePath::Endpoint { namespace, .. } => namespace,
        }
    }

    pub fn service_name(&self) -> Option<&str> {
        match self {
            ResourcePath::Namespace { .. } => None,
            ResourcePath::Service { service, .. } | ResourcePath::Endpoint { service, .. } => {
                Some(service)
            }
        }
    }

    /// Name of the node itself
    pub fn leaf(&self) -> &str {
        match self {
            ResourcePath::Namespace { namespace } => namespace,
            ResourcePath::Service { service, .. } => service,
            ResourcePath::Endpoint { endpoint, .. } => endpoint,
        }
    }

    pub fn parent(&self) -> Option<ResourcePath> {
        match self {
            ResourcePath::Namespace { .. } => None,
            ResourcePath::Service { namespace, .. } => Some(Self::namespace(namespace.as_str())),
            ResourcePath::Endpoint {
                namespace, service, ..
            } => Some(Self::service(namespace.as_str(), service.as_str())),
        }
    }

    /// Ancestors from the root down, excluding `self`
    pub fn ancestors(&self) -> Vec<ResourcePath> {
        let mut chain = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            current = path.parent();
            chain.push(path);
        }
        chain.reverse();
        chain
    }

    /// Reject empty names and names containing `/`, outermost level first
    pub fn validate(&self) -> Result<()> {
        check_name(self.namespace_name(), Error::EmptyNamespaceName)?;
        if let Some(service) = self.service_name() {
            check_name(service, Error::EmptyServiceName)?;
        }
        if let ResourcePath::Endpoint { endpoint, .. } = self {
            check_name(endpoint, Error::EmptyEndpointName)?;
        }
        Ok(())
    }

    /// The not-found error naming this level
    pub fn not_found(&self) -> Error {
        match self {
            ResourcePath::Namespace { .. } => Error::NamespaceNotFound,
            ResourcePath::Service { .. } => Error::ServiceNotFound,
            ResourcePath::Endpoint { .. } => Error::NotFound,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourcePath::Namespace { .. } => "namespace",
            ResourcePath::Service { .. } => "service",
            ResourcePath::Endpoint { .. } => "endpoint",
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePath::Namespace { namespace } => write!(f, "/namespaces/{}", namespace),
            ResourcePath::Service { namespace, service } => {
                write!(f, "/namespaces/{}/services/{}", namespace, service)
            }
            ResourcePath::Endpoint {
                namespace,
                service,
                endpoint,
            } => write!(
                f,
                "/namespaces/{}/services/{}/endpoints/{}",
                namespace, service, endpoint
            ),
        }
    }
}
