//! Backend adapter contract
//!
//! A [`Backend`] translates generic registry operations into one vendor's
//! protocol. It only moves objects in and out of the store; caching,
//! filtering, pagination bookkeeping, parent checks and operation polling
//! are done by the registry on top of it.
//!
//! # Module Structure
//!
//! - [`memory`] - In-process, etcd-style hierarchical key/value store
//!
//! The Google Cloud Service Directory adapter lives in [`crate::gcp`].

pub mod memory;

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::model::{check_name, Object, ResourcePath};
use crate::poller::{OperationId, OperationStatus};
use async_trait::async_trait;

pub use memory::MemoryBackend;

/// How strictly the store itself enforces the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hierarchy {
    /// Children cannot exist without their parent (the store refuses them)
    #[default]
    Enforced,
    /// Parents are only a naming convention; orphans can exist
    Loose,
}

/// Address of a single resource, plus its vendor identity when cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub path: ResourcePath,
    /// Vendor-internal id previously reported through [`Located::id`]
    pub id: Option<String>,
}

impl Key {
    pub fn new(path: ResourcePath) -> Self {
        Self { path, id: None }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}

/// An object together with the vendor identity it was found under
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    pub object: T,
    pub id: Option<String>,
}

impl<T> Located<T> {
    pub fn new(object: T) -> Self {
        Self { object, id: None }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Outcome of a mutating call
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
    /// Applied synchronously
    Done(T),
    /// Accepted; completion must be polled through [`Backend::operation_status`]
    Submitted(OperationId),
}

/// One element of a listing page
#[derive(Debug, Clone, PartialEq)]
pub enum Record<T> {
    Valid(Located<T>),
    /// Something under the listed prefix that is not a record of the expected kind
    Invalid { key: String, reason: String },
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<Record<T>>,
    /// `None` when this is the last page
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(records: Vec<Record<T>>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }
}

/// The set of children being listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection {
    Namespaces,
    Services { namespace: String },
    Endpoints { namespace: String, service: String },
}

impl Collection {
    /// Scope names must be set before anything is fetched
    pub fn validate(&self) -> Result<()> {
        match self {
            Collection::Namespaces => Ok(()),
            Collection::Services { namespace } => check_name(namespace, Error::EmptyNamespaceName),
            Collection::Endpoints { namespace, service } => {
                check_name(namespace, Error::EmptyNamespaceName)?;
                check_name(service, Error::EmptyServiceName)
            }
        }
    }

    /// Path of the member called `name`
    pub fn child(&self, name: &str) -> ResourcePath {
        match self {
            Collection::Namespaces => ResourcePath::namespace(name),
            Collection::Services { namespace } => ResourcePath::service(namespace.as_str(), name),
            Collection::Endpoints { namespace, service } => {
                ResourcePath::endpoint(namespace.as_str(), service.as_str(), name)
            }
        }
    }

    /// Path of the node owning this collection
    pub fn parent(&self) -> Option<ResourcePath> {
        match self {
            Collection::Namespaces => None,
            Collection::Services { namespace } => Some(ResourcePath::namespace(namespace.as_str())),
            Collection::Endpoints { namespace, service } => {
                Some(ResourcePath::service(namespace.as_str(), service.as_str()))
            }
        }
    }
}

/// Parameters of a single page fetch
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub collection: &'a Collection,
    /// Opaque continuation token from the previous page
    pub cursor: Option<&'a str>,
    pub page_size: u32,
    /// Client-side filter; backends may push parts of it server-side as a hint
    pub filter: &'a Filter,
}

/// Vendor adapter
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn hierarchy(&self) -> Hierarchy {
        Hierarchy::Enforced
    }

    /// Read one resource; `Error::NotFound` when absent
    async fn get(&self, key: &Key) -> Result<Located<Object>>;

    /// Create a resource; `Error::AlreadyExists` when it exists
    async fn create(&self, object: &Object) -> Result<Mutation<Located<Object>>>;

    /// Replace the mutable fields of an existing resource
    async fn update(&self, key: &Key, object: &Object) -> Result<Mutation<Located<Object>>>;

    /// Remove a resource and everything below it
    async fn delete(&self, key: &Key) -> Result<Mutation<()>>;

    /// Fetch exactly one page of a collection
    async fn list(&self, request: &PageRequest<'_>) -> Result<Page<Object>>;

    /// Status of an operation returned through [`Mutation::Submitted`]
    async fn operation_status(&self, operation: &OperationId) -> Result<OperationStatus> {
        Err(Error::Transport(anyhow::anyhow!(
            "{} backend does not report asynchronous operations (operation {})",
            self.name(),
            operation
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_preconditions() {
        assert!(Collection::Namespaces.validate().is_ok());
        assert!(matches!(
            Collection::Services {
                namespace: String::new()
            }
            .validate(),
            Err(Error::EmptyNamespaceName)
        ));
        assert!(matches!(
            Collection::Endpoints {
                namespace: String::new(),
                service: String::new()
            }
            .validate(),
            Err(Error::EmptyNamespaceName)
        ));
        assert!(matches!(
            Collection::Endpoints {
                namespace: "hr".into(),
                service: String::new()
            }
            .validate(),
            Err(Error::EmptyServiceName)
        ));
        assert!(matches!(
            Collection::Services {
                namespace: "hr/services".into()
            }
            .validate(),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_collection_parent() {
        let collection = Collection::Endpoints {
            namespace: "hr".into(),
            service: "payroll".into(),
        };
        assert_eq!(
            collection.parent(),
            Some(ResourcePath::service("hr", "payroll"))
        );
        assert_eq!(Collection::Namespaces.parent(), None);
    }
}
