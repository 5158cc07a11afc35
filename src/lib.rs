//! serego: a service registry over interchangeable discovery backends
//!
//! Callers work with a Namespace → Service → Endpoint hierarchy through
//! [`ServiceRegistry`] and its scoped handles. A [`Backend`] adapter
//! translates every call into one vendor's protocol; the registry adds
//! filtering, lazy pagination, a TTL cache and completion polling for
//! asynchronous mutations on top.

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod gcp;
pub mod model;
pub mod poller;
pub mod registry;

pub use backend::{Backend, MemoryBackend};
pub use context::Context;
pub use error::{Error, Result};
pub use filter::{Filter, ListOptions};
pub use model::{Endpoint, Metadata, Namespace, Object, ResourcePath, Service};
pub use registry::{GetOptions, OrphanPolicy, RegistryConfig, ServiceRegistry};
