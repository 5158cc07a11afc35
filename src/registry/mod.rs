//! Service registry
//!
//! [`ServiceRegistry`] is the entry point callers hold. It hands out scoped
//! handles ([`NamespaceOperation`], [`ServiceOperation`],
//! [`EndpointOperation`]) that all share one engine: the backend adapter, the
//! object cache and the operation poller.
//!
//! # Module Structure
//!
//! - [`namespace`], [`service`], [`endpoint`] - Scoped handles
//! - [`iterator`] - Lazy listing over backend pages

pub mod endpoint;
pub mod iterator;
pub mod namespace;
pub mod service;

use crate::backend::{Backend, Hierarchy, Key, Located, Mutation};
use crate::cache::{Cache, IdentityKind};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::model::{Object, Resource, ResourcePath};
use crate::poller::{Poller, PollerConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use endpoint::{EndpointFields, EndpointOperation};
pub use iterator::{ListIterator, Scoped};
pub use namespace::{NamespaceFields, NamespaceOperation};
pub use service::{ServiceFields, ServiceOperation};

/// Default object cache TTL
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Page size used when a listing does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// What a child `get` does when it finds the child but not one of its ancestors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Return the ancestor's not-found error, leave the record alone
    #[default]
    Report,
    /// Delete the orphaned record, then return the ancestor's not-found error
    Delete,
}

/// Registry tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Object TTL; `None` or zero disables the cache
    pub cache_ttl: Option<Duration>,
    pub poller: PollerConfig,
    pub orphan_policy: OrphanPolicy,
    pub default_page_size: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Some(DEFAULT_CACHE_TTL),
            poller: PollerConfig::default(),
            orphan_policy: OrphanPolicy::default(),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Options of a single-object read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Skip the cache, including cached identities
    pub force_refresh: bool,
}

impl GetOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
        }
    }
}

/// State shared by every handle of one registry
struct Engine {
    backend: Arc<dyn Backend>,
    cache: Cache,
    poller: Poller,
    orphan_policy: OrphanPolicy,
    default_page_size: u32,
}

impl Engine {
    fn key(&self, path: &ResourcePath, force_refresh: bool) -> Key {
        let id = if force_refresh {
            None
        } else {
            self.cache.identity(path, IdentityKind::Id)
        };
        Key::new(path.clone()).with_id(id)
    }

    /// Stamp, cache and return an object read from the backend
    fn remember(&self, path: &ResourcePath, located: Located<Object>) -> Object {
        let Located { mut object, id } = located;
        object.stamp(path);
        if let Some(id) = id {
            self.cache.put_identity(path, IdentityKind::Id, id);
        }
        self.cache.put(path, object.clone());
        object
    }

    fn convert<T: Resource>(path: &ResourcePath, object: Object) -> Result<T> {
        let kind = object.kind();
        T::from_object(object).ok_or_else(|| Error::InvalidRecord {
            key: path.to_string(),
            reason: format!("expected a {}, found a {}", path.kind(), kind),
        })
    }

    /// Whether `path` exists; a cache hit counts as a live read
    async fn exists(&self, ctx: &Context, path: &ResourcePath) -> Result<bool> {
        if self.cache.get(path).is_some() {
            return Ok(true);
        }
        match ctx.run(self.backend.get(&self.key(path, false))).await {
            Ok(located) => {
                self.remember(path, located);
                Ok(true)
            }
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Name the outermost missing level of `path`
    async fn locate_missing(&self, ctx: &Context, path: &ResourcePath) -> Error {
        for ancestor in path.ancestors() {
            match self.exists(ctx, &ancestor).await {
                Ok(true) => {}
                Ok(false) => return ancestor.not_found(),
                Err(err) => return err,
            }
        }
        path.not_found()
    }

    async fn missing_ancestor(
        &self,
        ctx: &Context,
        path: &ResourcePath,
    ) -> Result<Option<ResourcePath>> {
        for ancestor in path.ancestors() {
            if !self.exists(ctx, &ancestor).await? {
                return Ok(Some(ancestor));
            }
        }
        Ok(None)
    }

    /// Wait for a submitted mutation to finish
    async fn complete<T>(&self, ctx: &Context, mutation: Mutation<T>) -> Result<Option<T>> {
        match mutation {
            Mutation::Done(value) => Ok(Some(value)),
            Mutation::Submitted(operation) => {
                tracing::debug!("{}: waiting for operation {}", self.backend.name(), operation);
                let backend = self.backend.as_ref();
                let operation = &operation;
                self.poller
                    .wait(ctx, move || backend.operation_status(operation))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Finish a create/update and read the resulting object
    async fn settle(
        &self,
        ctx: &Context,
        path: &ResourcePath,
        mutation: Mutation<Located<Object>>,
    ) -> Result<Located<Object>> {
        match self.complete(ctx, mutation).await? {
            Some(located) => Ok(located),
            None => ctx.run(self.backend.get(&Key::new(path.clone()))).await,
        }
    }

    async fn get<T: Resource>(
        &self,
        ctx: &Context,
        path: ResourcePath,
        options: GetOptions,
    ) -> Result<T> {
        path.validate()?;

        if !options.force_refresh {
            if let Some(object) = self.cache.get(&path) {
                return Self::convert(&path, object);
            }
        }

        let key = self.key(&path, options.force_refresh);
        let located = match ctx.run(self.backend.get(&key)).await {
            Ok(located) => located,
            Err(Error::NotFound) => return Err(self.locate_missing(ctx, &path).await),
            Err(err) => return Err(err),
        };

        if self.backend.hierarchy() == Hierarchy::Loose {
            if let Some(ancestor) = self.missing_ancestor(ctx, &path).await? {
                self.handle_orphan(ctx, &path, &ancestor).await?;
                return Err(ancestor.not_found());
            }
        }

        let object = self.remember(&path, located);
        Self::convert(&path, object)
    }

    async fn handle_orphan(
        &self,
        ctx: &Context,
        path: &ResourcePath,
        ancestor: &ResourcePath,
    ) -> Result<()> {
        match self.orphan_policy {
            OrphanPolicy::Report => {
                tracing::warn!("{} {} is orphaned: {} is missing", path.kind(), path, ancestor);
                Ok(())
            }
            OrphanPolicy::Delete => {
                tracing::info!(
                    "{}: deleting orphaned {} {}",
                    self.backend.name(),
                    path.kind(),
                    path
                );
                self.cache.invalidate_prefix(path);
                match ctx.run(self.backend.delete(&Key::new(path.clone()))).await {
                    Ok(mutation) => {
                        self.complete(ctx, mutation).await?;
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
                self.cache.invalidate_prefix(path);
                Ok(())
            }
        }
    }

    async fn create<T: Resource>(&self, ctx: &Context, resource: T) -> Result<T> {
        let path = resource.path();
        path.validate()?;

        if self.backend.hierarchy() == Hierarchy::Loose {
            if let Some(ancestor) = self.missing_ancestor(ctx, &path).await? {
                return Err(ancestor.not_found());
            }
        }

        self.cache.invalidate(&path);
        let object = resource.into_object();
        let mutation = match ctx.run(self.backend.create(&object)).await {
            Ok(mutation) => mutation,
            Err(Error::NotFound) => return Err(self.locate_missing(ctx, &path).await),
            Err(err) => return Err(err),
        };
        let located = self.settle(ctx, &path, mutation).await?;
        self.cache.invalidate(&path);

        tracing::info!("{}: created {} {}", self.backend.name(), path.kind(), path);
        let object = self.remember(&path, located);
        Self::convert(&path, object)
    }

    async fn update<T: Resource>(&self, ctx: &Context, resource: T) -> Result<T> {
        let path = resource.path();
        path.validate()?;

        let key = self.key(&path, false);
        self.cache.invalidate(&path);
        let object = resource.into_object();
        let mutation = match ctx.run(self.backend.update(&key, &object)).await {
            Ok(mutation) => mutation,
            Err(Error::NotFound) => return Err(self.locate_missing(ctx, &path).await),
            Err(err) => return Err(err),
        };
        let located = self.settle(ctx, &path, mutation).await?;
        self.cache.invalidate(&path);

        tracing::info!("{}: updated {} {}", self.backend.name(), path.kind(), path);
        let object = self.remember(&path, located);
        Self::convert(&path, object)
    }

    async fn delete(&self, ctx: &Context, path: ResourcePath) -> Result<()> {
        path.validate()?;

        let key = self.key(&path, false);
        self.cache.invalidate_prefix(&path);
        let mutation = match ctx.run(self.backend.delete(&key)).await {
            Ok(mutation) => mutation,
            Err(Error::NotFound) => return Err(self.locate_missing(ctx, &path).await),
            Err(err) => return Err(err),
        };
        self.complete(ctx, mutation).await?;
        self.cache.invalidate_prefix(&path);

        tracing::info!("{}: deleted {} {}", self.backend.name(), path.kind(), path);
        Ok(())
    }
}

/// Entry point of the registry API
///
/// Cheap to clone; clones share the backend and the cache.
#[derive(Clone)]
pub struct ServiceRegistry {
    engine: Arc<Engine>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    pub fn new(backend: Arc<dyn Backend>, config: RegistryConfig) -> Self {
        let default_page_size = if config.default_page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            config.default_page_size
        };

        tracing::debug!(
            "registry over {} backend (cache ttl {:?}, poll tick {:?})",
            backend.name(),
            config.cache_ttl,
            config.poller.tick
        );

        Self {
            engine: Arc::new(Engine {
                backend,
                cache: Cache::with_ttl(config.cache_ttl),
                poller: Poller::new(config.poller),
                orphan_policy: config.orphan_policy,
                default_page_size,
            }),
        }
    }

    /// Handle on one namespace
    pub fn namespace(&self, name: impl Into<String>) -> NamespaceOperation {
        NamespaceOperation::new(self.clone(), name.into())
    }

    /// Unscoped namespace handle, for listing every namespace
    pub fn namespaces(&self) -> NamespaceOperation {
        NamespaceOperation::new(self.clone(), String::new())
    }

    pub fn cache(&self) -> &Cache {
        &self.engine.cache
    }

    pub fn backend_name(&self) -> &'static str {
        self.engine.backend.name()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("backend", &self.engine.backend.name())
            .field("cache", &self.engine.cache)
            .field("orphan_policy", &self.engine.orphan_policy)
            .finish()
    }
}

#[derive(Default)]
pub struct ServiceRegistryBuilder {
    backend: Option<Arc<dyn Backend>>,
    config: RegistryConfig,
}

impl ServiceRegistryBuilder {
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.config.orphan_policy = policy;
        self
    }

    pub fn build(self) -> Result<ServiceRegistry> {
        let backend = self.backend.ok_or(Error::NoClientProvided)?;
        Ok(ServiceRegistry::new(backend, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::model::Namespace;

    fn registry(backend: Arc<MemoryBackend>) -> ServiceRegistry {
        ServiceRegistry::new(backend, RegistryConfig::default())
    }

    #[test]
    fn test_builder_requires_backend() {
        assert!(matches!(
            ServiceRegistry::builder().build(),
            Err(Error::NoClientProvided)
        ));
        assert!(ServiceRegistry::builder()
            .backend(Arc::new(MemoryBackend::new()))
            .build()
            .is_ok());
    }

    #[test]
    fn test_zero_page_size_falls_back_to_default() {
        let config = RegistryConfig {
            default_page_size: 0,
            ..Default::default()
        };
        let registry = ServiceRegistry::new(Arc::new(MemoryBackend::new()), config);
        assert_eq!(registry.engine.default_page_size, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_get_is_served_from_cache() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = registry(backend.clone());
        let ctx = Context::background();

        registry
            .namespace("hr")
            .create(&ctx, NamespaceFields::default())
            .await
            .unwrap();
        let gets_after_create = backend.stats().gets;

        let ns: Namespace = registry
            .namespace("hr")
            .get(&ctx, GetOptions::default())
            .await
            .unwrap();
        assert_eq!(ns.name, "hr");
        assert_eq!(backend.stats().gets, gets_after_create);

        registry.namespace("hr").get(&ctx, GetOptions::refresh()).await.unwrap();
        assert_eq!(backend.stats().gets, gets_after_create + 1);
    }

    #[tokio::test]
    async fn test_identity_is_cached_on_read() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = registry(backend);
        let ctx = Context::background();

        registry
            .namespace("hr")
            .create(&ctx, NamespaceFields::default())
            .await
            .unwrap();

        let id = registry
            .cache()
            .identity(&ResourcePath::namespace("hr"), IdentityKind::Id);
        assert!(id.is_some_and(|id| id.starts_with("ns-")));
    }

    #[tokio::test]
    async fn test_delete_drops_subtree_from_cache() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = registry(backend);
        let ctx = Context::background();

        let hr = registry.namespace("hr");
        hr.create(&ctx, NamespaceFields::default()).await.unwrap();
        hr.service("payroll")
            .create(&ctx, ServiceFields::default())
            .await
            .unwrap();

        hr.delete(&ctx).await.unwrap();

        assert!(registry.cache().get(&ResourcePath::namespace("hr")).is_none());
        assert!(registry
            .cache()
            .get(&ResourcePath::service("hr", "payroll"))
            .is_none());
    }
}
