//! Lazy listing
//!
//! A [`ListIterator`] presents one continuous sequence over a backend that
//! pages. It fetches a page only when every record already fetched has been
//! consumed or rejected by the filter, and it never fetches again once the
//! backend reported the last page or a page fetch failed.

use super::{EndpointOperation, NamespaceOperation, ServiceOperation, ServiceRegistry};
use crate::backend::{Collection, Located, PageRequest, Record};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::filter::{Filter, ListOptions};
use crate::model::{Endpoint, Namespace, Resource, Service};
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::marker::PhantomData;

/// A resource kind that can be listed and scoped into a handle
pub trait Scoped: Resource {
    type Handle: Clone + Send + Sync + 'static;

    fn handle(registry: &ServiceRegistry, item: &Self) -> Self::Handle;
}

impl Scoped for Namespace {
    type Handle = NamespaceOperation;

    fn handle(registry: &ServiceRegistry, item: &Self) -> Self::Handle {
        registry.namespace(item.name.as_str())
    }
}

impl Scoped for Service {
    type Handle = ServiceOperation;

    fn handle(registry: &ServiceRegistry, item: &Self) -> Self::Handle {
        ServiceOperation::new(registry.clone(), item.namespace.clone(), item.name.clone())
    }
}

impl Scoped for Endpoint {
    type Handle = EndpointOperation;

    fn handle(registry: &ServiceRegistry, item: &Self) -> Self::Handle {
        EndpointOperation::new(
            registry.clone(),
            item.namespace.clone(),
            item.service.clone(),
            item.name.clone(),
        )
    }
}

/// Pull-based iterator over one collection
pub struct ListIterator<T: Scoped> {
    registry: ServiceRegistry,
    collection: Collection,
    /// Compiled filter, or the reason the options were rejected
    filter: std::result::Result<Filter, String>,
    page_size: u32,
    pending: VecDeque<Record<crate::model::Object>>,
    cursor: Option<String>,
    more_pages: bool,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Scoped> ListIterator<T> {
    pub(crate) fn new(
        registry: ServiceRegistry,
        collection: Collection,
        scope: Option<&str>,
        options: &ListOptions,
    ) -> Self {
        let filter = Filter::from_options(options)
            .map(|filter| match scope {
                Some(name) => filter.with_name(name),
                None => filter,
            })
            .map_err(|err| match err {
                Error::InvalidFilter(reason) => reason,
                other => other.to_string(),
            });

        let page_size = if options.results_per_page == 0 {
            registry.engine.default_page_size
        } else {
            options.results_per_page
        };

        Self {
            registry,
            collection,
            filter,
            page_size,
            pending: VecDeque::new(),
            cursor: None,
            more_pages: true,
            _kind: PhantomData,
        }
    }

    /// The next matching item and a handle scoped to it
    ///
    /// Returns [`Error::IteratorDone`] once the listing is exhausted, and on
    /// every call after that.
    pub async fn next(&mut self, ctx: &Context) -> Result<(T, T::Handle)> {
        self.collection.validate()?;
        let filter = match &self.filter {
            Ok(filter) => filter,
            Err(reason) => return Err(Error::InvalidFilter(reason.clone())),
        };
        let engine = &self.registry.engine;

        loop {
            while let Some(record) = self.pending.pop_front() {
                let Located { mut object, id } = match record {
                    Record::Valid(located) => located,
                    Record::Invalid { key, reason } => {
                        tracing::trace!("skipping invalid record {}: {}", key, reason);
                        continue;
                    }
                };

                let path = self.collection.child(object.name());
                object.stamp(&path);
                let Some(item) = T::from_object(object) else {
                    tracing::trace!("skipping record of another kind at {}", path);
                    continue;
                };
                if !filter.passes(&item) {
                    continue;
                }

                if let Some(id) = id {
                    engine
                        .cache
                        .put_identity(&path, crate::cache::IdentityKind::Id, id);
                }
                engine.cache.put(&path, item.clone().into_object());

                let handle = T::handle(&self.registry, &item);
                return Ok((item, handle));
            }

            if !self.more_pages {
                return Err(Error::IteratorDone);
            }

            tracing::debug!(
                "{}: fetching page of {:?} (cursor {:?})",
                engine.backend.name(),
                self.collection,
                self.cursor
            );
            let fetched = {
                let request = PageRequest {
                    collection: &self.collection,
                    cursor: self.cursor.as_deref(),
                    page_size: self.page_size,
                    filter,
                };
                ctx.run(engine.backend.list(&request)).await
            };

            match fetched {
                Ok(page) => {
                    self.more_pages = page.next_cursor.is_some();
                    self.cursor = page.next_cursor;
                    self.pending.extend(page.records);
                }
                Err(err) => {
                    self.more_pages = false;
                    self.pending.clear();
                    return Err(err);
                }
            }
        }
    }

    /// Drain the iterator into a vector, stopping at the first error
    pub async fn collect_all(mut self, ctx: &Context) -> Result<Vec<T>> {
        let mut items = Vec::new();
        loop {
            match self.next(ctx).await {
                Ok((item, _)) => items.push(item),
                Err(Error::IteratorDone) => return Ok(items),
                Err(err) => return Err(err),
            }
        }
    }

    /// Adapt into a stream that ends with the listing, or right after the first error
    pub fn into_stream(self, ctx: Context) -> impl Stream<Item = Result<(T, T::Handle)>> {
        stream::unfold(Some((self, ctx)), |state| async move {
            let (mut iter, ctx) = state?;
            match iter.next(&ctx).await {
                Ok(item) => Some((Ok(item), Some((iter, ctx)))),
                Err(Error::IteratorDone) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

impl<T: Scoped> std::fmt::Debug for ListIterator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListIterator")
            .field("collection", &self.collection)
            .field("page_size", &self.page_size)
            .field("pending", &self.pending.len())
            .field("cursor", &self.cursor)
            .field("more_pages", &self.more_pages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::registry::{NamespaceFields, RegistryConfig, ServiceFields};
    use futures::StreamExt;
    use std::sync::Arc;

    async fn seeded(names: &[&str]) -> (Arc<MemoryBackend>, ServiceRegistry) {
        let backend = Arc::new(MemoryBackend::new());
        let registry = ServiceRegistry::new(backend.clone(), RegistryConfig::default());
        let ctx = Context::background();
        for name in names {
            registry
                .namespace(*name)
                .create(&ctx, NamespaceFields::default())
                .await
                .unwrap();
        }
        (backend, registry)
    }

    #[tokio::test]
    async fn test_five_items_page_size_two() {
        let (backend, registry) = seeded(&["a", "b", "c", "d", "e"]).await;
        let ctx = Context::background();
        let mut iter = registry
            .namespaces()
            .list(&ListOptions::default().with_page_size(2));

        let mut names = Vec::new();
        loop {
            match iter.next(&ctx).await {
                Ok((ns, handle)) => {
                    assert_eq!(handle.name(), ns.name);
                    names.push(ns.name);
                }
                Err(err) => {
                    assert!(err.is_iterator_done());
                    break;
                }
            }
        }

        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert!(matches!(iter.next(&ctx).await, Err(Error::IteratorDone)));
        assert_eq!(backend.stats().list_pages, 3);
    }

    #[tokio::test]
    async fn test_empty_namespace_checked_before_fetch() {
        let (backend, registry) = seeded(&[]).await;
        let mut iter = registry.namespace("").services().list(&ListOptions::default());

        let result = iter.next(&Context::background()).await;

        assert!(matches!(result, Err(Error::EmptyNamespaceName)));
        assert_eq!(backend.stats().list_pages, 0);
    }

    #[tokio::test]
    async fn test_invalid_filter_reported_on_every_call() {
        let (backend, registry) = seeded(&["a"]).await;
        let options = ListOptions::default().with_prefix("a").with_names(["a"]);
        let mut iter = registry.namespaces().list(&options);
        let ctx = Context::background();

        assert!(matches!(iter.next(&ctx).await, Err(Error::InvalidFilter(_))));
        assert!(matches!(iter.next(&ctx).await, Err(Error::InvalidFilter(_))));
        assert_eq!(backend.stats().list_pages, 0);
    }

    #[tokio::test]
    async fn test_page_error_stops_the_listing() {
        let (backend, registry) = seeded(&["a", "b"]).await;
        backend.fail_next_list("backend unavailable");
        let mut iter = registry.namespaces().list(&ListOptions::default());
        let ctx = Context::background();

        assert!(matches!(iter.next(&ctx).await, Err(Error::Transport(_))));
        assert!(matches!(iter.next(&ctx).await, Err(Error::IteratorDone)));
        assert_eq!(backend.stats().list_pages, 1);
    }

    #[tokio::test]
    async fn test_filtered_items_trigger_next_page() {
        let (backend, registry) = seeded(&["alpha", "beta", "gamma", "delta"]).await;
        let options = ListOptions::default().with_page_size(1).with_prefix("d");
        let items = registry
            .namespaces()
            .list(&options)
            .collect_all(&Context::background())
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "delta");
        assert_eq!(backend.stats().list_pages, 4);
    }

    #[tokio::test]
    async fn test_scoped_handle_yields_only_itself() {
        let (_, registry) = seeded(&["hr", "it"]).await;
        let ctx = Context::background();
        let hr = registry.namespace("hr");
        hr.service("payroll")
            .create(&ctx, ServiceFields::default())
            .await
            .unwrap();
        hr.service("benefits")
            .create(&ctx, ServiceFields::default())
            .await
            .unwrap();

        let only = hr
            .service("payroll")
            .list(&ListOptions::default())
            .collect_all(&ctx)
            .await
            .unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].namespace, "hr");

        let all = hr
            .services()
            .list(&ListOptions::default())
            .collect_all(&ctx)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_ends_at_listing_end() {
        let (_, registry) = seeded(&["a", "b", "c"]).await;
        let items: Vec<_> = registry
            .namespaces()
            .list(&ListOptions::default().with_page_size(2))
            .into_stream(Context::background())
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item.is_ok()));
    }
}
