use super::{GetOptions, ListIterator, ServiceOperation, ServiceRegistry};
use crate::backend::Collection;
use crate::context::Context;
use crate::error::Result;
use crate::filter::ListOptions;
use crate::model::{Metadata, Namespace, OriginalObject, ResourcePath};

/// Mutable fields of a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceFields {
    pub metadata: Metadata,
}

/// Handle scoped to one namespace
#[derive(Debug, Clone)]
pub struct NamespaceOperation {
    registry: ServiceRegistry,
    name: String,
}

impl NamespaceOperation {
    pub(crate) fn new(registry: ServiceRegistry, name: String) -> Self {
        Self { registry, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> ResourcePath {
        ResourcePath::namespace(self.name.as_str())
    }

    fn build(&self, fields: NamespaceFields) -> Namespace {
        Namespace {
            name: self.name.clone(),
            metadata: fields.metadata,
            original_object: OriginalObject::none(),
        }
    }

    pub async fn get(&self, ctx: &Context, options: GetOptions) -> Result<Namespace> {
        self.registry.engine.get(ctx, self.path(), options).await
    }

    pub async fn create(&self, ctx: &Context, fields: NamespaceFields) -> Result<Namespace> {
        self.path().validate()?;
        self.registry.engine.create(ctx, self.build(fields)).await
    }

    /// Replace the namespace's metadata
    pub async fn update(&self, ctx: &Context, fields: NamespaceFields) -> Result<Namespace> {
        self.path().validate()?;
        self.registry.engine.update(ctx, self.build(fields)).await
    }

    /// Delete the namespace and, on stores that cascade, everything in it
    pub async fn delete(&self, ctx: &Context) -> Result<()> {
        self.registry.engine.delete(ctx, self.path()).await
    }

    /// List namespaces; a named handle only ever yields itself
    pub fn list(&self, options: &ListOptions) -> ListIterator<Namespace> {
        let scope = Some(self.name.as_str()).filter(|name| !name.is_empty());
        ListIterator::new(self.registry.clone(), Collection::Namespaces, scope, options)
    }

    pub fn service(&self, name: impl Into<String>) -> ServiceOperation {
        ServiceOperation::new(self.registry.clone(), self.name.clone(), name.into())
    }

    /// Unscoped service handle, for listing the services of this namespace
    pub fn services(&self) -> ServiceOperation {
        ServiceOperation::new(self.registry.clone(), self.name.clone(), String::new())
    }
}
