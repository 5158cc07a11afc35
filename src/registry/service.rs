use super::{EndpointOperation, GetOptions, ListIterator, ServiceRegistry};
use crate::backend::Collection;
use crate::context::Context;
use crate::error::Result;
use crate::filter::ListOptions;
use crate::model::{Metadata, OriginalObject, ResourcePath, Service};

/// Mutable fields of a service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFields {
    pub metadata: Metadata,
}

/// Handle scoped to one service of one namespace
#[derive(Debug, Clone)]
pub struct ServiceOperation {
    registry: ServiceRegistry,
    namespace: String,
    name: String,
}

impl ServiceOperation {
    pub(crate) fn new(registry: ServiceRegistry, namespace: String, name: String) -> Self {
        Self {
            registry,
            namespace,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> ResourcePath {
        ResourcePath::service(self.namespace.as_str(), self.name.as_str())
    }

    fn build(&self, fields: ServiceFields) -> Service {
        Service {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            metadata: fields.metadata,
            original_object: OriginalObject::none(),
        }
    }

    pub async fn get(&self, ctx: &Context, options: GetOptions) -> Result<Service> {
        self.registry.engine.get(ctx, self.path(), options).await
    }

    pub async fn create(&self, ctx: &Context, fields: ServiceFields) -> Result<Service> {
        self.path().validate()?;
        self.registry.engine.create(ctx, self.build(fields)).await
    }

    pub async fn update(&self, ctx: &Context, fields: ServiceFields) -> Result<Service> {
        self.path().validate()?;
        self.registry.engine.update(ctx, self.build(fields)).await
    }

    pub async fn delete(&self, ctx: &Context) -> Result<()> {
        self.registry.engine.delete(ctx, self.path()).await
    }

    /// List the services of the namespace
    pub fn list(&self, options: &ListOptions) -> ListIterator<Service> {
        let scope = Some(self.name.as_str()).filter(|name| !name.is_empty());
        let collection = Collection::Services {
            namespace: self.namespace.clone(),
        };
        ListIterator::new(self.registry.clone(), collection, scope, options)
    }

    pub fn endpoint(&self, name: impl Into<String>) -> EndpointOperation {
        EndpointOperation::new(
            self.registry.clone(),
            self.namespace.clone(),
            self.name.clone(),
            name.into(),
        )
    }

    /// Unscoped endpoint handle, for listing the endpoints of this service
    pub fn endpoints(&self) -> EndpointOperation {
        self.endpoint(String::new())
    }
}
