use super::{GetOptions, ListIterator, ServiceRegistry};
use crate::backend::Collection;
use crate::context::Context;
use crate::error::Result;
use crate::filter::ListOptions;
use crate::model::{Endpoint, Metadata, OriginalObject, ResourcePath};

/// Mutable fields of an endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointFields {
    /// Empty, or an IPv4/IPv6 literal
    pub address: String,
    /// 0 leaves the port unset
    pub port: u16,
    pub metadata: Metadata,
}

/// Handle scoped to one endpoint of one service
#[derive(Debug, Clone)]
pub struct EndpointOperation {
    registry: ServiceRegistry,
    namespace: String,
    service: String,
    name: String,
}

impl EndpointOperation {
    pub(crate) fn new(
        registry: ServiceRegistry,
        namespace: String,
        service: String,
        name: String,
    ) -> Self {
        Self {
            registry,
            namespace,
            service,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> ResourcePath {
        ResourcePath::endpoint(
            self.namespace.as_str(),
            self.service.as_str(),
            self.name.as_str(),
        )
    }

    fn build(&self, fields: EndpointFields) -> Endpoint {
        Endpoint {
            name: self.name.clone(),
            service: self.service.clone(),
            namespace: self.namespace.clone(),
            address: fields.address,
            port: fields.port,
            metadata: fields.metadata,
            original_object: OriginalObject::none(),
        }
    }

    pub async fn get(&self, ctx: &Context, options: GetOptions) -> Result<Endpoint> {
        self.registry.engine.get(ctx, self.path(), options).await
    }

    pub async fn create(&self, ctx: &Context, fields: EndpointFields) -> Result<Endpoint> {
        self.path().validate()?;
        self.registry.engine.create(ctx, self.build(fields)).await
    }

    /// Replace address, port and metadata
    pub async fn update(&self, ctx: &Context, fields: EndpointFields) -> Result<Endpoint> {
        self.path().validate()?;
        self.registry.engine.update(ctx, self.build(fields)).await
    }

    pub async fn delete(&self, ctx: &Context) -> Result<()> {
        self.registry.engine.delete(ctx, self.path()).await
    }

    /// List the endpoints of the service
    pub fn list(&self, options: &ListOptions) -> ListIterator<Endpoint> {
        let scope = Some(self.name.as_str()).filter(|name| !name.is_empty());
        let collection = Collection::Endpoints {
            namespace: self.namespace.clone(),
            service: self.service.clone(),
        };
        ListIterator::new(self.registry.clone(), collection, scope, options)
    }
}
