//! Service Directory backend
//!
//! Maps registry operations onto the Service Directory v1 REST API. The API
//! enforces the hierarchy itself and applies every mutation synchronously.

use super::client::ServiceDirectoryClient;
use super::convert::{self, ListResponse, ServiceView};
use crate::backend::{
    Backend, Collection, Hierarchy, Key, Located, Mutation, Page, PageRequest, Record,
};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::model::{Endpoint, Object, ResourcePath, Service};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;

/// Maximum page size the API accepts
const MAX_PAGE_SIZE: u32 = 1000;

pub struct ServiceDirectoryBackend {
    client: ServiceDirectoryClient,
}

impl ServiceDirectoryBackend {
    pub fn new(client: ServiceDirectoryClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ServiceDirectoryClient {
        &self.client
    }

    fn decode(&self, path: &ResourcePath, value: Value) -> Result<Located<Object>> {
        let (object, id) = convert::from_wire(path, value).map_err(|e| Error::InvalidRecord {
            key: self.client.resource_name(path),
            reason: e.to_string(),
        })?;
        Ok(Located { object, id })
    }

    /// A service together with all of its endpoints, in one call
    pub async fn resolve_service(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<(Service, Vec<Endpoint>)> {
        let path = ResourcePath::service(namespace, service);
        let url = format!("{}:resolve", self.client.resource_url(&path));
        let response = self.client.post(&url, None).await?;

        let value = response.get("service").cloned().unwrap_or(Value::Null);
        let view = ServiceView::from_value(value)
            .context("Failed to parse resolved service")?;
        let endpoints: Vec<Endpoint> = view
            .endpoints()
            .iter()
            .cloned()
            .map(convert::to_core_endpoint)
            .collect();
        Ok((convert::to_core_service(view), endpoints))
    }
}

/// Server-side filter expression for the metadata the caller requires
///
/// Namespaces carry `labels`, services and endpoints `annotations`. Keys
/// with an empty value only have to be present. Keys the filter grammar
/// cannot express as a field name are left to the client-side filter.
pub fn metadata_filter(collection: &Collection, filter: &Filter) -> Option<String> {
    let field = match collection {
        Collection::Namespaces => "labels",
        _ => "annotations",
    };

    let mut keys: Vec<_> = filter
        .metadata()
        .iter()
        .filter(|(key, _)| is_plain_key(key))
        .collect();
    if keys.is_empty() {
        return None;
    }
    keys.sort();

    let clauses: Vec<String> = keys
        .into_iter()
        .map(|(key, value)| {
            if value.is_empty() {
                format!("{}.{}:*", field, key)
            } else {
                format!("{}.{}=\"{}\"", field, key, quote_value(value))
            }
        })
        .collect();
    Some(clauses.join(" AND "))
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn quote_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn collection_of(path: &ResourcePath) -> Collection {
    match path {
        ResourcePath::Namespace { .. } => Collection::Namespaces,
        ResourcePath::Service { namespace, .. } => Collection::Services {
            namespace: namespace.clone(),
        },
        ResourcePath::Endpoint {
            namespace, service, ..
        } => Collection::Endpoints {
            namespace: namespace.clone(),
            service: service.clone(),
        },
    }
}

fn id_parameter(path: &ResourcePath) -> &'static str {
    match path {
        ResourcePath::Namespace { .. } => "namespaceId",
        ResourcePath::Service { .. } => "serviceId",
        ResourcePath::Endpoint { .. } => "endpointId",
    }
}

fn update_mask(path: &ResourcePath) -> &'static str {
    match path {
        ResourcePath::Namespace { .. } => "labels",
        ResourcePath::Service { .. } => "annotations",
        ResourcePath::Endpoint { .. } => "address,port,annotations",
    }
}

fn body_of(object: &Object) -> Result<Value> {
    Ok(convert::to_wire(object).context("Failed to encode request body")?)
}

#[async_trait]
impl Backend for ServiceDirectoryBackend {
    fn name(&self) -> &'static str {
        "servicedirectory"
    }

    fn hierarchy(&self) -> Hierarchy {
        Hierarchy::Enforced
    }

    async fn get(&self, key: &Key) -> Result<Located<Object>> {
        let value = self.client.get(&self.client.resource_url(&key.path)).await?;
        self.decode(&key.path, value)
    }

    async fn create(&self, object: &Object) -> Result<Mutation<Located<Object>>> {
        let path = object.path();
        let base = self.client.collection_url(&collection_of(&path));
        let url = ServiceDirectoryClient::with_query(&base, [(id_parameter(&path), path.leaf())])?;

        let value = self.client.post(&url, Some(&body_of(object)?)).await?;
        Ok(Mutation::Done(self.decode(&path, value)?))
    }

    async fn update(&self, key: &Key, object: &Object) -> Result<Mutation<Located<Object>>> {
        let base = self.client.resource_url(&key.path);
        let url =
            ServiceDirectoryClient::with_query(&base, [("updateMask", update_mask(&key.path))])?;

        let value = self.client.patch(&url, &body_of(object)?).await?;
        Ok(Mutation::Done(self.decode(&key.path, value)?))
    }

    async fn delete(&self, key: &Key) -> Result<Mutation<()>> {
        self.client.delete(&self.client.resource_url(&key.path)).await?;
        Ok(Mutation::Done(()))
    }

    async fn list(&self, request: &PageRequest<'_>) -> Result<Page<Object>> {
        let page_size = request.page_size.clamp(1, MAX_PAGE_SIZE).to_string();
        let filter = metadata_filter(request.collection, request.filter);

        let mut params = vec![("pageSize", page_size.as_str())];
        if let Some(token) = request.cursor {
            params.push(("pageToken", token));
        }
        if let Some(filter) = filter.as_deref() {
            params.push(("filter", filter));
        }

        let base = self.client.collection_url(request.collection);
        let url = ServiceDirectoryClient::with_query(&base, params)?;

        let value = self.client.get(&url).await?;
        let response: ListResponse = if value.is_null() {
            ListResponse::default()
        } else {
            serde_json::from_value(value).context("Failed to parse list response")?
        };
        let next_cursor = response
            .next_page_token
            .clone()
            .filter(|token| !token.is_empty());

        let records = response
            .into_items()
            .into_iter()
            .map(|item| {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .map(convert::short_name)
                    .unwrap_or_default()
                    .to_string();
                let path = request.collection.child(&name);
                match convert::from_wire(&path, item) {
                    Ok((object, id)) => Record::Valid(Located { object, id }),
                    Err(err) => Record::Invalid {
                        key: self.client.resource_name(&path),
                        reason: err.to_string(),
                    },
                }
            })
            .collect();

        Ok(Page {
            records,
            next_cursor,
        })
    }
}

impl std::fmt::Debug for ServiceDirectoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDirectoryBackend")
            .field("project_id", &self.client.project_id)
            .field("location", &self.client.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ListOptions;

    #[test]
    fn test_metadata_filter_expression() {
        let filter = Filter::from_options(
            &ListOptions::default()
                .with_metadata("team", "people")
                .with_metadata("owner", ""),
        )
        .unwrap();

        assert_eq!(
            metadata_filter(&Collection::Namespaces, &filter).as_deref(),
            Some("labels.owner:* AND labels.team=\"people\"")
        );
        assert_eq!(
            metadata_filter(
                &Collection::Services {
                    namespace: "hr".into()
                },
                &filter
            )
            .as_deref(),
            Some("annotations.owner:* AND annotations.team=\"people\"")
        );
        assert_eq!(metadata_filter(&Collection::Namespaces, &Filter::none()), None);
    }

    #[test]
    fn test_metadata_filter_escapes_values() {
        let filter = Filter::from_options(
            &ListOptions::default().with_metadata("path", r#"C:\share "x""#),
        )
        .unwrap();

        assert_eq!(
            metadata_filter(&Collection::Namespaces, &filter).as_deref(),
            Some(r#"labels.path="C:\\share \"x\"""#)
        );
    }

    #[test]
    fn test_metadata_filter_skips_dotted_keys() {
        let filter = Filter::from_options(
            &ListOptions::default()
                .with_metadata("app.kubernetes.io/name", "payroll")
                .with_metadata("tier", "web"),
        )
        .unwrap();
        let collection = Collection::Services {
            namespace: "hr".into(),
        };

        assert_eq!(
            metadata_filter(&collection, &filter).as_deref(),
            Some("annotations.tier=\"web\"")
        );

        let only_dotted = Filter::from_options(
            &ListOptions::default().with_metadata("app.kubernetes.io/name", "payroll"),
        )
        .unwrap();
        assert_eq!(metadata_filter(&collection, &only_dotted), None);
    }

    #[test]
    fn test_update_masks() {
        assert_eq!(update_mask(&ResourcePath::namespace("hr")), "labels");
        assert_eq!(
            update_mask(&ResourcePath::endpoint("hr", "payroll", "ep")),
            "address,port,annotations"
        );
    }
}
