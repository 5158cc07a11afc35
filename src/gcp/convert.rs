//! Service Directory wire types
//!
//! Serde mirrors of the v1 REST resources and their conversion to and from
//! the registry model. The converted object keeps the wire value as its
//! original object.

use crate::model::{Endpoint, Metadata, Namespace, Object, OriginalObject, ResourcePath, Service};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiNamespace {
    /// Full resource name, `projects/*/locations/*/namespaces/*`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub labels: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiService {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub annotations: Metadata,
    /// Only present on resolved services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<ApiEndpoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub annotations: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// A service as the API returned it
///
/// `services.get` and `services.list` return a summary; `services.resolve`
/// returns the service together with its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceView {
    Summary(ApiService),
    Full {
        service: ApiService,
        endpoints: Vec<ApiEndpoint>,
    },
}

impl ServiceView {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let mut service: ApiService = serde_json::from_value(value)?;
        Ok(match service.endpoints.take() {
            Some(endpoints) => ServiceView::Full { service, endpoints },
            None => ServiceView::Summary(service),
        })
    }

    pub fn service(&self) -> &ApiService {
        match self {
            ServiceView::Summary(service) | ServiceView::Full { service, .. } => service,
        }
    }

    pub fn endpoints(&self) -> &[ApiEndpoint] {
        match self {
            ServiceView::Summary(_) => &[],
            ServiceView::Full { endpoints, .. } => endpoints,
        }
    }
}

/// `{"namespaces": [..], "nextPageToken": ".."}` and its siblings
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde(default)]
    pub namespaces: Vec<Value>,
    #[serde(default)]
    pub services: Vec<Value>,
    #[serde(default)]
    pub endpoints: Vec<Value>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl ListResponse {
    /// Items of whichever collection was listed
    pub fn into_items(self) -> Vec<Value> {
        let ListResponse {
            namespaces,
            services,
            endpoints,
            ..
        } = self;
        namespaces.into_iter().chain(services).chain(endpoints).collect()
    }
}

/// Value following `collection` in a resource name
fn segment<'a>(name: &'a str, collection: &str) -> &'a str {
    let mut parts = name.split('/');
    while let Some(part) = parts.next() {
        if part == collection {
            return parts.next().unwrap_or_default();
        }
    }
    ""
}

/// Last component of a resource name
pub fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

pub fn to_core_namespace(api: ApiNamespace) -> Namespace {
    Namespace {
        name: short_name(&api.name).to_string(),
        metadata: api.labels.clone(),
        original_object: OriginalObject::new(api),
    }
}

pub fn from_core_namespace(ns: &Namespace) -> ApiNamespace {
    ApiNamespace {
        labels: ns.metadata.clone(),
        ..Default::default()
    }
}

pub fn to_core_service(view: ServiceView) -> Service {
    let service = view.service();
    Service {
        name: short_name(&service.name).to_string(),
        namespace: segment(&service.name, "namespaces").to_string(),
        metadata: service.annotations.clone(),
        original_object: OriginalObject::new(view),
    }
}

pub fn from_core_service(svc: &Service) -> ApiService {
    ApiService {
        annotations: svc.metadata.clone(),
        ..Default::default()
    }
}

pub fn to_core_endpoint(api: ApiEndpoint) -> Endpoint {
    Endpoint {
        name: short_name(&api.name).to_string(),
        service: segment(&api.name, "services").to_string(),
        namespace: segment(&api.name, "namespaces").to_string(),
        address: api.address.clone(),
        port: api.port,
        metadata: api.annotations.clone(),
        original_object: OriginalObject::new(api),
    }
}

pub fn from_core_endpoint(ep: &Endpoint) -> ApiEndpoint {
    ApiEndpoint {
        address: ep.address.clone(),
        port: ep.port,
        annotations: ep.metadata.clone(),
        ..Default::default()
    }
}

/// Request body for creating or patching `object`
pub fn to_wire(object: &Object) -> Result<Value, serde_json::Error> {
    match object {
        Object::Namespace(ns) => serde_json::to_value(from_core_namespace(ns)),
        Object::Service(svc) => serde_json::to_value(from_core_service(svc)),
        Object::Endpoint(ep) => serde_json::to_value(from_core_endpoint(ep)),
    }
}

/// Decode a wire value of the kind `path` names; returns the object and its uid
pub fn from_wire(
    path: &ResourcePath,
    value: Value,
) -> Result<(Object, Option<String>), serde_json::Error> {
    Ok(match path {
        ResourcePath::Namespace { .. } => {
            let api: ApiNamespace = serde_json::from_value(value)?;
            let id = api.uid.clone().or_else(|| Some(api.name.clone()));
            (Object::Namespace(to_core_namespace(api)), id)
        }
        ResourcePath::Service { .. } => {
            let view = ServiceView::from_value(value)?;
            let service = view.service();
            let id = service.uid.clone().or_else(|| Some(service.name.clone()));
            (Object::Service(to_core_service(view)), id)
        }
        ResourcePath::Endpoint { .. } => {
            let api: ApiEndpoint = serde_json::from_value(value)?;
            let id = api.uid.clone().or_else(|| Some(api.name.clone()));
            (Object::Endpoint(to_core_endpoint(api)), id)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_names_from_resource_name() {
        let api: ApiEndpoint = serde_json::from_value(json!({
            "name": "projects/p/locations/l/namespaces/hr/services/payroll/endpoints/ep-1",
            "address": "10.0.0.5",
            "port": 8080,
            "annotations": {"zone": "a"}
        }))
        .unwrap();

        let ep = to_core_endpoint(api);
        assert_eq!(ep.name, "ep-1");
        assert_eq!(ep.service, "payroll");
        assert_eq!(ep.namespace, "hr");
        assert_eq!(ep.port, 8080);
        assert_eq!(ep.metadata.get("zone").map(String::as_str), Some("a"));
        assert!(ep.original_object.downcast_ref::<ApiEndpoint>().is_some());
    }

    #[test]
    fn test_service_view_is_resolved_once() {
        let summary = ServiceView::from_value(json!({
            "name": "projects/p/locations/l/namespaces/hr/services/payroll"
        }))
        .unwrap();
        assert!(matches!(summary, ServiceView::Summary(_)));
        assert!(summary.endpoints().is_empty());

        let full = ServiceView::from_value(json!({
            "name": "projects/p/locations/l/namespaces/hr/services/payroll",
            "endpoints": [
                {"name": "projects/p/locations/l/namespaces/hr/services/payroll/endpoints/a"}
            ]
        }))
        .unwrap();
        assert_eq!(full.endpoints().len(), 1);
        assert_eq!(full.service().endpoints, None);
    }

    #[test]
    fn test_namespace_body_uses_labels() {
        let ns = Namespace {
            name: "hr".into(),
            metadata: Metadata::from([("team".to_string(), "people".to_string())]),
            ..Default::default()
        };
        let body = to_wire(&Object::Namespace(ns)).unwrap();
        assert_eq!(body, json!({"labels": {"team": "people"}}));
    }

    #[test]
    fn test_endpoint_body_shape() {
        let ep = Endpoint {
            name: "ep-1".into(),
            address: "10.0.0.5".into(),
            port: 443,
            ..Default::default()
        };
        let body = to_wire(&Object::Endpoint(ep)).unwrap();
        assert_eq!(body, json!({"address": "10.0.0.5", "port": 443, "annotations": {}}));
    }

    #[test]
    fn test_from_wire_prefers_uid() {
        let (object, id) = from_wire(
            &ResourcePath::namespace("hr"),
            json!({"name": "projects/p/locations/l/namespaces/hr", "uid": "1234"}),
        )
        .unwrap();
        assert_eq!(object.name(), "hr");
        assert_eq!(id.as_deref(), Some("1234"));
    }

    #[test]
    fn test_from_wire_rejects_bad_port() {
        let result = from_wire(
            &ResourcePath::endpoint("hr", "payroll", "ep"),
            json!({"name": "x", "port": 70000}),
        );
        assert!(result.is_err());
    }
}
