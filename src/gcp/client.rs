//! Service Directory client
//!
//! Combines authentication and HTTP, and builds the v1 REST URLs for one
//! project and location.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use crate::backend::Collection;
use crate::error::Result;
use crate::model::ResourcePath;
use anyhow::Context;
use serde_json::Value;
use url::Url;

/// Production endpoint of the Service Directory API
pub const DEFAULT_BASE_URL: &str = "https://servicedirectory.googleapis.com/v1";

#[derive(Clone)]
pub struct ServiceDirectoryClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub location: String,
    base_url: String,
}

impl ServiceDirectoryClient {
    /// Client using Application Default Credentials
    pub async fn new(project_id: &str, location: &str) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_credentials(credentials, project_id, location)
    }

    pub fn with_credentials(
        credentials: GcpCredentials,
        project_id: &str,
        location: &str,
    ) -> Result<Self> {
        Ok(Self {
            credentials,
            http: GcpHttpClient::new()?,
            project_id: project_id.to_string(),
            location: location.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at another API root (emulators, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        self.http.get(url, &token).await
    }

    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        self.http.post(url, &token, body).await
    }

    pub async fn patch(&self, url: &str, body: &Value) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        self.http.patch(url, &token, body).await
    }

    pub async fn delete(&self, url: &str) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        self.http.delete(url, &token).await
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// `projects/{p}/locations/{l}` under the API root
    pub fn location_url(&self) -> String {
        format!(
            "{}/projects/{}/locations/{}",
            self.base_url,
            urlencoding::encode(&self.project_id),
            urlencoding::encode(&self.location)
        )
    }

    /// Resource name as the API spells it
    pub fn resource_name(&self, path: &ResourcePath) -> String {
        format!(
            "projects/{}/locations/{}{}",
            self.project_id, self.location, path
        )
    }

    /// URL of a single resource
    pub fn resource_url(&self, path: &ResourcePath) -> String {
        match path {
            ResourcePath::Namespace { namespace } => {
                format!("{}/namespaces/{}", self.location_url(), urlencoding::encode(namespace))
            }
            ResourcePath::Service { namespace, service } => format!(
                "{}/namespaces/{}/services/{}",
                self.location_url(),
                urlencoding::encode(namespace),
                urlencoding::encode(service)
            ),
            ResourcePath::Endpoint {
                namespace,
                service,
                endpoint,
            } => format!(
                "{}/namespaces/{}/services/{}/endpoints/{}",
                self.location_url(),
                urlencoding::encode(namespace),
                urlencoding::encode(service),
                urlencoding::encode(endpoint)
            ),
        }
    }

    /// URL of a collection
    pub fn collection_url(&self, collection: &Collection) -> String {
        match collection.parent() {
            None => format!("{}/namespaces", self.location_url()),
            Some(parent @ ResourcePath::Namespace { .. }) => {
                format!("{}/services", self.resource_url(&parent))
            }
            Some(parent) => format!("{}/endpoints", self.resource_url(&parent)),
        }
    }

    /// Append query parameters to `base`
    pub fn with_query<'a, I>(base: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut url = Url::parse(base).with_context(|| format!("Invalid URL: {}", base))?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCATION: &str = "projects/my-project/locations/us-central1";

    fn client() -> ServiceDirectoryClient {
        ServiceDirectoryClient::with_credentials(
            GcpCredentials::from_static_token("t"),
            "my-project",
            "us-central1",
        )
        .unwrap()
    }

    #[test]
    fn test_resource_urls() {
        let client = client();
        assert_eq!(
            client.resource_url(&ResourcePath::service("hr", "payroll")),
            format!("{}/{}/namespaces/hr/services/payroll", DEFAULT_BASE_URL, LOCATION)
        );
        assert_eq!(
            client.collection_url(&Collection::Endpoints {
                namespace: "hr".into(),
                service: "payroll".into()
            }),
            format!("{}/{}/namespaces/hr/services/payroll/endpoints", DEFAULT_BASE_URL, LOCATION)
        );
    }

    #[test]
    fn test_resource_name() {
        assert_eq!(
            client().resource_name(&ResourcePath::namespace("hr")),
            format!("{}/namespaces/hr", LOCATION)
        );
    }

    #[test]
    fn test_base_url_override_and_query() {
        let client = client().with_base_url("http://127.0.0.1:9000/v1/");
        let url = ServiceDirectoryClient::with_query(
            &client.collection_url(&Collection::Namespaces),
            [("pageSize", "2"), ("filter", "labels.team=\"hr\"")],
        )
        .unwrap();
        assert_eq!(
            url,
            format!(
                "http://127.0.0.1:9000/v1/{}/namespaces?pageSize=2&filter=labels.team%3D%22hr%22",
                LOCATION
            )
        );
    }
}
