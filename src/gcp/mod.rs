//! Google Cloud Service Directory adapter
//!
//! # Module Structure
//!
//! - [`auth`] - Access tokens and gcloud defaults
//! - [`http`] - HTTP utilities for REST API calls
//! - [`client`] - Authenticated client and URL builders
//! - [`convert`] - Wire types and model conversion
//! - [`backend`] - [`crate::backend::Backend`] implementation
//!
//! # Example
//!
//! ```ignore
//! use serego::gcp::{ServiceDirectoryBackend, ServiceDirectoryClient};
//! use serego::registry::{RegistryConfig, ServiceRegistry};
//! use std::sync::Arc;
//!
//! async fn example() -> serego::Result<()> {
//!     let client = ServiceDirectoryClient::new("my-project", "us-central1").await?;
//!     let backend = Arc::new(ServiceDirectoryBackend::new(client));
//!     let registry = ServiceRegistry::new(backend, RegistryConfig::default());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod backend;
pub mod client;
pub mod convert;
pub mod http;

pub use backend::ServiceDirectoryBackend;
pub use client::ServiceDirectoryClient;
