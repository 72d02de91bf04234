//! Resource descriptors and the server-side registry of static resources.
//!
//! Resources complement tools:
//! - **Tools**: model-controlled actions with arguments
//! - **Resources**: read-only content addressed by URI, no arguments
//!
//! # Example
//!
//! ```rust
//! use toolbridge::resource_protocol::{ResourceDescriptor, ResourceRegistry};
//!
//! let mut resources = ResourceRegistry::new();
//! resources
//!     .register(
//!         ResourceDescriptor::new("resource://weather_info", "About the weather data"),
//!         "This server provides weather data for demonstration purposes.",
//!     )
//!     .unwrap();
//! assert_eq!(resources.list().len(), 1);
//! ```

use serde::{Deserialize, Serialize};

/// Metadata describing a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Unique resource identifier, e.g. "resource://weather_info"
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceDescriptor {
    /// Create a new resource with URI and description. The name defaults to the URI's last
    /// path segment.
    pub fn new(uri: impl Into<String>, description: impl Into<String>) -> Self {
        let uri = uri.into();
        let name = uri.rsplit('/').next().unwrap_or(&uri).to_string();
        Self {
            uri,
            name,
            description: description.into(),
            mime_type: None,
        }
    }

    /// Set the MIME type for this resource
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// A text block returned by `resources/read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

/// Owns the static resources a server advertises.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: Vec<(ResourceDescriptor, String)>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource. Fails if the URI is already taken.
    pub fn register(
        &mut self,
        descriptor: ResourceDescriptor,
        text: impl Into<String>,
    ) -> Result<(), ResourceError> {
        if self.entries.iter().any(|(d, _)| d.uri == descriptor.uri) {
            return Err(ResourceError::Duplicate(descriptor.uri));
        }
        self.entries.push((descriptor, text.into()));
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<ResourceDescriptor> {
        self.entries.iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn read(&self, uri: &str) -> Result<Vec<ResourceContents>, ResourceError> {
        self.entries
            .iter()
            .find(|(d, _)| d.uri == uri)
            .map(|(d, text)| {
                vec![ResourceContents {
                    uri: d.uri.clone(),
                    mime_type: d.mime_type.clone(),
                    text: text.clone(),
                }]
            })
            .ok_or_else(|| ResourceError::NotFound(uri.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Error types for resource operations
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// Requested resource is not available
    NotFound(String),
    /// A resource with this URI is already registered
    Duplicate(String),
}

impl std::fmt::Display for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceError::NotFound(uri) => write!(f, "Resource not found: {}", uri),
            ResourceError::Duplicate(uri) => write!(f, "Resource already registered: {}", uri),
        }
    }
}

impl std::error::Error for ResourceError {}
