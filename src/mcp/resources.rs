//! MCP Resources Support
//!
//! Static resources and resource templates backed by a key/value store
//! (normally the data directory).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mcp::templates::{KeyFormat, NamingOverrides, Resolution, TemplateRoute, UriResolver};
use crate::MAX_RESOURCE_SIZE;

/// A resource exposed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

/// A family of resources addressed by a URI template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    pub uri_template: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

/// Resource contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

/// Result of resources/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
}

/// Result of resources/templates/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResult {
    pub resource_templates: Vec<ResourceTemplate>,
}

/// Result of resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// Storage that backs resource reads.
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Whether an entity is stored under `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Read the entity under `key`; `Ok(None)` when it does not exist.
    async fn read(&self, key: &str) -> Result<Option<String>>;
}

/// Reads keys as paths relative to a root directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
    max_size: u64,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_size: MAX_RESOURCE_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys must be relative and may not climb out of the root.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(Error::Backend(format!("invalid storage key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ResourceBackend for FileBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;

        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if meta.len() > self.max_size {
            return Err(Error::FileTooLarge {
                path: path.display().to_string(),
                size: meta.len(),
            });
        }

        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            // Removed between the metadata check and the read.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// When a static resource shows up in `resources/list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Always,
    /// Listed only while its backing entity exists.
    WhenPresent,
}

#[derive(Debug, Clone)]
struct StaticEntry {
    resource: Resource,
    key: String,
    availability: Availability,
}

/// Resource registry: static resources, templates and the resolver over both.
pub struct ResourceRegistry {
    backend: Arc<dyn ResourceBackend>,
    resolver: UriResolver,
    statics: Vec<StaticEntry>,
    templates: Vec<ResourceTemplate>,
}

impl ResourceRegistry {
    pub fn new(backend: Arc<dyn ResourceBackend>) -> Self {
        Self {
            backend,
            resolver: UriResolver::new(),
            statics: Vec::new(),
            templates: Vec::new(),
        }
    }

    /// Register a static resource stored under `key`.
    pub fn add_static(
        &mut self,
        resource: Resource,
        key: impl Into<String>,
        availability: Availability,
    ) -> Result<()> {
        let key = key.into();
        self.resolver.add_static(&resource.uri, key.clone())?;
        self.statics.push(StaticEntry {
            resource,
            key,
            availability,
        });
        Ok(())
    }

    /// Register a resource template whose instances live under `key_format`.
    pub fn add_template(
        &mut self,
        template: ResourceTemplate,
        key_format: KeyFormat,
        overrides: NamingOverrides,
    ) -> Result<()> {
        let route = TemplateRoute::new(&template.uri_template, key_format)?.with_overrides(overrides);
        self.resolver.add_template(route)?;
        self.templates.push(template);
        Ok(())
    }

    /// Current resources, probing the backend for conditional ones on every call.
    pub async fn list(&self) -> Result<ListResourcesResult> {
        let mut resources = Vec::with_capacity(self.statics.len());

        for entry in &self.statics {
            let listed = match entry.availability {
                Availability::Always => true,
                Availability::WhenPresent => match self.backend.exists(&entry.key).await {
                    Ok(present) => present,
                    Err(e) => {
                        warn!("Probing {} failed, omitting it: {}", entry.resource.uri, e);
                        false
                    }
                },
            };
            if listed {
                resources.push(entry.resource.clone());
            }
        }

        Ok(ListResourcesResult { resources })
    }

    pub fn list_templates(&self) -> ListResourceTemplatesResult {
        ListResourceTemplatesResult {
            resource_templates: self.templates.clone(),
        }
    }

    /// Read a resource by concrete URI.
    ///
    /// An unmatched URI and a matched URI with nothing stored behind it fail
    /// identically.
    pub async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        let Some(resolution) = self.resolver.resolve(uri) else {
            debug!("No resource or template matches {}", uri);
            return Err(Error::ResourceNotFound(uri.to_string()));
        };

        let mime_type = self.mime_type_for(&resolution);
        let Some(text) = self.backend.read(resolution.key()).await? else {
            match &resolution {
                Resolution::Template { identifier, .. } => {
                    debug!("Resolved {} to '{}' but {} is absent", uri, identifier, resolution.key())
                }
                Resolution::Static { .. } => {
                    debug!("Static resource {} has no backing entity", uri)
                }
            }
            return Err(Error::ResourceNotFound(uri.to_string()));
        };

        Ok(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: uri.to_string(),
                mime_type,
                text,
            }],
        })
    }

    fn mime_type_for(&self, resolution: &Resolution) -> String {
        let declared = match resolution {
            Resolution::Static { uri, .. } => self
                .statics
                .iter()
                .find(|e| &e.resource.uri == uri)
                .map(|e| e.resource.mime_type.clone()),
            Resolution::Template { template, .. } => self
                .templates
                .iter()
                .find(|t| &t.uri_template == template)
                .map(|t| t.mime_type.clone()),
        };
        declared.unwrap_or_else(|| "text/plain".to_string())
    }
}
