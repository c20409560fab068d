//! Host collaborator snapshot.
//!
//! The known-type registry, default-property lookup and template registry are
//! owned by the host runtime. Discovery receives them as one immutable
//! `HostContext` at call time instead of reading ambient global state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{CatalogError, TypeCatalog, TypeDecl, TypeId};

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("known type '{tag}' maps to unregistered type '{type_name}'")]
    UnknownKnownType { tag: String, type_name: String },
    #[error("failed to read host manifest {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid host manifest: {0}")]
    Json(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEntry {
    pub name: String,
    pub markup: String,
    #[serde(default)]
    pub templated_control: Option<String>,
}

/// Source of template markup registered with the host, one entry per template.
pub trait TemplateRegistry: Send + Sync {
    fn entries(&self) -> Vec<TemplateEntry>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplates {
    entries: Vec<TemplateEntry>,
}

impl InMemoryTemplates {
    pub fn new(entries: Vec<TemplateEntry>) -> Self {
        Self { entries }
    }
}

impl TemplateRegistry for InMemoryTemplates {
    fn entries(&self) -> Vec<TemplateEntry> {
        self.entries.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST MANIFEST
// ═══════════════════════════════════════════════════════════════════════════════

/// Serialized form of a host snapshot, as exported by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostManifest {
    #[serde(default)]
    pub runtime_version: String,
    pub types: Vec<TypeDecl>,
    #[serde(default)]
    pub known_types: HashMap<String, String>,
    #[serde(default)]
    pub default_properties: HashMap<String, String>,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct HostContext {
    catalog: Arc<TypeCatalog>,
    known_types: HashMap<String, TypeId>,
    default_properties: HashMap<TypeId, String>,
    runtime_version: String,
    templates: Arc<dyn TemplateRegistry>,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("types", &self.catalog.len())
            .field("known_types", &self.known_types.len())
            .field("runtime_version", &self.runtime_version)
            .finish()
    }
}

impl HostContext {
    pub fn new(catalog: TypeCatalog, runtime_version: &str) -> Self {
        Self {
            catalog: Arc::new(catalog),
            known_types: HashMap::new(),
            default_properties: HashMap::new(),
            runtime_version: runtime_version.to_string(),
            templates: Arc::new(InMemoryTemplates::default()),
        }
    }

    pub fn from_manifest(manifest: HostManifest) -> Result<Self, HostError> {
        let catalog = TypeCatalog::from_decls(manifest.types)?;
        let mut host = HostContext::new(catalog, &manifest.runtime_version);
        for (tag, type_name) in manifest.known_types {
            host = host.with_known_type(&tag, &type_name)?;
        }
        for (type_name, property) in manifest.default_properties {
            host = host.with_default_property(&type_name, &property)?;
        }
        Ok(host.with_templates(Arc::new(InMemoryTemplates::new(manifest.templates))))
    }

    pub fn from_json(json: &str) -> Result<Self, HostError> {
        Self::from_manifest(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, HostError> {
        let json = fs::read_to_string(path).map_err(|source| HostError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn with_known_type(mut self, tag: &str, type_name: &str) -> Result<Self, HostError> {
        let id = self
            .catalog
            .lookup(type_name)
            .ok_or_else(|| HostError::UnknownKnownType {
                tag: tag.to_string(),
                type_name: type_name.to_string(),
            })?;
        self.known_types.insert(tag.to_string(), id);
        Ok(self)
    }

    pub fn with_default_property(mut self, type_name: &str, property: &str) -> Result<Self, HostError> {
        let id = self
            .catalog
            .lookup(type_name)
            .ok_or_else(|| HostError::UnknownKnownType {
                tag: property.to_string(),
                type_name: type_name.to_string(),
            })?;
        self.default_properties.insert(id, property.to_string());
        Ok(self)
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateRegistry>) -> Self {
        self.templates = templates;
        self
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn shared_catalog(&self) -> Arc<TypeCatalog> {
        Arc::clone(&self.catalog)
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn templates(&self) -> &dyn TemplateRegistry {
        self.templates.as_ref()
    }

    pub fn known_type(&self, tag: &str) -> Option<TypeId> {
        self.known_types.get(tag).copied()
    }

    /// Default bindable property of a type, inherited through its bases.
    pub fn default_property(&self, id: TypeId) -> Option<&str> {
        self.catalog
            .base_chain(id)
            .into_iter()
            .find_map(|t| self.default_properties.get(&t))
            .map(String::as_str)
    }
}
