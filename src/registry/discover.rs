use super::{HandlerCatalog, HandlerRegistry, ServiceContext};
use crate::error::RegistryError;
use crate::handler::{Handler, HandlerConfig};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DESCRIPTOR_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// A handler descriptor found in the tree.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub routing_path: String,
    pub file: PathBuf,
    pub config: HandlerConfig,
}

/// Parse one descriptor file. An empty file declares nothing.
pub fn load_descriptor(path: &Path) -> Result<HandlerConfig, RegistryError> {
    let content = fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(HandlerConfig::default());
    }

    let descriptor_error = |message: String| RegistryError::Descriptor {
        path: path.to_path_buf(),
        message,
    };
    let value: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| descriptor_error(e.to_string()))?,
        _ => serde_yaml::from_str(&content).map_err(|e| descriptor_error(e.to_string()))?,
    };
    if value.is_null() {
        return Ok(HandlerConfig::default());
    }
    serde_json::from_value(value).map_err(|e| descriptor_error(e.to_string()))
}

/// Walk `root` depth-first and parse every descriptor.
///
/// Each directory adds a `name/` segment; each descriptor file contributes its
/// stem. Entries are visited in file-name order.
pub fn discover_descriptors(root: &Path) -> Result<Vec<Descriptor>, RegistryError> {
    let mut found = BTreeMap::new();
    walk(root, "", &mut found)?;
    Ok(found.into_values().collect())
}

fn walk(
    dir: &Path,
    prefix: &str,
    found: &mut BTreeMap<String, Descriptor>,
) -> Result<(), RegistryError> {
    let io_error = |source| RegistryError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(io_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error)?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type().map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;
        if file_type.is_dir() {
            walk(&path, &format!("{prefix}{name}/"), found)?;
            continue;
        }

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !DESCRIPTOR_EXTENSIONS.contains(&extension) {
            debug!(file = %path.display(), "Skipping non-descriptor file");
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let routing_path = format!("{prefix}{stem}");
        if let Some(existing) = found.get(&routing_path) {
            return Err(RegistryError::Descriptor {
                path,
                message: format!(
                    "routing path '{}' already declared by {}",
                    routing_path,
                    existing.file.display()
                ),
            });
        }

        let config = load_descriptor(&path)?;
        found.insert(
            routing_path.clone(),
            Descriptor {
                routing_path,
                file: path,
                config,
            },
        );
    }
    Ok(())
}

/// Bind one descriptor to its factory.
pub fn load<S>(
    descriptor: &Descriptor,
    catalog: &HandlerCatalog<S>,
    context: &ServiceContext<S>,
) -> Result<Handler, RegistryError> {
    let factory = catalog
        .get(&descriptor.routing_path)
        .ok_or_else(|| RegistryError::MissingFactory {
            routing_path: descriptor.routing_path.clone(),
        })?;
    let call = factory(context);
    Handler::bind(&descriptor.routing_path, descriptor.config.clone(), call)
}

/// Build the registry from the descriptor tree at `root`.
pub fn discover<S>(
    root: &Path,
    catalog: &HandlerCatalog<S>,
    context: &ServiceContext<S>,
) -> Result<HandlerRegistry, RegistryError> {
    let descriptors = discover_descriptors(root)?;

    let mut handlers = Vec::with_capacity(descriptors.len());
    for descriptor in &descriptors {
        let handler = load(descriptor, catalog, context)?;
        debug!(
            routing_path = %descriptor.routing_path,
            file = %descriptor.file.display(),
            "Handler bound"
        );
        handlers.push(handler);
    }

    for path in catalog.paths() {
        if !descriptors.iter().any(|d| d.routing_path == path) {
            warn!(routing_path = %path, "Handler factory has no descriptor; ignored");
        }
    }

    info!(
        root = %root.display(),
        handlers = handlers.len(),
        "Handler registry built"
    );
    Ok(HandlerRegistry::from_handlers(handlers))
}
