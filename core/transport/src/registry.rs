//! Transport registry for dynamic transport resolution.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use url::Url;

use bundlesync_common::{Error, Result};

use crate::transport::Transport;

/// Factory function type for creating transports.
pub type TransportFactory = Box<dyn Fn(Value) -> Result<Arc<dyn Transport>> + Send + Sync>;

/// Registry for transport factories.
///
/// Allows dynamic registration and resolution of transports by name and
/// configuration.
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a transport factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: TransportFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Transport '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a transport by name and configuration.
    ///
    /// # Errors
    /// - Transport not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn Transport>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Transport '{}' is not registered", name)))?;
        factory(config)
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in transports.
pub fn create_default_registry() -> TransportRegistry {
    let mut factories: HashMap<String, TransportFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| -> Result<Arc<dyn Transport>> {
            Ok(Arc::new(crate::memory::MemoryTransport::new()))
        }),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| -> Result<Arc<dyn Transport>> {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local transport requires 'root' path".to_string())
                })?;
            Ok(Arc::new(crate::local::LocalTransport::new(root)?))
        }),
    );

    factories.insert(
        "http".to_string(),
        Box::new(|config| -> Result<Arc<dyn Transport>> {
            let mut transport = crate::http::HttpTransport::new()?;
            if let Some(base) = config.get("base").and_then(|v| v.as_str()) {
                let base = Url::parse(base)
                    .map_err(|e| Error::InvalidInput(format!("Invalid base URL: {}", e)))?;
                transport = transport.with_base(base);
            }
            Ok(Arc::new(transport))
        }),
    );

    TransportRegistry { factories }
}

/// A transport plus the manifest location to request from it.
pub struct Origin {
    pub transport: Arc<dyn Transport>,
    pub manifest_location: String,
}

/// Pick a transport for a user-supplied manifest location.
///
/// `http://` and `https://` URLs use the `http` transport as-is. `file://`
/// URLs and plain paths use the `local` transport rooted at the manifest's
/// directory, with the manifest file name as the location.
pub fn open_origin(registry: &TransportRegistry, location: &str) -> Result<Origin> {
    if let Ok(url) = Url::parse(location) {
        match url.scheme() {
            "http" | "https" => {
                return Ok(Origin {
                    transport: registry.resolve("http", Value::Null)?,
                    manifest_location: location.to_string(),
                });
            }
            "file" => {
                let path = url.to_file_path().map_err(|_| {
                    Error::InvalidInput(format!("Invalid file URL: {}", location))
                })?;
                return open_local(registry, &path);
            }
            // Anything else (including Windows drive letters) is a path.
            _ => {}
        }
    }
    open_local(registry, Path::new(location))
}

fn open_local(registry: &TransportRegistry, path: &Path) -> Result<Origin> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("Not a manifest file: {}", path.display())))?;
    let root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let config = serde_json::json!({ "root": root.to_string_lossy() });
    Ok(Origin {
        transport: registry.resolve("local", config)?,
        manifest_location: file_name.to_string(),
    })
}
