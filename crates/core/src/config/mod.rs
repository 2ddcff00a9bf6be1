//! 配置管理
//!
//! 配置文档在进程启动时加载一次，装配后成为不可变的 [`Config`] 上下文对象。
//!
//! - **loader**: 读取 TOML/JSON 文档，注入 `${here}` / `${env:NAME}` 上下文绑定，合并覆盖项并装配组件
//! - **store**: 进程级 [`ConfigStore`]，保证只初始化一次
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use assembler_core::{ConfigLoader, ConfigStore, Registry};
//!
//! let registry = Arc::new(Registry::with_builtins());
//! let config = ConfigStore::global()
//!     .initialize(ConfigLoader::from_env(registry).override_value("__mode__", "serve"))
//!     .expect("configuration");
//! let name: String = config.get_as("service_name").expect("service_name");
//! ```

mod loader;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::resolver::Registry;
use crate::value::{Component, ComponentRef, ConfigMap, ConfigValue};
use crate::{AssemblyError, AssemblyResult};

pub use loader::{interpolate, read_document, ConfigLoader, CONFIG_ENV};
pub use store::ConfigStore;

/// Fully resolved configuration.
pub struct Config {
    values: ConfigMap,
    registry: Arc<Registry>,
    root_dir: Option<PathBuf>,
    created: Vec<ConfigValue>,
}

impl Config {
    pub(crate) fn new(
        values: ConfigMap,
        registry: Arc<Registry>,
        root_dir: Option<PathBuf>,
        created: Vec<ConfigValue>,
    ) -> Self {
        Self {
            values,
            registry,
            root_dir,
            created,
        }
    }

    /// Value under `key`, or a missing-key error with remediation text.
    pub fn get(&self, key: &str) -> AssemblyResult<&ConfigValue> {
        self.values
            .get(key)
            .ok_or_else(|| AssemblyError::missing_key(key))
    }

    pub fn get_opt(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> AssemblyResult<T> {
        self.get(key)?
            .deserialize()
            .map_err(|e| AssemblyError::invalid_value(key, e.to_string()))
    }

    pub fn component<T: Component>(&self, key: &str) -> AssemblyResult<Arc<T>> {
        let value = self.get(key)?;
        value
            .as_component()
            .and_then(ComponentRef::downcast::<T>)
            .ok_or_else(|| {
                AssemblyError::invalid_value(
                    key,
                    format!("expected component {}, got {:?}", std::any::type_name::<T>(), value),
                )
            })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys()
    }

    pub fn values(&self) -> &ConfigMap {
        &self.values
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Directory of the first loaded document.
    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }

    /// Everything the assembler constructed, in construction order.
    pub fn created(&self) -> &[ConfigValue] {
        &self.created
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentRef> {
        self.created.iter().filter_map(ConfigValue::as_component)
    }

    /// Runs each component's hook once, in construction order; the first
    /// failure aborts.
    pub(crate) fn initialize_components(&self) -> AssemblyResult<()> {
        for component in self.components() {
            debug!(component = component.name(), "initializing component");
            component
                .initialize(self)
                .map_err(|source| AssemblyError::Initialization {
                    component: component.name().to_string(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("values", &self.values)
            .field("root_dir", &self.root_dir)
            .field("created", &self.created.len())
            .finish()
    }
}

/// Where injectors and decorator chains read configuration from.
#[derive(Debug, Clone, Default)]
pub enum ConfigSource {
    /// The process-wide [`ConfigStore`], read at call time.
    #[default]
    Global,
    Fixed(Arc<Config>),
}

impl ConfigSource {
    pub fn current(&self) -> Option<Arc<Config>> {
        match self {
            ConfigSource::Global => ConfigStore::global().current(),
            ConfigSource::Fixed(config) => Some(config.clone()),
        }
    }
}
