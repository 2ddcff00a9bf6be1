use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use super::{Config, ConfigLoader};
use crate::value::ConfigValue;
use crate::{AssemblyError, AssemblyResult};

/// Holds the process configuration; initialized at most once.
///
/// The assembled [`Config`] is published before the initialization hooks
/// run, so hooks and the threads they start read it through the store.
/// A hook that calls back into `initialize` gets the configuration being
/// initialized. If a hook fails the store is emptied again.
pub struct ConfigStore {
    config: RwLock<Option<Arc<Config>>>,
    init_lock: Mutex<()>,
    initializing: Mutex<Option<ThreadId>>,
}

static GLOBAL: ConfigStore = ConfigStore::new();

impl ConfigStore {
    pub const fn new() -> Self {
        Self {
            config: RwLock::new(None),
            init_lock: Mutex::new(()),
            initializing: Mutex::new(None),
        }
    }

    pub fn global() -> &'static ConfigStore {
        &GLOBAL
    }

    /// First caller wins; later callers get the existing configuration and
    /// their loader is dropped unused.
    pub fn initialize(&self, loader: ConfigLoader) -> AssemblyResult<Arc<Config>> {
        self.init(loader, false)
    }

    /// Like [`initialize`](Self::initialize) but fails if the store is
    /// already initialized.
    pub fn initialize_strict(&self, loader: ConfigLoader) -> AssemblyResult<Arc<Config>> {
        self.init(loader, true)
    }

    fn init(&self, loader: ConfigLoader, strict: bool) -> AssemblyResult<Arc<Config>> {
        // a hook on this thread is calling back in; the init lock is ours
        if self.initializing_here() {
            return self.existing(strict);
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_initialized() {
            return self.existing(strict);
        }

        let config = loader.assemble()?;
        self.publish(Some(config.clone()));
        self.set_initializing(Some(thread::current().id()));
        let hooks = config.initialize_components();
        self.set_initializing(None);

        if let Err(e) = hooks {
            warn!(error = %e, "initialization failed, discarding configuration");
            self.publish(None);
            return Err(e);
        }
        Ok(config)
    }

    fn existing(&self, strict: bool) -> AssemblyResult<Arc<Config>> {
        if strict {
            warn!("configuration was already initialized");
            return Err(AssemblyError::AlreadyInitialized);
        }
        debug!("configuration already initialized, reusing it");
        self.current().ok_or(AssemblyError::NotInitialized)
    }

    fn initializing_here(&self) -> bool {
        *self.initializing.lock().unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }

    fn set_initializing(&self, thread: Option<ThreadId>) {
        *self.initializing.lock().unwrap_or_else(PoisonError::into_inner) = thread;
    }

    fn publish(&self, config: Option<Arc<Config>>) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn current(&self) -> Option<Arc<Config>> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn get(&self, key: &str) -> AssemblyResult<ConfigValue> {
        match self.current() {
            Some(config) => config.get(key).cloned(),
            None => Err(AssemblyError::missing_key(key)),
        }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;

    fn loader(value: i64) -> ConfigLoader {
        ConfigLoader::new(Arc::new(Registry::new()))
            .configure_logging(false)
            .override_value("value", value)
    }

    #[test]
    fn test_uninitialized_get_names_key() {
        let store = ConfigStore::new();
        let err = store.get("model").unwrap_err();
        assert!(err.to_string().contains("'model'"));
        assert!(!store.is_initialized());
    }

    #[test]
    fn test_first_initialize_wins() {
        let store = ConfigStore::new();
        store.initialize(loader(1)).unwrap();
        let second = store.initialize(loader(2)).unwrap();
        assert_eq!(second.get("value").unwrap(), &ConfigValue::Integer(1));
        assert_eq!(store.get("value").unwrap(), ConfigValue::Integer(1));
    }

    #[test]
    fn test_strict_initialize_fails_second_time() {
        let store = ConfigStore::new();
        store.initialize_strict(loader(1)).unwrap();
        let err = store.initialize_strict(loader(2)).unwrap_err();
        assert!(matches!(err, AssemblyError::AlreadyInitialized));
        assert_eq!(store.get("value").unwrap(), ConfigValue::Integer(1));
    }

    #[test]
    fn test_failed_load_leaves_store_empty() {
        let store = ConfigStore::new();
        let bad = loader(1).path("/definitely/not/here.toml");
        assert!(store.initialize(bad).is_err());
        assert!(!store.is_initialized());
        store.initialize(loader(3)).unwrap();
        assert_eq!(store.get("value").unwrap(), ConfigValue::Integer(3));
    }

    struct Hooked {
        store: &'static ConfigStore,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl crate::Component for Hooked {
        fn initialize_component(&self, _config: &Config) -> AssemblyResult<()> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(self.store.get("value")?.as_i64().unwrap_or(-1).to_string());
            let again = self.store.initialize(loader(99))?;
            seen.push(again.get("value")?.as_i64().unwrap_or(-1).to_string());
            let strict = self.store.initialize_strict(loader(99));
            seen.push(format!("strict: {}", strict.is_err()));
            if self.fail {
                return Err(AssemblyError::invalid_value("hook", "refused"));
            }
            Ok(())
        }
    }

    fn hooked_loader(store: &'static ConfigStore, seen: Arc<Mutex<Vec<String>>>, fail: bool) -> ConfigLoader {
        let mut registry = Registry::new();
        registry.module("app").factory("Hooked", move |kwargs| {
            kwargs.finish()?;
            Ok(ConfigValue::component(Hooked {
                store,
                seen: seen.clone(),
                fail,
            }))
        });
        ConfigLoader::new(Arc::new(registry))
            .configure_logging(false)
            .override_value("value", 7)
            .override_value(
                "hooked",
                [("__factory__", ConfigValue::from("app:Hooked"))]
                    .into_iter()
                    .collect::<crate::ConfigMap>(),
            )
    }

    #[test]
    fn test_hook_reads_store_and_reenters() {
        static STORE: ConfigStore = ConfigStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = STORE.initialize(hooked_loader(&STORE, seen.clone(), false)).unwrap();

        assert_eq!(*seen.lock().unwrap(), ["7", "7", "strict: true"]);
        assert!(Arc::ptr_eq(&config, &STORE.current().unwrap()));
        assert_eq!(STORE.get("value").unwrap(), ConfigValue::Integer(7));
    }

    #[test]
    fn test_failed_hook_empties_store() {
        static STORE: ConfigStore = ConfigStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let err = STORE.initialize(hooked_loader(&STORE, seen.clone(), true)).unwrap_err();

        assert!(matches!(err, AssemblyError::Initialization { .. }));
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(!STORE.is_initialized());
        STORE.initialize(loader(3)).unwrap();
        assert_eq!(STORE.get("value").unwrap(), ConfigValue::Integer(3));
    }
}
