use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::value::{Args, Callable, Component, ConfigMap, ConfigValue, Decorator};
use crate::{AssemblyError, AssemblyResult};

type FactoryFn = dyn Fn(Kwargs<'_>) -> AssemblyResult<ConfigValue> + Send + Sync;

/// Constructor registered under a dotted name.
#[derive(Clone)]
pub struct Factory {
    name: Arc<str>,
    func: Arc<FactoryFn>,
}

impl Factory {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(Kwargs<'_>) -> AssemblyResult<ConfigValue> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&self, kwargs: Kwargs<'_>) -> AssemblyResult<ConfigValue> {
        (self.func)(kwargs)
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Symbol {
    Factory(Factory),
    Callable(Callable),
    Decorator(Decorator),
    Value(ConfigValue),
    Namespace(Namespace),
}

impl Symbol {
    pub fn kind(&self) -> &'static str {
        match self {
            Symbol::Factory(_) => "factory",
            Symbol::Callable(_) => "callable",
            Symbol::Decorator(_) => "decorator",
            Symbol::Value(_) => "value",
            Symbol::Namespace(_) => "namespace",
        }
    }
}

/// Named members of a module, possibly nested.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    members: BTreeMap<String, Symbol>,
}

impl Namespace {
    pub fn insert(&mut self, name: &str, symbol: Symbol) -> &mut Self {
        self.members.insert(name.to_string(), symbol);
        self
    }

    pub fn factory<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(Kwargs<'_>) -> AssemblyResult<ConfigValue> + Send + Sync + 'static,
    {
        self.insert(name, Symbol::Factory(Factory::new(name, func)))
    }

    pub fn callable<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(Args) -> AssemblyResult<ConfigValue> + Send + Sync + 'static,
    {
        self.insert(name, Symbol::Callable(Callable::new(name, func)))
    }

    pub fn decorator<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(Callable) -> Callable + Send + Sync + 'static,
    {
        self.insert(name, Symbol::Decorator(Decorator::new(name, func)))
    }

    pub fn value<V: Into<ConfigValue>>(&mut self, name: &str, value: V) -> &mut Self {
        self.insert(name, Symbol::Value(value.into()))
    }

    /// Nested namespace, created on first use.
    pub fn namespace(&mut self, name: &str) -> &mut Namespace {
        let entry = self
            .members
            .entry(name.to_string())
            .or_insert_with(|| Symbol::Namespace(Namespace::default()));
        if !matches!(entry, Symbol::Namespace(_)) {
            *entry = Symbol::Namespace(Namespace::default());
        }
        match entry {
            Symbol::Namespace(ns) => ns,
            _ => unreachable!("entry was just set to a namespace"),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.members.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}

/// Symbol table backing dotted-name resolution.
///
/// Rust has no runtime import, so every factory, callable and decorator a
/// document may reference is registered up front under its module path.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    modules: HashMap<String, Namespace>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `assembler.builtins` module.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register(&mut registry);
        registry
    }

    /// Module namespace for `path`, created on first use.
    pub fn module(&mut self, path: &str) -> &mut Namespace {
        self.modules.entry(path.to_string()).or_default()
    }

    pub fn has_module(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    /// Resolves `module.path:attr.path` or `module.path.attr`.
    pub fn resolve(&self, name: &str) -> AssemblyResult<&Symbol> {
        let (module, attributes) = split_dotted_name(name)?;
        let namespace = self
            .modules
            .get(module)
            .ok_or_else(|| AssemblyError::UnknownModule {
                name: name.to_string(),
                module: module.to_string(),
            })?;

        let mut segments = attributes.split('.');
        let first = segments.next().unwrap_or_default();
        let mut symbol = namespace
            .get(first)
            .ok_or_else(|| missing_attribute(name, first))?;
        for segment in segments {
            symbol = match symbol {
                Symbol::Namespace(ns) => ns.get(segment),
                _ => None,
            }
            .ok_or_else(|| missing_attribute(name, segment))?;
        }
        Ok(symbol)
    }

    pub fn resolve_factory(&self, name: &str) -> AssemblyResult<Factory> {
        match self.resolve(name)? {
            Symbol::Factory(factory) => Ok(factory.clone()),
            // keyword-only call of a plain callable
            Symbol::Callable(callable) => {
                let callable = callable.clone();
                let factory_name = callable.name().to_string();
                Ok(Factory::new(&factory_name, move |kwargs| {
                    callable.call(Args::keywords(kwargs.into_map()))
                }))
            }
            other => Err(unexpected(name, "factory", other)),
        }
    }

    pub fn resolve_callable(&self, name: &str) -> AssemblyResult<Callable> {
        match self.resolve(name)? {
            Symbol::Callable(callable) => Ok(callable.clone()),
            Symbol::Value(ConfigValue::Callable(callable)) => Ok(callable.clone()),
            other => Err(unexpected(name, "callable", other)),
        }
    }

    pub fn resolve_decorator(&self, name: &str) -> AssemblyResult<Decorator> {
        match self.resolve(name)? {
            Symbol::Decorator(decorator) => Ok(decorator.clone()),
            Symbol::Value(ConfigValue::Decorator(decorator)) => Ok(decorator.clone()),
            other => Err(unexpected(name, "decorator", other)),
        }
    }
}

fn split_dotted_name(name: &str) -> AssemblyResult<(&str, &str)> {
    let invalid = |reason: &str| AssemblyError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let (module, attributes) = match name.split_once(':') {
        Some(parts) => parts,
        None => name
            .rsplit_once('.')
            .ok_or_else(|| invalid("expected 'module:attribute' or 'module.attribute'"))?,
    };
    if module.is_empty() {
        return Err(invalid("empty module path"));
    }
    if attributes.is_empty() || attributes.split('.').any(str::is_empty) {
        return Err(invalid("empty attribute segment"));
    }
    Ok((module, attributes))
}

fn missing_attribute(name: &str, segment: &str) -> AssemblyError {
    AssemblyError::MissingAttribute {
        name: name.to_string(),
        segment: segment.to_string(),
    }
}

fn unexpected(name: &str, expected: &'static str, found: &Symbol) -> AssemblyError {
    AssemblyError::UnexpectedSymbol {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}

/// Keyword arguments handed to a factory.
///
/// Accessors remove the key they read; `finish` then rejects whatever the
/// factory did not consume.
pub struct Kwargs<'a> {
    factory: String,
    values: ConfigMap,
    registry: &'a Registry,
}

impl<'a> Kwargs<'a> {
    pub fn new(factory: &str, values: ConfigMap, registry: &'a Registry) -> Self {
        Self {
            factory: factory.to_string(),
            values,
            registry,
        }
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn take(&mut self, key: &str) -> Option<ConfigValue> {
        self.values.remove(key)
    }

    pub fn required(&mut self, key: &str) -> AssemblyResult<ConfigValue> {
        self.take(key).ok_or_else(|| {
            AssemblyError::signature(format!(
                "{}() missing required keyword argument: '{key}'",
                self.factory
            ))
        })
    }

    pub fn take_as<T: DeserializeOwned>(&mut self, key: &str) -> AssemblyResult<Option<T>> {
        match self.take(key) {
            None | Some(ConfigValue::Null) => Ok(None),
            Some(value) => value
                .deserialize()
                .map(Some)
                .map_err(|e| AssemblyError::invalid_value(key, e.to_string())),
        }
    }

    pub fn required_as<T: DeserializeOwned>(&mut self, key: &str) -> AssemblyResult<T> {
        let value = self.required(key)?;
        value
            .deserialize()
            .map_err(|e| AssemblyError::invalid_value(key, e.to_string()))
    }

    pub fn take_component<T: Component>(&mut self, key: &str) -> AssemblyResult<Option<Arc<T>>> {
        match self.take(key) {
            None | Some(ConfigValue::Null) => Ok(None),
            Some(ConfigValue::Component(handle)) => handle.downcast::<T>().map(Some).ok_or_else(|| {
                AssemblyError::invalid_value(
                    key,
                    format!(
                        "component '{}' is not a {}",
                        handle.name(),
                        std::any::type_name::<T>()
                    ),
                )
            }),
            Some(other) => Err(AssemblyError::invalid_value(
                key,
                format!("expected a component, got {}", other.kind()),
            )),
        }
    }

    /// Callable value, or a dotted name resolved through the registry.
    pub fn take_callable(&mut self, key: &str) -> AssemblyResult<Option<Callable>> {
        match self.take(key) {
            None | Some(ConfigValue::Null) => Ok(None),
            Some(ConfigValue::Callable(callable)) => Ok(Some(callable)),
            Some(ConfigValue::String(name)) => self.registry.resolve_callable(&name).map(Some),
            Some(other) => Err(AssemblyError::invalid_value(
                key,
                format!("expected a callable or dotted name, got {}", other.kind()),
            )),
        }
    }

    pub fn finish(self) -> AssemblyResult<()> {
        match self.values.keys().next() {
            None => Ok(()),
            Some(key) => Err(AssemblyError::signature(format!(
                "{}() got an unexpected keyword argument '{key}'",
                self.factory
            ))),
        }
    }

    pub fn into_map(self) -> ConfigMap {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .module("pkg.models")
            .callable("train", |_| Ok(ConfigValue::from("trained")))
            .namespace("Linear")
            .factory("create", |_| Ok(ConfigValue::from("linear")));
        registry
    }

    #[test]
    fn test_resolve_colon_form_walks_attributes() {
        let registry = registry();
        let factory = registry.resolve_factory("pkg.models:Linear.create").unwrap();
        assert_eq!(factory.name(), "create");
    }

    #[test]
    fn test_resolve_dot_form_uses_last_segment() {
        let registry = registry();
        let callable = registry.resolve_callable("pkg.models.train").unwrap();
        assert_eq!(callable.call(Args::new()).unwrap(), ConfigValue::from("trained"));
    }

    #[test]
    fn test_missing_segment_is_named() {
        let registry = registry();
        let err = registry.resolve("pkg.models:Linear.fit").unwrap_err();
        match err {
            AssemblyError::MissingAttribute { segment, .. } => assert_eq!(segment, "fit"),
            other => panic!("unexpected error: {other}"),
        }
        let err = registry.resolve("pkg.models:train.inner").unwrap_err();
        assert!(err.to_string().contains("'inner'"));
    }

    #[test]
    fn test_unknown_module_and_bad_names() {
        let registry = registry();
        assert!(matches!(
            registry.resolve("pkg.other:thing"),
            Err(AssemblyError::UnknownModule { .. })
        ));
        assert!(matches!(
            registry.resolve("nodots"),
            Err(AssemblyError::InvalidName { .. })
        ));
        assert!(matches!(
            registry.resolve("pkg.models:"),
            Err(AssemblyError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_wrong_kind() {
        let registry = registry();
        let err = registry.resolve_decorator("pkg.models:train").unwrap_err();
        assert!(matches!(err, AssemblyError::UnexpectedSymbol { expected: "decorator", .. }));
    }

    #[test]
    fn test_kwargs_finish_rejects_leftovers() {
        let registry = registry();
        let values: ConfigMap = [("path", ConfigValue::from("a.csv")), ("sep", ",".into())]
            .into_iter()
            .collect();
        let mut kwargs = Kwargs::new("Table", values, &registry);
        let path: String = kwargs.required_as("path").unwrap();
        assert_eq!(path, "a.csv");
        let err = kwargs.finish().unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'sep'"));
    }

    #[test]
    fn test_kwargs_take_callable_by_name() {
        let registry = registry();
        let values: ConfigMap = [("func", ConfigValue::from("pkg.models:train"))]
            .into_iter()
            .collect();
        let mut kwargs = Kwargs::new("Partial", values, &registry);
        let func = kwargs.take_callable("func").unwrap().unwrap();
        assert_eq!(func.name(), "train");
    }
}
