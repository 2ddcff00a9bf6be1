use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::{AssemblyError, AssemblyResult};

/// Key marking a mapping as a component specification.
pub const FACTORY_KEY: &str = "__factory__";

/// A node of a configuration document.
///
/// Plain data comes from the loaded documents; `Component`, `Callable` and
/// `Decorator` are live values that only appear after assembly or when a
/// host passes them in as overrides.
#[derive(Clone, Default)]
pub enum ConfigValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
    Map(ConfigMap),
    Component(ComponentRef),
    Callable(Callable),
    Decorator(Decorator),
}

impl ConfigValue {
    pub fn component<T: Component>(component: T) -> Self {
        ConfigValue::Component(ComponentRef::new(component))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::String(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "map",
            ConfigValue::Component(_) => "component",
            ConfigValue::Callable(_) => "callable",
            ConfigValue::Decorator(_) => "decorator",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(i) => Some(*i as f64),
            ConfigValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            ConfigValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_component(&self) -> Option<&ComponentRef> {
        match self {
            ConfigValue::Component(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            ConfigValue::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Mapping carrying a `__factory__` key.
    pub fn is_component_spec(&self) -> bool {
        matches!(self, ConfigValue::Map(map) if map.contains_key(FACTORY_KEY))
    }

    /// Plain-data view of this value. Fails on live values.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        Some(match self {
            ConfigValue::Null => Value::Null,
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Integer(i) => Value::from(*i),
            ConfigValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ConfigValue::String(s) => Value::String(s.clone()),
            ConfigValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(ConfigValue::to_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            ConfigValue::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map.iter() {
                    object.insert(key.to_string(), value.to_json()?);
                }
                Value::Object(object)
            }
            ConfigValue::Component(_) | ConfigValue::Callable(_) | ConfigValue::Decorator(_) => {
                return None
            }
        })
    }

    /// Deserialize a plain-data value into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> AssemblyResult<T> {
        let json = self.to_json().ok_or_else(|| {
            AssemblyError::invalid_value(self.kind(), "live values cannot be deserialized")
        })?;
        serde_json::from_value(json).map_err(|e| AssemblyError::invalid_value(self.kind(), e.to_string()))
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ConfigValue::Null,
            Value::Bool(b) => ConfigValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Integer(i),
                None => ConfigValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ConfigValue::String(s),
            Value::Array(items) => ConfigValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(object) => ConfigValue::Map(
                object
                    .into_iter()
                    .map(|(key, value)| (key, ConfigValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Integer(value.into())
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(value: Vec<ConfigValue>) -> Self {
        ConfigValue::List(value)
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(value: ConfigMap) -> Self {
        ConfigValue::Map(value)
    }
}

impl From<Callable> for ConfigValue {
    fn from(value: Callable) -> Self {
        ConfigValue::Callable(value)
    }
}

impl From<Decorator> for ConfigValue {
    fn from(value: Decorator) -> Self {
        ConfigValue::Decorator(value)
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Null => write!(f, "Null"),
            ConfigValue::Bool(b) => write!(f, "{b:?}"),
            ConfigValue::Integer(i) => write!(f, "{i:?}"),
            ConfigValue::Float(x) => write!(f, "{x:?}"),
            ConfigValue::String(s) => write!(f, "{s:?}"),
            ConfigValue::List(items) => f.debug_list().entries(items).finish(),
            ConfigValue::Map(map) => fmt::Debug::fmt(map, f),
            ConfigValue::Component(c) => write!(f, "<component {}>", c.name()),
            ConfigValue::Callable(c) => write!(f, "<callable {}>", c.name()),
            ConfigValue::Decorator(d) => write!(f, "<decorator {}>", d.name()),
        }
    }
}

/// Structural equality for data; live values compare by identity.
impl PartialEq for ConfigValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConfigValue::Null, ConfigValue::Null) => true,
            (ConfigValue::Bool(a), ConfigValue::Bool(b)) => a == b,
            (ConfigValue::Integer(a), ConfigValue::Integer(b)) => a == b,
            (ConfigValue::Float(a), ConfigValue::Float(b)) => a == b,
            (ConfigValue::String(a), ConfigValue::String(b)) => a == b,
            (ConfigValue::List(a), ConfigValue::List(b)) => a == b,
            (ConfigValue::Map(a), ConfigValue::Map(b)) => a == b,
            (ConfigValue::Component(a), ConfigValue::Component(b)) => a.ptr_eq(b),
            (ConfigValue::Callable(a), ConfigValue::Callable(b)) => Arc::ptr_eq(&a.func, &b.func),
            (ConfigValue::Decorator(a), ConfigValue::Decorator(b)) => Arc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }
}

/// Insertion-ordered string map.
#[derive(Clone, Default, PartialEq)]
pub struct ConfigMap {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Inserts or replaces; a replaced key keeps its position.
    pub fn insert<K: Into<String>, V: Into<ConfigValue>>(
        &mut self,
        key: K,
        value: V,
    ) -> Option<ConfigValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Top-level merge: every key of `other` overrides this map.
    pub fn merge(&mut self, other: ConfigMap) {
        for (key, value) in other {
            self.insert(key, value);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for ConfigMap {
    type Item = (String, ConfigValue);
    type IntoIter = std::vec::IntoIter<(String, ConfigValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ConfigMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl fmt::Debug for ConfigMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

/// A live object produced by a factory.
pub trait Component: Send + Sync + 'static {
    /// Name used in diagnostics.
    fn component_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Deferred setup, called once after the whole document is resolved.
    fn initialize_component(&self, _config: &Config) -> AssemblyResult<()> {
        Ok(())
    }
}

/// Shared handle to a component that keeps its concrete type recoverable.
#[derive(Clone)]
pub struct ComponentRef {
    component: Arc<dyn Component>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ComponentRef {
    pub fn new<T: Component>(component: T) -> Self {
        Self::from_arc(Arc::new(component))
    }

    pub fn from_arc<T: Component>(component: Arc<T>) -> Self {
        Self {
            any: component.clone(),
            component,
        }
    }

    pub fn name(&self) -> &str {
        self.component.component_name()
    }

    pub fn downcast<T: Component>(&self) -> Option<Arc<T>> {
        self.any.clone().downcast::<T>().ok()
    }

    pub fn is<T: Component>(&self) -> bool {
        self.any.is::<T>()
    }

    pub fn initialize(&self, config: &Config) -> AssemblyResult<()> {
        self.component.initialize_component(config)
    }

    pub fn ptr_eq(&self, other: &ComponentRef) -> bool {
        Arc::ptr_eq(&self.any, &other.any)
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef").field("name", &self.name()).finish()
    }
}

/// Call arguments: positional values and keyword values.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<ConfigValue>,
    pub keyword: ConfigMap,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keywords(keyword: ConfigMap) -> Self {
        Self {
            positional: Vec::new(),
            keyword,
        }
    }

    pub fn arg<V: Into<ConfigValue>>(mut self, value: V) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg<K: Into<String>, V: Into<ConfigValue>>(mut self, key: K, value: V) -> Self {
        self.keyword.insert(key, value);
        self
    }
}

type CallFn = dyn Fn(Args) -> AssemblyResult<ConfigValue> + Send + Sync;

/// A named function value.
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    doc: Option<Arc<str>>,
    func: Arc<CallFn>,
}

impl Callable {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(Args) -> AssemblyResult<ConfigValue> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            doc: None,
            func: Arc::new(func),
        }
    }

    pub fn with_doc(mut self, doc: &str) -> Self {
        self.doc = Some(Arc::from(doc));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn call(&self, args: Args) -> AssemblyResult<ConfigValue> {
        (self.func)(args)
    }

    /// Copies the name and doc of `original` onto this callable.
    pub fn wraps(mut self, original: &Callable) -> Self {
        self.name = original.name.clone();
        self.doc = original.doc.clone();
        self
    }

    pub fn same_function(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").field("name", &self.name).finish()
    }
}

type DecorateFn = dyn Fn(Callable) -> Callable + Send + Sync;

/// A function transformer applied by decorator chains.
#[derive(Clone)]
pub struct Decorator {
    name: Arc<str>,
    func: Arc<DecorateFn>,
}

impl Decorator {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(Callable) -> Callable + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, func: Callable) -> Callable {
        (self.func)(func)
    }
}

impl fmt::Debug for Decorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decorator").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Probe(u32);
    impl Component for Probe {}

    #[test]
    fn test_map_keeps_insertion_order_on_replace() {
        let mut map = ConfigMap::new();
        map.insert("b", 1);
        map.insert("a", 2);
        map.insert("b", 3);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.get("b"), Some(&ConfigValue::Integer(3)));
    }

    #[test]
    fn test_json_conversion_preserves_order() {
        let value = ConfigValue::from(json!({"z": 1, "a": [true, 1.5, "x"], "m": {"k": null}}));
        let map = value.as_map().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        assert_eq!(value.to_json().unwrap(), json!({"z": 1, "a": [true, 1.5, "x"], "m": {"k": null}}));
    }

    #[test]
    fn test_live_values_have_no_json_form() {
        let value = ConfigValue::List(vec![ConfigValue::component(Probe(1))]);
        assert!(value.to_json().is_none());
        assert!(value.deserialize::<Vec<u32>>().is_err());
    }

    #[test]
    fn test_component_downcast() {
        let value = ConfigValue::component(Probe(7));
        let handle = value.as_component().unwrap();
        assert!(handle.is::<Probe>());
        assert_eq!(handle.downcast::<Probe>().unwrap().0, 7);
        assert!(handle.name().ends_with("Probe"));
    }

    #[test]
    fn test_callable_wraps_copies_identity() {
        let original = Callable::new("predict", |_| Ok(ConfigValue::Null)).with_doc("Predicts.");
        let wrapper = Callable::new("wrapper", |_| Ok(ConfigValue::Integer(1))).wraps(&original);
        assert_eq!(wrapper.name(), "predict");
        assert_eq!(wrapper.doc(), Some("Predicts."));
        assert!(!wrapper.same_function(&original));
    }
}
