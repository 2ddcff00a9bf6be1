//! 参数注入
//!
//! [`ArgInjector`] 按声明的参数名从配置中补齐调用方没有提供的参数，
//! 然后按签名校验调用；校验失败时错误信息附带配置加载提示。

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::trace;

use crate::config::{Config, ConfigSource};
use crate::value::{Args, Callable, Component, ConfigMap, ConfigValue};
use crate::{AssemblyError, AssemblyResult};

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<ConfigValue>,
}

/// Declared parameters of an injectable function, in order.
#[derive(Debug, Clone)]
pub struct Signature {
    name: String,
    params: Vec<Param>,
    var_keyword: bool,
}

impl Signature {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            var_keyword: false,
        }
    }

    pub fn required(mut self, name: &str) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            default: None,
        });
        self
    }

    pub fn optional<V: Into<ConfigValue>>(mut self, name: &str, default: V) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            default: Some(default.into()),
        });
        self
    }

    /// Accept keyword arguments beyond the declared parameters.
    pub fn var_keyword(mut self) -> Self {
        self.var_keyword = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn accepts(&self, key: &str) -> bool {
        self.var_keyword || self.params.iter().any(|p| p.name == key)
    }

    /// Keeps only the entries of `kwargs` this signature declares.
    pub fn select(&self, kwargs: &ConfigMap) -> ConfigMap {
        self.params
            .iter()
            .filter_map(|p| kwargs.get(&p.name).map(|v| (p.name.clone(), v.clone())))
            .collect()
    }

    /// Matches a call against the declared parameters.
    pub fn bind(&self, args: Args) -> AssemblyResult<BoundArgs> {
        let Args {
            positional,
            mut keyword,
        } = args;

        if positional.len() > self.params.len() {
            return Err(AssemblyError::signature(format!(
                "{}() takes {} positional argument{} but {} {} given",
                self.name,
                self.params.len(),
                plural(self.params.len()),
                positional.len(),
                if positional.len() == 1 { "was" } else { "were" },
            )));
        }

        let mut values = ConfigMap::with_capacity(self.params.len());
        for (param, value) in self.params.iter().zip(positional) {
            if keyword.contains_key(&param.name) {
                return Err(AssemblyError::signature(format!(
                    "{}() got multiple values for argument '{}'",
                    self.name, param.name
                )));
            }
            values.insert(param.name.clone(), value);
        }

        let mut missing = Vec::new();
        for param in &self.params {
            if values.contains_key(&param.name) {
                continue;
            }
            match (keyword.remove(&param.name), &param.default) {
                (Some(value), _) => {
                    values.insert(param.name.clone(), value);
                }
                (None, Some(default)) => {
                    values.insert(param.name.clone(), default.clone());
                }
                (None, None) => missing.push(param.name.as_str()),
            }
        }

        if !missing.is_empty() {
            return Err(AssemblyError::signature(format!(
                "{}() missing {} required argument{}: {}",
                self.name,
                missing.len(),
                plural(missing.len()),
                quoted_list(&missing),
            )));
        }

        if !self.var_keyword {
            if let Some(unexpected) = keyword.keys().next() {
                return Err(AssemblyError::signature(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    self.name, unexpected
                )));
            }
        }

        Ok(BoundArgs {
            function: self.name.clone(),
            values,
            extra: keyword,
        })
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn quoted_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
        _ => quoted.concat(),
    }
}

/// Arguments after binding, addressable by parameter name.
#[derive(Debug, Clone)]
pub struct BoundArgs {
    function: String,
    values: ConfigMap,
    extra: ConfigMap,
}

impl BoundArgs {
    pub fn get(&self, name: &str) -> AssemblyResult<&ConfigValue> {
        self.values
            .get(name)
            .or_else(|| self.extra.get(name))
            .ok_or_else(|| {
                AssemblyError::signature(format!("{}() has no argument '{}'", self.function, name))
            })
    }

    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> AssemblyResult<T> {
        self.get(name)?
            .deserialize()
            .map_err(|e| AssemblyError::invalid_value(name, e.to_string()))
    }

    pub fn component<T: Component>(&self, name: &str) -> AssemblyResult<Arc<T>> {
        let value = self.get(name)?;
        value
            .as_component()
            .and_then(|c| c.downcast::<T>())
            .ok_or_else(|| {
                AssemblyError::invalid_value(
                    name,
                    format!("expected component {}, got {}", std::any::type_name::<T>(), value.kind()),
                )
            })
    }

    pub fn callable(&self, name: &str) -> AssemblyResult<Callable> {
        let value = self.get(name)?;
        value
            .as_callable()
            .cloned()
            .ok_or_else(|| {
                AssemblyError::invalid_value(name, format!("expected a callable, got {}", value.kind()))
            })
    }

    /// Keyword arguments beyond the declared parameters.
    pub fn extra(&self) -> &ConfigMap {
        &self.extra
    }

    pub fn into_map(self) -> ConfigMap {
        let mut map = self.values;
        map.merge(self.extra);
        map
    }
}

type BoundFn = dyn Fn(BoundArgs) -> AssemblyResult<ConfigValue> + Send + Sync;

/// A function whose missing arguments are filled from configuration.
#[derive(Clone)]
pub struct ArgInjector {
    signature: Arc<Signature>,
    func: Arc<BoundFn>,
    source: ConfigSource,
}

/// Wraps `func` so parameters the caller leaves out are looked up by name
/// in the global configuration.
pub fn args_from_config<F>(signature: Signature, func: F) -> ArgInjector
where
    F: Fn(BoundArgs) -> AssemblyResult<ConfigValue> + Send + Sync + 'static,
{
    ArgInjector {
        signature: Arc::new(signature),
        func: Arc::new(func),
        source: ConfigSource::Global,
    }
}

impl ArgInjector {
    /// Reads from `config` instead of the global store.
    pub fn with_config(mut self, config: Arc<Config>) -> Self {
        self.source = ConfigSource::Fixed(config);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Fills every parameter not given positionally or by keyword from
    /// configuration, when configuration has a value for it.
    pub fn inject(&self, mut args: Args) -> Args {
        let Some(config) = self.source.current() else {
            return args;
        };
        for (index, param) in self.signature.params.iter().enumerate() {
            if index < args.positional.len() || args.keyword.contains_key(&param.name) {
                continue;
            }
            if let Some(value) = config.get_opt(&param.name) {
                trace!(function = %self.signature.name, argument = %param.name, "injecting from configuration");
                args.keyword.insert(param.name.clone(), value.clone());
            }
        }
        args
    }

    pub fn call(&self, args: Args) -> AssemblyResult<ConfigValue> {
        let bound = self.signature.bind(self.inject(args))?;
        (self.func)(bound)
    }

    /// Calls with only the entries of `kwargs` the signature declares.
    pub fn apply_kwargs(&self, kwargs: &ConfigMap) -> AssemblyResult<ConfigValue> {
        self.call(Args::keywords(self.signature.select(kwargs)))
    }

    pub fn into_callable(self) -> Callable {
        let name = self.signature.name.clone();
        Callable::new(&name, move |args| self.call(args))
    }
}

impl fmt::Debug for ArgInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgInjector")
            .field("signature", &self.signature)
            .field("source", &self.source)
            .finish()
    }
}

/// Calls `callable` with the subset of `kwargs` that `signature` declares.
pub fn apply_kwargs(
    callable: &Callable,
    signature: &Signature,
    kwargs: &ConfigMap,
) -> AssemblyResult<ConfigValue> {
    callable.call(Args::keywords(signature.select(kwargs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Signature {
        Signature::new("f").required("a").required("b").optional("c", 0)
    }

    #[test]
    fn test_bind_fills_defaults() {
        let bound = abc().bind(Args::new().arg(1).arg(2)).unwrap();
        assert_eq!(bound.get("c").unwrap(), &ConfigValue::Integer(0));
    }

    #[test]
    fn test_bind_missing_names_every_argument() {
        let err = abc().bind(Args::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("f() missing 2 required arguments: 'a' and 'b'"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_bind_rejects_bad_calls() {
        let err = abc().bind(Args::new().arg(1).arg(2).arg(3).arg(4)).unwrap_err();
        assert!(err.to_string().contains("takes 3 positional arguments but 4 were given"));

        let err = abc().bind(Args::new().arg(1).kwarg("a", 2)).unwrap_err();
        assert!(err.to_string().contains("multiple values for argument 'a'"));

        let err = abc().bind(Args::new().arg(1).arg(2).kwarg("zz", 2)).unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'zz'"));
    }

    #[test]
    fn test_var_keyword_keeps_extras() {
        let sig = Signature::new("g").required("a").var_keyword();
        let bound = sig.bind(Args::new().arg(1).kwarg("extra", true)).unwrap();
        assert_eq!(bound.extra().get("extra"), Some(&ConfigValue::Bool(true)));
        assert_eq!(bound.into_map().len(), 2);
    }

    #[test]
    fn test_apply_kwargs_drops_undeclared() {
        let callable = Callable::new("h", |args: Args| {
            Ok(ConfigValue::Integer(args.keyword.len() as i64))
        });
        let kwargs: ConfigMap = [("a", 1), ("b", 2), ("zz", 3)].into_iter().collect();
        let sig = Signature::new("h").required("a").optional("b", 0);
        assert_eq!(apply_kwargs(&callable, &sig, &kwargs).unwrap(), ConfigValue::Integer(2));
    }
}
