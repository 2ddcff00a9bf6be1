use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::config::{Config, ConfigSource};
use crate::value::{Args, Callable, ConfigValue, Decorator};
use crate::{AssemblyError, AssemblyResult};

/// Applies the decorators listed under a configuration key, lazily.
///
/// The list is read on the first call of the wrapped function and the
/// composed result is kept for every later call.
#[derive(Debug, Clone)]
pub struct DeferredDecoratorChain {
    key: String,
    source: ConfigSource,
}

impl DeferredDecoratorChain {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            source: ConfigSource::Global,
        }
    }

    pub fn with_config(mut self, config: Arc<Config>) -> Self {
        self.source = ConfigSource::Fixed(config);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn defer(&self, func: Callable) -> DeferredChain {
        DeferredChain {
            chain: self.clone(),
            func,
            resolved: Mutex::new(None),
        }
    }

    /// Wraps `func`; the result keeps `func`'s name and doc.
    pub fn wrap(&self, func: Callable) -> Callable {
        let original = func.clone();
        let deferred = Arc::new(self.defer(func));
        Callable::new(original.name(), move |args| deferred.call(args)).wraps(&original)
    }
}

/// One function bound to a [`DeferredDecoratorChain`].
#[derive(Debug)]
pub struct DeferredChain {
    chain: DeferredDecoratorChain,
    func: Callable,
    resolved: Mutex<Option<Callable>>,
}

impl DeferredChain {
    pub fn call(&self, args: Args) -> AssemblyResult<ConfigValue> {
        self.composed()?.call(args)
    }

    /// The composed callable, resolving the chain on first use.
    pub fn composed(&self) -> AssemblyResult<Callable> {
        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callable) = resolved.as_ref() {
            return Ok(callable.clone());
        }

        let config = self
            .chain
            .source
            .current()
            .ok_or(AssemblyError::NotInitialized)?;
        let decorators = resolve_chain(&config, &self.chain.key)?;
        debug!(
            key = %self.chain.key,
            function = self.func.name(),
            decorators = decorators.len(),
            "resolved decorator chain"
        );
        let callable = compose(self.func.clone(), &decorators);
        *resolved = Some(callable.clone());
        Ok(callable)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn into_callable(self) -> Callable {
        let original = self.func.clone();
        let this = Arc::new(self);
        Callable::new(original.name(), move |args| this.call(args)).wraps(&original)
    }
}

/// Decorators listed under `key`; an absent or null key is an empty chain.
pub fn resolve_chain(config: &Config, key: &str) -> AssemblyResult<Vec<Decorator>> {
    let entries = match config.get_opt(key) {
        None | Some(ConfigValue::Null) => return Ok(Vec::new()),
        Some(ConfigValue::List(entries)) => entries,
        Some(other) => {
            return Err(AssemblyError::invalid_value(
                key,
                format!("expected a list of decorators, got {}", other.kind()),
            ))
        }
    };

    entries
        .iter()
        .map(|entry| match entry {
            ConfigValue::String(name) => config.registry().resolve_decorator(name),
            ConfigValue::Decorator(decorator) => Ok(decorator.clone()),
            other => Err(AssemblyError::invalid_value(
                key,
                format!("expected a decorator or dotted name, got {}", other.kind()),
            )),
        })
        .collect()
}

/// Applies `decorators` in order, so the last one is the outermost layer.
pub fn compose(func: Callable, decorators: &[Decorator]) -> Callable {
    if decorators.is_empty() {
        return func;
    }
    decorators
        .iter()
        .fold(func.clone(), |wrapped, decorator| decorator.apply(wrapped))
        .wraps(&func)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagging(tag: &'static str) -> Decorator {
        Decorator::new(tag, move |inner: Callable| {
            Callable::new("tagged", move |args| {
                let value = inner.call(args)?;
                Ok(ConfigValue::String(format!(
                    "{tag}({})",
                    value.as_str().unwrap_or_default()
                )))
            })
        })
    }

    #[test]
    fn test_compose_last_is_outermost() {
        let f = Callable::new("f", |_| Ok("f".into())).with_doc("the f");
        let composed = compose(f, &[tagging("A"), tagging("B")]);
        assert_eq!(composed.call(Args::new()).unwrap(), ConfigValue::from("B(A(f))"));
        assert_eq!(composed.name(), "f");
        assert_eq!(composed.doc(), Some("the f"));
    }

    #[test]
    fn test_compose_empty_is_identity() {
        let f = Callable::new("f", |_| Ok(ConfigValue::Null));
        assert!(compose(f.clone(), &[]).same_function(&f));
    }
}
