use tracing::debug;

use crate::resolver::{Kwargs, Registry};
use crate::value::{Args, ConfigMap, ConfigValue, FACTORY_KEY};
use crate::{AssemblyError, AssemblyResult};

/// Result of assembling a document.
#[derive(Debug, Default)]
pub struct Assembly {
    /// The document with every component spec replaced by its product.
    pub document: ConfigMap,
    /// Everything constructed during the walk, dependencies first.
    pub created: Vec<ConfigValue>,
}

/// Turns `__factory__` specifications into live values, bottom-up.
pub struct ComponentAssembler<'a> {
    registry: &'a Registry,
    created: Vec<ConfigValue>,
}

impl<'a> ComponentAssembler<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            created: Vec::new(),
        }
    }

    /// Resolves every nested spec of `document`. The top-level mapping
    /// itself is never treated as a spec.
    pub fn assemble(mut self, document: ConfigMap) -> AssemblyResult<Assembly> {
        let mut resolved = ConfigMap::with_capacity(document.len());
        for (key, value) in document {
            let value = self.resolve(value)?;
            resolved.insert(key, value);
        }
        debug!(components = self.created.len(), "configuration assembled");
        Ok(Assembly {
            document: resolved,
            created: self.created,
        })
    }

    fn resolve(&mut self, value: ConfigValue) -> AssemblyResult<ConfigValue> {
        match value {
            ConfigValue::Map(map) => {
                let mut resolved = ConfigMap::with_capacity(map.len());
                for (key, value) in map {
                    let value = self.resolve(value)?;
                    resolved.insert(key, value);
                }
                if resolved.contains_key(FACTORY_KEY) {
                    let product = self.construct(resolved)?;
                    self.created.push(product.clone());
                    Ok(product)
                } else {
                    Ok(ConfigValue::Map(resolved))
                }
            }
            ConfigValue::List(items) => items
                .into_iter()
                .map(|item| self.resolve(item))
                .collect::<AssemblyResult<Vec<_>>>()
                .map(ConfigValue::List),
            scalar => Ok(scalar),
        }
    }

    fn construct(&self, mut spec: ConfigMap) -> AssemblyResult<ConfigValue> {
        let reference = spec.remove(FACTORY_KEY).unwrap_or_default();
        let name = match &reference {
            ConfigValue::String(name) => name.clone(),
            ConfigValue::Callable(callable) => callable.name().to_string(),
            other => {
                return Err(AssemblyError::invalid_value(
                    FACTORY_KEY,
                    format!("expected a dotted name, got {}", other.kind()),
                ))
            }
        };

        debug!(factory = %name, "creating component");
        let result = match reference {
            ConfigValue::Callable(callable) => callable.call(Args::keywords(spec)),
            _ => {
                let factory = self.registry.resolve_factory(&name)?;
                factory.create(Kwargs::new(&name, spec, self.registry))
            }
        };
        result.map_err(|source| AssemblyError::Construction {
            factory: name,
            source: Box::new(source),
        })
    }
}

/// Convenience wrapper around [`ComponentAssembler`].
pub fn assemble(document: ConfigMap, registry: &Registry) -> AssemblyResult<Assembly> {
    ComponentAssembler::new(registry).assemble(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: serde_json::Value) -> ConfigMap {
        match ConfigValue::from(value) {
            ConfigValue::Map(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_plain_document_is_untouched() {
        let registry = Registry::new();
        let doc = document(json!({
            "a": 1,
            "b": {"c": [1, {"d": "x"}], "e": null},
        }));
        let assembly = assemble(doc.clone(), &registry).unwrap();
        assert!(assembly.created.is_empty());
        assert_eq!(assembly.document, doc);
    }

    #[test]
    fn test_specs_inside_lists_are_replaced() {
        let mut registry = Registry::new();
        registry.module("pkg").factory("Num", |mut kwargs| {
            let n: i64 = kwargs.required_as("n")?;
            kwargs.finish()?;
            Ok(ConfigValue::Integer(n * 10))
        });
        let doc = document(json!({
            "items": [{"__factory__": "pkg.Num", "n": 1}, [{"__factory__": "pkg:Num", "n": 2}]],
        }));
        let assembly = assemble(doc, &registry).unwrap();
        assert_eq!(
            assembly.document.get("items").unwrap().to_json().unwrap(),
            json!([10, [20]])
        );
        assert_eq!(assembly.created.len(), 2);
    }

    #[test]
    fn test_factory_error_names_factory() {
        let mut registry = Registry::new();
        registry
            .module("pkg")
            .factory("Broken", |_| Err(AssemblyError::invalid_value("x", "nope")));
        let doc = document(json!({"thing": {"__factory__": "pkg:Broken"}}));
        let err = assemble(doc, &registry).unwrap_err();
        assert!(matches!(err, AssemblyError::Construction { ref factory, .. } if factory == "pkg:Broken"));
    }

    #[test]
    fn test_unresolvable_factory_fails_fast() {
        let registry = Registry::new();
        let doc = document(json!({"thing": {"__factory__": "missing.module:Thing"}}));
        let err = assemble(doc, &registry).unwrap_err();
        assert!(err.is_resolution_error());
    }
}
