use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use assembler_core::*;
use serde_json::json;

fn config_with(document: serde_json::Value, registry: Registry) -> Arc<Config> {
    let overrides = match ConfigValue::from(document) {
        ConfigValue::Map(map) => map,
        other => panic!("expected a mapping, got {other:?}"),
    };
    ConfigLoader::new(Arc::new(registry))
        .configure_logging(false)
        .overrides(overrides)
        .load()
        .unwrap()
}

fn triple() -> Signature {
    Signature::new("f").required("a").required("b").required("c")
}

fn sum_injector(config: Arc<Config>) -> ArgInjector {
    args_from_config(triple(), |args| {
        let a: i64 = args.get_as("a")?;
        let b: i64 = args.get_as("b")?;
        let c: i64 = args.get_as("c")?;
        Ok(ConfigValue::from(format!("{a},{b},{c}")))
    })
    .with_config(config)
}

#[test]
fn test_injects_missing_arguments_from_config() {
    let config = config_with(json!({"b": 2, "c": 3}), Registry::new());
    let f = sum_injector(config);

    assert_eq!(f.call(Args::new().arg(1)).unwrap(), ConfigValue::from("1,2,3"));
    assert_eq!(
        f.call(Args::new().arg(1).kwarg("c", 9)).unwrap(),
        ConfigValue::from("1,2,9")
    );
    assert_eq!(
        f.call(Args::new().arg(1).arg(5)).unwrap(),
        ConfigValue::from("1,5,3")
    );
}

#[test]
fn test_missing_argument_error_names_it() {
    let config = config_with(json!({"b": 2, "c": 3}), Registry::new());
    let err = sum_injector(config).call(Args::new()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("'a'"));
    assert!(msg.contains("ASSEMBLER_CONFIG"));
}

#[test]
fn test_injector_as_callable_and_apply_kwargs() {
    let config = config_with(json!({"c": 3}), Registry::new());
    let injector = sum_injector(config);

    let kwargs: ConfigMap = [("a", 1), ("b", 2), ("unused", 7)].into_iter().collect();
    assert_eq!(injector.apply_kwargs(&kwargs).unwrap(), ConfigValue::from("1,2,3"));

    let callable = injector.into_callable();
    assert_eq!(callable.name(), "f");
    assert_eq!(
        callable.call(Args::new().arg(4).arg(5)).unwrap(),
        ConfigValue::from("4,5,3")
    );
}

fn counting_registry(applied: Arc<AtomicUsize>) -> Registry {
    let mut registry = Registry::with_builtins();
    for tag in ["dec_A", "dec_B"] {
        let applied = applied.clone();
        registry.module("app.decorators").decorator(tag, move |inner: Callable| {
            applied.fetch_add(1, Ordering::SeqCst);
            Callable::new(tag, move |args| {
                let value = inner.call(args)?;
                Ok(ConfigValue::from(format!(
                    "{tag}({})",
                    value.as_str().unwrap_or_default()
                )))
            })
        });
    }
    registry
}

fn plain_f() -> Callable {
    Callable::new("f", |_| Ok(ConfigValue::from("f"))).with_doc("returns f")
}

#[test]
fn test_chain_applies_last_decorator_outermost() {
    let applied = Arc::new(AtomicUsize::new(0));
    let config = config_with(
        json!({"my_decorators": ["app.decorators:dec_A", "app.decorators.dec_B"]}),
        counting_registry(applied.clone()),
    );
    let g = DeferredDecoratorChain::new("my_decorators")
        .with_config(config)
        .wrap(plain_f());

    assert_eq!(g.name(), "f");
    assert_eq!(g.doc(), Some("returns f"));
    assert_eq!(applied.load(Ordering::SeqCst), 0);

    assert_eq!(g.call(Args::new()).unwrap(), ConfigValue::from("dec_B(dec_A(f))"));
    assert_eq!(g.call(Args::new()).unwrap(), ConfigValue::from("dec_B(dec_A(f))"));
    assert_eq!(applied.load(Ordering::SeqCst), 2);
}

#[test]
fn test_chain_resolves_once_under_concurrency() {
    let applied = Arc::new(AtomicUsize::new(0));
    let config = config_with(
        json!({"my_decorators": ["app.decorators:dec_A"]}),
        counting_registry(applied.clone()),
    );
    let g = DeferredDecoratorChain::new("my_decorators")
        .with_config(config)
        .wrap(plain_f());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let g = g.clone();
            thread::spawn(move || g.call(Args::new()).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), ConfigValue::from("dec_A(f)"));
    }
    assert_eq!(applied.load(Ordering::SeqCst), 1);
}

#[test]
fn test_empty_or_absent_chain_is_the_function_itself() {
    let config = config_with(json!({"empty": []}), Registry::new());
    let f = plain_f();

    for key in ["empty", "absent"] {
        let deferred = DeferredDecoratorChain::new(key)
            .with_config(config.clone())
            .defer(f.clone());
        assert!(!deferred.is_resolved());
        assert!(deferred.composed().unwrap().same_function(&f));
        assert!(deferred.is_resolved());
    }
}

#[test]
fn test_chain_with_unknown_decorator_fails_on_first_call() {
    let config = config_with(json!({"decs": ["app.decorators:nope"]}), Registry::new());
    let g = DeferredDecoratorChain::new("decs").with_config(config).wrap(plain_f());
    let err = g.call(Args::new()).unwrap_err();
    assert!(err.is_resolution_error());
}

#[test]
fn test_timed_builtin_in_chain() {
    let config = config_with(json!({"decs": ["assembler.builtins:timed"]}), Registry::with_builtins());
    let g = DeferredDecoratorChain::new("decs").with_config(config).wrap(plain_f());
    assert_eq!(g.call(Args::new()).unwrap(), ConfigValue::from("f"));
}
