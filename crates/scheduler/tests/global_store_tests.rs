//! A scheduler started by its initialization hook reads the process store
//! from its first poll on.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use assembler_core::*;
use assembler_scheduler::{register, stop_schedulers};
use serde_json::json;

#[test]
fn test_scheduled_callable_injects_from_global_store() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let report = args_from_config(Signature::new("report").required("service_name"), move |args| {
        let name: String = args.get_as("service_name")?;
        recorded.lock().unwrap().push(name);
        Ok(ConfigValue::Null)
    });

    let mut registry = Registry::with_builtins();
    register(&mut registry);
    registry.module("app.jobs").value("report", report.into_callable());

    let document = match ConfigValue::from(json!({
        "service_name": "svc",
        "reporter": {
            "__factory__": "assembler.scheduling:RecurrenceScheduler",
            "func": "app.jobs:report",
            "rrule": {"freq": "SECONDLY"},
            "sleep_between_checks": 0.05,
        },
    })) {
        ConfigValue::Map(map) => map,
        other => panic!("expected a mapping, got {other:?}"),
    };

    let config = ConfigStore::global()
        .initialize(
            ConfigLoader::new(Arc::new(registry))
                .configure_logging(false)
                .overrides(document),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(2200));
    assert_eq!(stop_schedulers(&config), 1);

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|name| name == "svc"));
}
