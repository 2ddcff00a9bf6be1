use std::time::Duration;

use tracing::info;

use assembler_core::{AssemblyError, AssemblyResult, Config, ConfigValue, Kwargs, Registry};

use crate::rule::RecurrenceRule;
use crate::scheduler::{RecurrenceScheduler, DEFAULT_SLEEP_BETWEEN_CHECKS};

pub const MODULE: &str = "assembler.scheduling";

/// Registers `RecurrenceRule` and `RecurrenceScheduler` under
/// `assembler.scheduling`.
pub fn register(registry: &mut Registry) {
    registry
        .module(MODULE)
        .factory("RecurrenceRule", recurrence_rule)
        .factory("RecurrenceScheduler", recurrence_scheduler);
}

/// `cron = "..."` alone, or the calendar rule keys.
fn recurrence_rule(mut kwargs: Kwargs<'_>) -> AssemblyResult<ConfigValue> {
    let rule = match kwargs.take("cron") {
        Some(expression) => {
            kwargs.finish()?;
            let expression = expression.as_str().ok_or_else(|| {
                AssemblyError::invalid_value("cron", format!("expected a string, got {}", expression.kind()))
            })?;
            RecurrenceRule::cron(expression)?
        }
        None => RecurrenceRule::from_value(&ConfigValue::Map(kwargs.into_map()))?,
    };
    Ok(ConfigValue::component(rule))
}

fn recurrence_scheduler(mut kwargs: Kwargs<'_>) -> AssemblyResult<ConfigValue> {
    let func = kwargs.take_callable("func")?.ok_or_else(|| {
        AssemblyError::signature(format!(
            "{}() missing required keyword argument: 'func'",
            kwargs.factory()
        ))
    })?;
    let rule = RecurrenceRule::from_value(&kwargs.required("rrule")?)?;
    let sleep_between_checks = match kwargs.take_as::<f64>("sleep_between_checks")? {
        Some(seconds) => Duration::try_from_secs_f64(seconds).map_err(|e| {
            AssemblyError::invalid_value("sleep_between_checks", e.to_string())
        })?,
        None => DEFAULT_SLEEP_BETWEEN_CHECKS,
    };
    let autostart = kwargs.take_as::<bool>("autostart")?.unwrap_or(true);
    kwargs.finish()?;

    Ok(ConfigValue::component(
        RecurrenceScheduler::new(func, rule, sleep_between_checks).with_autostart(autostart),
    ))
}

/// Stops every scheduler built for `config` and waits for the threads.
/// Returns how many were stopped.
pub fn stop_schedulers(config: &Config) -> usize {
    let mut stopped = 0;
    for component in config.components() {
        if let Some(scheduler) = component.downcast::<RecurrenceScheduler>() {
            scheduler.stop();
            scheduler.join();
            stopped += 1;
        }
    }
    if stopped > 0 {
        info!(count = stopped, "schedulers stopped");
    }
    stopped
}
