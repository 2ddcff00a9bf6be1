use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use assembler_core::{Args, AssemblyError, AssemblyResult, Callable, Component, Config};

use crate::rule::RecurrenceRule;

/// Default pause between two checks of the rule.
pub const DEFAULT_SLEEP_BETWEEN_CHECKS: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

struct Shared {
    func: Callable,
    rule: RecurrenceRule,
    sleep_between_checks: Duration,
    alive: AtomicBool,
    last_execution: Mutex<DateTime<Utc>>,
    invocations: AtomicU64,
    wake: Condvar,
    wake_lock: Mutex<()>,
}

impl Shared {
    fn last_execution(&self) -> DateTime<Utc> {
        *self
            .last_execution
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        debug!(callable = self.func.name(), rule = %self.rule, "scheduler thread started");
        while self.alive.load(Ordering::SeqCst) {
            let now = Utc::now();
            if !self.rule.any_between(self.last_execution(), now) {
                self.sleep();
                continue;
            }

            *self
                .last_execution
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = now;
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.invoke();
        }
        debug!(callable = self.func.name(), "scheduler thread finished");
    }

    fn invoke(&self) {
        let name = self.func.name();
        debug!(callable = name, "running scheduled callable");
        match catch_unwind(AssertUnwindSafe(|| self.func.call(Args::new()))) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(callable = name, error = %e, "failed to execute {name}"),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(callable = name, panic = %message, "failed to execute {name}");
            }
        }
    }

    /// Waits one poll interval, waking early when stopped.
    fn sleep(&self) {
        let guard = self.wake_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .wake
            .wait_timeout_while(guard, self.sleep_between_checks, |_| {
                self.alive.load(Ordering::SeqCst)
            })
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// 按重复规则周期性调用函数的后台线程
///
/// 每次检查时，如果上次执行与当前时间之间存在规则的触发点，则将上次执行时间
/// 更新为当前时间并调用函数；两次检查之间的多个触发点只会引起一次调用。
pub struct RecurrenceScheduler {
    shared: Arc<Shared>,
    state: Mutex<SchedulerState>,
    handle: Mutex<Option<JoinHandle<()>>>,
    autostart: bool,
}

impl RecurrenceScheduler {
    pub fn new(func: Callable, rule: RecurrenceRule, sleep_between_checks: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                func,
                rule,
                sleep_between_checks,
                alive: AtomicBool::new(false),
                last_execution: Mutex::new(Utc::now()),
                invocations: AtomicU64::new(0),
                wake: Condvar::new(),
                wake_lock: Mutex::new(()),
            }),
            state: Mutex::new(SchedulerState::Idle),
            handle: Mutex::new(None),
            autostart: false,
        }
    }

    /// 在组件初始化时自动启动
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// 启动后台线程；只能启动一次
    pub fn start(&self) -> AssemblyResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SchedulerState::Idle {
            return Err(AssemblyError::SchedulerState(format!(
                "scheduler for '{}' cannot start from state {:?}",
                self.shared.func.name(),
                *state
            )));
        }

        self.shared.alive.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("scheduler-{}", self.shared.func.name()))
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.alive.store(false, Ordering::SeqCst);
                AssemblyError::SchedulerState(format!("failed to spawn scheduler thread: {e}"))
            })?;

        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        *state = SchedulerState::Running;
        info!(
            callable = self.shared.func.name(),
            rule = %self.shared.rule,
            "scheduler started"
        );
        Ok(())
    }

    /// 请求停止；当前正在执行的调用不会被中断
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SchedulerState::Stopped {
            return;
        }
        let was_running = *state == SchedulerState::Running;
        *state = SchedulerState::Stopped;
        drop(state);

        self.shared.alive.store(false, Ordering::SeqCst);
        {
            let _guard = self
                .shared
                .wake_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.wake.notify_all();
        }
        if was_running {
            info!(callable = self.shared.func.name(), "scheduler stop requested");
        }
    }

    /// 等待后台线程退出
    pub fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(callable = self.shared.func.name(), "scheduler thread panicked");
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    pub fn last_execution(&self) -> DateTime<Utc> {
        self.shared.last_execution()
    }

    /// Number of times the callable has been invoked.
    pub fn invocation_count(&self) -> u64 {
        self.shared.invocations.load(Ordering::SeqCst)
    }

    pub fn rule(&self) -> &RecurrenceRule {
        &self.shared.rule
    }

    pub fn sleep_between_checks(&self) -> Duration {
        self.shared.sleep_between_checks
    }

    pub fn callable(&self) -> &Callable {
        &self.shared.func
    }
}

impl Component for RecurrenceScheduler {
    fn component_name(&self) -> &str {
        "RecurrenceScheduler"
    }

    fn initialize_component(&self, _config: &Config) -> AssemblyResult<()> {
        if self.autostart {
            self.start()?;
        }
        Ok(())
    }
}

impl Drop for RecurrenceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RecurrenceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurrenceScheduler")
            .field("callable", &self.shared.func.name())
            .field("rule", &self.shared.rule)
            .field("state", &self.state())
            .field("sleep_between_checks", &self.shared.sleep_between_checks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{parse_datetime, Frequency, RRule};
    use assembler_core::ConfigValue;

    fn never() -> RecurrenceRule {
        let far = parse_datetime("2999-01-01").unwrap();
        RecurrenceRule::Calendar(RRule::builder(Frequency::Yearly).dtstart(far).build().unwrap())
    }

    fn noop() -> Callable {
        Callable::new("noop", |_| Ok(ConfigValue::Null))
    }

    #[test]
    fn test_start_twice_fails() {
        let scheduler = RecurrenceScheduler::new(noop(), never(), Duration::from_millis(10));
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(AssemblyError::SchedulerState(_))));
        scheduler.stop();
        scheduler.join();
    }

    #[test]
    fn test_stop_is_terminal_and_wakes_sleeper() {
        let scheduler = RecurrenceScheduler::new(noop(), never(), Duration::from_secs(3600));
        scheduler.start().unwrap();
        assert!(scheduler.is_alive());
        assert_eq!(scheduler.state(), SchedulerState::Running);

        let started = std::time::Instant::now();
        scheduler.stop();
        scheduler.join();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!scheduler.is_alive());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.start().is_err());
    }

    #[test]
    fn test_stop_before_start() {
        let scheduler = RecurrenceScheduler::new(noop(), never(), Duration::from_millis(10));
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        scheduler.join();
        assert_eq!(scheduler.invocation_count(), 0);
    }
}
