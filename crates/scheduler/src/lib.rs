//! 基于重复规则的后台调度
//!
//! [`RecurrenceScheduler`] 在独立线程中按 [`RecurrenceRule`] 周期性调用函数。
//! 通过 [`register`] 可以在配置文档中以 `assembler.scheduling:RecurrenceScheduler`
//! 工厂声明调度器，组件初始化时自动启动。

pub mod factories;
pub mod rule;
pub mod scheduler;

pub use factories::{register, stop_schedulers, MODULE};
pub use rule::{parse_datetime, CronRule, Frequency, Occurrences, RRule, RRuleBuilder, RecurrenceRule};
pub use scheduler::{RecurrenceScheduler, SchedulerState, DEFAULT_SLEEP_BETWEEN_CHECKS};
