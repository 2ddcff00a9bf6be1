//! 配置驱动的组件装配运行时
//!
//! 命令行入口与存储升级协作者。装配、注入与调度分别由
//! `assembler-core` 和 `assembler-scheduler` 提供。

pub mod commands;
pub mod persistence;
pub mod shutdown;

use assembler_core::Registry;

/// Version printed by `assembler version` and the default upgrade target.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 注册内置模块、调度模块和持久化模块的注册表
///
/// 宿主程序在此基础上注册自己的模块。
pub fn registry() -> Registry {
    let mut registry = Registry::with_builtins();
    assembler_scheduler::register(&mut registry);
    persistence::register(&mut registry);
    registry
}
