//! 命令行子命令
//!
//! 每个命令先初始化全局配置，再执行自己的工作。

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::info;

use assembler_core::{
    args_from_config, ArgInjector, Args, Config, ConfigLoader, ConfigStore, ConfigValue, Registry,
    Signature,
};
use assembler_scheduler::{stop_schedulers, RecurrenceScheduler};

use crate::persistence::ModelPersister;
use crate::VERSION;

/// Value of `__mode__` while `upgrade` runs.
///
/// Components that skip background work during maintenance commands must
/// check for this value; it is `"upgrade"`, not `"fit"`.
pub const UPGRADE_MODE: &str = "upgrade";

pub fn cli() -> Command {
    Command::new("assembler")
        .version(VERSION)
        .about("配置驱动的组件装配运行时")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，可重复；未指定时读取 ASSEMBLER_CONFIG")
                .action(ArgAction::Append)
                .global(true),
        )
        .subcommand(Command::new("version").about("输出版本号"))
        .subcommand(
            Command::new("upgrade")
                .about("升级 model_persister 的存储")
                .arg(
                    Arg::new("from")
                        .long("from")
                        .value_name("VERSION")
                        .help("起始版本，默认读取存储中记录的版本"),
                )
                .arg(
                    Arg::new("to")
                        .long("to")
                        .value_name("VERSION")
                        .help("目标版本，默认为当前版本"),
                ),
        )
        .subcommand(Command::new("run").about("装配配置并运行调度器，直到收到关闭信号"))
}

/// Loader for `--config` files, or for `ASSEMBLER_CONFIG` when none are given.
pub fn loader(matches: &ArgMatches, registry: Registry) -> ConfigLoader {
    let registry = Arc::new(registry);
    match matches.get_many::<String>("config") {
        Some(paths) => ConfigLoader::new(registry).paths(paths),
        None => ConfigLoader::from_env(registry),
    }
}

/// 初始化配置并返回版本号
pub fn version(store: &ConfigStore, loader: ConfigLoader) -> Result<&'static str> {
    store.initialize(loader).context("初始化配置失败")?;
    Ok(VERSION)
}

fn upgrade_injector() -> ArgInjector {
    args_from_config(
        Signature::new("upgrade")
            .required("model_persister")
            .optional("from_version", ConfigValue::Null)
            .optional("to_version", ConfigValue::Null),
        |args| {
            let persister = args.component::<ModelPersister>("model_persister")?;
            let from: Option<String> = args.get_as("from_version")?;
            let to: Option<String> = args.get_as("to_version")?;
            let applied = persister.upgrade(from.as_deref(), to.as_deref().unwrap_or(VERSION))?;
            Ok(ConfigValue::List(applied.into_iter().map(ConfigValue::from).collect()))
        },
    )
}

/// 以 `__mode__ = "upgrade"` 初始化配置，并升级注入的 `model_persister`
///
/// 返回执行过的升级步骤版本。
pub fn upgrade(
    store: &ConfigStore,
    loader: ConfigLoader,
    from_version: Option<&str>,
    to_version: Option<&str>,
) -> Result<Vec<String>> {
    let config = store
        .initialize_strict(loader.override_value("__mode__", UPGRADE_MODE))
        .context("初始化配置失败")?;

    let optional = |value: Option<&str>| value.map_or(ConfigValue::Null, ConfigValue::from);
    let applied = upgrade_injector()
        .with_config(config)
        .call(
            Args::new()
                .kwarg("from_version", optional(from_version))
                .kwarg("to_version", optional(to_version)),
        )
        .context("升级存储失败")?;

    Ok(applied
        .as_list()
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

/// 初始化配置并保持调度器运行，直到 `shutdown` 完成，然后停止所有调度器
pub async fn run<F>(store: &ConfigStore, loader: ConfigLoader, shutdown: F) -> Result<Arc<Config>>
where
    F: Future<Output = ()>,
{
    let config = store.initialize_strict(loader).context("初始化配置失败")?;
    let schedulers = config
        .components()
        .filter(|c| c.is::<RecurrenceScheduler>())
        .count();
    info!(schedulers, "配置装配完成，等待关闭信号");

    shutdown.await;

    let stopped = stop_schedulers(&config);
    info!(stopped, "已停止调度器");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let matches = cli()
            .try_get_matches_from(["assembler", "upgrade", "--from", "0.5", "-c", "a.toml", "-c", "b.json"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "upgrade");
        assert_eq!(sub.get_one::<String>("from").map(String::as_str), Some("0.5"));
        assert_eq!(sub.get_one::<String>("to"), None);
        let configs: Vec<&String> = sub.get_many::<String>("config").unwrap().collect();
        assert_eq!(configs, ["a.toml", "b.json"]);
    }

    #[test]
    fn test_cli_requires_a_subcommand() {
        assert!(cli().try_get_matches_from(["assembler"]).is_err());
        assert!(cli().try_get_matches_from(["assembler", "version"]).is_ok());
        assert!(cli().try_get_matches_from(["assembler", "fit"]).is_err());
    }
}
