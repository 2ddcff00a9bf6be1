use anyhow::{Context, Result};
use tracing::info;

use assembler::commands;
use assembler::shutdown::wait_for_shutdown_signal;
use assembler_core::ConfigStore;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = commands::cli().get_matches();
    let store = ConfigStore::global();

    match matches.subcommand() {
        Some(("version", sub)) => {
            let version = commands::version(store, commands::loader(sub, assembler::registry()))?;
            println!("{version}");
        }
        Some(("upgrade", sub)) => {
            let from = sub.get_one::<String>("from").map(String::as_str);
            let to = sub.get_one::<String>("to").map(String::as_str);
            let applied = commands::upgrade(
                store,
                commands::loader(sub, assembler::registry()),
                from,
                to,
            )?;
            if applied.is_empty() {
                println!("Storage is up to date.");
            } else {
                println!("Applied upgrade steps: {}", applied.join(", "));
            }
        }
        Some(("run", sub)) => {
            commands::run(
                store,
                commands::loader(sub, assembler::registry()),
                wait_for_shutdown_signal(),
            )
            .await
            .context("运行失败")?;
            info!("已退出");
        }
        _ => unreachable!("clap requires a subcommand"),
    }

    Ok(())
}
