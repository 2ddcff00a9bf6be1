//! `assembler.builtins` 模块：`Partial` 工厂与 `timed` 装饰器

use std::time::Instant;

use tracing::info;

use crate::resolver::{Kwargs, Registry};
use crate::value::{Args, Callable, ConfigValue, Decorator};
use crate::{AssemblyError, AssemblyResult};

pub const MODULE: &str = "assembler.builtins";

pub fn register(registry: &mut Registry) {
    registry
        .module(MODULE)
        .factory("Partial", partial)
        .decorator("timed", timed);
}

/// `func` with the remaining keyword arguments bound; keywords given at
/// call time take precedence over bound ones.
fn partial(mut kwargs: Kwargs<'_>) -> AssemblyResult<ConfigValue> {
    let func = kwargs
        .take_callable("func")?
        .ok_or_else(|| AssemblyError::signature("Partial() missing required keyword argument: 'func'"))?;
    let bound = kwargs.into_map();
    let name = format!("partial({})", func.name());

    Ok(Callable::new(&name, move |args: Args| {
        let mut keyword = bound.clone();
        keyword.merge(args.keyword);
        func.call(Args {
            positional: args.positional,
            keyword,
        })
    })
    .into())
}

/// Logs the start and the duration of every call.
pub fn timed(func: Callable) -> Callable {
    let original = func.clone();
    Callable::new(original.name(), move |args| {
        let name = func.name();
        info!("{name}...");
        let started = Instant::now();
        let result = func.call(args);
        info!("{name} done in {:.3} sec.", started.elapsed().as_secs_f64());
        result
    })
    .wraps(&original)
}

/// [`timed`] as a registry-independent value.
pub fn timed_decorator() -> Decorator {
    Decorator::new("timed", timed)
}
