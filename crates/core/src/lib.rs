//! 配置驱动的组件装配核心
//!
//! 配置文档中带有 `__factory__` 键的映射会被替换为对应工厂构造出的组件，
//! 装配结果保存在进程级的 [`ConfigStore`] 中，供参数注入与延迟装饰器链使用。

pub mod assembler;
pub mod builtins;
pub mod config;
pub mod decorators;
pub mod errors;
pub mod injector;
pub mod logging;
pub mod metadata;
pub mod process_store;
pub mod resolver;
pub mod value;

pub use assembler::{assemble, Assembly, ComponentAssembler};
pub use config::{Config, ConfigLoader, ConfigSource, ConfigStore, CONFIG_ENV};
pub use decorators::{DeferredChain, DeferredDecoratorChain};
pub use errors::*;
pub use injector::{apply_kwargs, args_from_config, ArgInjector, BoundArgs, Signature};
pub use logging::{LogFormat, LoggingConfig};
pub use metadata::response_metadata;
pub use process_store::{process_store, ProcessStore};
pub use resolver::{Factory, Kwargs, Namespace, Registry, Symbol};
pub use value::{
    Args, Callable, Component, ComponentRef, ConfigMap, ConfigValue, Decorator, FACTORY_KEY,
};
