//! 存储版本管理
//!
//! `upgrade` 命令通过配置中的 `model_persister` 组件升级存储。持久化实现只需
//! 实现 [`Persister`]，再用 [`ModelPersister`] 包装后作为组件放入配置。

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::{debug, info};

use assembler_core::{AssemblyError, AssemblyResult, ConfigValue, Kwargs, Registry};

use crate::VERSION;

pub const MODULE: &str = "assembler.persistence";

/// Version assumed for storage that never recorded one.
pub const INITIAL_VERSION: &str = "0.0";

const DB_VERSION_KEY: &str = "db-version";

/// Registers `FileVersionStore` under `assembler.persistence`.
pub fn register(registry: &mut Registry) {
    registry
        .module(MODULE)
        .factory("FileVersionStore", file_version_store);
}

fn file_version_store(mut kwargs: Kwargs<'_>) -> AssemblyResult<ConfigValue> {
    let path: String = kwargs.required_as("path")?;
    kwargs.finish()?;
    Ok(ConfigValue::component(ModelPersister::new(FileVersionStore::new(
        path,
    ))))
}

/// Dotted numeric version; trailing zero parts do not matter, so `1.0`
/// equals `1.0.0`.
#[derive(Debug, Clone)]
pub struct StorageVersion {
    text: String,
    parts: Vec<u64>,
}

impl StorageVersion {
    fn significant(&self) -> &[u64] {
        let len = self
            .parts
            .iter()
            .rposition(|part| *part != 0)
            .map_or(0, |i| i + 1);
        &self.parts[..len]
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for StorageVersion {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let parts = text
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AssemblyError::invalid_value("version", format!("'{s}' is not a dotted numeric version")))?;
        Ok(Self {
            text: text.to_string(),
            parts,
        })
    }
}

impl PartialEq for StorageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for StorageVersion {}

impl PartialOrd for StorageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

impl fmt::Display for StorageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

type Step<T> = fn(&mut T) -> AssemblyResult<()>;

/// 按版本号登记的升级步骤
pub struct UpgradeSteps<T> {
    steps: Vec<(StorageVersion, Step<T>)>,
}

impl<T> UpgradeSteps<T> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// 登记升级到 `version` 时执行的步骤
    pub fn add(mut self, version: &str, step: Step<T>) -> AssemblyResult<Self> {
        self.steps.push((version.parse()?, step));
        Ok(self)
    }

    /// Steps with `from < version <= to`, in version order.
    pub fn pending(&self, from: &StorageVersion, to: &StorageVersion) -> Vec<(&StorageVersion, Step<T>)> {
        let mut pending: Vec<_> = self
            .steps
            .iter()
            .filter(|(version, _)| from < version && version <= to)
            .map(|(version, step)| (version, *step))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(b.0));
        pending
    }

    /// 依次执行待升级步骤，返回执行过的版本
    pub fn run(&self, target: &mut T, from: &StorageVersion, to: &StorageVersion) -> AssemblyResult<Vec<String>> {
        let mut applied = Vec::new();
        for (version, step) in self.pending(from, to) {
            info!(version = %version, "applying storage upgrade step");
            step(target)?;
            applied.push(version.to_string());
        }
        Ok(applied)
    }
}

impl<T> Default for UpgradeSteps<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage that can be migrated between versions.
pub trait Persister: Send + Sync {
    /// Migrates from `from_version` (the stored version when `None`) to
    /// `to_version`. Returns the versions of the steps that ran.
    fn upgrade(&self, from_version: Option<&str>, to_version: &str) -> AssemblyResult<Vec<String>>;

    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Component wrapper placed under `model_persister` in configuration.
#[derive(Clone)]
pub struct ModelPersister {
    inner: Arc<dyn Persister>,
}

impl ModelPersister {
    pub fn new<P: Persister + 'static>(persister: P) -> Self {
        Self {
            inner: Arc::new(persister),
        }
    }

    pub fn upgrade(&self, from_version: Option<&str>, to_version: &str) -> AssemblyResult<Vec<String>> {
        self.inner.upgrade(from_version, to_version)
    }
}

impl assembler_core::Component for ModelPersister {
    fn component_name(&self) -> &str {
        "ModelPersister"
    }
}

impl fmt::Debug for ModelPersister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelPersister")
            .field("persister", &self.inner.describe())
            .finish()
    }
}

/// 以 JSON 元数据文件记录存储版本
///
/// 文件内容为 `{"models": [...], "properties": {"db-version": "..."}}`。
/// 文件不存在时视为当前版本的新存储。
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取元数据；文件不存在时返回新存储的元数据
    pub fn read_metadata(&self) -> AssemblyResult<Value> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no metadata file, starting fresh");
            return Ok(json!({
                "models": [],
                "properties": { DB_VERSION_KEY: VERSION },
            }));
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| AssemblyError::load(self.path.display().to_string(), e.to_string()))
    }

    /// Version recorded in the metadata file, if any.
    pub fn version(&self) -> AssemblyResult<Option<String>> {
        Ok(stored_version(&self.read_metadata()?))
    }

    fn write_metadata(&self, metadata: &Value) -> AssemblyResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(metadata)
            .context("serializing storage metadata")?;
        fs::write(&self.path, text).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }

    fn steps() -> AssemblyResult<UpgradeSteps<Value>> {
        UpgradeSteps::new().add("1.0", metadata_to_object)
    }
}

impl Persister for FileVersionStore {
    fn upgrade(&self, from_version: Option<&str>, to_version: &str) -> AssemblyResult<Vec<String>> {
        let mut metadata = self.read_metadata()?;
        let from = match from_version {
            Some(version) => version.to_string(),
            None => stored_version(&metadata).unwrap_or_else(|| INITIAL_VERSION.to_string()),
        };
        let from: StorageVersion = from.parse()?;
        let to: StorageVersion = to_version.parse()?;
        info!(path = %self.path.display(), from = %from, to = %to, "upgrading storage");

        let applied = Self::steps()?.run(&mut metadata, &from, &to)?;
        set_version(&mut metadata, to.as_str())?;
        self.write_metadata(&metadata)?;
        Ok(applied)
    }

    fn describe(&self) -> String {
        format!("FileVersionStore({})", self.path.display())
    }
}

fn stored_version(metadata: &Value) -> Option<String> {
    metadata
        .get("properties")?
        .get(DB_VERSION_KEY)?
        .as_str()
        .map(str::to_string)
}

fn set_version(metadata: &mut Value, version: &str) -> AssemblyResult<()> {
    let properties = metadata
        .as_object_mut()
        .map(|object| object.entry("properties").or_insert_with(|| json!({})))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| AssemblyError::invalid_value("properties", "storage metadata is not an object"))?;
    properties.insert(DB_VERSION_KEY.to_string(), Value::from(version));
    Ok(())
}

/// 1.0: a bare list of model entries becomes `{"models": [...], "properties": {}}`.
fn metadata_to_object(metadata: &mut Value) -> AssemblyResult<()> {
    if let Value::Array(models) = metadata {
        let models = std::mem::take(models);
        *metadata = json!({ "models": models, "properties": {} });
    }
    Ok(())
}
