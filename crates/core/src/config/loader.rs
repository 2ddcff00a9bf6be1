use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::Config;
use crate::assembler::ComponentAssembler;
use crate::logging;
use crate::resolver::Registry;
use crate::value::{ConfigMap, ConfigValue};
use crate::{AssemblyError, AssemblyResult};

/// Environment variable listing configuration documents, comma-separated.
pub const CONFIG_ENV: &str = "ASSEMBLER_CONFIG";

/// Document format, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq)]
enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    fn from_path(path: &Path) -> AssemblyResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()).unwrap_or("") {
            "toml" => Ok(DocumentFormat::Toml),
            "json" => Ok(DocumentFormat::Json),
            other => Err(AssemblyError::load(
                path.display().to_string(),
                format!("unsupported file format: '{other}'"),
            )),
        }
    }
}

/// Builds a [`Config`]: overrides first, then each document in order,
/// then assembly and initialization hooks.
pub struct ConfigLoader {
    registry: Arc<Registry>,
    overrides: ConfigMap,
    paths: Vec<PathBuf>,
    configure_logging: bool,
}

impl ConfigLoader {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            overrides: ConfigMap::new(),
            paths: Vec::new(),
            configure_logging: true,
        }
    }

    /// Loader for the documents listed in [`CONFIG_ENV`], if any.
    pub fn from_env(registry: Arc<Registry>) -> Self {
        let paths = std::env::var(CONFIG_ENV)
            .map(|value| parse_path_list(&value))
            .unwrap_or_default();
        Self::new(registry).paths(paths)
    }

    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn override_value<K: Into<String>, V: Into<ConfigValue>>(mut self, key: K, value: V) -> Self {
        self.overrides.insert(key, value);
        self
    }

    pub fn overrides(mut self, overrides: ConfigMap) -> Self {
        self.overrides.merge(overrides);
        self
    }

    /// Whether loading installs the global tracing subscriber.
    pub fn configure_logging(mut self, enabled: bool) -> Self {
        self.configure_logging = enabled;
        self
    }

    /// Loads, assembles and runs every initialization hook.
    pub fn load(self) -> AssemblyResult<Arc<Config>> {
        let config = self.assemble()?;
        config.initialize_components()?;
        Ok(config)
    }

    /// Loads and assembles without running the initialization hooks.
    pub(crate) fn assemble(self) -> AssemblyResult<Arc<Config>> {
        let mut merged = self.overrides;
        for path in &self.paths {
            merged.merge(read_document(path)?);
        }

        if self.configure_logging {
            logging::init_from_section(merged.get(logging::LOGGING_KEY))?;
        }
        info!(documents = self.paths.len(), "loading configuration");

        let root_dir = match self.paths.first() {
            Some(path) => Some(document_dir(path)?),
            None => None,
        };

        let assembly = ComponentAssembler::new(&self.registry).assemble(merged)?;
        Ok(Arc::new(Config::new(
            assembly.document,
            self.registry,
            root_dir,
            assembly.created,
        )))
    }
}

fn parse_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn document_dir(path: &Path) -> AssemblyResult<PathBuf> {
    let absolute = fs::canonicalize(path)
        .map_err(|e| AssemblyError::load(path.display().to_string(), e.to_string()))?;
    Ok(absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or(absolute))
}

/// Reads one document into its top-level mapping, resolving the `${here}`
/// and `${env:NAME}` bindings inside string values.
pub fn read_document(path: &Path) -> AssemblyResult<ConfigMap> {
    let display = path.display().to_string();
    let format = DocumentFormat::from_path(path)?;
    let content = fs::read_to_string(path)
        .map_err(|e| AssemblyError::load(&display, format!("failed to read file: {e}")))?;

    let document: serde_json::Value = match format {
        DocumentFormat::Toml => toml::from_str(&content)
            .map_err(|e| AssemblyError::load(&display, format!("TOML parse error: {e}")))?,
        DocumentFormat::Json => serde_json::from_str(&content)
            .map_err(|e| AssemblyError::load(&display, format!("JSON parse error: {e}")))?,
    };

    let here = document_dir(path)?;
    let here = here.to_string_lossy();
    match ConfigValue::from(document) {
        ConfigValue::Map(map) => map
            .into_iter()
            .map(|(key, value)| {
                interpolate_value(value, &here)
                    .map(|value| (key, value))
                    .map_err(|message| AssemblyError::load(&display, message))
            })
            .collect::<AssemblyResult<Vec<_>>>()
            .map(|entries| entries.into_iter().collect()),
        other => Err(AssemblyError::load(
            &display,
            format!("top level must be a mapping, got {}", other.kind()),
        )),
    }
}

fn interpolate_value(value: ConfigValue, here: &str) -> Result<ConfigValue, String> {
    Ok(match value {
        ConfigValue::String(s) => ConfigValue::String(interpolate(&s, here)?),
        ConfigValue::List(items) => ConfigValue::List(
            items
                .into_iter()
                .map(|item| interpolate_value(item, here))
                .collect::<Result<_, _>>()?,
        ),
        ConfigValue::Map(map) => ConfigValue::Map(
            map.into_iter()
                .map(|(key, value)| interpolate_value(value, here).map(|value| (key, value)))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect(),
        ),
        other => other,
    })
}

/// Expands `${here}`, `${env:NAME}` and `${env:NAME:-default}`; `$${`
/// produces a literal `${`.
pub fn interpolate(input: &str, here: &str) -> Result<String, String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('$') {
        output.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("$${") {
            output.push_str("${");
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated binding in '{input}'"))?;
            output.push_str(&expand_binding(&after[..end], here)?);
            rest = &after[end + 1..];
        } else {
            output.push('$');
            rest = &tail[1..];
        }
    }
    output.push_str(rest);
    Ok(output)
}

fn expand_binding(binding: &str, here: &str) -> Result<String, String> {
    if binding == "here" {
        return Ok(here.to_string());
    }
    let Some(spec) = binding.strip_prefix("env:") else {
        return Err(format!("unknown binding '${{{binding}}}'"));
    };
    let (name, default) = match spec.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (spec, None),
    };
    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(format!("environment variable '{name}' is not set")),
    }
}
