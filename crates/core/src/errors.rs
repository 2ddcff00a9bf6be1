use thiserror::Error;

/// Remediation text appended to every configuration-class error.
pub const CONFIG_HELP: &str = "\
    Did you set the ASSEMBLER_CONFIG environment variable?
    If you did not, make sure to add it by typing
    export ASSEMBLER_CONFIG=config.toml from the shell";

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("The required key '{key}' does not exist in configuration.\n{help}", help = CONFIG_HELP)]
    MissingKey { key: String },

    #[error("{message}\n{help}", help = CONFIG_HELP)]
    Signature { message: String },

    #[error("Configuration was already initialized")]
    AlreadyInitialized,

    #[error("Configuration has not been initialized.\n{help}", help = CONFIG_HELP)]
    NotInitialized,

    #[error("Invalid dotted name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Cannot resolve '{name}': no module named '{module}'")]
    UnknownModule { name: String, module: String },

    #[error("Cannot resolve '{name}': attribute '{segment}' not found")]
    MissingAttribute { name: String, segment: String },

    #[error("'{name}' resolved to a {found}, expected a {expected}")]
    UnexpectedSymbol {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Failed to create component with factory '{factory}': {source}")]
    Construction {
        factory: String,
        #[source]
        source: Box<AssemblyError>,
    },

    #[error("Failed to initialize component '{component}': {source}")]
    Initialization {
        component: String,
        #[source]
        source: Box<AssemblyError>,
    },

    #[error("Failed to load configuration from {path}: {message}")]
    Load { path: String, message: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Scheduler state error: {0}")]
    SchedulerState(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type AssemblyResult<T> = Result<T, AssemblyError>;

impl AssemblyError {
    pub fn missing_key<S: Into<String>>(key: S) -> Self {
        Self::MissingKey { key: key.into() }
    }
    pub fn signature<S: Into<String>>(message: S) -> Self {
        Self::Signature {
            message: message.into(),
        }
    }
    pub fn invalid_value<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
    pub fn load<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Errors that point the user at the configuration-loading mechanism.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            AssemblyError::MissingKey { .. }
                | AssemblyError::Signature { .. }
                | AssemblyError::AlreadyInitialized
                | AssemblyError::NotInitialized
        )
    }

    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            AssemblyError::InvalidName { .. }
                | AssemblyError::UnknownModule { .. }
                | AssemblyError::MissingAttribute { .. }
                | AssemblyError::UnexpectedSymbol { .. }
        )
    }
}
