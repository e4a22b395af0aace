use crate::errors::HarnessError;
use crate::recorder::validate_broadcast;
use crate::runtime::FileSystem;
use crate::separator::{validate_secret, SeparatorToken};
use crate::types::{Alignment, ChannelPaths, RuntimeScope, SinkId, DEFAULT_BROADCAST};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SECRET_PLACEHOLDER: &str = "{secret}";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub secret: Option<String>,
    pub alignment: Option<Alignment>,
    pub output_dir: Option<PathBuf>,
    pub no_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub harness: HarnessConfig,
    pub channels: ChannelsConfig,
    pub broadcast: BroadcastConfig,
    pub context: ContextConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    pub secret: Option<String>,
    pub alignment: Alignment,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelsConfig {
    pub values_file: String,
    pub exceptions_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastConfig {
    pub sinks: Vec<SinkId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextConfig {
    pub main_arguments: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            harness: HarnessConfig {
                secret: None,
                alignment: Alignment::Strict,
                output_dir: PathBuf::from("."),
            },
            channels: ChannelsConfig {
                values_file: "{secret}_values.txt".to_string(),
                exceptions_file: "{secret}_exceptions.txt".to_string(),
            },
            broadcast: BroadcastConfig {
                sinks: DEFAULT_BROADCAST.to_vec(),
            },
            context: ContextConfig {
                main_arguments: None,
            },
            logging: LoggingConfig {
                enabled: true,
                path: PathBuf::from(".capture-harness/logs/run.jsonl"),
                max_payload_bytes: crate::logging::DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: crate::logging::DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    harness: Option<PartialHarnessConfig>,
    channels: Option<PartialChannelsConfig>,
    broadcast: Option<PartialBroadcastConfig>,
    context: Option<PartialContextConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialHarnessConfig {
    secret: Option<String>,
    alignment: Option<Alignment>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialChannelsConfig {
    values_file: Option<String>,
    exceptions_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialBroadcastConfig {
    sinks: Option<Vec<SinkId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialContextConfig {
    main_arguments: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<(AppConfig, RuntimeScope), HarnessError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(&absolutize_path(process_cwd, path))?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| HarnessError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);

    let scope = resolve_scope(process_cwd, overrides);
    validate_config(&cfg)?;
    Ok((cfg, scope))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(harness) = partial.harness {
        if let Some(secret) = harness.secret {
            cfg.harness.secret = Some(secret);
        }
        if let Some(alignment) = harness.alignment {
            cfg.harness.alignment = alignment;
        }
        if let Some(output_dir) = harness.output_dir {
            cfg.harness.output_dir = output_dir;
        }
    }

    if let Some(channels) = partial.channels {
        if let Some(value) = channels.values_file {
            cfg.channels.values_file = value;
        }
        if let Some(value) = channels.exceptions_file {
            cfg.channels.exceptions_file = value;
        }
    }

    if let Some(broadcast) = partial.broadcast {
        if let Some(sinks) = broadcast.sinks {
            cfg.broadcast.sinks = sinks;
        }
    }

    if let Some(context) = partial.context {
        if let Some(args) = context.main_arguments {
            cfg.context.main_arguments = Some(args);
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.enabled {
            cfg.logging.enabled = value;
        }
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(secret) = &overrides.secret {
        cfg.harness.secret = Some(secret.clone());
    }
    if let Some(alignment) = overrides.alignment {
        cfg.harness.alignment = alignment;
    }
    if let Some(output_dir) = &overrides.output_dir {
        cfg.harness.output_dir = output_dir.clone();
    }
    if overrides.no_log {
        cfg.logging.enabled = false;
    }
}

pub fn resolve_scope(process_cwd: &Path, overrides: &CliOverrides) -> RuntimeScope {
    let process_cwd = process_cwd.to_path_buf();
    let working_dir = match &overrides.working_dir {
        Some(path) => absolutize_path(&process_cwd, path),
        None => process_cwd.clone(),
    };
    RuntimeScope {
        process_cwd,
        working_dir,
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

/// The configured secret, or a freshly generated one.
pub fn resolve_token(cfg: &AppConfig) -> Result<SeparatorToken, HarnessError> {
    match &cfg.harness.secret {
        Some(secret) => SeparatorToken::new(secret),
        None => Ok(SeparatorToken::generate()),
    }
}

pub fn output_dir(cfg: &AppConfig, scope: &RuntimeScope) -> PathBuf {
    absolutize_path(&scope.working_dir, &cfg.harness.output_dir)
}

pub fn channel_paths(cfg: &AppConfig, scope: &RuntimeScope, token: &SeparatorToken) -> ChannelPaths {
    let dir = output_dir(cfg, scope);
    ChannelPaths {
        values: dir.join(expand_template(&cfg.channels.values_file, token.secret())),
        exceptions: dir.join(expand_template(&cfg.channels.exceptions_file, token.secret())),
    }
}

/// A generated secret is only known after loading, so the expanded paths are checked again here.
pub fn ensure_distinct_channels(paths: &ChannelPaths) -> Result<(), HarnessError> {
    if paths.values == paths.exceptions {
        return Err(HarnessError::InvalidConfig(format!(
            "values and exceptions channels both resolve to {}",
            paths.values.display()
        )));
    }
    Ok(())
}

pub fn log_path(cfg: &AppConfig, scope: &RuntimeScope) -> Option<PathBuf> {
    if !cfg.logging.enabled {
        return None;
    }
    Some(absolutize_path(&scope.working_dir, &cfg.logging.path))
}

fn expand_template(template: &str, secret: &str) -> String {
    template.replace(SECRET_PLACEHOLDER, secret)
}

fn validate_config(cfg: &AppConfig) -> Result<(), HarnessError> {
    if let Some(secret) = &cfg.harness.secret {
        validate_secret(secret)?;
    }

    validate_broadcast(&cfg.broadcast.sinks)?;

    let values = cfg.channels.values_file.trim();
    let exceptions = cfg.channels.exceptions_file.trim();
    if values.is_empty() || exceptions.is_empty() {
        return Err(HarnessError::InvalidConfig(
            "channels.values_file and channels.exceptions_file must be set".to_string(),
        ));
    }
    let distinct = match &cfg.harness.secret {
        Some(secret) => expand_template(values, secret) != expand_template(exceptions, secret),
        None => values != exceptions,
    };
    if !distinct {
        return Err(HarnessError::InvalidConfig(
            "channels.values_file and channels.exceptions_file must differ".to_string(),
        ));
    }

    if cfg.logging.max_payload_bytes == 0 {
        return Err(HarnessError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
