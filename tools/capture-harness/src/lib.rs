pub mod config;
pub mod errors;
pub mod inspect;
pub mod invoker;
pub mod log_retention;
pub mod logging;
pub mod recorder;
pub mod runtime;
pub mod separator;
pub mod serialization;
pub mod suite;
pub mod types;

use clap::{error::ErrorKind, Parser, ValueEnum};
use config::{
    channel_paths, ensure_distinct_channels, load_config, log_path, output_dir, resolve_token,
    AppConfig, CliOverrides,
};
use errors::HarnessError;
use inspect::inspect_run;
use invoker::{Invoker, Submission};
use logging::{JsonlLogger, Level, NullLog, RunLog};
use recorder::Recorder;
use runtime::{Channel, ProductionRuntime};
use separator::SeparatorToken;
use serde_json::json;
use suite::{fixed_inputs, EchoSubmission};
use types::{Alignment, RunSummary, RuntimeScope};

#[derive(Debug, Clone, Parser)]
#[command(name = "capture-harness")]
#[command(about = "Runs the submission over the fixed inputs and records every outcome")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    #[arg(long)]
    pub working_dir: Option<std::path::PathBuf>,
    #[arg(long)]
    pub secret: Option<String>,
    #[arg(long, value_enum)]
    pub alignment: Option<CliAlignment>,
    #[arg(long)]
    pub output_dir: Option<std::path::PathBuf>,
    #[arg(long, default_value_t = false)]
    pub no_log: bool,
    /// Decode the channel files of an earlier run instead of running.
    #[arg(long, default_value_t = false)]
    pub inspect: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliAlignment {
    Strict,
    Legacy,
}

impl From<CliAlignment> for Alignment {
    fn from(value: CliAlignment) -> Self {
        match value {
            CliAlignment::Strict => Alignment::Strict,
            CliAlignment::Legacy => Alignment::Legacy,
        }
    }
}

pub fn run() -> Result<i32, HarnessError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| HarnessError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, HarnessError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(HarnessError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        working_dir: cli.working_dir.clone(),
        secret: cli.secret.clone(),
        alignment: cli.alignment.map(Into::into),
        output_dir: cli.output_dir.clone(),
        no_log: cli.no_log,
    };
    let (cfg, scope) = load_config(&overrides, cwd, runtime.file_system.as_ref())?;

    if cli.inspect {
        return inspect_previous_run(runtime, &cfg, &scope);
    }

    let token = resolve_token(&cfg)?;
    let logger = run_logger(&cfg, &scope);
    let log: &dyn RunLog = match &logger {
        Some(logger) => logger,
        None => &NullLog,
    };
    let inputs = fixed_inputs();
    run_submission(runtime, &cfg, &scope, token, &EchoSubmission, &inputs, log)?;
    Ok(0)
}

/// One evaluation run: open the channels, drive every input, close the channels.
///
/// Submission failures are recorded and never returned; channel failures are.
pub fn run_submission<S: Submission + ?Sized>(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RuntimeScope,
    token: SeparatorToken,
    submission: &S,
    inputs: &[S::Input],
    log: &dyn RunLog,
) -> Result<RunSummary, HarnessError> {
    let paths = channel_paths(cfg, scope, &token);
    log.event(
        Level::Info,
        logging::RUN_STARTED,
        json!({
            "secret": token.secret(),
            "alignment": cfg.harness.alignment.as_str(),
            "inputs": inputs.len(),
            "values": paths.values.display().to_string(),
            "exceptions": paths.exceptions.display().to_string(),
        }),
    );

    ensure_distinct_channels(&paths).inspect_err(|e| abort(log, e))?;
    runtime
        .file_system
        .create_dir_all(&output_dir(cfg, scope))
        .map_err(|e| HarnessError::ChannelInit(e.to_string()))
        .inspect_err(|e| abort(log, e))?;

    let invoker = Invoker {
        alignment: cfg.harness.alignment,
        main_arguments: cfg.context.main_arguments.as_deref(),
        log,
    };
    let outcome = Recorder::scoped(
        runtime.channels.as_ref(),
        &paths,
        token,
        &cfg.broadcast.sinks,
        |recorder| {
            log.event(Level::Info, logging::CHANNELS_OPENED, json!({}));
            invoker.execute(recorder, submission, inputs)
        },
    );

    match &outcome {
        Ok(summary) => log.event(
            Level::Info,
            logging::RUN_FINISHED,
            json!({
                "inputs": summary.inputs,
                "failures": summary.failures,
                "separators": summary.separators,
            }),
        ),
        Err(error) => abort(log, error),
    }
    outcome
}

fn abort(log: &dyn RunLog, error: &HarnessError) {
    log.event(
        Level::Error,
        logging::RUN_ABORTED,
        json!({ "error": error.to_string() }),
    );
}

fn run_logger(cfg: &AppConfig, scope: &RuntimeScope) -> Option<JsonlLogger> {
    let path = log_path(cfg, scope)?;
    let mut logger = JsonlLogger::new(path);
    logger.max_payload_bytes = cfg.logging.max_payload_bytes;
    logger.budget_bytes = cfg.logging.budget_bytes;
    Some(logger)
}

fn inspect_previous_run(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RuntimeScope,
) -> Result<i32, HarnessError> {
    let Some(secret) = cfg.harness.secret.as_deref() else {
        return Err(HarnessError::Cli(
            "--inspect needs the run's secret (--secret or harness.secret)".to_string(),
        ));
    };
    let token = SeparatorToken::new(secret)?;
    let paths = channel_paths(cfg, scope, &token);
    let report = inspect_run(runtime.file_system.as_ref(), &paths, &token)?;
    let rendered =
        serde_json::to_string_pretty(&report).map_err(|e| HarnessError::Encode(e.to_string()))?;

    let mut stdout = runtime.channels.stdout();
    stdout.write_str(&rendered)?;
    stdout.write_str("\n")?;
    stdout.flush()?;
    Ok(0)
}
