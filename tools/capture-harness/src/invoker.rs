//! Drives the fixed evaluation sequence against a submission.

use crate::errors::HarnessError;
use crate::logging::{Level, RunLog, INPUT_RECORDED, SUBMISSION_FAILED};
use crate::recorder::Recorder;
use crate::types::{Alignment, RunSummary};
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Once;

pub const PANIC_KIND: &str = "AssertionError";

/// A failure raised by the code under evaluation. It is data to be recorded,
/// never a reason to stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionError {
    pub kind: String,
    pub message: String,
    pub stacktrace: String,
}

impl SubmissionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stacktrace: String::new(),
        }
    }

    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = stacktrace.into();
        self
    }

    /// Uses the error's type name as the kind and its source chain as the trace.
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        let kind = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error")
            .to_string();
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            kind,
            message: error.to_string(),
            stacktrace: chain.join("\n"),
        }
    }

    /// The trace is the panic site seen by the hook on this thread, if any.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        let site = PANIC_SITE.with(|site| site.borrow_mut().take());
        Self::new(PANIC_KIND, message).with_stacktrace(site.unwrap_or_default())
    }
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SubmissionError {}

/// The code under evaluation: one entry point taking one input.
pub trait Submission {
    type Input;
    type Output: Serialize;

    fn call(&self, input: &Self::Input) -> Result<Self::Output, SubmissionError>;

    /// Program entry point, run in the leading segment when main arguments
    /// are configured.
    fn main(&self, _args: &[String]) -> Result<(), SubmissionError> {
        Ok(())
    }
}

thread_local! {
    static PANIC_SITE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a hook that remembers where the current thread panicked.
///
/// The previous hook still runs, so the usual `panicked at` report reaches
/// the real stderr and lands inside the failing input's stderr segment.
/// A backtrace is added when `RUST_BACKTRACE` enables one.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let mut trace = match info.location() {
                Some(location) => format!("panicked at {location}"),
                None => "panicked at an unknown location".to_string(),
            };
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                trace.push('\n');
                trace.push_str(&backtrace.to_string());
            }
            PANIC_SITE.with(|site| *site.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn guarded<T>(call: impl FnOnce() -> Result<T, SubmissionError>) -> Result<T, SubmissionError> {
    install_panic_hook();
    PANIC_SITE.with(|site| site.borrow_mut().take());
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(SubmissionError::from_panic(payload)),
    }
}

/// Calls the submission, turning a panic into a [`SubmissionError`].
pub fn invoke<S: Submission + ?Sized>(
    submission: &S,
    input: &S::Input,
) -> Result<S::Output, SubmissionError> {
    guarded(|| submission.call(input))
}

pub fn invoke_main<S: Submission + ?Sized>(
    submission: &S,
    args: &[String],
) -> Result<(), SubmissionError> {
    guarded(|| submission.main(args))
}

pub struct Invoker<'a> {
    pub alignment: Alignment,
    pub main_arguments: Option<&'a [String]>,
    pub log: &'a dyn RunLog,
}

impl Invoker<'_> {
    /// Runs every input in order. Only channel failures end the run early.
    ///
    /// Layout per channel: one leading separator, the optional main-call
    /// record, then a separator before each input's records.
    pub fn execute<S: Submission + ?Sized>(
        &self,
        recorder: &mut Recorder,
        submission: &S,
        inputs: &[S::Input],
    ) -> Result<RunSummary, HarnessError> {
        let mut failures = 0;
        recorder.emit_separator()?;

        if let Some(args) = self.main_arguments {
            let outcome = invoke_main(submission, args);
            if let Err(error) = &outcome {
                failures += 1;
                self.log_failure(None, error);
            }
            recorder.record_exception(outcome.err().as_ref())?;
        }

        for (index, input) in inputs.iter().enumerate() {
            recorder.emit_separator()?;
            match invoke(submission, input) {
                Ok(value) => {
                    recorder.record_value(&value)?;
                    recorder.record_exception(None)?;
                }
                Err(error) => {
                    failures += 1;
                    self.log_failure(Some(index), &error);
                    if self.alignment == Alignment::Strict {
                        recorder.record_absent_value()?;
                    }
                    recorder.record_exception(Some(&error))?;
                }
            }
            self.log.event(Level::Info, INPUT_RECORDED, json!({ "index": index }));
        }

        Ok(RunSummary {
            inputs: inputs.len(),
            failures,
            separators: recorder.separators_emitted(),
        })
    }

    fn log_failure(&self, index: Option<usize>, error: &SubmissionError) {
        self.log.event(
            Level::Warn,
            SUBMISSION_FAILED,
            json!({
                "index": index,
                "kind": error.kind,
                "message": error.message,
            }),
        );
    }
}
