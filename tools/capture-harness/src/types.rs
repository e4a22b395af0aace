use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What lands on the values channel when a submission call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// Write an explicit "nothing" value so every step has one record per channel.
    #[default]
    Strict,
    /// Write nothing to the values channel for a failing step.
    Legacy,
}

impl Alignment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Legacy => "legacy",
        }
    }
}

/// Sinks that can take part in the separator broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkId {
    Values,
    Exceptions,
    Stdout,
    Stderr,
}

impl SinkId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Values => "values",
            Self::Exceptions => "exceptions",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Broadcast order used when nothing is configured.
pub const DEFAULT_BROADCAST: [SinkId; 4] = [
    SinkId::Values,
    SinkId::Exceptions,
    SinkId::Stderr,
    SinkId::Stdout,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    pub values: PathBuf,
    pub exceptions: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeScope {
    pub process_cwd: PathBuf,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub inputs: usize,
    pub failures: usize,
    pub separators: usize,
}

#[cfg(test)]
mod tests {
    use super::{Alignment, SinkId};

    #[test]
    fn alignment_names_match_the_config_spelling() {
        for alignment in [Alignment::Strict, Alignment::Legacy] {
            let rendered = serde_json::to_value(alignment).expect("json");
            assert_eq!(rendered, alignment.as_str());
        }
    }

    #[test]
    fn sink_ids_serialize_lowercase() {
        let text = serde_json::to_string(&[SinkId::Values, SinkId::Stderr]).expect("json");
        assert_eq!(text, "[\"values\",\"stderr\"]");
    }
}
