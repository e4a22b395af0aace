//! Reads back the two channel files of a finished run.
//!
//! Grading happens elsewhere; this is the same split-and-decode a grader
//! performs, packaged for debugging a run by hand.

use crate::errors::HarnessError;
use crate::runtime::FileSystem;
use crate::separator::{split_segments, SeparatorToken};
use crate::serialization::{decode_exception, decode_value, Decoded, ExceptionRecord};
use crate::types::ChannelPaths;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub secret: String,
    pub segments: Vec<SegmentReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentReport {
    pub index: usize,
    pub value: SlotReport<Value>,
    pub exception: SlotReport<ExceptionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "record", rename_all = "lowercase")]
pub enum SlotReport<T> {
    Missing,
    Absent,
    Present(T),
}

pub fn inspect_run(
    fs: &dyn FileSystem,
    paths: &ChannelPaths,
    token: &SeparatorToken,
) -> Result<RunReport, HarnessError> {
    let values = fs.read_to_string(&paths.values)?;
    let exceptions = fs.read_to_string(&paths.exceptions)?;
    decode_run(&values, &exceptions, token)
}

pub fn decode_run(
    values: &str,
    exceptions: &str,
    token: &SeparatorToken,
) -> Result<RunReport, HarnessError> {
    let value_segments = split_segments(values, token);
    let exception_segments = split_segments(exceptions, token);
    if value_segments.len() != exception_segments.len() {
        return Err(HarnessError::Decode(format!(
            "values channel has {} segments, exceptions channel has {}",
            value_segments.len(),
            exception_segments.len()
        )));
    }

    let segments = value_segments
        .iter()
        .zip(exception_segments.iter())
        .enumerate()
        .map(|(index, (value, exception))| -> Result<SegmentReport, HarnessError> {
            let value = match decode_value(value)? {
                Decoded::Missing => SlotReport::Missing,
                Decoded::Absent => SlotReport::Absent,
                Decoded::Present(encoded) => SlotReport::Present(encoded.to_plain()?),
            };
            let exception = match decode_exception(exception)? {
                Decoded::Missing => SlotReport::Missing,
                Decoded::Absent => SlotReport::Absent,
                Decoded::Present(record) => SlotReport::Present(record),
            };
            Ok(SegmentReport {
                index,
                value,
                exception,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RunReport {
        secret: token.secret().to_string(),
        segments,
    })
}
