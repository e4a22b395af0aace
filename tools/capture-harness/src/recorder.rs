//! Owns the run's channels and the separator protocol.
//!
//! The values and exceptions channels are created by [`Recorder::open`] and
//! released by [`Recorder::close`]. A recorder that is dropped without being
//! closed closes itself, so a panic or an early `?` still releases both files.

use crate::errors::HarnessError;
use crate::invoker::SubmissionError;
use crate::runtime::{Channel, ChannelProvider};
use crate::separator::SeparatorToken;
use crate::serialization::{encode_absent_value, encode_exception, encode_value};
use crate::types::{ChannelPaths, SinkId};
use serde::Serialize;

pub struct Recorder {
    token: SeparatorToken,
    values: Box<dyn Channel>,
    exceptions: Box<dyn Channel>,
    stdout: Box<dyn Channel>,
    stderr: Box<dyn Channel>,
    broadcast: Vec<SinkId>,
    separators: usize,
    closed: bool,
}

impl Recorder {
    pub fn open(
        provider: &dyn ChannelProvider,
        paths: &ChannelPaths,
        token: SeparatorToken,
        broadcast: &[SinkId],
    ) -> Result<Self, HarnessError> {
        validate_broadcast(broadcast)?;
        let mut values = provider.create_file(&paths.values)?;
        let exceptions = match provider.create_file(&paths.exceptions) {
            Ok(channel) => channel,
            Err(error) => {
                let _ = values.close();
                return Err(error);
            }
        };
        Ok(Self {
            token,
            values,
            exceptions,
            stdout: provider.stdout(),
            stderr: provider.stderr(),
            broadcast: broadcast.to_vec(),
            separators: 0,
            closed: false,
        })
    }

    /// Opens a recorder, hands it to `body`, and closes it on every path out.
    ///
    /// An error from `body` wins over an error from closing.
    pub fn scoped<T>(
        provider: &dyn ChannelProvider,
        paths: &ChannelPaths,
        token: SeparatorToken,
        broadcast: &[SinkId],
        body: impl FnOnce(&mut Recorder) -> Result<T, HarnessError>,
    ) -> Result<T, HarnessError> {
        let mut recorder = Self::open(provider, paths, token, broadcast)?;
        let outcome = body(&mut recorder);
        let closed = recorder.close();
        let value = outcome?;
        closed?;
        Ok(value)
    }

    pub fn separators_emitted(&self) -> usize {
        self.separators
    }

    /// Writes the token to every broadcast sink, then flushes them all.
    pub fn emit_separator(&mut self) -> Result<(), HarnessError> {
        self.ensure_open()?;
        let broadcast = self.broadcast.clone();
        let token = self.token.as_str().to_string();
        for sink in &broadcast {
            self.channel(*sink).write_str(&token)?;
        }
        for sink in &broadcast {
            self.channel(*sink).flush()?;
        }
        self.separators += 1;
        Ok(())
    }

    pub fn record_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), HarnessError> {
        self.ensure_open()?;
        let encoded = encode_value(value, &self.token)?;
        self.values.write_str(&encoded)
    }

    /// Writes the explicit "nothing" record to the values channel.
    pub fn record_absent_value(&mut self) -> Result<(), HarnessError> {
        self.ensure_open()?;
        let encoded = encode_absent_value()?;
        self.values.write_str(&encoded)
    }

    /// Writes `exception`, or the absent marker for `None`.
    pub fn record_exception(
        &mut self,
        exception: Option<&SubmissionError>,
    ) -> Result<(), HarnessError> {
        self.ensure_open()?;
        let encoded = encode_exception(exception, &self.token)?;
        self.exceptions.write_str(&encoded)
    }

    /// Flushes and releases both channels. Later calls do nothing.
    ///
    /// Every channel gets its close attempt even when an earlier one fails;
    /// the first failure is returned.
    pub fn close(&mut self) -> Result<(), HarnessError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let results = [
            self.values.close(),
            self.exceptions.close(),
            self.stdout.flush(),
            self.stderr.flush(),
        ];
        results.into_iter().collect::<Result<Vec<()>, _>>().map(|_| ())
    }

    fn ensure_open(&self) -> Result<(), HarnessError> {
        if self.closed {
            return Err(HarnessError::ChannelIo("recorder already closed".to_string()));
        }
        Ok(())
    }

    fn channel(&mut self, sink: SinkId) -> &mut dyn Channel {
        match sink {
            SinkId::Values => self.values.as_mut(),
            SinkId::Exceptions => self.exceptions.as_mut(),
            SinkId::Stdout => self.stdout.as_mut(),
            SinkId::Stderr => self.stderr.as_mut(),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub fn validate_broadcast(broadcast: &[SinkId]) -> Result<(), HarnessError> {
    for required in [SinkId::Values, SinkId::Exceptions] {
        if !broadcast.contains(&required) {
            return Err(HarnessError::InvalidConfig(format!(
                "broadcast.sinks must include {}",
                required.as_str()
            )));
        }
    }
    for (index, sink) in broadcast.iter().enumerate() {
        if broadcast[..index].contains(sink) {
            return Err(HarnessError::InvalidConfig(format!(
                "broadcast.sinks lists {} twice",
                sink.as_str()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeChannelProvider;
    use crate::separator::split_segments;
    use crate::types::DEFAULT_BROADCAST;
    use std::path::PathBuf;

    fn paths() -> ChannelPaths {
        ChannelPaths {
            values: PathBuf::from("/run/abc_values.txt"),
            exceptions: PathBuf::from("/run/abc_exceptions.txt"),
        }
    }

    fn token() -> SeparatorToken {
        SeparatorToken::new("abc").expect("token")
    }

    #[test]
    fn separator_reaches_all_four_sinks_and_is_flushed() {
        let provider = FakeChannelProvider::new();
        let mut recorder =
            Recorder::open(&provider, &paths(), token(), &DEFAULT_BROADCAST).expect("open");
        recorder.emit_separator().expect("separator");

        let values = provider.file(&paths().values).expect("values channel");
        let exceptions = provider.file(&paths().exceptions).expect("exceptions channel");
        for channel in [
            values,
            exceptions,
            provider.stdout_channel(),
            provider.stderr_channel(),
        ] {
            assert_eq!(channel.flushed_contents(), "--abc-- SEP");
        }
        assert_eq!(recorder.separators_emitted(), 1);
    }

    #[test]
    fn broadcast_can_leave_out_standard_streams() {
        let provider = FakeChannelProvider::new();
        let mut recorder = Recorder::open(
            &provider,
            &paths(),
            token(),
            &[SinkId::Values, SinkId::Exceptions],
        )
        .expect("open");
        recorder.emit_separator().expect("separator");
        assert_eq!(provider.stdout_channel().contents(), "");
        assert_eq!(provider.stderr_channel().contents(), "");
    }

    #[test]
    fn records_land_between_separators() {
        let provider = FakeChannelProvider::new();
        let mut recorder =
            Recorder::open(&provider, &paths(), token(), &DEFAULT_BROADCAST).expect("open");
        recorder.emit_separator().expect("separator");
        recorder.emit_separator().expect("separator");
        recorder.record_value("input-1").expect("value");
        recorder.record_exception(None).expect("exception");
        recorder.close().expect("close");

        let values = provider.file(&paths().values).expect("values channel").contents();
        let exceptions = provider
            .file(&paths().exceptions)
            .expect("exceptions channel")
            .contents();
        assert_eq!(
            split_segments(&values, &token()),
            vec!["", r#"{"type":"text","data":"input-1"}"#]
        );
        assert_eq!(split_segments(&exceptions, &token()), vec!["", "null"]);
    }

    #[test]
    fn open_fails_with_channel_init_when_exceptions_file_is_unwritable() {
        let provider = FakeChannelProvider::new();
        provider.set_unwritable(paths().exceptions);
        let result = Recorder::open(&provider, &paths(), token(), &DEFAULT_BROADCAST);
        assert!(matches!(result, Err(HarnessError::ChannelInit(_))));
        let values = provider.file(&paths().values).expect("values channel");
        assert_eq!(values.closes(), 1);
    }

    #[test]
    fn close_is_once_and_drop_does_not_close_again() {
        let provider = FakeChannelProvider::new();
        let mut recorder =
            Recorder::open(&provider, &paths(), token(), &DEFAULT_BROADCAST).expect("open");
        recorder.close().expect("close");
        recorder.close().expect("second close");
        drop(recorder);

        let values = provider.file(&paths().values).expect("values channel");
        assert_eq!(values.closes(), 1);
    }

    #[test]
    fn writes_after_close_are_rejected() {
        let provider = FakeChannelProvider::new();
        let mut recorder =
            Recorder::open(&provider, &paths(), token(), &DEFAULT_BROADCAST).expect("open");
        recorder.close().expect("close");
        assert!(matches!(
            recorder.emit_separator(),
            Err(HarnessError::ChannelIo(_))
        ));
    }

    #[test]
    fn dropping_an_open_recorder_releases_channels() {
        let provider = FakeChannelProvider::new();
        {
            let mut recorder =
                Recorder::open(&provider, &paths(), token(), &DEFAULT_BROADCAST).expect("open");
            recorder.record_value(&42).expect("value");
        }
        let values = provider.file(&paths().values).expect("values channel");
        assert_eq!(values.closes(), 1);
        assert_eq!(values.flushed_contents(), r#"{"type":"integer","data":42}"#);
    }

    #[test]
    fn scoped_closes_after_a_failing_body() {
        let provider = FakeChannelProvider::new();
        let result: Result<(), HarnessError> =
            Recorder::scoped(&provider, &paths(), token(), &DEFAULT_BROADCAST, |_| {
                Err(HarnessError::ChannelIo("disk full".to_string()))
            });
        assert!(matches!(result, Err(HarnessError::ChannelIo(msg)) if msg == "disk full"));
        let exceptions = provider.file(&paths().exceptions).expect("exceptions channel");
        assert_eq!(exceptions.closes(), 1);
    }

    #[test]
    fn flush_failure_during_separator_is_fatal() {
        let provider = FakeChannelProvider::new();
        provider.stderr_channel().fail_flushes();
        let mut recorder = Recorder::open(
            &provider,
            &paths(),
            token(),
            &[SinkId::Values, SinkId::Exceptions, SinkId::Stderr],
        )
        .expect("open");
        assert!(matches!(
            recorder.emit_separator(),
            Err(HarnessError::ChannelIo(_))
        ));
        assert_eq!(recorder.separators_emitted(), 0);
    }

    #[test]
    fn broadcast_must_name_both_files_once() {
        assert!(validate_broadcast(&[SinkId::Values]).is_err());
        assert!(validate_broadcast(&[SinkId::Values, SinkId::Exceptions, SinkId::Values]).is_err());
        assert!(validate_broadcast(&DEFAULT_BROADCAST).is_ok());
    }
}
