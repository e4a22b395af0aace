use crate::errors::HarnessError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// An append-only, flushable sink bound to one destination for one run.
pub trait Channel: Send {
    fn write_str(&mut self, text: &str) -> Result<(), HarnessError>;
    fn flush(&mut self) -> Result<(), HarnessError>;
    /// Flushes and releases the destination. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), HarnessError>;
}

/// Hands out the channels a run needs.
pub trait ChannelProvider: Send + Sync {
    /// Creates or truncates `path`.
    fn create_file(&self, path: &Path) -> Result<Box<dyn Channel>, HarnessError>;
    fn stdout(&self) -> Box<dyn Channel>;
    fn stderr(&self) -> Box<dyn Channel>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, HarnessError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), HarnessError>;
}

pub struct FileChannel {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileChannel {
    pub fn create(path: &Path) -> Result<Self, HarnessError> {
        let file = File::create(path)
            .map_err(|e| HarnessError::ChannelInit(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, HarnessError> {
        let path = self.path.display().to_string();
        self.writer
            .as_mut()
            .ok_or_else(|| HarnessError::ChannelIo(format!("{path}: channel already closed")))
    }
}

impl Channel for FileChannel {
    fn write_str(&mut self, text: &str) -> Result<(), HarnessError> {
        let path = self.path.display().to_string();
        self.writer()?
            .write_all(text.as_bytes())
            .map_err(|e| HarnessError::ChannelIo(format!("{path}: {e}")))
    }

    fn flush(&mut self) -> Result<(), HarnessError> {
        let path = self.path.display().to_string();
        self.writer()?
            .flush()
            .map_err(|e| HarnessError::ChannelIo(format!("{path}: {e}")))
    }

    fn close(&mut self) -> Result<(), HarnessError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer
            .flush()
            .map_err(|e| HarnessError::ChannelIo(format!("{}: {e}", self.path.display())))
    }
}

pub struct StdoutChannel;

impl Channel for StdoutChannel {
    fn write_str(&mut self, text: &str) -> Result<(), HarnessError> {
        std::io::stdout()
            .write_all(text.as_bytes())
            .map_err(|e| HarnessError::ChannelIo(format!("stdout: {e}")))
    }

    fn flush(&mut self) -> Result<(), HarnessError> {
        std::io::stdout()
            .flush()
            .map_err(|e| HarnessError::ChannelIo(format!("stdout: {e}")))
    }

    // The process owns the stream; releasing it only means flushing.
    fn close(&mut self) -> Result<(), HarnessError> {
        self.flush()
    }
}

pub struct StderrChannel;

impl Channel for StderrChannel {
    fn write_str(&mut self, text: &str) -> Result<(), HarnessError> {
        std::io::stderr()
            .write_all(text.as_bytes())
            .map_err(|e| HarnessError::ChannelIo(format!("stderr: {e}")))
    }

    fn flush(&mut self) -> Result<(), HarnessError> {
        std::io::stderr()
            .flush()
            .map_err(|e| HarnessError::ChannelIo(format!("stderr: {e}")))
    }

    fn close(&mut self) -> Result<(), HarnessError> {
        self.flush()
    }
}

pub struct ProductionChannelProvider;

impl ChannelProvider for ProductionChannelProvider {
    fn create_file(&self, path: &Path) -> Result<Box<dyn Channel>, HarnessError> {
        Ok(Box::new(FileChannel::create(path)?))
    }

    fn stdout(&self) -> Box<dyn Channel> {
        Box::new(StdoutChannel)
    }

    fn stderr(&self) -> Box<dyn Channel> {
        Box::new(StderrChannel)
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, HarnessError> {
        std::fs::read_to_string(path).map_err(|e| HarnessError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), HarnessError> {
        std::fs::create_dir_all(path).map_err(|e| HarnessError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub channels: Arc<dyn ChannelProvider>,
    pub file_system: Arc<dyn FileSystem>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(ProductionChannelProvider),
            file_system: Arc::new(ProductionFileSystem),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct FakeChannelState {
    contents: String,
    flushed_len: usize,
    flushes: usize,
    closes: usize,
    fail_write_after: Option<usize>,
    fail_flush: bool,
}

/// In-memory channel. Clones share one buffer so a test can keep a handle
/// while the recorder owns another.
#[derive(Debug, Default, Clone)]
pub struct FakeChannel {
    state: Arc<Mutex<FakeChannelState>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.state.lock().expect("channel lock").contents.clone()
    }

    /// Text that has been written and then flushed.
    pub fn flushed_contents(&self) -> String {
        let state = self.state.lock().expect("channel lock");
        state.contents[..state.flushed_len].to_string()
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().expect("channel lock").flushes
    }

    pub fn closes(&self) -> usize {
        self.state.lock().expect("channel lock").closes
    }

    /// Let `writes` more writes succeed, then fail every write after that.
    pub fn fail_writes_after(&self, writes: usize) {
        self.state.lock().expect("channel lock").fail_write_after = Some(writes);
    }

    pub fn fail_flushes(&self) {
        self.state.lock().expect("channel lock").fail_flush = true;
    }
}

impl Channel for FakeChannel {
    fn write_str(&mut self, text: &str) -> Result<(), HarnessError> {
        let mut state = self.state.lock().expect("channel lock");
        if let Some(remaining) = state.fail_write_after.as_mut() {
            if *remaining == 0 {
                return Err(HarnessError::ChannelIo("fake write failure".to_string()));
            }
            *remaining -= 1;
        }
        state.contents.push_str(text);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HarnessError> {
        let mut state = self.state.lock().expect("channel lock");
        if state.fail_flush {
            return Err(HarnessError::ChannelIo("fake flush failure".to_string()));
        }
        state.flushed_len = state.contents.len();
        state.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), HarnessError> {
        let mut state = self.state.lock().expect("channel lock");
        state.flushed_len = state.contents.len();
        state.closes += 1;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeChannelProvider {
    files: Arc<Mutex<HashMap<PathBuf, FakeChannel>>>,
    unwritable: Arc<Mutex<Vec<PathBuf>>>,
    stdout: FakeChannel,
    stderr: FakeChannel,
}

impl FakeChannelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_file` fail for `path`.
    pub fn set_unwritable(&self, path: impl Into<PathBuf>) {
        self.unwritable.lock().expect("unwritable lock").push(path.into());
    }

    pub fn file(&self, path: &Path) -> Option<FakeChannel> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

    pub fn stdout_channel(&self) -> FakeChannel {
        self.stdout.clone()
    }

    pub fn stderr_channel(&self) -> FakeChannel {
        self.stderr.clone()
    }
}

impl ChannelProvider for FakeChannelProvider {
    fn create_file(&self, path: &Path) -> Result<Box<dyn Channel>, HarnessError> {
        if self
            .unwritable
            .lock()
            .expect("unwritable lock")
            .iter()
            .any(|p| p == path)
        {
            return Err(HarnessError::ChannelInit(format!(
                "{}: permission denied",
                path.display()
            )));
        }
        let channel = FakeChannel::new();
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), channel.clone());
        Ok(Box::new(channel))
    }

    fn stdout(&self) -> Box<dyn Channel> {
        Box::new(self.stdout.clone())
    }

    fn stderr(&self) -> Box<dyn Channel> {
        Box::new(self.stderr.clone())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.insert(path, contents);
        fs
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().expect("dirs lock").clone()
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, HarnessError> {
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| HarnessError::Io(format!("missing file {}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), HarnessError> {
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }
}
