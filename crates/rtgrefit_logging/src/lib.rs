//! Logging bootstrap for RTG Refit binaries.
//!
//! Two sinks: a size-rotated plain-text file under the configured log
//! directory, and stderr. `RUST_LOG` overrides the default filter for both.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "rtgrefit=info,rtgrefit_sync=info";
const DEFAULT_KEEP_FILES: usize = 5;
const DEFAULT_MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// How a binary wants its logs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub app_name: String,
    pub log_dir: PathBuf,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
    pub keep_files: usize,
    pub max_file_bytes: u64,
}

impl LogConfig {
    pub fn new(app_name: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_name: app_name.into(),
            log_dir: log_dir.into(),
            verbose: false,
            keep_files: DEFAULT_KEEP_FILES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Install the global subscriber. Call once per process.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let log_dir = config.log_dir.display();
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    let writer = SharedRotatingWriter::open(config)?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

/// Size-bounded log file: `<name>.log`, then `<name>.log.1` (newest) up to
/// `<name>.log.<keep-1>` (oldest).
struct RotatingFile {
    dir: PathBuf,
    stem: String,
    keep_files: usize,
    max_bytes: u64,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, app_name: &str, keep_files: usize, max_bytes: u64) -> io::Result<Self> {
        let mut rotating = Self {
            dir: dir.to_path_buf(),
            stem: file_stem(app_name),
            keep_files: keep_files.max(1),
            max_bytes,
            file: None,
            written: 0,
        };
        rotating.reopen()?;
        if rotating.written > rotating.max_bytes {
            rotating.rotate()?;
        }
        Ok(rotating)
    }

    fn path(&self, generation: usize) -> PathBuf {
        match generation {
            0 => self.dir.join(format!("{}.log", self.stem)),
            n => self.dir.join(format!("{}.log.{}", self.stem, n)),
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(0))?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        let oldest = self.keep_files - 1;
        if oldest == 0 {
            // Single generation: truncate in place.
            File::create(self.path(0))?;
            return self.reopen();
        }
        let last = self.path(oldest);
        if last.exists() {
            fs::remove_file(last)?;
        }
        for generation in (0..oldest).rev() {
            let from = self.path(generation);
            if from.exists() {
                fs::rename(from, self.path(generation + 1))?;
            }
        }
        self.reopen()
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
struct SharedRotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl SharedRotatingWriter {
    fn open(config: &LogConfig) -> Result<Self> {
        let file = RotatingFile::open(
            &config.log_dir,
            &config.app_name,
            config.keep_files,
            config.max_file_bytes,
        )
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut RotatingFile) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut guard)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRotatingWriter {
    type Writer = SharedRotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if stem.is_empty() {
        "rtgrefit".to_string()
    } else {
        stem
    }
}
