//! nlquery: natural-language to JQL/SOQL agents over an LLM tool-calling loop.
//!
//! - [`agent_core`]: the loop (invoke, route, dispatch), validation retry, supervisor
//! - [`tools`]: tool specs, registry, argument validation
//! - [`inference`]: OpenAI-compatible chat client
//! - [`jira`] / [`salesforce`]: REST clients, domain tools, and the two agents

pub mod agent_core;
pub mod config;
pub mod dates;
pub mod inference;
pub mod jira;
pub mod matching;
pub mod salesforce;
pub mod tools;

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use config::LoggingConfig;

/// Rotated log files kept next to the active one.
const KEEP_LOGS: u32 = 3;

/// Install the global tracing subscriber.
///
/// Logs go to stderr unless a file is configured (`log_file` overrides
/// `logging.file`). A log file is rotated on startup: `x.log` → `x.log.1` → … → `.3`.
/// `RUST_LOG` overrides the default `nlquery=info,warn` filter.
pub fn init_tracing(logging: &LoggingConfig, log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nlquery=info,warn"));

    let path = log_file.or(logging.file.as_deref());
    let writer = match path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            rotate_log_file(path, KEEP_LOGS);
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(FlushingWriter::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(path.is_none())
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?path,
        pid = std::process::id(),
        "logging initialised"
    );
    Ok(())
}

/// Shift `base` → `base.1` → … → `base.{keep}`, deleting the oldest.
/// Missing files in the chain are skipped.
fn rotate_log_file(base: &Path, keep: u32) {
    let numbered = |i: u32| format!("{}.{i}", base.display());
    let _ = std::fs::remove_file(numbered(keep));
    for i in (1..keep).rev() {
        let _ = std::fs::rename(numbered(i), numbered(i + 1));
    }
    if base.exists() {
        let _ = std::fs::rename(base, numbered(1));
    }
}

/// A file writer that flushes after every write, so log lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<File>>,
}

impl FlushingWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|e| io::Error::other(format!("lock poisoned: {e}")))
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.lock()?;
        let n = file.write(buf)?;
        file.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_log_file_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nlq.log");
        for (name, body) in [("nlq.log", "current"), ("nlq.log.1", "one"), ("nlq.log.3", "three")] {
            std::fs::write(dir.path().join(name), body).unwrap();
        }

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("nlq.log.1"), "current");
        assert_eq!(read("nlq.log.2"), "one");
        assert!(!dir.path().join("nlq.log.3").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut writer = FlushingWriter::new(File::create(&path).unwrap());
        writer.write_all(b"line one\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line one\n");
    }
}
