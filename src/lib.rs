//! Desktop Ops: a governed, audited agent loop for local desktop tasks.
//!
//! A goal goes in; the engine matches it against deterministic recipes or
//! drives a model through tool calls, with every call classified by risk,
//! checked against path policy and, when required, approved by the
//! operator. Each run ends with a persisted audit record and a report.
//!
//! Entry points: [`DesktopOps::run`] and [`DesktopOps::plan`].

pub mod audit;
pub mod config;
pub mod desktop_ops;
pub mod governance;
pub mod inference;
pub mod recipes;
pub mod tools;
pub mod workspace;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};

pub use config::{DesktopOpsConfig, DesktopOpsMode, SummaryFormat};
pub use desktop_ops::{DesktopOps, DesktopOpsResult, EngineError, RunStatus};

/// Rotated log files kept next to the current one.
const LOG_KEEP: u32 = 3;

/// Platform data directory for Desktop Ops.
///
/// - macOS: `~/Library/Application Support/desktop-ops/`
/// - Windows: `{FOLDERID_RoamingAppData}\desktop-ops\`
/// - Linux: `$XDG_DATA_HOME/desktop-ops/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.desktop-ops/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("desktop-ops");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".desktop-ops")
}

/// Install the tracing subscriber, writing to `<data_dir>/desktop_ops.log`.
///
/// Rotates existing logs first (`desktop_ops.log` → `.1` → `.2` → `.3`).
/// The filter defaults to `desktop_ops=info,warn` and honours `RUST_LOG`.
/// A subscriber that is already installed is left in place.
pub fn init_tracing() -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("desktop_ops.log");
    rotate_log_file(&log_path, LOG_KEEP);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("desktop_ops=info,warn"));

    let installed = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            data_dir = %log_dir.display(),
            log_file = %log_path.display(),
            pid = std::process::id(),
            "=== Desktop Ops starting ==="
        );
    }
    Ok(log_path)
}

/// Rotate `base` → `base.1` → … → `base.{keep}`; the oldest is deleted and
/// gaps in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// File writer that flushes after every write, so each log line is on disk
/// even if the process dies mid-run.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("desktop_ops.log");
        std::fs::write(&base, "current").unwrap();
        std::fs::write(dir.path().join("desktop_ops.log.1"), "one").unwrap();
        std::fs::write(dir.path().join("desktop_ops.log.3"), "three").unwrap();

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let read = |suffix: &str| {
            std::fs::read_to_string(dir.path().join(format!("desktop_ops.log.{suffix}"))).unwrap()
        };
        assert_eq!(read("1"), "current");
        assert_eq!(read("2"), "one");
        assert!(!dir.path().join("desktop_ops.log.3").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
    }

    #[test]
    fn test_data_dir_is_named_for_crate() {
        let dir = data_dir();
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name == "desktop-ops" || name == ".desktop-ops");
    }
}
