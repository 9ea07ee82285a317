//! Pluggable log sink.
//!
//! `log_manager.py` buffers each device's log output per filename behind
//! a mutex, flushing a buffer once it exceeds 1 MiB or once a background
//! thread notices it has gone 10 seconds without a flush. The websocket
//! forwarding of `video_mem_log.txt` it also does is out of scope here;
//! this module only keeps the buffered-file-sink contract, exposed as a
//! trait so an embedding application can swap in something else (an
//! in-memory sink for tests, a sink that forwards elsewhere) without
//! `motherboard-core` caring.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const BUFFER_SIZE_LIMIT: usize = 1024 * 1024;
const FLUSH_AGE: Duration = Duration::from_secs(10);
const FLUSH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A destination for device log lines, grouped by filename the way
/// each device's own log stream is named.
pub trait LogSinkImpl: Send + Sync {
    fn write_line(&self, filename: &str, line: &str);
}

/// Handle devices hold onto and clone freely; cheap, shares the
/// underlying sink.
pub type LogSink = Arc<dyn LogSinkImpl>;

/// A sink that does nothing, for devices/tests that don't care about
/// log output.
pub struct NullLogSink;
impl LogSinkImpl for NullLogSink {
    fn write_line(&self, _filename: &str, _line: &str) {}
}

/// An in-memory sink that records every line, for tests.
#[derive(Default)]
pub struct MemoryLogSink {
    lines: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines_for(&self, filename: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .unwrap_or_default()
    }
}

impl LogSinkImpl for MemoryLogSink {
    fn write_line(&self, filename: &str, line: &str) {
        self.lines
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_default()
            .push(line.to_string());
    }
}

struct Buffer {
    data: Vec<u8>,
    last_write: Instant,
}

struct Shared {
    dir: PathBuf,
    buffers: Mutex<HashMap<String, Buffer>>,
}

impl Shared {
    fn push_line(&self, filename: &str, line: &str) {
        let mut buffers = self.buffers.lock().unwrap();
        let buf = buffers.entry(filename.to_string()).or_insert_with(|| Buffer {
            data: Vec::new(),
            last_write: Instant::now(),
        });
        buf.data.extend_from_slice(line.as_bytes());
        buf.data.push(b'\n');
        buf.last_write = Instant::now();
        if buf.data.len() >= BUFFER_SIZE_LIMIT {
            Self::flush_one(&self.dir, filename, buf);
        }
    }

    fn flush_one(dir: &Path, filename: &str, buf: &mut Buffer) {
        if buf.data.is_empty() {
            return;
        }
        if let Err(e) = Self::append_to_disk(dir, filename, &buf.data) {
            log::error!("failed to flush log buffer for '{filename}': {e}");
        }
        buf.data.clear();
    }

    fn append_to_disk(dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(filename))?;
        file.write_all(data)
    }

    fn flush_stale(&self) {
        let mut buffers = self.buffers.lock().unwrap();
        for (filename, buf) in buffers.iter_mut() {
            if !buf.data.is_empty() && buf.last_write.elapsed() >= FLUSH_AGE {
                Self::flush_one(&self.dir, filename, buf);
            }
        }
    }

    fn flush_all(&self) {
        let mut buffers = self.buffers.lock().unwrap();
        for (filename, buf) in buffers.iter_mut() {
            Self::flush_one(&self.dir, filename, buf);
        }
    }
}

impl LogSinkImpl for Shared {
    fn write_line(&self, filename: &str, line: &str) {
        self.push_line(filename, line);
    }
}

/// Buffered, file-backed log sink. Flushes a filename's buffer once it
/// crosses 1 MiB, and a background thread flushes anything that's gone
/// 10 seconds without a write. Flushes everything outstanding on drop.
pub struct FileLogSink {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FileLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            dir: dir.into(),
            buffers: Mutex::new(HashMap::new()),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let thread_shared = shared.clone();
        let thread_stop = stop.clone();
        let handle = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Relaxed) {
                std::thread::sleep(FLUSH_POLL_INTERVAL);
                thread_shared.flush_stale();
            }
        });

        Arc::new(Self {
            shared,
            stop,
            handle: Some(handle),
        })
    }

    pub fn flush_now(&self) {
        self.shared.flush_all();
    }
}

impl LogSinkImpl for FileLogSink {
    fn write_line(&self, filename: &str, line: &str) {
        self.shared.push_line(filename, line);
    }
}

impl Drop for FileLogSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.shared.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_groups_lines_by_filename() {
        let sink = MemoryLogSink::new();
        sink.write_line("pit.log", "tick 1");
        sink.write_line("pit.log", "tick 2");
        sink.write_line("ppi.log", "reset");

        assert_eq!(sink.lines_for("pit.log"), vec!["tick 1", "tick 2"]);
        assert_eq!(sink.lines_for("ppi.log"), vec!["reset"]);
        assert!(sink.lines_for("missing.log").is_empty());
    }

    #[test]
    fn file_sink_flushes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = FileLogSink::new(dir.path());
            sink.write_line("pic.log", "hello");
        }
        let contents = std::fs::read_to_string(dir.path().join("pic.log")).unwrap();
        assert_eq!(contents, "hello\n");
    }

    #[test]
    fn file_sink_flushes_past_the_size_threshold_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileLogSink::new(dir.path());
        let long_line = "x".repeat(BUFFER_SIZE_LIMIT);
        sink.write_line("big.log", &long_line);
        let contents = std::fs::read_to_string(dir.path().join("big.log")).unwrap();
        assert_eq!(contents.trim_end(), long_line);
    }
}
