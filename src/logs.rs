//! Capture of worker output streams for post-mortem diagnostics.
use std::{
    collections::VecDeque,
    io::{self, BufRead, BufReader, Read},
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver},
    },
    thread,
    time::Duration,
};

use tracing::{debug, warn};

/// Keeps the most recent lines a worker wrote to one of its output streams.
///
/// A background thread drains the pipe so a chatty worker never blocks on a
/// full buffer. Each line is forwarded to `tracing` at debug level.
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    done: Receiver<()>,
}

impl OutputTail {
    /// Starts draining `stream`, retaining at most `capacity` lines.
    pub fn capture<R>(label: &str, stream: R, capacity: usize) -> Self
    where
        R: Read + Send + 'static,
    {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let (tx, done) = mpsc::channel();

        let buffer = Arc::clone(&lines);
        let worker = label.to_string();
        let spawned = thread::Builder::new()
            .name(format!("{label}-stderr"))
            .spawn(move || {
                let mut reader = BufReader::new(stream);
                let mut raw = Vec::new();
                // Drains until EOF. Undecodable bytes are replaced, never fatal.
                loop {
                    raw.clear();
                    match reader.read_until(b'\n', &mut raw) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            debug!(worker = %worker, "stderr reader stopped: {err}");
                            break;
                        }
                    }

                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim_end_matches(['\n', '\r']);
                    debug!(worker = %worker, "{line}");

                    if capacity == 0 {
                        continue;
                    }
                    let mut guard = buffer.lock().unwrap_or_else(|p| p.into_inner());
                    while guard.len() >= capacity {
                        guard.pop_front();
                    }
                    guard.push_back(line.to_string());
                }
                let _ = tx.send(());
            });

        if let Err(err) = spawned {
            warn!("Unable to start stderr reader for '{label}': {err}");
        }

        Self { lines, done }
    }

    /// Returns the retained lines joined with newlines.
    pub fn snapshot(&self) -> String {
        let guard = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        guard.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Waits up to `timeout` for the stream to reach EOF, then returns what was
    /// captured, or `None` if the worker wrote nothing.
    pub fn finish(&self, timeout: Duration) -> Option<String> {
        let _ = self.done.recv_timeout(timeout);
        let text = self.snapshot();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}
