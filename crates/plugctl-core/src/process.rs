//! Line-streaming subprocess execution with cooperative cancellation.
//!
//! Stdout and stderr are each drained by a worker thread into one channel,
//! so the caller sees a single merged transcript in arrival order. The
//! calling thread blocks until the process exits, polling a [`CancelToken`]
//! between lines; cancellation kills the child and surfaces as
//! [`ComponentError::Cancelled`].

use crate::error::{ComponentError, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared flag that asks in-flight subprocess work to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which pipe a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Run `cmd` to completion, feeding every output line to `on_line`.
/// Returns the exit code (`-1` when the process was killed by a signal).
pub fn run_streaming(
    cmd: Command,
    cancel: &CancelToken,
    mut on_line: impl FnMut(&str),
) -> Result<i32> {
    run_tagged(cmd, cancel, |_, line| on_line(line))
}

/// Like [`run_streaming`], but tells the callback which pipe each line
/// came from.
pub fn run_tagged(
    mut cmd: Command,
    cancel: &CancelToken,
    mut on_line: impl FnMut(Stream, &str),
) -> Result<i32> {
    if cancel.is_cancelled() {
        return Err(ComponentError::Cancelled);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let (tx, rx) = mpsc::channel::<(Stream, String)>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Stream::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Stream::Stderr, tx.clone()));
    }
    drop(tx);

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok((stream, line)) => on_line(stream, &line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if cancel.is_cancelled() {
            terminate(&mut child);
            return Err(ComponentError::Cancelled);
        }
    }

    // Both pipes are closed; the process is exiting or has exited.
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            terminate(&mut child);
            return Err(ComponentError::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    };

    for reader in readers {
        let _ = reader.join();
    }
    Ok(status.code().unwrap_or(-1))
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: R,
    stream: Stream,
    tx: Sender<(Stream, String)>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r').to_string();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::warn!(error = %e, "failed to kill cancelled subprocess");
    }
    let _ = child.wait();
}
