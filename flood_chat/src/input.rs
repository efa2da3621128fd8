// src/input.rs
use std::io::{self, BufRead};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const QUIT_COMMAND: &str = "/quit";

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Quit,
    Say(String),
}

impl InputCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().eq_ignore_ascii_case(QUIT_COMMAND) {
            InputCommand::Quit
        } else {
            InputCommand::Say(line.to_string())
        }
    }
}

/// Why the input loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputExit {
    Quit,
    Eof,
    Shutdown,
}

/// Lines from stdin, read on a dedicated OS thread.
///
/// tokio's own stdin parks a blocking-pool thread that the runtime cannot
/// reclaim while a read is pending, which stalls exit after Ctrl+C.
pub fn stdin_lines() -> UnboundedReceiverStream<io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        // the stream simply ends, which the input loop treats as EOF
        tracing::error!("failed to spawn stdin reader: {}", e);
    }
    UnboundedReceiverStream::new(rx)
}
