//! FFmpeg process adapter
//!
//! Runs the `ffmpeg` binary as a child process, streaming its stdout
//! (`-progress pipe:1` output) and stderr (log and statistics lines) to the
//! caller line by line. Statistics lines are terminated by `\r`, so both
//! `\r` and `\n` end a line.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{VtrimError, VtrimResult};
use crate::ports::{EncoderExit, EncoderPort, EncoderStream};

/// Log lines kept for error reporting
const DIAGNOSTIC_LINES: usize = 12;

type LineSink<'a> = &'a (dyn for<'line> Fn(EncoderStream, &'line str) + Send + Sync);

/// Encoder backed by an `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegAdapter {
    binary: PathBuf,
}

impl FfmpegAdapter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }
}

impl Default for FfmpegAdapter {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl EncoderPort for FfmpegAdapter {
    async fn execute(
        &self,
        args: &[String],
        on_line: &(dyn for<'line> Fn(EncoderStream, &'line str) + Send + Sync),
        cancel: &CancellationToken,
    ) -> VtrimResult<EncoderExit> {
        info!("Running {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VtrimError::EncoderUnavailable {
                message: format!("cannot start {}: {}", self.binary.display(), e),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut tail = DiagnosticTail::new(DIAGNOSTIC_LINES);

        let finished = tokio::select! {
            status = async {
                let (out, err) = tokio::join!(
                    pump_lines(stdout, EncoderStream::Progress, on_line, None),
                    pump_lines(stderr, EncoderStream::Log, on_line, Some(&mut tail)),
                );
                out?;
                err?;
                child.wait().await
            } => Some(status),
            _ = cancel.cancelled() => None,
        };

        let (status, killed) = match finished {
            Some(status) => (status?, false),
            None => {
                info!("Cancelling encoder");
                if let Err(e) = child.start_kill() {
                    debug!("Encoder already exited: {}", e);
                }
                (child.wait().await?, true)
            }
        };

        let exit = EncoderExit {
            code: status.code(),
            killed,
            diagnostic: tail.joined(),
        };
        if !exit.success() && !killed {
            warn!("Encoder exited with {:?}", exit.code);
        }
        Ok(exit)
    }
}

/// Bounded buffer of the most recent log lines
struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: &str) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

async fn pump_lines<R>(
    reader: Option<R>,
    stream: EncoderStream,
    on_line: LineSink<'_>,
    mut tail: Option<&mut DiagnosticTail>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut buf = [0u8; 4096];
    let mut pending = Vec::new();
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut pending, stream, on_line, tail.as_deref_mut());
            } else {
                pending.push(byte);
            }
        }
    }
    flush_line(&mut pending, stream, on_line, tail.as_deref_mut());
    Ok(())
}

fn flush_line(
    pending: &mut Vec<u8>,
    stream: EncoderStream,
    on_line: LineSink<'_>,
    tail: Option<&mut DiagnosticTail>,
) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending.as_slice());
    let line = line.trim_end();
    if !line.is_empty() {
        on_line(stream, line);
        if let Some(tail) = tail {
            tail.push(line);
        }
    }
    pending.clear();
}
