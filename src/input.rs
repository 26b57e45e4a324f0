/// Non-blocking line input for buffered mode.
///
/// The scheduler must never stall waiting for input that may never come, so
/// lines are read by a background task and handed over through a channel.
/// `drain_ready` only takes what has already arrived.
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Drop the line terminator (`\n` or `\r\n`) and decode, replacing invalid
/// UTF-8 instead of rejecting the line.
fn decode_line(mut raw: &[u8]) -> String {
    if let Some(rest) = raw.strip_suffix(b"\n") {
        raw = rest.strip_suffix(b"\r").unwrap_or(rest);
    }
    String::from_utf8_lossy(raw).into_owned()
}

/// A source of text lines that can be polled without blocking.
pub trait LineSource {
    /// Every line that is ready right now, oldest first. Never blocks.
    fn drain_ready(&mut self) -> Vec<String>;

    /// True once the underlying stream has ended and every line was drained.
    fn is_closed(&self) -> bool;
}

enum Event {
    Line(String),
    Failed(std::io::Error),
}

/// Lines read from an async reader (stdin in production) by a spawned task.
pub struct ReaderLines {
    rx: mpsc::UnboundedReceiver<Event>,
    closed: bool,
}

impl ReaderLines {
    /// Spawn the reader task. Must be called inside a tokio runtime.
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Event::Line(decode_line(&raw))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Event::Failed(e));
                        break;
                    }
                }
            }
        });
        Self { rx, closed: false }
    }

    /// Read the process's standard input.
    pub fn stdin() -> Self {
        Self::spawn(tokio::io::stdin())
    }
}

impl LineSource for ReaderLines {
    fn drain_ready(&mut self) -> Vec<String> {
        let mut ready = Vec::new();
        if self.closed {
            return ready;
        }
        loop {
            match self.rx.try_recv() {
                Ok(Event::Line(line)) => ready.push(line),
                Ok(Event::Failed(e)) => {
                    tracing::warn!(error = %e, "failed to read input, no further lines will be buffered");
                    self.closed = true;
                    break;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    tracing::info!("input closed, checks continue against the current buffer");
                    self.closed = true;
                    break;
                }
            }
        }
        ready
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
pub mod mock {
    use super::LineSource;
    use std::collections::VecDeque;

    /// Scripted line source: each `drain_ready` call yields the next batch.
    #[derive(Default)]
    pub struct ScriptedLines {
        batches: VecDeque<Vec<String>>,
        pub drains: usize,
    }

    impl ScriptedLines {
        pub fn new<I, B, S>(batches: I) -> Self
        where
            I: IntoIterator<Item = B>,
            B: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                batches: batches
                    .into_iter()
                    .map(|b| b.into_iter().map(Into::into).collect())
                    .collect(),
                drains: 0,
            }
        }
    }

    impl LineSource for ScriptedLines {
        fn drain_ready(&mut self) -> Vec<String> {
            self.drains += 1;
            self.batches.pop_front().unwrap_or_default()
        }

        fn is_closed(&self) -> bool {
            self.batches.is_empty()
        }
    }
}
