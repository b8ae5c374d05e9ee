//! Input sources for the listening loop
//!
//! Capture is blocking (stdin reads, `cpal` streams that are not `Send`), so
//! it runs on a dedicated worker thread. The controller asks for one input at
//! a time; the worker answers over a queue of capacity one.

use std::io::{BufRead, Write};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::voice::{AudioCapture, AudioClip, SpeechDetector, VadConfig};
use crate::{Error, Result};

/// Raw input captured for one turn
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedInput {
    /// Microphone audio that still needs transcription
    Audio(AudioClip),
    /// Typed text, used as the transcript directly
    Text(String),
}

/// Result of one capture attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Something was captured
    Input(CapturedInput),
    /// The capture window passed without any speech
    Silence,
    /// The source has no more input (EOF, closed channel)
    Exhausted,
    /// The device or reader failed
    Failed(String),
}

/// Asynchronous supply of captured input
#[async_trait]
pub trait UtteranceSource: Send {
    /// Wait for the next captured input
    ///
    /// Must be cancel-safe: if the returned future is dropped, the input it
    /// was waiting for is returned by the next call instead of being lost.
    async fn next_input(&mut self) -> CaptureOutcome;
}

/// Blocking capture backend driven by a [`CaptureWorker`]
pub trait Capture {
    /// Block until one input is captured
    fn capture(&mut self) -> CaptureOutcome;
}

/// Runs a [`Capture`] on its own thread, one request at a time
pub struct CaptureWorker {
    requests: std_mpsc::Sender<()>,
    results: mpsc::Receiver<CaptureOutcome>,
    pending: bool,
}

impl CaptureWorker {
    /// Start a worker thread and build the capture backend on it
    ///
    /// `factory` runs on the worker thread so the backend never has to
    /// cross threads.
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned or the factory fails
    pub async fn spawn<F, C>(name: &str, factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<C> + Send + 'static,
        C: Capture + 'static,
    {
        let (request_tx, request_rx) = std_mpsc::channel::<()>();
        let (result_tx, result_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let thread_name = name.to_string();
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut backend = match factory() {
                    Ok(backend) => {
                        let _ = ready_tx.send(Ok(()));
                        backend
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while request_rx.recv().is_ok() {
                    let outcome = backend.capture();
                    let exhausted = outcome == CaptureOutcome::Exhausted;
                    if result_tx.blocking_send(outcome).is_err() || exhausted {
                        break;
                    }
                }

                tracing::debug!(worker = %thread_name, "capture worker exiting");
            })?;

        ready_rx
            .await
            .map_err(|_| Error::Audio(format!("capture worker {name} exited during startup")))??;

        tracing::debug!(worker = name, "capture worker started");

        Ok(Self {
            requests: request_tx,
            results: result_rx,
            pending: false,
        })
    }
}

#[async_trait]
impl UtteranceSource for CaptureWorker {
    async fn next_input(&mut self) -> CaptureOutcome {
        // A request abandoned by a cancelled call is still outstanding
        if !self.pending {
            if self.requests.send(()).is_err() {
                return CaptureOutcome::Exhausted;
            }
            self.pending = true;
        }

        let outcome = self.results.recv().await;
        self.pending = false;
        outcome.unwrap_or(CaptureOutcome::Exhausted)
    }
}

/// Reads one line of text per turn
pub struct LineCapture<R> {
    reader: R,
    prompt: Option<String>,
}

impl<R: BufRead> LineCapture<R> {
    /// Read lines from `reader` without a prompt
    #[must_use]
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            prompt: None,
        }
    }

    /// Print `prompt` to stdout before each read
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

impl<R: BufRead> Capture for LineCapture<R> {
    fn capture(&mut self) -> CaptureOutcome {
        if let Some(prompt) = &self.prompt {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "{prompt}");
            let _ = stdout.flush();
        }

        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => CaptureOutcome::Exhausted,
            Ok(_) => {
                let text = line.trim();
                if text.is_empty() {
                    CaptureOutcome::Silence
                } else {
                    CaptureOutcome::Input(CapturedInput::Text(text.to_string()))
                }
            }
            Err(e) => CaptureOutcome::Failed(format!("read failed: {e}")),
        }
    }
}

/// Records one voice-activity segment per turn from the default microphone
pub struct MicrophoneCapture {
    capture: AudioCapture,
    detector: SpeechDetector,
    window: Duration,
}

impl MicrophoneCapture {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no usable input device exists
    pub fn open(vad: VadConfig, window: Duration) -> Result<Self> {
        let capture = AudioCapture::new()?;
        tracing::info!(device = %capture.device_name(), "microphone ready");
        Ok(Self {
            capture,
            detector: SpeechDetector::new(vad),
            window,
        })
    }
}

impl Capture for MicrophoneCapture {
    fn capture(&mut self) -> CaptureOutcome {
        match self.capture.record_utterance(&mut self.detector, self.window) {
            Ok(Some(clip)) => {
                tracing::debug!(seconds = clip.duration().as_secs_f32(), "utterance captured");
                CaptureOutcome::Input(CapturedInput::Audio(clip))
            }
            Ok(None) => CaptureOutcome::Silence,
            Err(e) => CaptureOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn text(s: &str) -> CaptureOutcome {
        CaptureOutcome::Input(CapturedInput::Text(s.to_string()))
    }

    #[test]
    fn test_line_capture() {
        let mut lines = LineCapture::new(Cursor::new("how to make a latte\n\n  exit  \n"));
        assert_eq!(lines.capture(), text("how to make a latte"));
        assert_eq!(lines.capture(), CaptureOutcome::Silence);
        assert_eq!(lines.capture(), text("exit"));
        assert_eq!(lines.capture(), CaptureOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_worker_serves_requests_in_order() {
        let mut worker = CaptureWorker::spawn("test-capture", || {
            Ok(LineCapture::new(Cursor::new("first\nsecond\n")))
        })
        .await
        .unwrap();

        assert_eq!(worker.next_input().await, text("first"));
        assert_eq!(worker.next_input().await, text("second"));
        assert_eq!(worker.next_input().await, CaptureOutcome::Exhausted);
        // Worker has exited; further calls stay exhausted
        assert_eq!(worker.next_input().await, CaptureOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_worker_factory_error() {
        let result = CaptureWorker::spawn("test-capture", || -> Result<LineCapture<Cursor<Vec<u8>>>> {
            Err(Error::Audio("no input device available".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::Audio(_))));
    }

    #[tokio::test]
    async fn test_cancelled_request_is_not_lost() {
        struct Slow(Vec<&'static str>);

        impl Capture for Slow {
            fn capture(&mut self) -> CaptureOutcome {
                std::thread::sleep(Duration::from_millis(100));
                self.0.pop().map_or(CaptureOutcome::Exhausted, |s| {
                    CaptureOutcome::Input(CapturedInput::Text(s.to_string()))
                })
            }
        }

        let mut worker = CaptureWorker::spawn("test-capture", || Ok(Slow(vec!["second", "first"])))
            .await
            .unwrap();

        let early = tokio::time::timeout(Duration::from_millis(10), worker.next_input()).await;
        assert!(early.is_err());

        assert_eq!(worker.next_input().await, text("first"));
        assert_eq!(worker.next_input().await, text("second"));
    }
}
