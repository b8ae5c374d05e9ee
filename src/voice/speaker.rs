//! Speaker bindings: console output and synthesized speech

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{AudioPlayback, Speaker, TextToSpeech};
use crate::{Error, Result};

/// Prints responses to stdout, prefixed with the assistant's name
#[derive(Debug, Clone)]
pub struct ConsoleSpeaker {
    label: String,
}

impl ConsoleSpeaker {
    /// Create a console speaker
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    fn print(&self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}: {text}", self.label)?;
        stdout.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Speaker for ConsoleSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        self.print(text)
    }
}

/// Synthesizes responses and plays them on the default output device
///
/// Also echoes the text to the console so the session is readable.
pub struct VoiceSpeaker {
    tts: TextToSpeech,
    echo: Option<ConsoleSpeaker>,
}

impl VoiceSpeaker {
    /// Create a voice speaker
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts,
            echo: None,
        }
    }

    /// Echo spoken text to the console as well
    #[must_use]
    pub fn with_echo(mut self, echo: ConsoleSpeaker) -> Self {
        self.echo = Some(echo);
        self
    }
}

#[async_trait]
impl Speaker for VoiceSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        if let Some(echo) = &self.echo {
            echo.print(text)?;
        }

        let audio = self.tts.synthesize(text).await?;
        tracing::debug!(bytes = audio.len(), "playing synthesized speech");

        // Dropping this future (a stop mid-sentence) silences the device
        let guard = CancelOnDrop::new();
        let cancel = guard.flag();

        // Output streams are not Send: open the device on the blocking thread
        let played = tokio::task::spawn_blocking(move || AudioPlayback::new()?.play_mp3(&audio, cancel))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?;
        guard.disarm();
        played
    }
}

/// Raises a shared flag when dropped unless disarmed first
#[derive(Debug)]
struct CancelOnDrop {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl CancelOnDrop {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_guard_cancels() {
        let guard = CancelOnDrop::new();
        let flag = guard.flag();
        drop(guard);
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_disarmed_guard_leaves_flag() {
        let guard = CancelOnDrop::new();
        let flag = guard.flag();
        guard.disarm();
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_aborted_future_cancels() {
        let guard = CancelOnDrop::new();
        let flag = guard.flag();
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        task.abort();
        let _ = task.await;
        assert!(flag.load(Ordering::Relaxed));
    }
}
