//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for playback (matches OpenAI TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays audio to the default output device
///
/// Blocking; run it on a blocking-friendly thread.
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        };

        // Prefer mono, fall back to stereo
        let supported_config = supports(1)
            .or_else(|| supports(2))
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Name of the output device
    #[must_use]
    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_default()
    }

    /// Decode MP3 bytes and play them until done or `cancel` is set
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_mp3(&self, mp3_data: &[u8], cancel: Arc<AtomicBool>) -> Result<()> {
        let samples = decode_mp3(mp3_data)?;
        self.play_until(samples, cancel)
    }

    /// Play mono samples at [`PLAYBACK_SAMPLE_RATE`] to completion
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails
    pub fn play(&self, samples: Vec<f32>) -> Result<()> {
        self.play_until(samples, Arc::new(AtomicBool::new(false)))
    }

    /// Play mono samples, going silent as soon as `cancel` is set
    ///
    /// # Errors
    ///
    /// Returns error if the output stream fails
    pub fn play_until(&self, samples: Vec<f32>, cancel: Arc<AtomicBool>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            let cancel = Arc::clone(&cancel);

            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let pos = position.load(Ordering::Relaxed);
                        let (pos, done) =
                            fill_frames(data, channels, &samples, pos, cancel.load(Ordering::Relaxed));
                        position.store(pos, Ordering::Relaxed);
                        if done {
                            finished.store(true, Ordering::Relaxed);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let timeout = Duration::from_millis(duration_ms + 500);
        let start = Instant::now();

        while !finished.load(Ordering::Relaxed)
            && !cancel.load(Ordering::Relaxed)
            && start.elapsed() <= timeout
        {
            std::thread::sleep(Duration::from_millis(50));
        }

        if cancel.load(Ordering::Relaxed) {
            drop(stream);
            tracing::debug!(played = position.load(Ordering::Relaxed), samples = sample_count, "playback cancelled");
            return Ok(());
        }

        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}

/// Fill an interleaved output buffer from mono `samples` starting at `pos`
///
/// Returns the new position and whether playback is over. A cancelled or
/// exhausted source writes silence.
fn fill_frames(
    data: &mut [f32],
    channels: usize,
    samples: &[f32],
    mut pos: usize,
    cancelled: bool,
) -> (usize, bool) {
    if cancelled {
        data.fill(0.0);
        return (pos, true);
    }

    let mut done = false;
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = samples.get(pos).copied().unwrap_or_else(|| {
            done = true;
            0.0
        });
        frame.fill(sample);
        pos = (pos + 1).min(samples.len());
    }
    (pos, done)
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}
