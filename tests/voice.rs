//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use barista_buddy::voice::{
    AudioClip, DetectorState, SAMPLE_RATE, SpeechDetector, VadConfig, calculate_energy,
    samples_to_wav,
};

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

#[test]
fn test_sine_energy_is_speech() {
    let speech = generate_sine_samples(440.0, 0.1, 0.3);
    // RMS of a sine is amplitude / sqrt(2)
    assert!((calculate_energy(&speech) - 0.212).abs() < 0.01);
    assert!(calculate_energy(&generate_silence(0.1)) < 0.001);
}

#[test]
fn test_utterance_segmented_after_trailing_silence() {
    let mut detector = SpeechDetector::new(VadConfig::default());

    assert!(detector.process(&generate_silence(0.1)).is_none());
    assert_eq!(detector.state(), DetectorState::Idle);

    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    assert!(detector.process(&speech).is_none());
    assert_eq!(detector.state(), DetectorState::Speaking);

    // Short pause keeps the segment open
    assert!(detector.process(&generate_silence(0.3)).is_none());
    assert_eq!(detector.state(), DetectorState::Speaking);

    let pause = generate_silence(0.6);
    let segment = detector.process(&pause).expect("segment");
    assert_eq!(segment.len(), speech.len() + generate_silence(0.3).len() + pause.len());
    assert_eq!(detector.state(), DetectorState::Idle);
    assert!(detector.speech_buffer().is_empty());
}

#[test]
fn test_speech_buffer_accumulation() {
    let mut detector = SpeechDetector::new(VadConfig::default());

    let chunk1 = generate_sine_samples(440.0, 0.1, 0.3);
    detector.process(&chunk1);

    let chunk2 = generate_sine_samples(440.0, 0.1, 0.3);
    detector.process(&chunk2);

    assert_eq!(detector.speech_buffer().len(), chunk1.len() + chunk2.len());
}

#[test]
fn test_quiet_input_never_triggers() {
    let mut detector = SpeechDetector::new(VadConfig::from_durations(0.05, Duration::from_millis(500)));

    // Below the raised threshold
    let murmur = generate_sine_samples(220.0, 1.0, 0.05);
    assert!(detector.process(&murmur).is_none());
    assert_eq!(detector.state(), DetectorState::Idle);
    assert!(detector.flush().is_none());
}

#[test]
fn test_flush_returns_speech_cut_off_by_the_window() {
    let mut detector = SpeechDetector::new(VadConfig::default());
    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    detector.process(&speech);

    assert_eq!(detector.flush().map(|s| s.len()), Some(speech.len()));
    assert_eq!(detector.state(), DetectorState::Idle);
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // 44-byte header plus 16-bit samples
    assert_eq!(wav_data.len(), 44 + samples.len() * 2);
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();

    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples, [0, 16383, -16383, 32767, -32767, 8191]);
}

#[test]
fn test_audio_clip() {
    let clip = AudioClip::new(generate_silence(1.5), SAMPLE_RATE);
    assert_eq!(clip.duration(), Duration::from_millis(1500));

    let wav = clip.to_wav().unwrap();
    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    assert_eq!(reader.duration(), 24_000);

    assert_eq!(AudioClip::new(vec![0.0; 10], 0).duration(), Duration::ZERO);
}
