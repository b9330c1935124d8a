// Integration tests for file-driven capture
//
// These tests write small WAV files and check that capture emits them as
// fixed-size blocks the way a microphone would.

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use natiq_live::audio::{AudioBackendConfig, AudioFile, CaptureBackend, WavFileCapture};
use natiq_live::error::PipelineError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<PathBuf> {
    let path = dir.join(name);
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(&path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(path)
}

fn small_blocks() -> AudioBackendConfig {
    AudioBackendConfig {
        block_size: 100,
        ..AudioBackendConfig::default()
    }
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "speech.wav", 16000, 1, &[16384; 8000])?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);
    assert!(audio.samples.iter().all(|&s| s == 0.5));
    assert!(audio.path.contains("speech.wav"));

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let result = AudioFile::open("/nonexistent/path/to/audio.wav");

    assert!(matches!(result, Err(PipelineError::Device(_))));
}

#[tokio::test]
async fn test_capture_emits_padded_blocks() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "speech.wav", 16000, 1, &[8192; 250])?;

    let mut capture = WavFileCapture::new(&path, small_blocks()).unpaced();
    let mut blocks = capture.start().await?;

    let mut received = Vec::new();
    while let Some(block) = blocks.recv().await {
        received.push(block);
    }

    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|block| block.len() == 100));
    assert!(received[1].iter().all(|&s| s == 0.25));
    assert!(received[2][..50].iter().all(|&s| s == 0.25));
    assert!(received[2][50..].iter().all(|&s| s == 0.0), "Last block is zero-padded");

    capture.stop().await?;
    assert!(!capture.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_capture_resamples_other_rates() -> Result<()> {
    let dir = TempDir::new()?;
    // 0.1s at 48kHz
    let path = write_wav(dir.path(), "studio.wav", 48000, 1, &[8192; 4800])?;

    let mut capture = WavFileCapture::new(&path, small_blocks()).unpaced();
    let mut blocks = capture.start().await?;

    let mut received = Vec::new();
    while let Some(block) = blocks.recv().await {
        received.extend(block);
    }

    // 1600 samples at 16kHz, in 100-sample blocks
    assert_eq!(received.len(), 1600);
    assert!(received[400..1200].iter().all(|&s| (s - 0.25).abs() < 0.02));

    capture.stop().await?;
    Ok(())
}

#[test]
fn test_stereo_is_downmixed() -> Result<()> {
    let dir = TempDir::new()?;
    // Interleaved L/R: left at half scale, right silent
    let frames: Vec<i16> = (0..400).map(|i| if i % 2 == 0 { 16384 } else { 0 }).collect();
    let path = write_wav(dir.path(), "stereo.wav", 16000, 2, &frames)?;

    let samples = AudioFile::open(&path)?.into_capture_samples()?;

    assert_eq!(samples.len(), 200);
    assert!(samples.iter().all(|&s| s == 0.25));

    Ok(())
}

#[tokio::test]
async fn test_capture_missing_file() {
    let mut capture = WavFileCapture::new("/nonexistent/input.wav", small_blocks());

    assert!(capture.start().await.is_err());
}

#[tokio::test]
async fn test_capture_cannot_start_twice() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "speech.wav", 16000, 1, &[0; 16000])?;

    let mut capture = WavFileCapture::new(&path, small_blocks());
    let _blocks = capture.start().await?;

    assert!(capture.start().await.is_err());

    capture.stop().await?;
    Ok(())
}
