// Tests for the spectral taps on the input and output paths

use natiq_live::audio::{AudioPathMonitor, MonitorConfig, SpectrumTap};
use std::f32::consts::PI;

fn unsmoothed() -> MonitorConfig {
    MonitorConfig {
        smoothing: 0.0,
        ..MonitorConfig::default()
    }
}

/// A sine landing exactly on `bin` of a 256-point window
fn sine(bin: usize, amplitude: f32) -> Vec<f32> {
    (0..256)
        .map(|i| amplitude * (2.0 * PI * bin as f32 * i as f32 / 256.0).sin())
        .collect()
}

#[test]
fn test_default_snapshot_has_128_bins() {
    let monitor = AudioPathMonitor::new(MonitorConfig::default());

    assert_eq!(monitor.input_snapshot().len(), 128);
    assert_eq!(monitor.output_snapshot().len(), 128);
    assert_eq!(monitor.input().name(), "input");
    assert_eq!(monitor.output().name(), "output");
}

#[test]
fn test_inactive_tap_is_flat() {
    let tap = SpectrumTap::new("input", unsmoothed());

    tap.push(&sine(32, 0.01));
    assert_eq!(tap.snapshot(), vec![0; 128]);

    // Audio pushed while inactive was ignored
    tap.activate();
    assert_eq!(tap.snapshot(), vec![0; 128]);
}

#[test]
fn test_sine_peaks_at_its_bin() {
    let tap = SpectrumTap::new("output", unsmoothed());
    tap.activate();

    tap.push(&sine(32, 0.01));
    let bins = tap.snapshot();

    let peak = bins
        .iter()
        .enumerate()
        .max_by_key(|(_, &level)| level)
        .map(|(index, _)| index)
        .unwrap();

    assert_eq!(peak, 32);
    assert!(bins[32] > bins[31]);
    assert!(bins[32] > bins[33]);
    assert!(bins[100] < 20, "Far bins should be near the floor, got {}", bins[100]);
}

#[test]
fn test_deactivate_forgets_history() {
    let tap = SpectrumTap::new("input", unsmoothed());
    tap.activate();
    tap.push(&sine(16, 0.01));
    assert!(tap.snapshot().iter().any(|&level| level > 0));

    tap.deactivate();
    assert!(!tap.is_active());
    assert_eq!(tap.snapshot(), vec![0; 128]);

    tap.activate();
    assert_eq!(tap.snapshot(), vec![0; 128]);
}

#[test]
fn test_smoothing_decays_toward_silence() {
    let tap = SpectrumTap::new("input", MonitorConfig::default());
    tap.activate();
    tap.push(&sine(32, 0.01));
    let loud = tap.snapshot()[32];

    tap.push(&[0.0; 256]);
    let decaying = tap.snapshot()[32];

    assert!(decaying > 0, "Smoothed level should not drop straight to zero");
    assert!(decaying < loud);
}

#[test]
fn test_bin_count_follows_fft_size() {
    let tap = SpectrumTap::new(
        "input",
        MonitorConfig {
            fft_size: 512,
            smoothing: 0.5,
        },
    );

    assert_eq!(tap.bins(), 256);
    assert_eq!(tap.snapshot().len(), 256);
}
