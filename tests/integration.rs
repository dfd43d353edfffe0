use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use dr14::decoder::{Decoder, SymphoniaDecoder};
use dr14::meter::SILENCE_DB;
use dr14::models::{BatchResult, Outcome};
use dr14::scanner;
use dr14::track::FormatCode;

/// Write mono 16-bit PCM samples to a WAV file and return its path.
fn write_wav(dir: &Path, filename: &str, samples: &[f32], sample_rate: u32) -> PathBuf {
    let num_channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * num_channels as u32 * bits_per_sample as u32 / 8;
    let block_align = num_channels * bits_per_sample / 8;
    let data_size = (samples.len() * (bits_per_sample as usize / 8)) as u32;

    let path = dir.join(filename);
    let mut file = std::fs::File::create(&path).unwrap();

    // RIFF header
    file.write_all(b"RIFF").unwrap();
    file.write_all(&(36 + data_size).to_le_bytes()).unwrap();
    file.write_all(b"WAVE").unwrap();

    // fmt chunk
    file.write_all(b"fmt ").unwrap();
    file.write_all(&16u32.to_le_bytes()).unwrap(); // chunk size
    file.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
    file.write_all(&num_channels.to_le_bytes()).unwrap();
    file.write_all(&sample_rate.to_le_bytes()).unwrap();
    file.write_all(&byte_rate.to_le_bytes()).unwrap();
    file.write_all(&block_align.to_le_bytes()).unwrap();
    file.write_all(&bits_per_sample.to_le_bytes()).unwrap();

    // data chunk
    file.write_all(b"data").unwrap();
    file.write_all(&data_size.to_le_bytes()).unwrap();
    for &sample in samples {
        let sample_i16 = (sample * i16::MAX as f32) as i16;
        file.write_all(&sample_i16.to_le_bytes()).unwrap();
    }

    path
}

fn sine(frequency: f64, amplitude: f64, duration_secs: f64, sample_rate: u32) -> Vec<f32> {
    let n = (sample_rate as f64 * duration_secs) as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            (amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()) as f32
        })
        .collect()
}

/// Quiet +/-0.1 square wave with a full-scale click every second: DR17.
fn clicks(duration_secs: usize, sample_rate: u32) -> Vec<f32> {
    let rate = sample_rate as usize;
    (0..duration_secs * rate)
        .map(|i| {
            if i % rate == 0 {
                1.0
            } else if i % 2 == 0 {
                0.1
            } else {
                -0.1
            }
        })
        .collect()
}

fn minus_3_db() -> f64 {
    10f64.powf(-3.0 / 20.0)
}

#[test]
fn test_decode_wav_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", &sine(440.0, 0.5, 2.5, 8000), 8000);

    let buffer = SymphoniaDecoder.decode(&path).unwrap();
    assert_eq!(buffer.channels(), 1);
    assert_eq!(buffer.sample_rate(), 8000);
    assert_eq!(buffer.frames(), 20000);
    assert_eq!(buffer.format_code(), FormatCode::Wav);
    assert!(buffer.samples().iter().all(|s| (-1.0..=1.0).contains(s)));
}

#[test]
fn test_sine_wave_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "sine.wav", &sine(1000.0, minus_3_db(), 10.0, 44100), 44100);

    let record = scanner::scan_one(&SymphoniaDecoder, &path);
    let report = record.report().expect("sine should decode");

    assert_eq!(record.file_name, "sine.wav");
    assert_eq!(report.blocks, 10);
    assert_eq!((report.duration.minutes, report.duration.seconds), (0, 10));
    assert!((report.peak_db - (-3.0)).abs() < 0.05, "peak {:.3}", report.peak_db);
    assert!(
        (report.rms_db - (report.peak_db - 3.01)).abs() < 0.05,
        "rms {:.3} peak {:.3}",
        report.rms_db,
        report.peak_db
    );
    assert_eq!(report.dr_value, 0);
    assert_eq!(report.fingerprint.len(), 40);
}

#[test]
fn test_clicks_measure_dr17() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "clicks.wav", &clicks(6, 44100), 44100);

    let record = scanner::scan_one(&SymphoniaDecoder, &path);
    assert_eq!(record.report().unwrap().dr_value, 17);
}

#[test]
fn test_short_file_is_degenerate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "short.wav", &sine(440.0, 0.5, 2.0, 44100), 44100);

    let report = scanner::scan_one(&SymphoniaDecoder, &path).report().cloned().unwrap();
    assert_eq!((report.dr_value, report.peak_db, report.rms_db), (0, -100.0, -100.0));
}

#[test]
fn test_silence_is_finite() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "silence.wav", &vec![0.0; 4 * 8000], 8000);

    let report = scanner::scan_one(&SymphoniaDecoder, &path).report().cloned().unwrap();
    assert_eq!(report.peak_db, SILENCE_DB);
    assert!((report.rms_db - SILENCE_DB).abs() < 1e-9);
    assert_eq!(report.dr_value, -3);
}

#[test]
fn test_fingerprint_ignores_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let samples = sine(440.0, 0.7, 3.0, 8000);
    let a = write_wav(dir.path(), "original.wav", &samples, 8000);
    let b = write_wav(dir.path(), "copy of original.wav", &samples, 8000);

    let mut changed = samples.clone();
    changed[1] = 0.9;
    let c = write_wav(dir.path(), "edited.wav", &changed, 8000);

    let fp = |p: &Path| scanner::scan_one(&SymphoniaDecoder, p).report().unwrap().fingerprint.clone();
    assert_eq!(fp(&a), fp(&b));
    assert_ne!(fp(&a), fp(&c));
}

#[test]
fn test_batch_with_failures() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path(), "01-sine.wav", &sine(1000.0, minus_3_db(), 5.0, 44100), 44100);
    write_wav(dir.path(), "02-clicks.wav", &clicks(5, 44100), 44100);
    write_wav(dir.path(), "03-short.wav", &sine(440.0, 0.5, 1.0, 44100), 44100);
    std::fs::write(dir.path().join("04-broken.flac"), b"not really flac").unwrap();
    std::fs::write(dir.path().join("cover.jpg"), b"fake").unwrap();

    let result = scanner::scan_directory(dir.path(), &SymphoniaDecoder, 2, None).unwrap();

    let names: Vec<&str> = result.records().iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(names, ["01-sine.wav", "02-clicks.wav", "03-short.wav", "04-broken.flac"]);
    assert_eq!(result.failure_count(), 1);
    assert!(matches!(result.records()[3].outcome, Outcome::Failure));
    // The short track succeeds but does not qualify
    assert!(result.records()[2].report().is_some());
    assert_eq!(result.successful_count(), 2);
    // (0 + 17) / 2 = 8.5, ties to even
    assert_eq!(result.aggregate_dr(), 8);
}

#[test]
fn test_worker_count_invariance() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..6 {
        let amplitude = 0.2 + 0.1 * i as f64;
        write_wav(
            dir.path(),
            &format!("{:02}.wav", i),
            &sine(220.0 * (i + 1) as f64, amplitude, 3.0 + i as f64, 8000),
            8000,
        );
    }
    write_wav(dir.path(), "06.wav", &clicks(4, 8000), 8000);
    std::fs::write(dir.path().join("07.mp3"), b"garbage").unwrap();

    let files = scanner::audio_files_in_dir(dir.path()).unwrap();
    let sequential = scanner::scan_batch(&files, &SymphoniaDecoder, 1).unwrap();
    let parallel = scanner::scan_batch(&files, &SymphoniaDecoder, 8).unwrap();

    assert_eq!(sequential, parallel);
    assert_eq!(sequential.records().len(), 8);
    assert_eq!(sequential.failure_count(), 1);
}

#[test]
fn test_files_list_filtering() {
    let files = scanner::filter_audio_files(["b/02.flac", "a/notes.txt", "a/01.wav"]);
    assert_eq!(files, [PathBuf::from("a/01.wav"), PathBuf::from("b/02.flac")]);
}

// --- CLI tests ---

#[test]
fn test_cli_directory_table() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path(), "clicks.wav", &clicks(4, 8000), 8000);

    cargo_bin_cmd!("dr14")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicates::str::contains("Official DR value: DR17"))
        .stderr(predicates::str::contains("clicks.wav: \t DR 17"))
        .stderr(predicates::str::contains("Elapsed time"));
}

#[test]
fn test_cli_directory_json() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path(), "clicks.wav", &clicks(4, 8000), 8000);
    std::fs::write(dir.path().join("broken.ogg"), b"nope").unwrap();

    let output = cargo_bin_cmd!("dr14")
        .args([dir.path().to_str().unwrap(), "--json", "--quiet"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: BatchResult = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed.records().len(), 2);
    assert_eq!(parsed.aggregate_dr(), 17);
    assert_eq!(parsed.failure_count(), 1);
}

#[test]
fn test_cli_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"no audio here").unwrap();

    cargo_bin_cmd!("dr14")
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicates::str::contains("No audio files found"));
}

#[test]
fn test_cli_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "clicks.wav", &clicks(4, 8000), 8000);

    cargo_bin_cmd!("dr14")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("DR      = 17"));
}

#[test]
fn test_cli_single_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.flac");
    std::fs::write(&path, b"garbage").unwrap();

    cargo_bin_cmd!("dr14")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicates::str::contains("invalid audio file"));
}

#[test]
fn test_cli_files_list() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_wav(dir.path(), "a.wav", &clicks(4, 8000), 8000);
    let list = dir.path().join("list.txt");
    std::fs::write(&list, format!("{}\n\n{}\n", a.display(), dir.path().join("x.txt").display()))
        .unwrap();

    cargo_bin_cmd!("dr14")
        .args(["--files-list", list.to_str().unwrap(), "-1"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Number of files:   1"));
}

#[test]
fn test_cli_recursive_json() {
    let base = tempfile::tempdir().unwrap();
    let album_a = base.path().join("Album A");
    let album_b = base.path().join("Album B");
    std::fs::create_dir(&album_a).unwrap();
    std::fs::create_dir(&album_b).unwrap();
    write_wav(&album_a, "01.wav", &clicks(4, 8000), 8000);
    write_wav(&album_b, "01.wav", &sine(1000.0, 0.5, 4.0, 8000), 8000);

    let output = cargo_bin_cmd!("dr14")
        .args([base.path().to_str().unwrap(), "--recursive", "--json", "-q"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let batches = parsed.as_array().unwrap();
    assert_eq!(batches.len(), 2);
    assert!(batches[0]["directory"].as_str().unwrap().ends_with("Album A"));
    assert_eq!(batches[0]["aggregate_dr"], 17);
    assert_eq!(batches[1]["aggregate_dr"], 0);
}

#[test]
fn test_cli_recursive_json_single_album_is_array() {
    let base = tempfile::tempdir().unwrap();
    let album = base.path().join("Album");
    std::fs::create_dir(&album).unwrap();
    write_wav(&album, "01.wav", &clicks(4, 8000), 8000);

    let output = cargo_bin_cmd!("dr14")
        .args([base.path().to_str().unwrap(), "--recursive", "--json", "-q"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let batches = parsed.as_array().expect("recursive JSON is always an array");
    assert_eq!(batches.len(), 1);
    assert!(batches[0]["directory"].as_str().unwrap().ends_with("Album"));
    assert_eq!(batches[0]["aggregate_dr"], 17);
}

#[cfg(unix)]
#[test]
fn test_cli_recursive_skips_symlinked_dirs() {
    let base = tempfile::tempdir().unwrap();
    let album = base.path().join("Album");
    std::fs::create_dir(&album).unwrap();
    write_wav(&album, "01.wav", &clicks(4, 8000), 8000);
    std::os::unix::fs::symlink(base.path(), album.join("loop")).unwrap();

    let output = cargo_bin_cmd!("dr14")
        .args([base.path().to_str().unwrap(), "--recursive", "--json", "-q"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
}

#[test]
fn test_cli_failed_file_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(dir.path(), "clicks.wav", &clicks(4, 8000), 8000);
    std::fs::write(dir.path().join("broken.ogg"), b"nope").unwrap();

    let output = cargo_bin_cmd!("dr14")
        .arg(dir.path())
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("broken.ogg").count(), 1, "stderr: {stderr}");
    assert!(stderr.contains("- fail - broken.ogg"));
}

#[test]
fn test_cli_jobs_conflict() {
    cargo_bin_cmd!("dr14")
        .args([".", "-1", "-j", "4"])
        .assert()
        .failure();
}
