use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::track::{FormatCode, PcmBuffer, TrackError};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{}: not a recognized audio format", path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to probe {}: {source}", path.display())]
    Probe {
        path: PathBuf,
        #[source]
        source: SymphoniaError,
    },
    #[error("{}: no audio track found", path.display())]
    NoAudioTrack { path: PathBuf },
    #[error("failed to decode {}: {source}", path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: SymphoniaError,
    },
    #[error("{}: {source}", path.display())]
    Track {
        path: PathBuf,
        #[source]
        source: TrackError,
    },
    #[error("{}: decoding exceeded {timeout:?}", path.display())]
    Timeout { path: PathBuf, timeout: Duration },
    #[error("{}: decode thread exited without a result", path.display())]
    WorkerLost { path: PathBuf },
    #[error("{}: failed to start decode thread: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Turns an audio file into a [`PcmBuffer`].
///
/// Implementations must normalize samples to [-1.0, 1.0], report the
/// originating [`FormatCode`], and be callable from several worker threads
/// at once.
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<PcmBuffer, DecodeError>;
}

/// In-process decoder backed by symphonia.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> Result<PcmBuffer, DecodeError> {
        let format_code = FormatCode::from_path(path).ok_or_else(|| DecodeError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;

        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(format_code.extension());

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|source| match source {
                SymphoniaError::Unsupported(_) => DecodeError::UnsupportedFormat {
                    path: path.to_path_buf(),
                },
                source => DecodeError::Probe {
                    path: path.to_path_buf(),
                    source,
                },
            })?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::NoAudioTrack {
                path: path.to_path_buf(),
            })?;

        let codec_params = track.codec_params.clone();
        let track_id = track.id;
        let mut sample_rate = codec_params.sample_rate;
        let mut channels = codec_params.channels.map(|c| c.count());

        let codec_error = |source| DecodeError::Codec {
            path: path.to_path_buf(),
            source,
        };

        let mut codec = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|source| match source {
                SymphoniaError::Unsupported(_) => DecodeError::UnsupportedFormat {
                    path: path.to_path_buf(),
                },
                source => codec_error(source),
            })?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut sample_buf_capacity: u64 = 0;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(codec_error(e)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match codec.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::debug!(file = %path.display(), "skipping corrupt packet: {msg}");
                    continue;
                }
                Err(e) => return Err(codec_error(e)),
            };

            let spec = *decoded.spec();
            sample_rate.get_or_insert(spec.rate);
            channels.get_or_insert(spec.channels.count());

            // Reuse the SampleBuffer across packets; only reallocate when it is too small
            let num_frames = decoded.frames() as u64;
            if sample_buf.is_none() || sample_buf_capacity < num_frames {
                sample_buf = Some(SampleBuffer::new(num_frames, spec));
                sample_buf_capacity = num_frames;
            }
            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        let channels = channels.ok_or_else(|| DecodeError::NoAudioTrack {
            path: path.to_path_buf(),
        })?;

        PcmBuffer::new(samples, channels, sample_rate.unwrap_or(0), format_code).map_err(|source| {
            DecodeError::Track {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

/// Runs each decode of the wrapped decoder on a helper thread and gives up
/// after `timeout`. A timed-out decode keeps running detached; its result
/// is dropped.
#[derive(Debug)]
pub struct TimeoutDecoder<D> {
    inner: Arc<D>,
    timeout: Duration,
}

impl<D: Decoder + 'static> TimeoutDecoder<D> {
    pub fn new(inner: D, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<D: Decoder + 'static> Decoder for TimeoutDecoder<D> {
    fn decode(&self, path: &Path) -> Result<PcmBuffer, DecodeError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned_path = path.to_path_buf();

        std::thread::Builder::new()
            .name("dr14-decode".to_string())
            .spawn(move || {
                let _ = tx.send(inner.decode(&owned_path));
            })
            .map_err(|source| DecodeError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DecodeError::Timeout {
                path: path.to_path_buf(),
                timeout: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DecodeError::WorkerLost {
                path: path.to_path_buf(),
            }),
        }
    }
}
