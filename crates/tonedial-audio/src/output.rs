use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::device::OutputDeviceSelector;
use tonedial_foundation::AudioError;

/// Seam between the reconciliation engine and the OS audio stack.
///
/// One configuration at a time: `open` after `open` without a `close` in
/// between is a caller bug the engine never commits. Playback is
/// fire-and-forget; overlapping clips sound simultaneously.
pub trait OutputBackend {
    fn open(&mut self, rate: u32) -> Result<(), AudioError>;
    fn close(&mut self);
    fn play(&mut self, samples: Vec<i16>) -> Result<(), AudioError>;
    fn is_open(&self) -> bool;
}

/// Additive mixer shared with the cpal output callback. Finished clips are
/// retired as the callback consumes them.
#[derive(Default)]
pub(crate) struct Mixer {
    active: Vec<ClipCursor>,
}

struct ClipCursor {
    samples: Vec<i16>,
    pos: usize,
}

impl Mixer {
    pub(crate) fn push(&mut self, samples: Vec<i16>) {
        if !samples.is_empty() {
            self.active.push(ClipCursor { samples, pos: 0 });
        }
    }

    /// Sum all active clips into `out` (mono frames), saturating at the
    /// i16 range, and advance each cursor.
    pub(crate) fn mix_into(&mut self, out: &mut [i16]) {
        out.fill(0);
        for clip in &mut self.active {
            let remaining = &clip.samples[clip.pos..];
            let n = remaining.len().min(out.len());
            for i in 0..n {
                let mixed = out[i] as i32 + remaining[i] as i32;
                out[i] = mixed.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            }
            clip.pos += n;
        }
        self.active.retain(|c| c.pos < c.samples.len());
    }

    pub(crate) fn active_clips(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn clear(&mut self) {
        self.active.clear();
    }
}

/// Real output device: owns the cpal stream and the mixer feeding it.
///
/// Not `Send` (cpal streams are pinned to their thread); lives inside the
/// playback thread, never in a shared handle.
pub struct CpalOutput {
    selector: OutputDeviceSelector,
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
}

impl CpalOutput {
    pub fn new(preferred_device: Option<String>) -> Result<Self, AudioError> {
        Ok(Self {
            selector: OutputDeviceSelector::new(preferred_device)?,
            stream: None,
            mixer: Arc::new(Mutex::new(Mixer::default())),
        })
    }

    /// Pick a supported output config covering `rate`. Mono i16 is the
    /// preferred shape; otherwise take the fewest channels and convert in
    /// the callback.
    fn pick_config(
        device: &cpal::Device,
        rate: u32,
    ) -> Result<(StreamConfig, SampleFormat), AudioError> {
        let mut candidates: Vec<_> = device
            .supported_output_configs()?
            .filter(|range| {
                range.min_sample_rate().0 <= rate
                    && range.max_sample_rate().0 >= rate
                    && matches!(
                        range.sample_format(),
                        SampleFormat::I16 | SampleFormat::F32
                    )
            })
            .collect();

        if candidates.is_empty() {
            return Err(AudioError::RateNotSupported { rate });
        }

        candidates.sort_by_key(|range| {
            let format_penalty = match range.sample_format() {
                SampleFormat::I16 => 0,
                _ => 1,
            };
            (range.channels(), format_penalty)
        });

        let chosen = &candidates[0];
        let sample_format = chosen.sample_format();
        let config = StreamConfig {
            channels: chosen.channels(),
            sample_rate: SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };
        Ok((config, sample_format))
    }

    fn build_stream(
        &self,
        device: cpal::Device,
        config: StreamConfig,
        sample_format: SampleFormat,
    ) -> Result<Stream, AudioError> {
        let channels = config.channels as usize;
        let mixer = Arc::clone(&self.mixer);

        let err_fn = move |err: cpal::StreamError| {
            tracing::error!("Audio output stream error: {}", err);
        };

        // Mono mix buffer reused across callbacks to avoid allocating on
        // the audio thread
        thread_local! {
            static MIX_BUFFER: std::cell::RefCell<Vec<i16>> = const { std::cell::RefCell::new(Vec::new()) };
        }

        let stream = match sample_format {
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &_| {
                    if channels == 1 {
                        mixer.lock().mix_into(data);
                        return;
                    }
                    MIX_BUFFER.with(|buf| {
                        let mut mono = buf.borrow_mut();
                        mono.resize(data.len() / channels, 0);
                        mixer.lock().mix_into(&mut mono);
                        for (frame, &s) in data.chunks_exact_mut(channels).zip(mono.iter()) {
                            frame.fill(s);
                        }
                    });
                },
                err_fn,
                None,
            )?,
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &_| {
                    MIX_BUFFER.with(|buf| {
                        let mut mono = buf.borrow_mut();
                        mono.resize(data.len() / channels, 0);
                        mixer.lock().mix_into(&mut mono);
                        for (frame, &s) in data.chunks_exact_mut(channels).zip(mono.iter()) {
                            frame.fill(s as f32 / 32768.0);
                        }
                    });
                },
                err_fn,
                None,
            )?,
            other => {
                return Err(AudioError::FormatNotSupported {
                    format: format!("{other:?}"),
                })
            }
        };

        Ok(stream)
    }
}

impl OutputBackend for CpalOutput {
    fn open(&mut self, rate: u32) -> Result<(), AudioError> {
        // Defensive: dropping any previous stream releases the device before
        // the new configuration is acquired.
        self.close();

        let device = self.selector.select()?;
        let (config, sample_format) = Self::pick_config(&device, rate)?;
        let stream = self.build_stream(device, config, sample_format)?;
        stream.play()?;

        tracing::info!(rate, ?sample_format, "Output device opened");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            self.mixer.lock().clear();
            tracing::info!("Output device closed");
        }
    }

    fn play(&mut self, samples: Vec<i16>) -> Result<(), AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::DeviceClosed);
        }
        self.mixer.lock().push(samples);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
