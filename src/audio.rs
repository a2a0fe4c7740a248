// audio output
//
// the emulator pushes interleaved stereo i16 samples once per frame, the device callback
// pulls them from a bounded ring buffer and plays silence when it runs dry. if no device
// can be opened the sink keeps accepting samples and drops them.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use log::{info, warn};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::apu::SAMPLE_RATES;

// 100 ms of stereo audio
const BUFFER_MILLIS: u32 = 100;

pub struct AudioSink {
    producer: HeapProd<f32>,
    // dropping the stream stops playback
    _stream: Option<Stream>,
    sample_rate: u32,
    gain: f32,
}

impl AudioSink {
    /// Opens the default output device. Never fails, without a device samples are discarded.
    pub fn open(requested_rate: u32, volume: u8) -> Self {
        let gain = volume as f32 / 100.0;

        match start_stream() {
            Ok((stream, producer, sample_rate)) => {
                if sample_rate != requested_rate {
                    info!(
                        "audio device runs at {} Hz, requested {} Hz",
                        sample_rate, requested_rate
                    );
                }
                Self {
                    producer,
                    _stream: Some(stream),
                    sample_rate,
                    gain,
                }
            }
            Err(err) => {
                warn!("audio disabled: {:#}", err);
                let sample_rate = requested_rate.clamp(*SAMPLE_RATES.start(), *SAMPLE_RATES.end());
                let (producer, _) = HeapRb::new(ring_capacity(sample_rate)).split();
                Self {
                    producer,
                    _stream: None,
                    sample_rate,
                    gain,
                }
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queues interleaved stereo samples, whatever does not fit is dropped.
    pub fn push(&mut self, samples: &[i16]) {
        for sample in samples {
            let value = *sample as f32 / i16::MAX as f32 * self.gain;
            if self.producer.try_push(value).is_err() {
                break;
            }
        }
    }
}

fn ring_capacity(sample_rate: u32) -> usize {
    sample_rate as usize * BUFFER_MILLIS as usize / 1000 * 2
}

fn start_stream() -> Result<(Stream, HeapProd<f32>, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;
    let supported = device
        .default_output_config()
        .context("failed to query output config")?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let sample_rate: u32 = config.sample_rate;
    if !SAMPLE_RATES.contains(&sample_rate) {
        return Err(anyhow!("unsupported device sample rate {} Hz", sample_rate));
    }
    info!(
        "audio output: {} Hz, {} channels, {:?}",
        sample_rate, config.channels, sample_format
    );

    let (producer, consumer) = HeapRb::new(ring_capacity(sample_rate)).split();
    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer)?,
        other => return Err(anyhow!("unsupported sample format {:?}", other)),
    };
    stream.play().context("failed to start audio stream")?;

    Ok((stream, producer, sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                write_frames(data, channels, &mut consumer)
            },
            |err| warn!("audio stream error: {}", err),
            None,
        )
        .context("failed to build output stream")?;
    Ok(stream)
}

// fills device frames from the stereo queue, silence on underrun
fn write_frames<T, C>(data: &mut [T], channels: usize, consumer: &mut C)
where
    T: SizedSample + FromSample<f32>,
    C: Consumer<Item = f32>,
{
    for frame in data.chunks_mut(channels.max(1)) {
        let left = consumer.try_pop().unwrap_or(0.0);
        let right = consumer.try_pop().unwrap_or(0.0);
        match frame {
            [mono] => *mono = T::from_sample((left + right) / 2.0),
            [l, r, rest @ ..] => {
                *l = T::from_sample(left);
                *r = T::from_sample(right);
                for extra in rest {
                    *extra = T::from_sample(0.0);
                }
            }
            [] => {}
        }
    }
}
