//! Zero-latency partitioned convolution.
//!
//! The first [`PARTITION_SIZE`] taps run as a direct FIR against the live
//! input so the wet signal lines up sample-for-sample with the dry one. The
//! remaining taps are split into equal partitions and applied by uniformly
//! partitioned overlap-save in the frequency domain, one FFT pair per block.
//!
//! Everything that allocates lives in [`ConvolutionKernel::from_buffer`] and
//! [`Convolver::new`]; [`Convolver::process`] touches preallocated state only.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::buffer::SampleBuffer;
use crate::dsp::block::AudioBlock;

/// Taps per partition; also the FFT hop.
pub const PARTITION_SIZE: usize = 256;
const FFT_SIZE: usize = PARTITION_SIZE * 2;
/// Bins kept per spectrum; the rest follow from conjugate symmetry.
const BINS: usize = PARTITION_SIZE + 1;

// Equal-power normalization constants of a standard convolver node.
const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

/// Scale that brings an impulse to a consistent perceived loudness.
pub fn normalization_scale(buffer: &SampleBuffer) -> f32 {
    let channels = buffer.num_channels();
    let length = buffer.len();
    if channels == 0 || length == 0 {
        return 1.0;
    }

    let energy: f64 = buffer
        .channels()
        .iter()
        .flat_map(|ch| ch.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();
    let mut power = (energy / (channels * length) as f64).sqrt() as f32;
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }

    let mut scale = GAIN_CALIBRATION / power;
    scale *= GAIN_CALIBRATION_SAMPLE_RATE / buffer.sample_rate() as f32;
    if channels == 4 {
        scale *= 0.5;
    }
    scale
}

/// One impulse channel split into head taps and tail spectra.
#[derive(Clone)]
struct KernelChannel {
    head: Vec<f32>,
    /// Spectra of partitions 1.., each `BINS` long.
    tail: Vec<Vec<Complex<f32>>>,
}

/// Immutable, pre-transformed impulse response.
#[derive(Clone)]
pub struct ConvolutionKernel {
    channels: Vec<KernelChannel>,
    length: usize,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for ConvolutionKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionKernel")
            .field("channels", &self.channels.len())
            .field("length", &self.length)
            .finish()
    }
}

impl ConvolutionKernel {
    /// Partition and transform `buffer`, optionally applying equal-power normalization.
    pub fn from_buffer(buffer: &SampleBuffer, normalize: bool) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(FFT_SIZE);
        let fft_inverse = planner.plan_fft_inverse(FFT_SIZE);

        let scale = if normalize {
            normalization_scale(buffer)
        } else {
            1.0
        };

        let mut scratch = vec![Complex::default(); fft_forward.get_inplace_scratch_len()];
        let mut spectrum = vec![Complex::default(); FFT_SIZE];

        let channels = buffer
            .channels()
            .iter()
            .map(|taps| {
                let head_len = taps.len().min(PARTITION_SIZE);
                let head = taps[..head_len].iter().map(|&t| t * scale).collect();

                let tail = taps
                    .chunks(PARTITION_SIZE)
                    .skip(1)
                    .map(|part| {
                        spectrum.fill(Complex::default());
                        for (slot, &t) in spectrum.iter_mut().zip(part) {
                            slot.re = t * scale;
                        }
                        fft_forward.process_with_scratch(&mut spectrum, &mut scratch);
                        spectrum[..BINS].to_vec()
                    })
                    .collect();

                KernelChannel { head, tail }
            })
            .collect();

        ConvolutionKernel {
            channels,
            length: buffer.len(),
            fft_forward,
            fft_inverse,
        }
    }

    /// Impulse length in frames.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0 || self.channels.is_empty()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn partitions(&self) -> usize {
        self.channels.first().map_or(0, |c| c.tail.len())
    }
}

/// Running state for one output channel.
struct ChannelState {
    kernel_channel: usize,
    /// Previous block followed by the block being filled.
    input: Vec<f32>,
    pos: usize,
    /// Frequency-domain delay line of past input spectra.
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_head: usize,
    accumulator: Vec<Complex<f32>>,
    spectrum: Vec<Complex<f32>>,
    /// Tail contribution for the block being filled.
    tail_out: Vec<f32>,
}

impl ChannelState {
    fn new(kernel_channel: usize, partitions: usize) -> Self {
        ChannelState {
            kernel_channel,
            input: vec![0.0; FFT_SIZE],
            pos: 0,
            fdl: vec![vec![Complex::default(); BINS]; partitions],
            fdl_head: 0,
            accumulator: vec![Complex::default(); BINS],
            spectrum: vec![Complex::default(); FFT_SIZE],
            tail_out: vec![0.0; PARTITION_SIZE],
        }
    }

    fn reset(&mut self) {
        self.input.fill(0.0);
        self.pos = 0;
        for slot in &mut self.fdl {
            slot.fill(Complex::default());
        }
        self.fdl_head = 0;
        self.tail_out.fill(0.0);
    }

    fn process(
        &mut self,
        kernel: &ConvolutionKernel,
        input: &[f32],
        output: &mut [f32],
        scratch: &mut [Complex<f32>],
    ) {
        let head = &kernel.channels[self.kernel_channel].head;
        for (x, y) in input.iter().zip(output.iter_mut()) {
            let at = PARTITION_SIZE + self.pos;
            self.input[at] = *x;

            let mut acc = self.tail_out[self.pos];
            for (j, &h) in head.iter().enumerate() {
                acc += h * self.input[at - j];
            }
            *y = acc;

            self.pos += 1;
            if self.pos == PARTITION_SIZE {
                self.finish_block(kernel, scratch);
                self.pos = 0;
            }
        }
    }

    /// Transform the completed block and compute the tail for the next one.
    fn finish_block(&mut self, kernel: &ConvolutionKernel, scratch: &mut [Complex<f32>]) {
        let ring = self.fdl.len();
        if ring > 0 {
            for (slot, &x) in self.spectrum.iter_mut().zip(&self.input) {
                *slot = Complex::new(x, 0.0);
            }
            kernel
                .fft_forward
                .process_with_scratch(&mut self.spectrum, scratch);

            self.fdl_head = (self.fdl_head + 1) % ring;
            self.fdl[self.fdl_head].copy_from_slice(&self.spectrum[..BINS]);

            self.accumulator.fill(Complex::default());
            let tail = &kernel.channels[self.kernel_channel].tail;
            for (p, partition) in tail.iter().enumerate() {
                let slot = &self.fdl[(self.fdl_head + ring - p) % ring];
                for ((a, &x), &h) in self.accumulator.iter_mut().zip(slot).zip(partition) {
                    *a += x * h;
                }
            }

            self.spectrum[..BINS].copy_from_slice(&self.accumulator);
            for k in 1..PARTITION_SIZE {
                self.spectrum[FFT_SIZE - k] = self.accumulator[k].conj();
            }
            kernel
                .fft_inverse
                .process_with_scratch(&mut self.spectrum, scratch);

            let norm = 1.0 / FFT_SIZE as f32;
            for (out, bin) in self.tail_out.iter_mut().zip(&self.spectrum[PARTITION_SIZE..]) {
                *out = bin.re * norm;
            }
        }

        self.input.copy_within(PARTITION_SIZE.., 0);
    }
}

/// A kernel bound to per-channel streaming state.
///
/// Output channel `c` uses kernel channel `min(c, kernel_channels - 1)`.
pub struct Convolver {
    kernel: ConvolutionKernel,
    channels: Vec<ChannelState>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    pub fn new(kernel: ConvolutionKernel, num_channels: usize) -> Self {
        let last = kernel.num_channels().saturating_sub(1);
        let partitions = kernel.partitions();
        let channels = (0..num_channels)
            .map(|c| ChannelState::new(c.min(last), partitions))
            .collect();
        let scratch_len = kernel
            .fft_forward
            .get_inplace_scratch_len()
            .max(kernel.fft_inverse.get_inplace_scratch_len());

        Convolver {
            kernel,
            channels,
            scratch: vec![Complex::default(); scratch_len],
        }
    }

    pub fn kernel(&self) -> &ConvolutionKernel {
        &self.kernel
    }

    /// Convolve `input` into `output`, channel by channel.
    pub fn process(&mut self, input: &AudioBlock, output: &mut AudioBlock) {
        output.set_frames(input.frames());
        if self.kernel.is_empty() {
            output.fill(0.0);
            return;
        }

        let Convolver {
            kernel,
            channels,
            scratch,
        } = self;
        for (c, state) in channels.iter_mut().enumerate().take(output.num_channels()) {
            state.process(kernel, input.channel(c), output.channel_mut(c), scratch);
        }
    }

    /// Forget all input history.
    pub fn reset(&mut self) {
        for state in &mut self.channels {
            state.reset();
        }
    }
}

impl std::fmt::Debug for Convolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Convolver")
            .field("kernel", &self.kernel)
            .field("channels", &self.channels.len())
            .finish()
    }
}
