//! Control path: settings, asset loading, and garbage collection.
//!
//! Everything that allocates or may block happens here. Results reach the
//! render path as whole objects through the command queue, so the render
//! path never observes a half-built kernel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::buffer::SampleBuffer;
use crate::decode::{CorrectionFilterDecoder, WavPcmDecoder};
use crate::dsp::analysis::AnalysisReader;
use crate::dsp::convolver::{ConvolutionKernel, Convolver};
use crate::error::{DecodeError, LoadError};
use crate::generate::{
    CurveGenerator, ReverbImpulseGenerator, decay_from_damping, duration_from_size,
};
use crate::settings::{AmpClass, EngineSettings};

use super::EngineConfig;
use super::commands::{AssetSlot, CommandProducer, CurveSlot, EngineCommand, GarbageConsumer};

/// Latest issued generation per slot, shared with in-flight jobs.
type Generations = Arc<[AtomicU64; 3]>;

/// Longest impulse accepted after resampling to the engine rate.
pub const MAX_IMPULSE_SECONDS: u32 = 20;

/// Resample, normalize and partition a decoded buffer for `slot`.
///
/// Returns `Ok(None)` for an empty buffer, which leaves the stage unloaded.
/// The resampled length is checked before anything is allocated.
pub fn build_convolver(
    buffer: &SampleBuffer,
    slot: AssetSlot,
    config: &EngineConfig,
) -> Result<Option<Box<Convolver>>, DecodeError> {
    if buffer.is_empty() || buffer.num_channels() == 0 {
        return Ok(None);
    }
    let frames = buffer.resampled_len(config.sample_rate) as u64;
    let limit = MAX_IMPULSE_SECONDS as u64 * config.sample_rate as u64;
    if frames > limit {
        return Err(DecodeError::AssetTooLarge {
            declared: frames,
            limit,
        });
    }
    let buffer = if buffer.sample_rate() != config.sample_rate {
        debug!(
            %slot,
            from = buffer.sample_rate(),
            to = config.sample_rate,
            "resampling impulse"
        );
        buffer.resampled(config.sample_rate)
    } else {
        buffer.clone()
    };
    let kernel = ConvolutionKernel::from_buffer(&buffer, slot.normalizes());
    Ok(Some(Box::new(Convolver::new(kernel, config.channels))))
}

/// A decode request detached from the controller so it can run on any thread.
#[derive(Debug)]
pub struct LoadJob {
    slot: AssetSlot,
    generation: u64,
    bytes: Vec<u8>,
    config: EngineConfig,
    latest: Generations,
}

impl LoadJob {
    pub fn slot(&self) -> AssetSlot {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once a newer request for the same slot has been issued.
    pub fn is_stale(&self) -> bool {
        self.latest[self.slot.index()].load(Ordering::Acquire) != self.generation
    }

    /// Decode and prepare the kernel. CPU-bound; never touches the render path.
    pub fn run(self) -> PreparedAsset {
        let result = if self.is_stale() {
            Err(LoadError::Superseded {
                slot: self.slot,
                generation: self.generation,
            })
        } else {
            self.decode()
                .and_then(|buffer| build_convolver(&buffer, self.slot, &self.config))
                .map_err(LoadError::from)
        };
        PreparedAsset {
            slot: self.slot,
            generation: self.generation,
            result,
        }
    }

    fn decode(&self) -> Result<SampleBuffer, DecodeError> {
        match self.slot {
            AssetSlot::Correction => {
                let data = CorrectionFilterDecoder::decode(&self.bytes)?;
                Ok(data.to_sample_buffer(self.config.channels, self.config.sample_rate))
            }
            AssetSlot::Impulse | AssetSlot::Reverb => {
                WavPcmDecoder::decode(&self.bytes, self.config.sample_rate)
            }
        }
    }
}

/// Output of [`LoadJob::run`], waiting to be published.
#[derive(Debug)]
pub struct PreparedAsset {
    slot: AssetSlot,
    generation: u64,
    result: Result<Option<Box<Convolver>>, LoadError>,
}

impl PreparedAsset {
    pub fn slot(&self) -> AssetSlot {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

struct ControlState {
    last_settings: Option<EngineSettings>,
    exciter_amount: f32,
    amplifier: (AmpClass, f32),
    /// Size, damping and width of the published reverb impulse.
    reverb_params: Option<(f32, f32, f32)>,
    reverb: ReverbImpulseGenerator,
}

/// Control-side handle to a running [`super::Engine`].
///
/// `Send + Sync`; each queue end sits behind its own lock so any host thread
/// can apply settings or load assets.
pub struct EngineController {
    config: EngineConfig,
    command_tx: Mutex<CommandProducer>,
    garbage_rx: Mutex<GarbageConsumer>,
    generations: Generations,
    state: Mutex<ControlState>,
    analysis: Mutex<AnalysisReader>,
}

impl EngineController {
    pub(crate) fn new(
        config: EngineConfig,
        command_tx: CommandProducer,
        garbage_rx: GarbageConsumer,
        analysis: AnalysisReader,
    ) -> Self {
        let defaults = EngineSettings::default();
        let reverb = match config.reverb_seed {
            Some(seed) => ReverbImpulseGenerator::seeded(seed),
            None => ReverbImpulseGenerator::new(),
        };
        EngineController {
            config,
            command_tx: Mutex::new(command_tx),
            garbage_rx: Mutex::new(garbage_rx),
            generations: Arc::new([AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)]),
            state: Mutex::new(ControlState {
                last_settings: None,
                exciter_amount: defaults.spectrum_extension_strength,
                amplifier: (defaults.analogx_class, defaults.analogx_drive),
                reverb_params: None,
                reverb,
            }),
            analysis: Mutex::new(analysis),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Last snapshot accepted by [`Self::apply_settings`], after clamping.
    pub fn settings(&self) -> Option<EngineSettings> {
        self.state.lock().last_settings
    }

    /// Analysis reader for the host's visualizer.
    pub fn analysis(&self) -> MutexGuard<'_, AnalysisReader> {
        self.analysis.lock()
    }

    fn send(&self, command: EngineCommand) -> Result<(), LoadError> {
        let mut tx = self.command_tx.lock();
        tx.push(command).map_err(|_| {
            warn!("engine command queue full; render path may be stalled");
            LoadError::QueueFull
        })
    }

    fn next_generation(&self, slot: AssetSlot) -> u64 {
        self.generations[slot.index()].fetch_add(1, Ordering::AcqRel) + 1
    }

    fn latest_generation(&self, slot: AssetSlot) -> u64 {
        self.generations[slot.index()].load(Ordering::Acquire)
    }

    /// Retune the engine to `settings`.
    ///
    /// The snapshot is clamped, then compared with the previous one: an
    /// identical snapshot sends nothing, and curves and the reverb impulse are
    /// only rebuilt when their own inputs changed.
    pub fn apply_settings(&self, settings: &EngineSettings) -> Result<(), LoadError> {
        self.drain_garbage();
        let next = settings.clamped();
        let mut state = self.state.lock();
        if state.last_settings == Some(next) {
            debug!("settings unchanged");
            return Ok(());
        }

        if state.exciter_amount != next.spectrum_extension_strength {
            self.send(EngineCommand::Curve {
                slot: CurveSlot::SpectrumExtension,
                curve: CurveGenerator::exciter(next.spectrum_extension_strength),
            })?;
            state.exciter_amount = next.spectrum_extension_strength;
            debug!(amount = next.spectrum_extension_strength, "rebuilt exciter curve");
        }

        let amplifier = (next.analogx_class, next.analogx_drive);
        if state.amplifier != amplifier {
            self.send(EngineCommand::Curve {
                slot: CurveSlot::AnalogX,
                curve: CurveGenerator::amplifier(amplifier.0, amplifier.1),
            })?;
            state.amplifier = amplifier;
            debug!(class = ?amplifier.0, drive = amplifier.1, "rebuilt amplifier curve");
        }

        let reverb_params = (next.reverb_size, next.reverb_damping, next.reverb_width);
        if next.active(next.reverb_enabled) && state.reverb_params != Some(reverb_params) {
            let generation = self.next_generation(AssetSlot::Reverb);
            let impulse = state.reverb.generate(
                duration_from_size(next.reverb_size),
                decay_from_damping(next.reverb_damping),
                next.reverb_width,
                self.config.sample_rate,
            );
            let convolver = build_convolver(&impulse, AssetSlot::Reverb, &self.config)?;
            self.send(EngineCommand::Kernel {
                slot: AssetSlot::Reverb,
                generation,
                convolver,
            })?;
            state.reverb_params = Some(reverb_params);
            info!(
                size = next.reverb_size,
                damping = next.reverb_damping,
                width = next.reverb_width,
                frames = impulse.len(),
                "published reverb impulse"
            );
        }

        self.send(EngineCommand::Settings(next))?;
        state.last_settings = Some(next);
        Ok(())
    }

    fn prepare(&self, slot: AssetSlot, bytes: Vec<u8>) -> LoadJob {
        let generation = self.next_generation(slot);
        debug!(%slot, generation, bytes = bytes.len(), "load requested");
        LoadJob {
            slot,
            generation,
            bytes,
            config: self.config,
            latest: Arc::clone(&self.generations),
        }
    }

    /// Start loading a coloration impulse (WAV or raw `f32`).
    ///
    /// Issuing the job supersedes any earlier impulse request still in flight.
    pub fn prepare_impulse(&self, bytes: Vec<u8>) -> LoadJob {
        self.prepare(AssetSlot::Impulse, bytes)
    }

    /// Start loading a headphone correction filter.
    pub fn prepare_correction_filter(&self, bytes: Vec<u8>) -> LoadJob {
        self.prepare(AssetSlot::Correction, bytes)
    }

    /// Hand a prepared asset to the render path.
    ///
    /// Stale results are dropped with [`LoadError::Superseded`]. A decode
    /// failure clears the slot, so only that stage falls back to passthrough,
    /// and the error is returned for reporting.
    pub fn publish(&self, prepared: PreparedAsset) -> Result<(), LoadError> {
        self.drain_garbage();
        let PreparedAsset {
            slot,
            generation,
            result,
        } = prepared;

        if self.latest_generation(slot) != generation {
            debug!(%slot, generation, "dropping superseded load");
            return Err(LoadError::Superseded { slot, generation });
        }

        match result {
            Ok(convolver) => {
                info!(
                    %slot,
                    generation,
                    frames = convolver.as_ref().map_or(0, |c| c.kernel().len()),
                    "publishing kernel"
                );
                self.send(EngineCommand::Kernel {
                    slot,
                    generation,
                    convolver,
                })
            }
            Err(LoadError::Decode(err)) => {
                warn!(%slot, generation, %err, "load failed; stage disabled");
                self.send(EngineCommand::Kernel {
                    slot,
                    generation,
                    convolver: None,
                })?;
                Err(LoadError::Decode(err))
            }
            Err(err) => Err(err),
        }
    }

    /// Decode `bytes` as a coloration impulse and publish it.
    pub fn load_impulse(&self, bytes: &[u8]) -> Result<(), LoadError> {
        let prepared = self.prepare_impulse(bytes.to_vec()).run();
        self.publish(prepared)
    }

    /// Decode `bytes` as a correction filter and publish it.
    pub fn load_correction_filter(&self, bytes: &[u8]) -> Result<(), LoadError> {
        let prepared = self.prepare_correction_filter(bytes.to_vec()).run();
        self.publish(prepared)
    }

    fn clear(&self, slot: AssetSlot) -> Result<(), LoadError> {
        let generation = self.next_generation(slot);
        debug!(%slot, generation, "clearing slot");
        self.send(EngineCommand::Kernel {
            slot,
            generation,
            convolver: None,
        })
    }

    /// Unload the coloration impulse; in-flight loads become stale.
    pub fn clear_impulse(&self) -> Result<(), LoadError> {
        self.clear(AssetSlot::Impulse)
    }

    pub fn clear_correction_filter(&self) -> Result<(), LoadError> {
        self.clear(AssetSlot::Correction)
    }

    /// Drop everything the render path has handed back.
    pub fn drain_garbage(&self) -> usize {
        let mut rx = self.garbage_rx.lock();
        let mut count = 0;
        while let Ok(_item) = rx.pop() {
            count += 1;
        }
        if count > 0 {
            debug!(count, "released replaced assets");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::CorrectionFilterData;
    use crate::engine::Engine;

    fn controller() -> (Engine, EngineController) {
        Engine::new(EngineConfig {
            reverb_seed: Some(9),
            ..EngineConfig::default()
        })
    }

    fn raw_f32(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn controller_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineController>();
        assert_send_sync::<LoadJob>();
    }

    #[test]
    fn identical_settings_send_nothing() {
        let (_engine, ctl) = controller();
        let s = EngineSettings {
            enabled: true,
            ..EngineSettings::default()
        };
        ctl.apply_settings(&s).unwrap();
        let slots_before = ctl.command_tx.lock().slots();
        ctl.apply_settings(&s).unwrap();
        assert_eq!(ctl.command_tx.lock().slots(), slots_before);
    }

    #[test]
    fn settings_are_clamped_before_storing() {
        let (_engine, ctl) = controller();
        ctl.apply_settings(&EngineSettings {
            master_gain: 900.0,
            ..EngineSettings::default()
        })
        .unwrap();
        assert_eq!(ctl.settings().map(|s| s.master_gain), Some(200.0));
    }

    #[test]
    fn newer_request_supersedes_older() {
        let (_engine, ctl) = controller();
        let first = ctl.prepare_impulse(raw_f32(&[1.0, 0.5]));
        let second = ctl.prepare_impulse(raw_f32(&[0.25]));
        assert!(first.is_stale());
        assert!(!second.is_stale());

        let stale = first.run();
        match ctl.publish(stale) {
            Err(LoadError::Superseded { slot, generation }) => {
                assert_eq!(slot, AssetSlot::Impulse);
                assert_eq!(generation, 1);
            }
            other => panic!("expected superseded, got {other:?}"),
        }
        assert!(ctl.publish(second.run()).is_ok());
    }

    #[test]
    fn finished_job_superseded_before_publish() {
        let (_engine, ctl) = controller();
        let prepared = ctl.prepare_correction_filter(Vec::new()).run();
        ctl.clear_correction_filter().unwrap();
        assert!(matches!(
            ctl.publish(prepared),
            Err(LoadError::Superseded { .. })
        ));
    }

    #[test]
    fn bad_correction_file_reports_decode_error() {
        let (_engine, ctl) = controller();
        let err = ctl.load_correction_filter(b"nope").unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn correction_filter_loads() {
        let (_engine, ctl) = controller();
        let data = CorrectionFilterData {
            channels: 2,
            coefficient_count: 4,
            coefficients: vec![1.0, 0.0, 0.5, 0.0],
        };
        assert!(ctl.load_correction_filter(&data.to_bytes()).is_ok());
    }

    #[test]
    fn empty_impulse_builds_nothing() {
        let config = EngineConfig::default();
        let empty = SampleBuffer::mono(Vec::new(), 44100);
        assert!(build_convolver(&empty, AssetSlot::Impulse, &config).unwrap().is_none());
    }

    #[test]
    fn upsampled_impulse_length_is_bounded() {
        let config = EngineConfig::default();
        let tiny_rate = SampleBuffer::mono(vec![0.5; 200], 1);
        let err = build_convolver(&tiny_rate, AssetSlot::Impulse, &config).unwrap_err();
        assert_eq!(
            err,
            DecodeError::AssetTooLarge {
                declared: 8_820_000,
                limit: MAX_IMPULSE_SECONDS as u64 * 44100,
            }
        );

        let longest = SampleBuffer::mono(vec![0.0; 20 * 44100], 44100);
        assert!(build_convolver(&longest, AssetSlot::Impulse, &config).is_ok());
    }

    #[test]
    fn impulse_resampled_to_engine_rate() {
        let config = EngineConfig::default();
        let ir = SampleBuffer::mono(vec![0.5; 480], 48000);
        let conv = build_convolver(&ir, AssetSlot::Impulse, &config)
            .unwrap()
            .unwrap();
        assert_eq!(conv.kernel().len(), 441);
    }
}
