//! The fixed signal graph.
//!
//! Every stage stays in the path for the engine's lifetime. Disabling a
//! stage only moves its smoothed targets to values that make it transparent,
//! and once those targets are reached the stage skips its work entirely so
//! the bypassed output is bit-identical to the input.

use crate::dsp::analysis::AnalysisWriter;
use crate::dsp::compressor::Compressor;
use crate::dsp::convolver::Convolver;
use crate::dsp::delay::{DelayLine, MAX_DELAY_SECONDS};
use crate::dsp::filter::{BiquadFilter, FilterType};
use crate::dsp::{AudioBlock, Smoothed};
use crate::generate::{CurveGenerator, TransferCurve};
use crate::settings::{BassMode, EQ_FREQUENCIES, EQ_Q, EngineSettings, SurroundMode};

use super::commands::{AssetSlot, CurveSlot};

const SPECTRUM_EXTENSION_HZ: f64 = 6000.0;
const SPECTRUM_EXTENSION_Q: f64 = 0.707;
const SHELF_Q: f64 = 0.707;
/// Largest Haas offset, reached at full surround strength.
const HAAS_MAX_SECONDS: f32 = 0.010;

/// Stable identifiers for the stages, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    SpectrumExtension,
    Equalizer,
    Tube,
    Convolver,
    Reverb,
    Correction,
    Surround,
    AnalogX,
    Enhancement,
    Compressor,
    Protection,
    MasterGain,
    Limiter,
    Analysis,
}

impl StageId {
    pub const ALL: [StageId; 14] = [
        StageId::SpectrumExtension,
        StageId::Equalizer,
        StageId::Tube,
        StageId::Convolver,
        StageId::Reverb,
        StageId::Correction,
        StageId::Surround,
        StageId::AnalogX,
        StageId::Enhancement,
        StageId::Compressor,
        StageId::Protection,
        StageId::MasterGain,
        StageId::Limiter,
        StageId::Analysis,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageId::SpectrumExtension => "spectrum-extension",
            StageId::Equalizer => "equalizer",
            StageId::Tube => "tube",
            StageId::Convolver => "convolver",
            StageId::Reverb => "reverb",
            StageId::Correction => "correction",
            StageId::Surround => "surround",
            StageId::AnalogX => "analogx",
            StageId::Enhancement => "enhancement",
            StageId::Compressor => "compressor",
            StageId::Protection => "protection",
            StageId::MasterGain => "master-gain",
            StageId::Limiter => "limiter",
            StageId::Analysis => "analysis",
        }
    }
}

/// One node of the graph.
pub(crate) trait Stage: Send {
    fn id(&self) -> StageId;

    /// Point every smoothed parameter at the values `settings` asks for.
    fn retarget(&mut self, settings: &EngineSettings);

    /// Transform `block` in place; `scratch` is free working space of the same shape.
    fn process(&mut self, block: &mut AudioBlock, scratch: &mut AudioBlock, dt: f32);
}

fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Paired wet and dry gains.
#[derive(Debug, Clone, Copy)]
struct WetDry {
    wet: Smoothed,
    dry: Smoothed,
}

impl WetDry {
    fn bypassed() -> Self {
        WetDry {
            wet: Smoothed::new(0.0),
            dry: Smoothed::new(1.0),
        }
    }

    fn set_target(&mut self, wet: f32, dry: f32) {
        self.wet.set_target(wet);
        self.dry.set_target(dry);
    }

    /// Advance both gains one quantum.
    fn advance(&mut self, dt: f32) -> (f32, f32) {
        (self.wet.advance(dt), self.dry.advance(dt))
    }

    fn is_bypassed(&self) -> bool {
        self.wet.is_settled_at(0.0) && self.dry.is_settled_at(1.0)
    }
}

// ---------------------------------------------------------------------------
// 1. Spectrum extension
// ---------------------------------------------------------------------------

/// High-passed, excited copy of the signal added back on top.
pub(crate) struct SpectrumExtension {
    filters: Vec<BiquadFilter>,
    curve: TransferCurve,
    wet: Smoothed,
}

impl SpectrumExtension {
    fn new(channels: usize, sample_rate: f64) -> Self {
        SpectrumExtension {
            filters: (0..channels)
                .map(|_| {
                    BiquadFilter::with_params(
                        FilterType::Highpass,
                        sample_rate,
                        SPECTRUM_EXTENSION_HZ,
                        SPECTRUM_EXTENSION_Q,
                        0.0,
                    )
                })
                .collect(),
            curve: CurveGenerator::exciter(EngineSettings::default().spectrum_extension_strength),
            wet: Smoothed::new(0.0),
        }
    }

    fn swap_curve(&mut self, curve: TransferCurve) -> TransferCurve {
        std::mem::replace(&mut self.curve, curve)
    }
}

impl Stage for SpectrumExtension {
    fn id(&self) -> StageId {
        StageId::SpectrumExtension
    }

    fn retarget(&mut self, settings: &EngineSettings) {
        let wet = if settings.active(settings.spectrum_extension_enabled) {
            settings.spectrum_extension_strength / 100.0 * 0.5
        } else {
            0.0
        };
        self.wet.set_target(wet);
    }

    fn process(&mut self, block: &mut AudioBlock, scratch: &mut AudioBlock, dt: f32) {
        let wet = self.wet.advance(dt);
        if self.wet.is_settled_at(0.0) {
            self.filters.iter_mut().for_each(BiquadFilter::reset);
            return;
        }

        scratch.copy_from(block);
        for (c, filter) in self.filters.iter_mut().enumerate() {
            let ch = scratch.channel_mut(c);
            filter.process_block(ch);
            for s in ch.iter_mut() {
                *s = self.curve.shape(*s);
            }
        }
        block.mix_in(1.0, scratch, wet);
    }
}

// ---------------------------------------------------------------------------
// 2. Equalizer
// ---------------------------------------------------------------------------

struct EqBand {
    gain_db: Smoothed,
    filters: Vec<BiquadFilter>,
}

/// Ten peaking bands in series.
pub(crate) struct Equalizer {
    bands: Vec<EqBand>,
}

impl Equalizer {
    fn new(channels: usize, sample_rate: f64) -> Self {
        let bands = EQ_FREQUENCIES
            .iter()
            .map(|&freq| EqBand {
                gain_db: Smoothed::new(0.0),
                filters: (0..channels)
                    .map(|_| {
                        BiquadFilter::with_params(
                            FilterType::Peaking,
                            sample_rate,
                            freq as f64,
                            EQ_Q as f64,
                            0.0,
                        )
                    })
                    .collect(),
            })
            .collect();
        Equalizer { bands }
    }
}

impl Stage for Equalizer {
    fn id(&self) -> StageId {
        StageId::Equalizer
    }

    fn retarget(&mut self, settings: &EngineSettings) {
        let active = settings.active(settings.equalizer_enabled);
        for (band, &gain) in self.bands.iter_mut().zip(&settings.equalizer_gains) {
            band.gain_db.set_target(if active { gain } else { 0.0 });
        }
    }

    fn process(&mut self, block: &mut AudioBlock, _scratch: &mut AudioBlock, dt: f32) {
        for band in &mut self.bands {
            let gain = band.gain_db.advance(dt);
            if band.gain_db.is_settled_at(0.0) {
                band.filters.iter_mut().for_each(BiquadFilter::reset);
                continue;
            }
            for (c, filter) in band.filters.iter_mut().enumerate() {
                filter.set_gain_db(gain as f64);
                filter.process_block(block.channel_mut(c));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 3 / 8. Waveshapers
// ---------------------------------------------------------------------------

/// Lookup-table waveshaper with an on/off wet/dry crossfade.
pub(crate) struct Waveshaper {
    id: StageId,
    curve: TransferCurve,
    mix: WetDry,
}

impl Waveshaper {
    fn tube() -> Self {
        Waveshaper {
            id: StageId::Tube,
            curve: CurveGenerator::tube(),
            mix: WetDry::bypassed(),
        }
    }

    fn analogx() -> Self {
        let defaults = EngineSettings::default();
        Waveshaper {
            id: StageId::AnalogX,
            curve: CurveGenerator::amplifier(defaults.analogx_class, defaults.analogx_drive),
            mix: WetDry::bypassed(),
        }
    }

    fn swap_curve(&mut self, curve: TransferCurve) -> TransferCurve {
        std::mem::replace(&mut self.curve, curve)
    }
}

impl Stage for Waveshaper {
    fn id(&self) -> StageId {
        self.id
    }

    fn retarget(&mut self, settings: &EngineSettings) {
        let enabled = match self.id {
            StageId::Tube => settings.tube_enabled,
            _ => settings.analogx_enabled,
        };
        if settings.active(enabled) {
            self.mix.set_target(1.0, 0.0);
        } else {
            self.mix.set_target(0.0, 1.0);
        }
    }

    fn process(&mut self, block: &mut AudioBlock, scratch: &mut AudioBlock, dt: f32) {
        let (wet, dry) = self.mix.advance(dt);
        if self.mix.is_bypassed() {
            return;
        }

        scratch.copy_from(block);
        for c in 0..scratch.num_channels() {
            for s in scratch.channel_mut(c) {
                *s = self.curve.shape(*s);
            }
        }
        block.mix_in(dry, scratch, wet);
    }
}

// ---------------------------------------------------------------------------
// 4 / 5 / 6. Convolution stages
// ---------------------------------------------------------------------------

/// How a convolution stage turns settings into wet and dry gains.
#[derive(Debug, Clone, Copy, PartialEq)]
enum MixLaw {
    /// File impulse: wet 1, dry reduced by crossfeed.
    Coloration,
    /// Generated reverb: independent wet and dry percentages.
    Reverb,
    /// Correction filter: fully wet or fully dry.
    Correction,
}

/// Convolution against a swappable kernel.
///
/// A stage without a kernel behaves as disabled.
pub(crate) struct ConvolverStage {
    id: StageId,
    law: MixLaw,
    convolver: Option<Box<Convolver>>,
    /// The bound kernel is being removed and keeps running until wet reaches 0.
    unbinding: bool,
    /// Kernel whose fade-out finished, waiting for the engine to collect it.
    retired: Option<Box<Convolver>>,
    /// Gains the settings ask for, applied only while a kernel is bound.
    requested: Option<(f32, f32)>,
    mix: WetDry,
    needs_reset: bool,
}

impl ConvolverStage {
    fn new(id: StageId, law: MixLaw) -> Self {
        ConvolverStage {
            id,
            law,
            convolver: None,
            unbinding: false,
            retired: None,
            requested: None,
            mix: WetDry::bypassed(),
            needs_reset: false,
        }
    }

    /// Bind a new kernel, returning the previous one if it can be disposed now.
    ///
    /// Unbinding an audible kernel does not cut it off: it stays in the path
    /// while the mix fades to dry and is then handed out by [`Self::take_retired`].
    pub(crate) fn swap(&mut self, convolver: Option<Box<Convolver>>) -> Option<Box<Convolver>> {
        let old = match convolver {
            None if self.convolver.is_some() && !self.mix.wet.is_settled_at(0.0) => {
                self.unbinding = true;
                None
            }
            convolver => {
                self.unbinding = false;
                self.needs_reset = false;
                std::mem::replace(&mut self.convolver, convolver)
            }
        };
        self.refresh_targets();
        old
    }

    pub(crate) fn has_kernel(&self) -> bool {
        self.convolver.is_some() && !self.unbinding
    }

    /// Kernel that finished fading out since the last call.
    pub(crate) fn take_retired(&mut self) -> Option<Box<Convolver>> {
        self.retired.take()
    }

    fn refresh_targets(&mut self) {
        match (self.requested, self.has_kernel()) {
            (Some((wet, dry)), true) => self.mix.set_target(wet, dry),
            _ => self.mix.set_target(0.0, 1.0),
        }
    }
}

impl Stage for ConvolverStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn retarget(&mut self, settings: &EngineSettings) {
        self.requested = match self.law {
            MixLaw::Coloration if settings.active(settings.convolver_enabled) => {
                Some((1.0, (100.0 - settings.convolver_crossfeed) / 100.0))
            }
            MixLaw::Reverb if settings.active(settings.reverb_enabled) => {
                Some((settings.reverb_wet / 100.0, settings.reverb_dry / 100.0))
            }
            MixLaw::Correction if settings.active(settings.correction_enabled) => Some((1.0, 0.0)),
            _ => None,
        };
        self.refresh_targets();
    }

    fn process(&mut self, block: &mut AudioBlock, scratch: &mut AudioBlock, dt: f32) {
        let (wet, dry) = self.mix.advance(dt);
        if self.unbinding && self.mix.wet.is_settled_at(0.0) && self.retired.is_none() {
            self.retired = self.convolver.take();
            self.unbinding = false;
        }
        let convolver = match self.convolver.as_mut() {
            Some(convolver) if !self.mix.wet.is_settled_at(0.0) => convolver,
            _ => {
                self.needs_reset = true;
                block.scale(dry);
                return;
            }
        };

        if self.needs_reset {
            convolver.reset();
            self.needs_reset = false;
        }
        convolver.process(block, scratch);
        block.mix_in(dry, scratch, wet);
    }
}

// ---------------------------------------------------------------------------
// 7. Surround
// ---------------------------------------------------------------------------

/// Per-channel delays remerged behind an on/off crossfade.
pub(crate) struct Surround {
    delays: Vec<DelayLine>,
    left: Smoothed,
    right: Smoothed,
    mix: WetDry,
}

impl Surround {
    fn new(channels: usize, sample_rate: f64) -> Self {
        Surround {
            delays: (0..channels.min(2))
                .map(|_| DelayLine::new(sample_rate, MAX_DELAY_SECONDS))
                .collect(),
            left: Smoothed::new(0.0),
            right: Smoothed::new(0.0),
            mix: WetDry::bypassed(),
        }
    }

    /// Left and right delay targets in seconds.
    fn delay_targets(settings: &EngineSettings) -> (f32, f32) {
        let haas = settings.surround_strength / 100.0 * HAAS_MAX_SECONDS;
        match settings.surround_mode {
            SurroundMode::Haas => (0.0, haas),
            SurroundMode::Differential => (0.0, settings.surround_delay_ms / 1000.0),
            SurroundMode::Field => (0.5 * haas, haas),
        }
    }
}

impl Stage for Surround {
    fn id(&self) -> StageId {
        StageId::Surround
    }

    fn retarget(&mut self, settings: &EngineSettings) {
        let (left, right) = Self::delay_targets(settings);
        self.left.set_target(left);
        self.right.set_target(right);
        if settings.active(settings.surround_enabled) {
            self.mix.set_target(1.0, 0.0);
        } else {
            self.mix.set_target(0.0, 1.0);
        }
    }

    fn process(&mut self, block: &mut AudioBlock, scratch: &mut AudioBlock, dt: f32) {
        let (wet, dry) = self.mix.advance(dt);
        let ramps = [
            (self.left.value(), self.left.advance(dt)),
            (self.right.value(), self.right.advance(dt)),
        ];

        // Delay lines keep running while bypassed so re-enabling has history.
        scratch.copy_from(block);
        let frames = block.frames();
        for (c, (delay, (from, to))) in self.delays.iter_mut().zip(ramps).enumerate() {
            let step = (to - from) / frames.max(1) as f32;
            for (i, s) in scratch.channel_mut(c).iter_mut().enumerate() {
                let seconds = from + step * (i + 1) as f32;
                *s = delay.process(*s, seconds as f64);
            }
        }

        if self.mix.is_bypassed() {
            return;
        }
        block.mix_in(dry, scratch, wet);
    }
}

// ---------------------------------------------------------------------------
// 9. Bass / clarity / dynamic gain
// ---------------------------------------------------------------------------

fn bass_shape(mode: BassMode) -> (FilterType, f64) {
    match mode {
        BassMode::Natural => (FilterType::LowShelf, SHELF_Q),
        BassMode::Pure => (FilterType::Peaking, 0.3),
        BassMode::Subwoofer => (FilterType::Peaking, 0.8),
    }
}

/// Bass filter, clarity shelf and a plain gain in series.
pub(crate) struct Enhancement {
    bass: Vec<BiquadFilter>,
    clarity: Vec<BiquadFilter>,
    bass_mode: BassMode,
    bass_frequency: Smoothed,
    bass_gain_db: Smoothed,
    clarity_frequency: Smoothed,
    clarity_gain_db: Smoothed,
    gain_db: Smoothed,
}

impl Enhancement {
    fn new(channels: usize, sample_rate: f64) -> Self {
        let d = EngineSettings::default();
        let (bass_type, bass_q) = bass_shape(d.bass_mode);
        Enhancement {
            bass: (0..channels)
                .map(|_| {
                    BiquadFilter::with_params(
                        bass_type,
                        sample_rate,
                        d.bass_frequency as f64,
                        bass_q,
                        0.0,
                    )
                })
                .collect(),
            clarity: (0..channels)
                .map(|_| {
                    BiquadFilter::with_params(
                        FilterType::HighShelf,
                        sample_rate,
                        d.clarity_frequency as f64,
                        SHELF_Q,
                        0.0,
                    )
                })
                .collect(),
            bass_mode: d.bass_mode,
            bass_frequency: Smoothed::new(d.bass_frequency),
            bass_gain_db: Smoothed::new(0.0),
            clarity_frequency: Smoothed::new(d.clarity_frequency),
            clarity_gain_db: Smoothed::new(0.0),
            gain_db: Smoothed::new(0.0),
        }
    }
}

impl Stage for Enhancement {
    fn id(&self) -> StageId {
        StageId::Enhancement
    }

    fn retarget(&mut self, settings: &EngineSettings) {
        let active = settings.active(settings.bass_enabled);
        if settings.bass_mode != self.bass_mode {
            self.bass_mode = settings.bass_mode;
            let (filter_type, q) = bass_shape(self.bass_mode);
            for f in &mut self.bass {
                f.set_filter_type(filter_type);
                f.set_q(q);
            }
        }
        self.bass_frequency.set_target(settings.bass_frequency);
        self.clarity_frequency.set_target(settings.clarity_frequency);

        let gain = |db: f32| if active { db } else { 0.0 };
        self.bass_gain_db.set_target(gain(settings.bass_gain_db));
        self.clarity_gain_db.set_target(gain(settings.clarity_gain_db));
        self.gain_db.set_target(gain(settings.dynamic_gain_db));
    }

    fn process(&mut self, block: &mut AudioBlock, _scratch: &mut AudioBlock, dt: f32) {
        let bass_freq = self.bass_frequency.advance(dt) as f64;
        let bass_gain = self.bass_gain_db.advance(dt) as f64;
        if self.bass_gain_db.is_settled_at(0.0) {
            self.bass.iter_mut().for_each(BiquadFilter::reset);
        } else {
            for (c, f) in self.bass.iter_mut().enumerate() {
                f.set_frequency(bass_freq);
                f.set_gain_db(bass_gain);
                f.process_block(block.channel_mut(c));
            }
        }

        let clarity_freq = self.clarity_frequency.advance(dt) as f64;
        let clarity_gain = self.clarity_gain_db.advance(dt) as f64;
        if self.clarity_gain_db.is_settled_at(0.0) {
            self.clarity.iter_mut().for_each(BiquadFilter::reset);
        } else {
            for (c, f) in self.clarity.iter_mut().enumerate() {
                f.set_frequency(clarity_freq);
                f.set_gain_db(clarity_gain);
                f.process_block(block.channel_mut(c));
            }
        }

        let gain_db = self.gain_db.advance(dt);
        if !self.gain_db.is_settled_at(0.0) {
            block.scale(db_to_gain(gain_db));
        }
    }
}

// ---------------------------------------------------------------------------
// 10 / 11 / 13. Dynamics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum DynamicsRole {
    Compressor,
    Protection,
    Limiter,
}

/// Compressor, protection or limiter; disabled means ratio 1.
pub(crate) struct Dynamics {
    id: StageId,
    role: DynamicsRole,
    compressor: Compressor,
    threshold: Smoothed,
    ratio: Smoothed,
    knee: Smoothed,
    attack: f64,
    release: f64,
}

impl Dynamics {
    fn new(role: DynamicsRole, sample_rate: f64) -> Self {
        let d = EngineSettings::default();
        let (id, knee, attack, release) = match role {
            DynamicsRole::Compressor => (
                StageId::Compressor,
                d.compressor_knee_db,
                d.compressor_attack as f64,
                d.compressor_release as f64,
            ),
            DynamicsRole::Protection => (StageId::Protection, 0.0, 0.0, 0.01),
            DynamicsRole::Limiter => (StageId::Limiter, 0.0, 0.001, 0.05),
        };
        Dynamics {
            id,
            role,
            compressor: Compressor::with_params(
                sample_rate,
                0.0,
                1.0,
                knee as f64,
                attack,
                release,
            ),
            threshold: Smoothed::new(0.0),
            ratio: Smoothed::new(1.0),
            knee: Smoothed::new(knee),
            attack,
            release,
        }
    }
}

impl Stage for Dynamics {
    fn id(&self) -> StageId {
        self.id
    }

    fn retarget(&mut self, settings: &EngineSettings) {
        match self.role {
            DynamicsRole::Compressor => {
                let active = settings.active(settings.compressor_enabled);
                self.threshold.set_target(settings.compressor_threshold_db);
                self.ratio
                    .set_target(if active { settings.compressor_ratio } else { 1.0 });
                self.knee.set_target(settings.compressor_knee_db);
                self.attack = settings.compressor_attack as f64;
                self.release = settings.compressor_release as f64;
            }
            DynamicsRole::Protection | DynamicsRole::Limiter => {
                let (enabled, threshold) = if self.role == DynamicsRole::Protection {
                    (settings.protection_enabled, settings.protection_threshold_db)
                } else {
                    (settings.limiter_enabled, settings.limiter_threshold_db)
                };
                if settings.active(enabled) {
                    self.threshold.set_target(threshold);
                    self.ratio.set_target(20.0);
                } else {
                    self.threshold.set_target(0.0);
                    self.ratio.set_target(1.0);
                }
            }
        }
    }

    fn process(&mut self, block: &mut AudioBlock, _scratch: &mut AudioBlock, dt: f32) {
        let threshold = self.threshold.advance(dt) as f64;
        let ratio = self.ratio.advance(dt) as f64;
        let knee = self.knee.advance(dt) as f64;
        if self.ratio.is_settled_at(1.0) {
            self.compressor.reset();
            return;
        }

        self.compressor
            .set_params(threshold, ratio, knee, self.attack, self.release);
        self.compressor.process_block(block);
    }
}

// ---------------------------------------------------------------------------
// 12. Master gain / 14. Analysis
// ---------------------------------------------------------------------------

pub(crate) struct MasterGain {
    gain: Smoothed,
}

impl Stage for MasterGain {
    fn id(&self) -> StageId {
        StageId::MasterGain
    }

    fn retarget(&mut self, settings: &EngineSettings) {
        let gain = if settings.enabled {
            settings.master_gain / 100.0
        } else {
            1.0
        };
        self.gain.set_target(gain);
    }

    fn process(&mut self, block: &mut AudioBlock, _scratch: &mut AudioBlock, dt: f32) {
        block.scale(self.gain.advance(dt));
    }
}

pub(crate) struct AnalysisStage {
    writer: AnalysisWriter,
}

impl Stage for AnalysisStage {
    fn id(&self) -> StageId {
        StageId::Analysis
    }

    fn retarget(&mut self, _settings: &EngineSettings) {}

    fn process(&mut self, block: &mut AudioBlock, _scratch: &mut AudioBlock, _dt: f32) {
        self.writer.write(block);
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// All fourteen stages, wired once.
pub(crate) struct StageGraph {
    spectrum_extension: SpectrumExtension,
    equalizer: Equalizer,
    tube: Waveshaper,
    convolver: ConvolverStage,
    reverb: ConvolverStage,
    correction: ConvolverStage,
    surround: Surround,
    analogx: Waveshaper,
    enhancement: Enhancement,
    compressor: Dynamics,
    protection: Dynamics,
    master_gain: MasterGain,
    limiter: Dynamics,
    analysis: AnalysisStage,
}

impl StageGraph {
    pub(crate) fn new(channels: usize, sample_rate: u32, analysis: AnalysisWriter) -> Self {
        let sr = sample_rate as f64;
        let mut graph = StageGraph {
            spectrum_extension: SpectrumExtension::new(channels, sr),
            equalizer: Equalizer::new(channels, sr),
            tube: Waveshaper::tube(),
            convolver: ConvolverStage::new(StageId::Convolver, MixLaw::Coloration),
            reverb: ConvolverStage::new(StageId::Reverb, MixLaw::Reverb),
            correction: ConvolverStage::new(StageId::Correction, MixLaw::Correction),
            surround: Surround::new(channels, sr),
            analogx: Waveshaper::analogx(),
            enhancement: Enhancement::new(channels, sr),
            compressor: Dynamics::new(DynamicsRole::Compressor, sr),
            protection: Dynamics::new(DynamicsRole::Protection, sr),
            master_gain: MasterGain {
                gain: Smoothed::new(1.0),
            },
            limiter: Dynamics::new(DynamicsRole::Limiter, sr),
            analysis: AnalysisStage { writer: analysis },
        };
        graph.retarget(&EngineSettings::default());
        graph
    }

    /// Stages in processing order.
    fn stages_mut(&mut self) -> [&mut dyn Stage; 14] {
        [
            &mut self.spectrum_extension,
            &mut self.equalizer,
            &mut self.tube,
            &mut self.convolver,
            &mut self.reverb,
            &mut self.correction,
            &mut self.surround,
            &mut self.analogx,
            &mut self.enhancement,
            &mut self.compressor,
            &mut self.protection,
            &mut self.master_gain,
            &mut self.limiter,
            &mut self.analysis,
        ]
    }

    /// Stage ids as wired, in processing order.
    pub(crate) fn order(&self) -> [StageId; 14] {
        [
            self.spectrum_extension.id(),
            self.equalizer.id(),
            self.tube.id(),
            self.convolver.id(),
            self.reverb.id(),
            self.correction.id(),
            self.surround.id(),
            self.analogx.id(),
            self.enhancement.id(),
            self.compressor.id(),
            self.protection.id(),
            self.master_gain.id(),
            self.limiter.id(),
            self.analysis.id(),
        ]
    }

    pub(crate) fn retarget(&mut self, settings: &EngineSettings) {
        for stage in self.stages_mut() {
            stage.retarget(settings);
        }
    }

    pub(crate) fn process(&mut self, block: &mut AudioBlock, scratch: &mut AudioBlock, dt: f32) {
        for stage in self.stages_mut() {
            stage.process(block, scratch, dt);
        }
    }

    pub(crate) fn convolution_stage(&mut self, slot: AssetSlot) -> &mut ConvolverStage {
        match slot {
            AssetSlot::Impulse => &mut self.convolver,
            AssetSlot::Correction => &mut self.correction,
            AssetSlot::Reverb => &mut self.reverb,
        }
    }

    /// Kernels whose fade-out completed during the last quantum.
    pub(crate) fn take_retired(&mut self, slot: AssetSlot) -> Option<Box<Convolver>> {
        self.convolution_stage(slot).take_retired()
    }

    pub(crate) fn kernel_loaded(&self, slot: AssetSlot) -> bool {
        match slot {
            AssetSlot::Impulse => self.convolver.has_kernel(),
            AssetSlot::Correction => self.correction.has_kernel(),
            AssetSlot::Reverb => self.reverb.has_kernel(),
        }
    }

    pub(crate) fn swap_curve(&mut self, slot: CurveSlot, curve: TransferCurve) -> TransferCurve {
        match slot {
            CurveSlot::SpectrumExtension => self.spectrum_extension.swap_curve(curve),
            CurveSlot::AnalogX => self.analogx.swap_curve(curve),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::dsp::analysis::analysis_tap;
    use crate::dsp::convolver::ConvolutionKernel;

    const SR: u32 = 44100;
    const QUANTUM: usize = 128;
    const DT: f32 = QUANTUM as f32 / SR as f32;

    fn test_block(channels: usize, seed: usize) -> AudioBlock {
        let mut block = AudioBlock::new(channels, QUANTUM);
        for c in 0..channels {
            for (i, s) in block.channel_mut(c).iter_mut().enumerate() {
                *s = (((i + seed) * (7 + c)) % 97) as f32 / 97.0 - 0.5;
            }
        }
        block
    }

    /// Run one stage for `quanta` blocks and return the last input/output pair.
    fn run_stage(stage: &mut dyn Stage, quanta: usize) -> (AudioBlock, AudioBlock) {
        let mut scratch = AudioBlock::new(2, QUANTUM);
        let mut last = (test_block(2, 0), test_block(2, 0));
        for q in 0..quanta {
            let input = test_block(2, q * QUANTUM);
            let mut block = input.clone();
            stage.process(&mut block, &mut scratch, DT);
            last = (input, block);
        }
        last
    }

    fn settle(stage: &mut dyn Stage) -> (AudioBlock, AudioBlock) {
        run_stage(stage, 400)
    }

    fn kernel(taps: Vec<f32>) -> Box<Convolver> {
        let buffer = SampleBuffer::mono(taps, SR);
        Box::new(Convolver::new(ConvolutionKernel::from_buffer(&buffer, false), 2))
    }

    fn loaded(id: StageId, law: MixLaw, taps: Vec<f32>) -> ConvolverStage {
        let mut stage = ConvolverStage::new(id, law);
        stage.swap(Some(kernel(taps)));
        stage
    }

    fn enabled_everything() -> EngineSettings {
        EngineSettings {
            enabled: true,
            spectrum_extension_enabled: true,
            equalizer_enabled: true,
            equalizer_gains: [6.0; 10],
            tube_enabled: true,
            convolver_enabled: true,
            reverb_enabled: true,
            correction_enabled: true,
            surround_enabled: true,
            analogx_enabled: true,
            bass_enabled: true,
            compressor_enabled: true,
            protection_enabled: true,
            limiter_enabled: true,
            ..EngineSettings::default()
        }
    }

    #[test]
    fn order_is_fixed() {
        let (writer, _reader) = analysis_tap(256);
        let graph = StageGraph::new(2, SR, writer);
        assert_eq!(graph.order(), StageId::ALL);
        assert_eq!(StageId::ALL[0].name(), "spectrum-extension");
        assert_eq!(StageId::ALL[13].name(), "analysis");
    }

    #[test]
    fn default_graph_is_transparent() {
        let (writer, _reader) = analysis_tap(256);
        let mut graph = StageGraph::new(2, SR, writer);
        let mut scratch = AudioBlock::new(2, QUANTUM);
        let input = test_block(2, 3);
        let mut block = input.clone();
        graph.process(&mut block, &mut scratch, DT);
        assert_eq!(block.channel(0), input.channel(0));
        assert_eq!(block.channel(1), input.channel(1));
    }

    #[test]
    fn every_stage_returns_to_exact_bypass() {
        let on = enabled_everything();
        let off = EngineSettings {
            enabled: true,
            ..EngineSettings::default()
        };
        let sr = SR as f64;
        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(SpectrumExtension::new(2, sr)),
            Box::new(Equalizer::new(2, sr)),
            Box::new(Waveshaper::tube()),
            Box::new(loaded(
                StageId::Convolver,
                MixLaw::Coloration,
                vec![0.5, 0.25, -0.1],
            )),
            Box::new(loaded(StageId::Reverb, MixLaw::Reverb, vec![0.3; 700])),
            Box::new(loaded(
                StageId::Correction,
                MixLaw::Correction,
                vec![0.9, -0.2, 0.05],
            )),
            Box::new(Surround::new(2, sr)),
            Box::new(Waveshaper::analogx()),
            Box::new(Enhancement::new(2, sr)),
            Box::new(Dynamics::new(DynamicsRole::Compressor, sr)),
            Box::new(Dynamics::new(DynamicsRole::Protection, sr)),
            Box::new(Dynamics::new(DynamicsRole::Limiter, sr)),
        ];
        for stage in &mut stages {
            stage.retarget(&on);
            run_stage(stage.as_mut(), 50);
            stage.retarget(&off);
            let (input, output) = settle(stage.as_mut());
            for c in 0..2 {
                assert_eq!(
                    output.channel(c),
                    input.channel(c),
                    "{} not transparent after disable",
                    stage.id().name()
                );
            }
        }
    }

    #[test]
    fn retarget_never_jumps() {
        let mut master = MasterGain {
            gain: Smoothed::new(1.0),
        };
        master.retarget(&EngineSettings {
            enabled: true,
            master_gain: 0.0,
            ..EngineSettings::default()
        });
        let (input, output) = run_stage(&mut master, 1);
        let ratio = output.channel(0)[5] / input.channel(0)[5];
        assert!(ratio > 0.9 && ratio < 1.0, "first quantum gain {ratio}");
    }

    #[test]
    fn haas_delays_right_channel() {
        let s = EngineSettings {
            surround_strength: 100.0,
            ..EngineSettings::default()
        };
        assert_eq!(Surround::delay_targets(&s), (0.0, 0.010));

        let field = EngineSettings {
            surround_mode: SurroundMode::Field,
            surround_strength: 50.0,
            ..s
        };
        let (l, r) = Surround::delay_targets(&field);
        assert!((l - 0.0025).abs() < 1e-7 && (r - 0.005).abs() < 1e-7);

        let diff = EngineSettings {
            surround_mode: SurroundMode::Differential,
            surround_delay_ms: 250.0,
            ..s
        };
        assert_eq!(Surround::delay_targets(&diff), (0.0, 0.25));
    }

    #[test]
    fn convolver_without_kernel_stays_dry() {
        let mut stage = ConvolverStage::new(StageId::Correction, MixLaw::Correction);
        stage.retarget(&EngineSettings {
            enabled: true,
            correction_enabled: true,
            ..EngineSettings::default()
        });
        assert!(!stage.has_kernel());
        let (input, output) = run_stage(&mut stage, 3);
        assert_eq!(output.channel(0), input.channel(0));
    }

    #[test]
    fn unbinding_an_audible_kernel_fades_out() {
        let mut stage = loaded(StageId::Correction, MixLaw::Correction, vec![1.0]);
        stage.retarget(&EngineSettings {
            enabled: true,
            correction_enabled: true,
            ..EngineSettings::default()
        });
        settle(&mut stage);

        assert!(stage.swap(None).is_none(), "kernel must keep running while wet fades");
        assert!(!stage.has_kernel());

        let (input, output) = run_stage(&mut stage, 1);
        for i in 0..QUANTUM {
            let (x, y) = (input.channel(0)[i], output.channel(0)[i]);
            assert!((x - y).abs() < 1e-5, "frame {i} jumped: {x} -> {y}");
        }
        assert!(stage.take_retired().is_none(), "still fading after one quantum");

        let (input, output) = settle(&mut stage);
        assert!(stage.take_retired().is_some(), "kernel handed back once silent");
        assert_eq!(output.channel(0), input.channel(0));
        assert_eq!(output.channel(1), input.channel(1));
    }

    #[test]
    fn unbinding_a_silent_kernel_is_immediate() {
        let mut stage = loaded(StageId::Convolver, MixLaw::Coloration, vec![0.5]);
        assert!(stage.swap(None).is_some(), "disabled stage releases its kernel at once");
        assert!(stage.take_retired().is_none());
    }

    #[test]
    fn reverb_mix_law() {
        let mut stage = ConvolverStage::new(StageId::Reverb, MixLaw::Reverb);
        stage.retarget(&EngineSettings {
            enabled: true,
            reverb_enabled: true,
            reverb_wet: 40.0,
            reverb_dry: 80.0,
            ..EngineSettings::default()
        });
        assert_eq!(stage.requested, Some((0.4, 0.8)));

        let mut coloration = ConvolverStage::new(StageId::Convolver, MixLaw::Coloration);
        coloration.retarget(&EngineSettings {
            enabled: true,
            convolver_enabled: true,
            convolver_crossfeed: 25.0,
            ..EngineSettings::default()
        });
        assert_eq!(coloration.requested, Some((1.0, 0.75)));
    }

    #[test]
    fn bass_mode_switches_filter_shape() {
        let mut stage = Enhancement::new(2, SR as f64);
        stage.retarget(&EngineSettings {
            enabled: true,
            bass_enabled: true,
            bass_mode: BassMode::Subwoofer,
            ..EngineSettings::default()
        });
        assert_eq!(stage.bass[0].filter_type(), FilterType::Peaking);
        assert_eq!(stage.gain_db.target(), 0.0);
        assert_eq!(stage.bass_gain_db.target(), 6.0);
    }
}
