//! Host-supplied settings snapshot.
//!
//! One flat struct covers every stage. Missing JSON fields fall back to
//! [`EngineSettings::default`], which leaves the engine fully bypassed.

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Centre frequencies of the ten equalizer bands, in Hz.
pub const EQ_FREQUENCIES: [f32; 10] = [
    31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];
pub const EQ_Q: f32 = 1.4;

/// How the surround stage derives its two delay times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurroundMode {
    /// Right channel delayed by up to 10 ms, scaled by strength.
    #[default]
    Haas,
    /// Right channel delayed by the explicit delay parameter.
    Differential,
    /// Both channels delayed, left at half the right's delay.
    Field,
}

/// Shape of the bass enhancement filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BassMode {
    /// Low shelf.
    #[default]
    Natural,
    /// Very broad peak, Q 0.3.
    Pure,
    /// Focused peak, Q 0.8.
    Subwoofer,
}

/// Amplifier topology emulated by the AnalogX stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AmpClass {
    #[default]
    #[serde(rename = "classA")]
    ClassA,
    #[serde(rename = "classAB")]
    ClassAB,
    #[serde(rename = "classB")]
    ClassB,
}

/// Full engine configuration as edited by the user.
///
/// Percentages run 0–100 unless noted; gains are in dB; times in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    /// Global switch. When false every stage is bypassed at unity gain.
    pub enabled: bool,
    /// Master gain, 0–200 percent of unity.
    pub master_gain: f32,

    pub spectrum_extension_enabled: bool,
    pub spectrum_extension_strength: f32,

    pub equalizer_enabled: bool,
    pub equalizer_gains: [f32; 10],

    pub tube_enabled: bool,

    pub convolver_enabled: bool,
    /// Share of the dry signal removed while the convolver is on.
    pub convolver_crossfeed: f32,

    pub reverb_enabled: bool,
    pub reverb_size: f32,
    pub reverb_damping: f32,
    pub reverb_width: f32,
    pub reverb_wet: f32,
    pub reverb_dry: f32,

    pub correction_enabled: bool,

    pub surround_enabled: bool,
    pub surround_mode: SurroundMode,
    pub surround_strength: f32,
    /// Explicit delay for differential mode, 0–500 ms.
    pub surround_delay_ms: f32,

    pub analogx_enabled: bool,
    pub analogx_class: AmpClass,
    pub analogx_drive: f32,

    pub bass_enabled: bool,
    pub bass_mode: BassMode,
    pub bass_frequency: f32,
    pub bass_gain_db: f32,
    pub clarity_frequency: f32,
    pub clarity_gain_db: f32,
    pub dynamic_gain_db: f32,

    pub compressor_enabled: bool,
    pub compressor_threshold_db: f32,
    pub compressor_ratio: f32,
    pub compressor_knee_db: f32,
    pub compressor_attack: f32,
    pub compressor_release: f32,

    pub protection_enabled: bool,
    pub protection_threshold_db: f32,

    pub limiter_enabled: bool,
    pub limiter_threshold_db: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            master_gain: 100.0,

            spectrum_extension_enabled: false,
            spectrum_extension_strength: 50.0,

            equalizer_enabled: false,
            equalizer_gains: [0.0; 10],

            tube_enabled: false,

            convolver_enabled: false,
            convolver_crossfeed: 0.0,

            reverb_enabled: false,
            reverb_size: 50.0,
            reverb_damping: 50.0,
            reverb_width: 100.0,
            reverb_wet: 30.0,
            reverb_dry: 100.0,

            correction_enabled: false,

            surround_enabled: false,
            surround_mode: SurroundMode::Haas,
            surround_strength: 50.0,
            surround_delay_ms: 20.0,

            analogx_enabled: false,
            analogx_class: AmpClass::ClassA,
            analogx_drive: 50.0,

            bass_enabled: false,
            bass_mode: BassMode::Natural,
            bass_frequency: 80.0,
            bass_gain_db: 6.0,
            clarity_frequency: 3500.0,
            clarity_gain_db: 3.0,
            dynamic_gain_db: 0.0,

            compressor_enabled: false,
            compressor_threshold_db: -24.0,
            compressor_ratio: 12.0,
            compressor_knee_db: 30.0,
            compressor_attack: 0.003,
            compressor_release: 0.25,

            protection_enabled: false,
            protection_threshold_db: -3.0,

            limiter_enabled: false,
            limiter_threshold_db: -1.0,
        }
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

impl EngineSettings {
    /// Parse a (possibly partial) JSON snapshot.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Stage switch combined with the global switch.
    #[inline]
    pub fn active(&self, stage_enabled: bool) -> bool {
        self.enabled && stage_enabled
    }

    /// Copy with every numeric field forced into its documented range.
    ///
    /// Non-finite values fall back to the defaults.
    pub fn clamped(&self) -> Self {
        let d = EngineSettings::default();
        let pct = |v: f32, fallback: f32| finite_or(v, fallback).clamp(0.0, 100.0);

        let mut gains = self.equalizer_gains;
        for g in &mut gains {
            *g = finite_or(*g, 0.0).clamp(-40.0, 40.0);
        }

        Self {
            master_gain: finite_or(self.master_gain, d.master_gain).clamp(0.0, 200.0),
            spectrum_extension_strength: pct(
                self.spectrum_extension_strength,
                d.spectrum_extension_strength,
            ),
            equalizer_gains: gains,
            convolver_crossfeed: pct(self.convolver_crossfeed, d.convolver_crossfeed),
            reverb_size: pct(self.reverb_size, d.reverb_size),
            reverb_damping: pct(self.reverb_damping, d.reverb_damping),
            reverb_width: pct(self.reverb_width, d.reverb_width),
            reverb_wet: pct(self.reverb_wet, d.reverb_wet),
            reverb_dry: pct(self.reverb_dry, d.reverb_dry),
            surround_strength: pct(self.surround_strength, d.surround_strength),
            surround_delay_ms: finite_or(self.surround_delay_ms, d.surround_delay_ms)
                .clamp(0.0, 500.0),
            analogx_drive: pct(self.analogx_drive, d.analogx_drive),
            bass_frequency: finite_or(self.bass_frequency, d.bass_frequency)
                .clamp(20.0, 500.0),
            bass_gain_db: finite_or(self.bass_gain_db, d.bass_gain_db).clamp(-40.0, 40.0),
            clarity_frequency: finite_or(self.clarity_frequency, d.clarity_frequency)
                .clamp(1000.0, 16000.0),
            clarity_gain_db: finite_or(self.clarity_gain_db, d.clarity_gain_db)
                .clamp(-40.0, 40.0),
            dynamic_gain_db: finite_or(self.dynamic_gain_db, d.dynamic_gain_db)
                .clamp(-40.0, 40.0),
            compressor_threshold_db: finite_or(
                self.compressor_threshold_db,
                d.compressor_threshold_db,
            )
            .clamp(-100.0, 0.0),
            compressor_ratio: finite_or(self.compressor_ratio, d.compressor_ratio)
                .clamp(1.0, 20.0),
            compressor_knee_db: finite_or(self.compressor_knee_db, d.compressor_knee_db)
                .clamp(0.0, 40.0),
            compressor_attack: finite_or(self.compressor_attack, d.compressor_attack)
                .clamp(0.0, 1.0),
            compressor_release: finite_or(self.compressor_release, d.compressor_release)
                .clamp(0.0, 1.0),
            protection_threshold_db: finite_or(
                self.protection_threshold_db,
                d.protection_threshold_db,
            )
            .clamp(-100.0, 0.0),
            limiter_threshold_db: finite_or(self.limiter_threshold_db, d.limiter_threshold_db)
                .clamp(-100.0, 0.0),
            ..*self
        }
    }
}
