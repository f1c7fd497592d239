pub mod buffer;
pub mod decode;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod generate;
pub mod settings;

pub use buffer::SampleBuffer;
pub use engine::{AssetSlot, Engine, EngineConfig, EngineController, StageId};
pub use error::{DecodeError, LoadError, SettingsError};
pub use settings::EngineSettings;

use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the soundstage-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{err}"))
}

/// WASM-exposed engine for an AudioWorklet: both halves in one object.
///
/// The worklet owns this value, so control calls and `process` never run
/// concurrently; the queues still keep allocation out of `process`.
#[wasm_bindgen]
pub struct WasmEngine {
    engine: Engine,
    controller: EngineController,
}

#[wasm_bindgen]
impl WasmEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: u32) -> WasmEngine {
        let (engine, controller) = Engine::new(EngineConfig {
            sample_rate,
            ..EngineConfig::default()
        });
        WasmEngine { engine, controller }
    }

    /// Apply a settings object (camelCase fields, missing fields default).
    #[wasm_bindgen(js_name = applySettings)]
    pub fn apply_settings(&self, settings: JsValue) -> Result<(), JsValue> {
        let settings: EngineSettings = serde_wasm_bindgen::from_value(settings).map_err(js_error)?;
        self.controller.apply_settings(&settings).map_err(js_error)
    }

    /// Apply a settings snapshot given as JSON text.
    #[wasm_bindgen(js_name = applySettingsJson)]
    pub fn apply_settings_json(&self, json: &str) -> Result<(), JsValue> {
        let settings = EngineSettings::from_json(json).map_err(js_error)?;
        self.controller.apply_settings(&settings).map_err(js_error)
    }

    /// Load a coloration impulse from WAV or raw `f32` bytes.
    #[wasm_bindgen(js_name = loadImpulse)]
    pub fn load_impulse(&self, bytes: &[u8]) -> Result<(), JsValue> {
        self.controller.load_impulse(bytes).map_err(js_error)
    }

    /// Load a headphone correction filter.
    #[wasm_bindgen(js_name = loadCorrectionFilter)]
    pub fn load_correction_filter(&self, bytes: &[u8]) -> Result<(), JsValue> {
        self.controller.load_correction_filter(bytes).map_err(js_error)
    }

    #[wasm_bindgen(js_name = clearImpulse)]
    pub fn clear_impulse(&self) -> Result<(), JsValue> {
        self.controller.clear_impulse().map_err(js_error)
    }

    #[wasm_bindgen(js_name = clearCorrectionFilter)]
    pub fn clear_correction_filter(&self) -> Result<(), JsValue> {
        self.controller.clear_correction_filter().map_err(js_error)
    }

    /// Process one stereo block in place.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.engine.process_planar(&mut [left, right]);
    }

    /// Smoothed spectrum in dB for the visualizer.
    #[wasm_bindgen(js_name = frequencyData)]
    pub fn frequency_data(&self) -> Vec<f32> {
        self.controller.analysis().frequency_data()
    }

    /// Release assets the render path has finished with.
    #[wasm_bindgen(js_name = collectGarbage)]
    pub fn collect_garbage(&self) -> usize {
        self.controller.drain_garbage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn wasm_engine_processes_stereo() {
        let mut engine = WasmEngine::new(48000);
        engine
            .apply_settings_json(r#"{"enabled": true, "masterGain": 50}"#)
            .unwrap();
        let mut left = vec![1.0f32; 256];
        let mut right = vec![1.0f32; 256];
        for _ in 0..200 {
            left.fill(1.0);
            right.fill(1.0);
            engine.process(&mut left, &mut right);
        }
        assert!((left[255] - 0.5).abs() < 1e-3, "master gain settles at half, got {}", left[255]);
        assert_eq!(engine.frequency_data().len(), 1024);
    }
}
