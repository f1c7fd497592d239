//! Real-time engine: a fixed fourteen-stage graph driven in render quanta.
//!
//! [`Engine::new`] returns two halves. The [`Engine`] lives on the audio
//! thread and only processes samples and drains commands; the
//! [`EngineController`] lives anywhere else and does all decoding,
//! generation and allocation.

pub mod commands;
pub mod control;
pub mod stages;

use serde::{Deserialize, Serialize};

use crate::dsp::AudioBlock;
use crate::dsp::analysis::analysis_tap;

pub use commands::{AssetSlot, CurveSlot, EngineCommand, GarbageItem};
pub use control::{
    EngineController, LoadJob, MAX_IMPULSE_SECONDS, PreparedAsset, build_convolver,
};
pub use stages::StageId;

use commands::{CommandConsumer, GarbageProducer, create_channels};
use stages::StageGraph;

/// Construction-time parameters; fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames per render quantum; parameters advance once per quantum.
    pub render_quantum: usize,
    pub analysis_fft_size: usize,
    /// Seed for reverb noise, for reproducible output.
    pub reverb_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            render_quantum: 128,
            analysis_fft_size: 2048,
            reverb_seed: None,
        }
    }
}

impl EngineConfig {
    fn sanitized(self) -> Self {
        Self {
            sample_rate: self.sample_rate.max(1),
            channels: self.channels.max(1),
            render_quantum: self.render_quantum.max(1),
            ..self
        }
    }
}

/// Render-side half of the engine.
pub struct Engine {
    config: EngineConfig,
    graph: StageGraph,
    block: AudioBlock,
    scratch: AudioBlock,
    command_rx: CommandConsumer,
    garbage_tx: GarbageProducer,
    /// Highest kernel generation applied per slot.
    applied: [u64; 3],
}

impl Engine {
    /// Build the graph and its controller. Call from the control thread.
    pub fn new(config: EngineConfig) -> (Engine, EngineController) {
        let config = config.sanitized();
        let (command_tx, command_rx, garbage_tx, garbage_rx) = create_channels();
        let (writer, reader) = analysis_tap(config.analysis_fft_size);

        let engine = Engine {
            config,
            graph: StageGraph::new(config.channels, config.sample_rate, writer),
            block: AudioBlock::new(config.channels, config.render_quantum),
            scratch: AudioBlock::new(config.channels, config.render_quantum),
            command_rx,
            garbage_tx,
            applied: [0; 3],
        };
        let controller = EngineController::new(config, command_tx, garbage_rx, reader);
        (engine, controller)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The stages in the order every sample passes through them.
    pub fn stage_order(&self) -> [StageId; 14] {
        self.graph.order()
    }

    /// Whether a kernel is currently bound to `slot`.
    pub fn is_loaded(&self, slot: AssetSlot) -> bool {
        self.graph.kernel_loaded(slot)
    }

    fn dispose(&mut self, item: GarbageItem) {
        // Queue full: the item is freed here as a last resort.
        let _ = self.garbage_tx.push(item);
    }

    /// Apply everything the controller has sent since the last call.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.pop() {
            match command {
                EngineCommand::Settings(settings) => self.graph.retarget(&settings),
                EngineCommand::Kernel {
                    slot,
                    generation,
                    convolver,
                } => {
                    let index = slot.index();
                    if generation < self.applied[index] {
                        if let Some(stale) = convolver {
                            self.dispose(GarbageItem::Convolver(stale));
                        }
                        continue;
                    }
                    self.applied[index] = generation;
                    if let Some(old) = self.graph.convolution_stage(slot).swap(convolver) {
                        self.dispose(GarbageItem::Convolver(old));
                    }
                }
                EngineCommand::Curve { slot, curve } => {
                    let old = self.graph.swap_curve(slot, curve);
                    self.dispose(GarbageItem::Curve(old));
                }
            }
        }
    }

    fn render_block(&mut self) {
        let dt = self.block.frames() as f32 / self.config.sample_rate as f32;
        self.graph.process(&mut self.block, &mut self.scratch, dt);
        for slot in AssetSlot::ALL {
            if let Some(old) = self.graph.take_retired(slot) {
                self.dispose(GarbageItem::Convolver(old));
            }
        }
    }

    /// Process planar audio in place, one slice per channel.
    ///
    /// Missing engine channels are fed silence; extra input channels pass
    /// through untouched. Never allocates or blocks.
    pub fn process_planar(&mut self, channels: &mut [&mut [f32]]) {
        self.drain_commands();

        let frames = channels.iter().map(|ch| ch.len()).min().unwrap_or(0);
        let engine_channels = self.config.channels;
        let shared = engine_channels.min(channels.len());
        let quantum = self.config.render_quantum;

        let mut start = 0;
        while start < frames {
            let len = quantum.min(frames - start);
            self.block.set_frames(len);
            for c in 0..engine_channels {
                let dst = self.block.channel_mut(c);
                match channels.get(c) {
                    Some(src) => dst.copy_from_slice(&src[start..start + len]),
                    None => dst.fill(0.0),
                }
            }

            self.render_block();

            for (c, dst) in channels.iter_mut().enumerate().take(shared) {
                dst[start..start + len].copy_from_slice(self.block.channel(c));
            }
            start += len;
        }
    }

    /// Process interleaved audio in place with the engine's channel count.
    ///
    /// A trailing partial frame is left untouched.
    pub fn process_interleaved(&mut self, samples: &mut [f32]) {
        self.drain_commands();

        let channels = self.config.channels;
        let frames = samples.len() / channels;
        let quantum = self.config.render_quantum;

        let mut start = 0;
        while start < frames {
            let len = quantum.min(frames - start);
            self.block.set_frames(len);
            let region = &mut samples[start * channels..(start + len) * channels];
            for c in 0..channels {
                for (dst, frame) in self
                    .block
                    .channel_mut(c)
                    .iter_mut()
                    .zip(region.chunks_exact(channels))
                {
                    *dst = frame[c];
                }
            }

            self.render_block();

            for c in 0..channels {
                for (src, frame) in self
                    .block
                    .channel(c)
                    .iter()
                    .zip(region.chunks_exact_mut(channels))
                {
                    frame[c] = *src;
                }
            }
            start += len;
        }
    }
}
