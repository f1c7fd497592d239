//! Messages crossing the control/render boundary.

use std::fmt;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::dsp::convolver::Convolver;
use crate::generate::TransferCurve;
use crate::settings::EngineSettings;

/// Capacity for the command queue (control → render).
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Capacity for the garbage queue (render → control).
/// Generous so the render path never has to free a replaced asset itself.
pub const GARBAGE_QUEUE_CAPACITY: usize = 1024;

/// Convolution stages that accept a swappable impulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetSlot {
    /// User-supplied coloration impulse.
    Impulse,
    /// Headphone correction filter.
    Correction,
    /// Procedurally generated reverb impulse.
    Reverb,
}

impl AssetSlot {
    pub const ALL: [AssetSlot; 3] = [AssetSlot::Impulse, AssetSlot::Correction, AssetSlot::Reverb];

    pub(crate) fn index(self) -> usize {
        match self {
            AssetSlot::Impulse => 0,
            AssetSlot::Correction => 1,
            AssetSlot::Reverb => 2,
        }
    }

    /// Whether kernels for this slot get equal-power normalization.
    pub fn normalizes(self) -> bool {
        !matches!(self, AssetSlot::Correction)
    }
}

impl fmt::Display for AssetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssetSlot::Impulse => "impulse",
            AssetSlot::Correction => "correction filter",
            AssetSlot::Reverb => "reverb impulse",
        })
    }
}

/// Waveshaping stages whose lookup table follows the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveSlot {
    SpectrumExtension,
    AnalogX,
}

/// Commands sent from the control path to the render path.
pub enum EngineCommand {
    /// Retarget every stage to a new clamped snapshot.
    Settings(EngineSettings),
    /// Bind (or clear, with `None`) the kernel of a convolution stage.
    Kernel {
        slot: AssetSlot,
        generation: u64,
        convolver: Option<Box<Convolver>>,
    },
    /// Replace a waveshaper's lookup table.
    Curve { slot: CurveSlot, curve: TransferCurve },
}

impl fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Settings(_) => f.write_str("Settings"),
            EngineCommand::Kernel {
                slot,
                generation,
                convolver,
            } => f
                .debug_struct("Kernel")
                .field("slot", slot)
                .field("generation", generation)
                .field("loaded", &convolver.is_some())
                .finish(),
            EngineCommand::Curve { slot, .. } => {
                f.debug_struct("Curve").field("slot", slot).finish()
            }
        }
    }
}

/// Items handed back from the render path so they are freed on the control path.
pub enum GarbageItem {
    Convolver(Box<Convolver>),
    Curve(TransferCurve),
}

pub type CommandProducer = Producer<EngineCommand>;
pub type CommandConsumer = Consumer<EngineCommand>;
pub type GarbageProducer = Producer<GarbageItem>;
pub type GarbageConsumer = Consumer<GarbageItem>;

/// Create the command and garbage queues.
pub fn create_channels() -> (CommandProducer, CommandConsumer, GarbageProducer, GarbageConsumer) {
    let (cmd_prod, cmd_cons) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
    let (garbage_prod, garbage_cons) = RingBuffer::new(GARBAGE_QUEUE_CAPACITY);
    (cmd_prod, cmd_cons, garbage_prod, garbage_cons)
}
