//! Exit sequence run after the flow ends.

pub mod sequencer;

pub use sequencer::{CompletionSequencer, SequencerStatus};
