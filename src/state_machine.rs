//! Core conversation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.
//! The coach, refiner and grammar agents are three transition tables over
//! one state type.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{Category, ConvContext, ConvState, Decision, Flow, Stage, ToolCall};
pub use transition::{transition, TransitionError, TransitionResult};
