//! Real-time background-oriented schlieren processing.
//!
//! Each cycle takes one frame from a source, converts it to grayscale,
//! updates the reference, differences against it, runs the selected
//! enhancement filter and composes a displayable color frame. Results go to
//! a coalescing display sink and to ordered recording sinks.

pub mod colormap;
pub mod compositor;
pub mod control;
pub mod engine;
pub mod filter;
pub mod processor;
pub mod recorder;
pub mod reference;
pub mod sink;
pub mod snapshot;

pub use engine::{EngineError, EngineExit, EngineHandle, StreamEngine};
pub use processor::FrameProcessor;
pub use reference::{ReferenceModel, ReferencePhase};
