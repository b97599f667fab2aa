//! The two-pass bytecode emitter.
//!
//! One [`BytecodeEmitter`] is created per scope and driven through the passes
//! in [`crate::scope::Pass`] order. Pre-emit passes only advance byte
//! cursors; the emit pass writes into the buffer sized by the code-size pass.
//! Forward jumps need no fix-up list because every encoding has a pass-stable
//! length, so label offsets recorded in the code-size pass are already final.

mod emitter;
mod errors;
mod glue;
mod ops;

pub use emitter::{BytecodeEmitter, EmitSettings, Label};
pub use errors::EmitError;
pub use glue::{CodeRegistry, CodeTable, CodeUnit, RawCodeId};
pub use ops::{ConstToken, Emitter};
