//! Bytecode back end for a compact Python-dialect compiler.
//!
//! The compiler walker drives the [`emit::Emitter`] operation surface once per
//! pass; the [`emit::BytecodeEmitter`] re-runs the same emission logic across
//! passes to resolve forward references without a fix-up list, then publishes
//! the finished buffer through [`emit::CodeRegistry`].

pub mod bc;
pub mod emit;
pub mod scope;
