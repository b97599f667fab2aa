//! Code-registration interface between the emitter and the VM.
//!
//! The emitter publishes each finished buffer under the scope's `raw_code`
//! handle; the VM resolves the handles embedded in `MAKE_FUNCTION` and
//! `MAKE_CLOSURE` operands against the same registry.

use crate::bc::Qstr;
use crate::scope::ScopeFlags;
use std::collections::HashMap;
use std::fmt;

/// Machine-word-sized handle naming a compiled unit in the registry
///
/// The handle value is what the `byte+ptr` encoding writes into the
/// instruction stream, word-aligned so a precise GC can scan the buffer.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct RawCodeId(pub usize);

impl fmt::Debug for RawCodeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("rc{}", self.0))
    }
}

/// A finished compilation unit as handed to the VM
#[derive(Debug)]
pub struct CodeUnit {
    /// Code info followed by word-aligned bytecode
    pub code: Vec<u8>,
    pub n_pos_args: usize,
    pub n_kwonly_args: usize,
    /// Positional then keyword-only argument names
    pub arg_names: Vec<Qstr>,
    pub scope_flags: ScopeFlags,
}

impl CodeUnit {
    pub fn total_size(&self) -> usize {
        self.code.len()
    }
}

/// Receiver for finished code; implemented by the VM (or a test stand-in)
pub trait CodeRegistry {
    fn assign_bytecode(&mut self, raw_code: RawCodeId, unit: CodeUnit);
}

/// In-crate registry: allocates handles and stores published units
#[derive(Default)]
pub struct CodeTable {
    next_id: usize,
    units: HashMap<RawCodeId, CodeUnit>,
}

impl CodeTable {
    pub fn new() -> CodeTable {
        CodeTable::default()
    }

    /// Allocate a fresh handle for a scope about to be compiled
    pub fn new_raw_code(&mut self) -> RawCodeId {
        let id = RawCodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn get(&self, raw_code: RawCodeId) -> Option<&CodeUnit> {
        self.units.get(&raw_code)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl CodeRegistry for CodeTable {
    fn assign_bytecode(&mut self, raw_code: RawCodeId, unit: CodeUnit) {
        self.units.insert(raw_code, unit);
    }
}
