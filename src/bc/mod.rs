//! The bytecode ABI surface shared with the virtual machine: opcode values,
//! operand encodings, and a decoder for debugging.

pub mod disasm;
pub mod format;
pub mod opcode;

use std::fmt;

/// Interned-string identifier (a machine-word-sized integer handle)
///
/// The string pool itself lives in the object model; the emitter only ever
/// copies handles into the output buffer.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Qstr(pub usize);

impl fmt::Debug for Qstr {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("q{}", self.0))
    }
}
