//! The compilation-unit contract between the scope analyzer, the emitter, and
//! the VM's code registry.

use crate::bc::Qstr;
use crate::emit::RawCodeId;
use bitflags::bitflags;

/// Emission passes, in driver order
///
/// The ordering of the variants matters: everything before `Emit` throws its
/// bytes away and only advances offsets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Pass {
    /// Identifier gathering; the emitter is a no-op sink
    Scope,
    /// Simulate stack deltas to find the maximum operand-stack depth
    StackSize,
    /// Count bytes and record label offsets; allocates the buffer at the end
    CodeSize,
    /// Write real bytes using the label table from the previous pass
    Emit,
}

/// How an identifier is accessed at runtime
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IdKind {
    /// Frame-slot local, reached with the fast forms
    Local,
    /// Local boxed into a heap cell because an inner scope captures it
    Cell,
    /// Captured variable belonging to an enclosing scope
    Free,
    /// Declared `global`, reached with the global forms
    GlobalExplicit,
    /// Never assigned locally; falls back to name lookup
    GlobalImplicit,
}

/// One entry of a scope's identifier table
#[derive(Copy, Clone, Debug)]
pub struct IdInfo {
    pub kind: IdKind,
    pub local_num: usize,
    pub name: Qstr,
}

bitflags! {
    /// Per-scope flags published alongside the bytecode
    ///
    /// The scope analyzer sets the argument-shape flags; `GENERATOR` is set
    /// by the emitter when it sees a yield.
    pub struct ScopeFlags: u32 {
        const VARARGS = 0x01;
        const VARKEYWORDS = 0x02;
        const GENERATOR = 0x04;
        const DEFKWARGS = 0x08;
    }
}

bitflags! {
    /// Call-site star-argument syntax
    pub struct StarFlags: u32 {
        const SINGLE = 0x01;
        const DOUBLE = 0x02;
    }
}

/// One compilation unit (function, class, module, or comprehension), produced
/// by the scope analyzer and consumed by the emitter.
///
/// The emitter writes `stack_size` back with the operand-stack watermark and
/// may set the generator flag; everything else is input. The first
/// `num_pos_args + num_kwonly_args` entries of `id_info` must be the argument
/// names in declaration order.
#[derive(Debug)]
pub struct Scope {
    pub source_file: Qstr,
    pub simple_name: Qstr,
    pub id_info: Vec<IdInfo>,
    pub num_pos_args: usize,
    pub num_kwonly_args: usize,
    pub num_locals: usize,
    /// Maximum operand-stack depth; written back by the emitter
    pub stack_size: usize,
    pub exc_stack_size: usize,
    pub scope_flags: ScopeFlags,
    /// Registry handle the finished code is published under
    pub raw_code: RawCodeId,
}

impl Scope {
    pub fn new(source_file: Qstr, simple_name: Qstr, raw_code: RawCodeId) -> Scope {
        Scope {
            source_file,
            simple_name,
            id_info: vec![],
            num_pos_args: 0,
            num_kwonly_args: 0,
            num_locals: 0,
            stack_size: 0,
            exc_stack_size: 0,
            scope_flags: ScopeFlags::empty(),
            raw_code,
        }
    }

    /// Find an identifier by interned name
    pub fn lookup_id(&self, name: Qstr) -> Option<IdInfo> {
        self.id_info.iter().find(|id| id.name == name).copied()
    }
}
