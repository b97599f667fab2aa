//! Opcode values and operand shapes.
//!
//! These numeric values are the emitter's half of the ABI shared with the VM
//! decoder table. Changing a value or an operand shape here requires a
//! matching VM change. Call opcodes keep their star-argument variants at
//! `base + 1` because the call lowering switches between them by adding one.

// constants
pub const LOAD_CONST_FALSE: u8 = 0x10;
pub const LOAD_CONST_NONE: u8 = 0x11;
pub const LOAD_CONST_TRUE: u8 = 0x12;
pub const LOAD_CONST_ELLIPSIS: u8 = 0x13;
pub const LOAD_CONST_SMALL_INT: u8 = 0x14;
pub const LOAD_CONST_INT: u8 = 0x15;
pub const LOAD_CONST_DEC: u8 = 0x16;
pub const LOAD_CONST_BYTES: u8 = 0x17;
pub const LOAD_CONST_STRING: u8 = 0x18;
pub const LOAD_NULL: u8 = 0x19;

// loads
pub const LOAD_FAST_0: u8 = 0x20;
pub const LOAD_FAST_1: u8 = 0x21;
pub const LOAD_FAST_2: u8 = 0x22;
pub const LOAD_FAST_N: u8 = 0x23;
pub const LOAD_DEREF: u8 = 0x24;
pub const LOAD_NAME: u8 = 0x25;
pub const LOAD_GLOBAL: u8 = 0x26;
pub const LOAD_ATTR: u8 = 0x27;
pub const LOAD_METHOD: u8 = 0x28;
pub const LOAD_BUILD_CLASS: u8 = 0x29;
pub const LOAD_SUBSCR: u8 = 0x2a;

// stores
pub const STORE_FAST_0: u8 = 0x30;
pub const STORE_FAST_1: u8 = 0x31;
pub const STORE_FAST_2: u8 = 0x32;
pub const STORE_FAST_N: u8 = 0x33;
pub const STORE_DEREF: u8 = 0x34;
pub const STORE_NAME: u8 = 0x35;
pub const STORE_GLOBAL: u8 = 0x36;
pub const STORE_ATTR: u8 = 0x37;
pub const STORE_SUBSCR: u8 = 0x38;
pub const STORE_MAP: u8 = 0x39;

// deletes
pub const DELETE_FAST: u8 = 0x40;
pub const DELETE_DEREF: u8 = 0x41;
pub const DELETE_NAME: u8 = 0x42;
pub const DELETE_GLOBAL: u8 = 0x43;

// stack manipulation
pub const DUP_TOP: u8 = 0x48;
pub const DUP_TOP_TWO: u8 = 0x49;
pub const POP_TOP: u8 = 0x4a;
pub const ROT_TWO: u8 = 0x4b;
pub const ROT_THREE: u8 = 0x4c;

// control flow
pub const JUMP: u8 = 0x50;
pub const POP_JUMP_IF_TRUE: u8 = 0x51;
pub const POP_JUMP_IF_FALSE: u8 = 0x52;
pub const JUMP_IF_TRUE_OR_POP: u8 = 0x53;
pub const JUMP_IF_FALSE_OR_POP: u8 = 0x54;
pub const UNWIND_JUMP: u8 = 0x55;
pub const SETUP_WITH: u8 = 0x56;
pub const WITH_CLEANUP: u8 = 0x57;
pub const SETUP_EXCEPT: u8 = 0x58;
pub const SETUP_FINALLY: u8 = 0x59;
pub const END_FINALLY: u8 = 0x5a;
pub const GET_ITER: u8 = 0x5b;
pub const FOR_ITER: u8 = 0x5c;
pub const POP_BLOCK: u8 = 0x5d;
pub const POP_EXCEPT: u8 = 0x5e;

// operators
pub const UNARY_OP: u8 = 0x60;
pub const BINARY_OP: u8 = 0x61;
pub const NOT: u8 = 0x62;

// container construction
pub const BUILD_TUPLE: u8 = 0x70;
pub const BUILD_LIST: u8 = 0x71;
pub const LIST_APPEND: u8 = 0x72;
pub const BUILD_MAP: u8 = 0x73;
pub const MAP_ADD: u8 = 0x74;
pub const BUILD_SET: u8 = 0x75;
pub const SET_ADD: u8 = 0x76;
pub const BUILD_SLICE: u8 = 0x77;
pub const UNPACK_SEQUENCE: u8 = 0x78;
pub const UNPACK_EX: u8 = 0x79;

// functions and calls
pub const MAKE_FUNCTION: u8 = 0x80;
pub const MAKE_FUNCTION_DEFARGS: u8 = 0x81;
pub const MAKE_CLOSURE: u8 = 0x82;
pub const MAKE_CLOSURE_DEFARGS: u8 = 0x83;
pub const CALL_FUNCTION: u8 = 0x84;
pub const CALL_FUNCTION_VAR_KW: u8 = 0x85;
pub const CALL_METHOD: u8 = 0x86;
pub const CALL_METHOD_VAR_KW: u8 = 0x87;

// everything else
pub const RETURN_VALUE: u8 = 0x90;
pub const RAISE_VARARGS: u8 = 0x91;
pub const YIELD_VALUE: u8 = 0x92;
pub const YIELD_FROM: u8 = 0x93;
pub const IMPORT_NAME: u8 = 0x94;
pub const IMPORT_FROM: u8 = 0x95;
pub const IMPORT_STAR: u8 = 0x96;

/// Unary operator kinds carried as the one-byte operand of `UNARY_OP`
///
/// `Not` never reaches the bytecode: the emitter folds it into
/// `UNARY_OP Bool` followed by `NOT`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UnaryOpKind {
    Bool = 0,
    Positive,
    Negative,
    Invert,
    Not,
}

impl UnaryOpKind {
    pub fn from_u8(value: u8) -> Option<UnaryOpKind> {
        use UnaryOpKind::*;
        Some(match value {
            0 => Bool,
            1 => Positive,
            2 => Negative,
            3 => Invert,
            4 => Not,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use UnaryOpKind::*;
        match self {
            Bool => "bool",
            Positive => "pos",
            Negative => "neg",
            Invert => "invert",
            Not => "not",
        }
    }
}

/// Binary operator kinds carried as the one-byte operand of `BINARY_OP`
///
/// `NotIn` and `IsNot` never reach the bytecode: the emitter emits the
/// positive form followed by `NOT`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum BinaryOpKind {
    Or = 0,
    Xor,
    And,
    Lshift,
    Rshift,
    Add,
    Subtract,
    Multiply,
    FloorDivide,
    TrueDivide,
    Modulo,
    Power,
    Less,
    More,
    Equal,
    LessEqual,
    MoreEqual,
    NotEqual,
    In,
    Is,
    ExceptionMatch,
    NotIn,
    IsNot,
}

impl BinaryOpKind {
    pub fn from_u8(value: u8) -> Option<BinaryOpKind> {
        use BinaryOpKind::*;
        Some(match value {
            0 => Or,
            1 => Xor,
            2 => And,
            3 => Lshift,
            4 => Rshift,
            5 => Add,
            6 => Subtract,
            7 => Multiply,
            8 => FloorDivide,
            9 => TrueDivide,
            10 => Modulo,
            11 => Power,
            12 => Less,
            13 => More,
            14 => Equal,
            15 => LessEqual,
            16 => MoreEqual,
            17 => NotEqual,
            18 => In,
            19 => Is,
            20 => ExceptionMatch,
            21 => NotIn,
            22 => IsNot,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use BinaryOpKind::*;
        match self {
            Or => "or",
            Xor => "xor",
            And => "and",
            Lshift => "lshift",
            Rshift => "rshift",
            Add => "add",
            Subtract => "sub",
            Multiply => "mul",
            FloorDivide => "floordiv",
            TrueDivide => "truediv",
            Modulo => "mod",
            Power => "pow",
            Less => "less",
            More => "more",
            Equal => "eq",
            LessEqual => "le",
            MoreEqual => "ge",
            NotEqual => "ne",
            In => "in",
            Is => "is",
            ExceptionMatch => "exc_match",
            NotIn => "not_in",
            IsNot => "is_not",
        }
    }
}

/// How the operand bytes following an opcode are laid out
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Shape {
    /// Opcode only
    Plain,
    /// One-byte immediate
    Byte,
    /// Variable-length unsigned operand (also carries qstr handles)
    Uint,
    /// Variable-length signed operand
    Int,
    /// Interned-string handle, encoded like `Uint`
    Qstr,
    /// Word-aligned machine-word handle
    Ptr,
    /// `Ptr` plus one trailing byte (closed-over count)
    PtrByte,
    /// 16-bit forward-only relative offset
    UnsignedLabel,
    /// 16-bit relative offset biased by +0x8000
    SignedLabel,
    /// `SignedLabel` plus one trailing byte (unwind depth and break marker)
    SignedLabelByte,
}

/// Mnemonic and operand shape for an opcode, or `None` for a hole in the table
pub fn shape(op: u8) -> Option<(&'static str, Shape)> {
    use Shape::*;
    Some(match op {
        LOAD_CONST_FALSE => ("LOAD_CONST_FALSE", Plain),
        LOAD_CONST_NONE => ("LOAD_CONST_NONE", Plain),
        LOAD_CONST_TRUE => ("LOAD_CONST_TRUE", Plain),
        LOAD_CONST_ELLIPSIS => ("LOAD_CONST_ELLIPSIS", Plain),
        LOAD_CONST_SMALL_INT => ("LOAD_CONST_SMALL_INT", Int),
        LOAD_CONST_INT => ("LOAD_CONST_INT", Qstr),
        LOAD_CONST_DEC => ("LOAD_CONST_DEC", Qstr),
        LOAD_CONST_BYTES => ("LOAD_CONST_BYTES", Qstr),
        LOAD_CONST_STRING => ("LOAD_CONST_STRING", Qstr),
        LOAD_NULL => ("LOAD_NULL", Plain),
        LOAD_FAST_0 => ("LOAD_FAST_0", Plain),
        LOAD_FAST_1 => ("LOAD_FAST_1", Plain),
        LOAD_FAST_2 => ("LOAD_FAST_2", Plain),
        LOAD_FAST_N => ("LOAD_FAST_N", Uint),
        LOAD_DEREF => ("LOAD_DEREF", Uint),
        LOAD_NAME => ("LOAD_NAME", Qstr),
        LOAD_GLOBAL => ("LOAD_GLOBAL", Qstr),
        LOAD_ATTR => ("LOAD_ATTR", Qstr),
        LOAD_METHOD => ("LOAD_METHOD", Qstr),
        LOAD_BUILD_CLASS => ("LOAD_BUILD_CLASS", Plain),
        LOAD_SUBSCR => ("LOAD_SUBSCR", Plain),
        STORE_FAST_0 => ("STORE_FAST_0", Plain),
        STORE_FAST_1 => ("STORE_FAST_1", Plain),
        STORE_FAST_2 => ("STORE_FAST_2", Plain),
        STORE_FAST_N => ("STORE_FAST_N", Uint),
        STORE_DEREF => ("STORE_DEREF", Uint),
        STORE_NAME => ("STORE_NAME", Qstr),
        STORE_GLOBAL => ("STORE_GLOBAL", Qstr),
        STORE_ATTR => ("STORE_ATTR", Qstr),
        STORE_SUBSCR => ("STORE_SUBSCR", Plain),
        STORE_MAP => ("STORE_MAP", Plain),
        DELETE_FAST => ("DELETE_FAST", Uint),
        DELETE_DEREF => ("DELETE_DEREF", Uint),
        DELETE_NAME => ("DELETE_NAME", Qstr),
        DELETE_GLOBAL => ("DELETE_GLOBAL", Qstr),
        DUP_TOP => ("DUP_TOP", Plain),
        DUP_TOP_TWO => ("DUP_TOP_TWO", Plain),
        POP_TOP => ("POP_TOP", Plain),
        ROT_TWO => ("ROT_TWO", Plain),
        ROT_THREE => ("ROT_THREE", Plain),
        JUMP => ("JUMP", SignedLabel),
        POP_JUMP_IF_TRUE => ("POP_JUMP_IF_TRUE", SignedLabel),
        POP_JUMP_IF_FALSE => ("POP_JUMP_IF_FALSE", SignedLabel),
        JUMP_IF_TRUE_OR_POP => ("JUMP_IF_TRUE_OR_POP", SignedLabel),
        JUMP_IF_FALSE_OR_POP => ("JUMP_IF_FALSE_OR_POP", SignedLabel),
        UNWIND_JUMP => ("UNWIND_JUMP", SignedLabelByte),
        SETUP_WITH => ("SETUP_WITH", UnsignedLabel),
        WITH_CLEANUP => ("WITH_CLEANUP", Plain),
        SETUP_EXCEPT => ("SETUP_EXCEPT", UnsignedLabel),
        SETUP_FINALLY => ("SETUP_FINALLY", UnsignedLabel),
        END_FINALLY => ("END_FINALLY", Plain),
        GET_ITER => ("GET_ITER", Plain),
        FOR_ITER => ("FOR_ITER", UnsignedLabel),
        POP_BLOCK => ("POP_BLOCK", Plain),
        POP_EXCEPT => ("POP_EXCEPT", Plain),
        UNARY_OP => ("UNARY_OP", Byte),
        BINARY_OP => ("BINARY_OP", Byte),
        NOT => ("NOT", Plain),
        BUILD_TUPLE => ("BUILD_TUPLE", Uint),
        BUILD_LIST => ("BUILD_LIST", Uint),
        LIST_APPEND => ("LIST_APPEND", Uint),
        BUILD_MAP => ("BUILD_MAP", Uint),
        MAP_ADD => ("MAP_ADD", Uint),
        BUILD_SET => ("BUILD_SET", Uint),
        SET_ADD => ("SET_ADD", Uint),
        BUILD_SLICE => ("BUILD_SLICE", Uint),
        UNPACK_SEQUENCE => ("UNPACK_SEQUENCE", Uint),
        UNPACK_EX => ("UNPACK_EX", Uint),
        MAKE_FUNCTION => ("MAKE_FUNCTION", Ptr),
        MAKE_FUNCTION_DEFARGS => ("MAKE_FUNCTION_DEFARGS", Ptr),
        MAKE_CLOSURE => ("MAKE_CLOSURE", PtrByte),
        MAKE_CLOSURE_DEFARGS => ("MAKE_CLOSURE_DEFARGS", PtrByte),
        CALL_FUNCTION => ("CALL_FUNCTION", Uint),
        CALL_FUNCTION_VAR_KW => ("CALL_FUNCTION_VAR_KW", Uint),
        CALL_METHOD => ("CALL_METHOD", Uint),
        CALL_METHOD_VAR_KW => ("CALL_METHOD_VAR_KW", Uint),
        RETURN_VALUE => ("RETURN_VALUE", Plain),
        RAISE_VARARGS => ("RAISE_VARARGS", Byte),
        YIELD_VALUE => ("YIELD_VALUE", Plain),
        YIELD_FROM => ("YIELD_FROM", Plain),
        IMPORT_NAME => ("IMPORT_NAME", Qstr),
        IMPORT_FROM => ("IMPORT_FROM", Qstr),
        IMPORT_STAR => ("IMPORT_STAR", Plain),
        _ => return None,
    })
}
