//! Decode a published code buffer back into readable text.
//!
//! This is the debugging companion to the emitter: it understands the
//! code-info header, the line-number program, the bytecode prelude, and every
//! operand shape in [`crate::bc::opcode`]. Decoding is pure so tests can
//! round-trip emitted buffers; unknown opcodes render as `.byte 0xNN` instead
//! of failing.

use crate::bc::format::WORD_SIZE;
use crate::bc::opcode::{self, BinaryOpKind, Shape, UnaryOpKind};
use byteorder::{ByteOrder, LittleEndian, NativeEndian};
use std::fmt::Write;

/// Render a whole published buffer (code info plus bytecode)
pub fn disassemble(code: &[u8]) -> String {
    let mut out = String::new();

    if code.len() < 12 {
        writeln!(out, "; truncated header ({} bytes)", code.len()).unwrap();
        return out;
    }
    let code_info_size = LittleEndian::read_u32(&code[0..4]) as usize;
    let source_file = LittleEndian::read_u32(&code[4..8]);
    let simple_name = LittleEndian::read_u32(&code[8..12]);
    writeln!(out, "; code info size {}", code_info_size).unwrap();
    writeln!(out, "; source file    q{}", source_file).unwrap();
    writeln!(out, "; simple name    q{}", simple_name).unwrap();

    // line-number program: five bits of bytecode delta, three bits of line
    // delta per byte
    let info_end = code_info_size.min(code.len());
    let mut pos = 12;
    let mut line = 1usize;
    let mut offset = 0usize;
    while pos < info_end {
        let byte = code[pos];
        pos += 1;
        if byte == 0 {
            break;
        }
        offset += (byte & 0x1f) as usize;
        line += (byte >> 5) as usize;
        writeln!(out, "; line {} from bytecode offset {}", line, offset).unwrap();
    }

    if code_info_size > code.len() {
        writeln!(out, "; bytecode region missing").unwrap();
        return out;
    }
    disassemble_bytecode(&code[code_info_size..], &mut out);
    out
}

/// Render just the bytecode region (prelude plus instruction stream)
fn disassemble_bytecode(bc: &[u8], out: &mut String) {
    if bc.len() < 5 {
        writeln!(out, "; truncated prelude ({} bytes)", bc.len()).unwrap();
        return;
    }
    let n_state = LittleEndian::read_u16(&bc[0..2]);
    let exc_stack_size = LittleEndian::read_u16(&bc[2..4]);
    let num_cells = bc[4] as usize;
    writeln!(out, "; n_state {} exc_stack {}", n_state, exc_stack_size).unwrap();
    if 5 + num_cells > bc.len() {
        writeln!(out, "; truncated cell list").unwrap();
        return;
    }
    if num_cells > 0 {
        writeln!(out, "; cells {:?}", &bc[5..5 + num_cells]).unwrap();
    }

    let mut ip = 5 + num_cells;
    while ip < bc.len() {
        match decode_one(bc, ip) {
            Some((text, next_ip)) => {
                writeln!(out, "{:04} {}", ip, text).unwrap();
                ip = next_ip;
            }
            None => {
                writeln!(out, "{:04} ; truncated operand", ip).unwrap();
                break;
            }
        }
    }
}

/// Decode the instruction at `ip`, returning its rendering and the next ip
fn decode_one(bc: &[u8], ip: usize) -> Option<(String, usize)> {
    let op = bc[ip];
    let (name, shape) = match opcode::shape(op) {
        Some(entry) => entry,
        None => return Some((format!(".byte 0x{:02x}", op), ip + 1)),
    };
    Some(match shape {
        Shape::Plain => (name.to_string(), ip + 1),
        Shape::Byte => {
            let operand = *bc.get(ip + 1)?;
            (format!("{} {}", name, byte_operand(op, operand)), ip + 2)
        }
        Shape::Uint => {
            let (value, next) = read_varuint(bc, ip + 1)?;
            (format!("{} {}", name, value), next)
        }
        Shape::Int => {
            let (value, next) = read_varint(bc, ip + 1)?;
            (format!("{} {}", name, value), next)
        }
        Shape::Qstr => {
            let (value, next) = read_varuint(bc, ip + 1)?;
            (format!("{} q{}", name, value), next)
        }
        Shape::Ptr => {
            let (value, next) = read_word(bc, ip + 1)?;
            (format!("{} rc{}", name, value), next)
        }
        Shape::PtrByte => {
            let (value, next) = read_word(bc, ip + 1)?;
            let count = *bc.get(next)?;
            (format!("{} rc{} n_closed={}", name, value, count), next + 1)
        }
        Shape::UnsignedLabel => {
            let relative = read_u16(bc, ip + 1)? as usize;
            (format!("{} -> {}", name, ip + 3 + relative), ip + 3)
        }
        Shape::SignedLabel => {
            let relative = read_u16(bc, ip + 1)? as isize - 0x8000;
            let target = ip as isize + 3 + relative;
            (format!("{} -> {}", name, target), ip + 3)
        }
        Shape::SignedLabelByte => {
            let relative = read_u16(bc, ip + 1)? as isize - 0x8000;
            let target = ip as isize + 3 + relative;
            let extra = *bc.get(ip + 3)?;
            let brk = if extra & 0x80 != 0 { " break" } else { "" };
            (
                format!("{} -> {} depth={}{}", name, target, extra & 0x7f, brk),
                ip + 4,
            )
        }
    })
}

fn byte_operand(op: u8, operand: u8) -> String {
    if op == opcode::UNARY_OP {
        if let Some(kind) = UnaryOpKind::from_u8(operand) {
            return kind.name().to_string();
        }
    } else if op == opcode::BINARY_OP {
        if let Some(kind) = BinaryOpKind::from_u8(operand) {
            return kind.name().to_string();
        }
    }
    operand.to_string()
}

fn read_u16(bc: &[u8], pos: usize) -> Option<u16> {
    if pos + 2 > bc.len() {
        return None;
    }
    Some(LittleEndian::read_u16(&bc[pos..pos + 2]))
}

fn read_word(bc: &[u8], pos: usize) -> Option<(usize, usize)> {
    // ptr operands are aligned relative to the region start, which itself
    // sits on a machine-word boundary in the full buffer
    let pos = crate::bc::format::align_up(pos);
    if pos + WORD_SIZE > bc.len() {
        return None;
    }
    let value = NativeEndian::read_uint(&bc[pos..pos + WORD_SIZE], WORD_SIZE) as usize;
    Some((value, pos + WORD_SIZE))
}

fn read_varuint(bc: &[u8], mut pos: usize) -> Option<(usize, usize)> {
    let mut num = 0usize;
    loop {
        let byte = *bc.get(pos)?;
        pos += 1;
        num = (num << 7) | (byte & 0x7f) as usize;
        if byte & 0x80 == 0 {
            return Some((num, pos));
        }
    }
}

fn read_varint(bc: &[u8], mut pos: usize) -> Option<(isize, usize)> {
    let mut num: isize = if *bc.get(pos)? & 0x40 != 0 { -1 } else { 0 };
    loop {
        let byte = *bc.get(pos)?;
        pos += 1;
        num = (num << 7) | (byte & 0x7f) as isize;
        if byte & 0x80 == 0 {
            return Some((num, pos));
        }
    }
}
