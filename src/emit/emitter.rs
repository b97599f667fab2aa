use crate::bc::format::{self, BYTES_FOR_INT, WORD_SIZE};
use crate::bc::Qstr;
use crate::emit::{CodeRegistry, CodeUnit, EmitError};
use crate::scope::{IdKind, Pass, Scope};
use byteorder::{ByteOrder, LittleEndian, NativeEndian};
use std::fmt;

/// Sentinel for a label that has not been assigned an offset yet
pub(super) const UNRESOLVED: usize = usize::MAX;

/// Bit carried on a label passed to `unwind_jump` when the jump breaks out of
/// a `for` loop and the iterator must be dropped on the way
const BREAK_FROM_FOR: usize = 0x8000;

/// Symbolic jump destination, resolved to a bytecode offset during the
/// code-size pass
///
/// Label ids are allocated densely by the driver, below the `max_num_labels`
/// the emitter was created with (and below the break-from-for marker bit).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Label(usize);

impl Label {
    pub fn new(id: usize) -> Label {
        Label(id)
    }

    /// Tag this label as a break-out-of-for destination
    pub fn with_break_from_for(self) -> Label {
        Label(self.0 | BREAK_FROM_FOR)
    }

    pub(super) fn is_break_from_for(self) -> bool {
        self.0 & BREAK_FROM_FOR != 0
    }

    pub(super) fn strip_break_from_for(self) -> Label {
        Label(self.0 & !BREAK_FROM_FOR)
    }

    pub fn id(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

/// Knobs the driver hands the emitter at construction
#[derive(Copy, Clone, Debug)]
pub struct EmitSettings {
    /// At 3 and above the line-number program is not emitted
    pub opt_level: u8,
}

impl Default for EmitSettings {
    fn default() -> EmitSettings {
        EmitSettings { opt_level: 0 }
    }
}

/// The bytecode back end for one scope.
///
/// Byte layout of the published buffer:
///
/// ```text,ignore
/// code_info_size (4B LE)
/// source_file qstr id (4B LE)
/// simple_name qstr id (4B LE)
/// line-number delta program, 0x00 terminated
/// …pad to machine word…            <- end of code info region
/// n_state (2B LE)  exc_stack_size (2B LE)
/// num_cells (1B)  cell local slots (num_cells B)
/// instruction stream
/// ```
///
/// Every write funnels through [`BytecodeEmitter::get_cur_bytecode`] /
/// [`BytecodeEmitter::get_cur_code_info`], which only advance cursors before
/// the emit pass. That single discipline is what makes offsets identical
/// between the code-size and emit passes, so label offsets recorded by the
/// former are valid for the latter.
pub struct BytecodeEmitter<'a> {
    pub(super) scope: &'a mut Scope,
    pub(super) pass: Pass,
    pub(super) stack_size: i32,
    pub(super) last_emit_was_return_value: bool,
    pub(super) last_source_line_offset: usize,
    pub(super) last_source_line: usize,
    pub(super) max_num_labels: usize,
    pub(super) label_offsets: Vec<usize>,
    pub(super) code_info_offset: usize,
    pub(super) code_info_size: usize,
    pub(super) bytecode_offset: usize,
    pub(super) bytecode_size: usize,
    /// Stores both code info and bytecode; allocated at the end of the
    /// code-size pass
    pub(super) code_base: Vec<u8>,
    /// Scratch sink for pre-emit writes
    pub(super) dummy: [u8; BYTES_FOR_INT],
    pub(super) settings: EmitSettings,
}

impl<'a> BytecodeEmitter<'a> {
    /// New emitter for `scope`, able to resolve labels `0..max_num_labels`
    pub fn new(
        scope: &'a mut Scope,
        max_num_labels: usize,
        settings: EmitSettings,
    ) -> BytecodeEmitter<'a> {
        BytecodeEmitter {
            scope,
            pass: Pass::Scope,
            stack_size: 0,
            last_emit_was_return_value: false,
            last_source_line_offset: 0,
            last_source_line: 1,
            max_num_labels,
            label_offsets: vec![UNRESOLVED; max_num_labels],
            code_info_offset: 0,
            code_info_size: 0,
            bytecode_offset: 0,
            bytecode_size: 0,
            code_base: vec![],
            dummy: [0; BYTES_FOR_INT],
            settings,
        }
    }

    /// Reset per-pass state and write the code-info header and bytecode
    /// prelude
    pub fn start_pass(&mut self, pass: Pass) -> Result<(), EmitError> {
        self.pass = pass;
        self.stack_size = 0;
        self.last_emit_was_return_value = false;
        self.last_source_line_offset = 0;
        self.last_source_line = 1;
        if pass < Pass::Emit {
            for offset in &mut self.label_offsets {
                *offset = UNRESOLVED;
            }
        }
        self.bytecode_offset = 0;
        self.code_info_offset = 0;

        // code info: region size (final value known only during emit), then
        // the interned source file and scope name
        let code_info_size = self.code_info_size as u32;
        LittleEndian::write_u32(self.get_cur_code_info(4), code_info_size);
        self.write_code_info_qstr(self.scope.source_file);
        self.write_code_info_qstr(self.scope.simple_name);

        // bytecode prelude: frame state slots and exception stack depth.
        // n_state is at least 1 so a propagated exception always has a slot
        // to live in.
        let n_state = (self.scope.num_locals + self.scope.stack_size).max(1);
        let n_state = u16::try_from(n_state).map_err(|_| EmitError::FrameTooLarge {
            slots: n_state,
            line: self.last_source_line,
        })?;
        let exc_stack_size =
            u16::try_from(self.scope.exc_stack_size).map_err(|_| EmitError::ExcStackTooLarge {
                depth: self.scope.exc_stack_size,
                line: self.last_source_line,
            })?;
        let prelude = self.get_cur_bytecode(4);
        LittleEndian::write_u16(&mut prelude[0..2], n_state);
        LittleEndian::write_u16(&mut prelude[2..4], exc_stack_size);

        // bytecode prelude: which locals must be boxed into heap cells
        let num_cells = self
            .scope
            .id_info
            .iter()
            .filter(|id| id.kind == IdKind::Cell)
            .count();
        if num_cells > 255 {
            return Err(EmitError::TooManyCells {
                count: num_cells,
                line: self.last_source_line,
            });
        }
        self.write_bytecode_byte(num_cells as u8);
        for index in 0..self.scope.id_info.len() {
            let id = self.scope.id_info[index];
            if id.kind == IdKind::Cell {
                let slot = u8::try_from(id.local_num).map_err(|_| EmitError::LocalSlotOverflow {
                    slot: id.local_num,
                    line: self.last_source_line,
                })?;
                self.write_bytecode_byte(slot);
            }
        }
        Ok(())
    }

    /// Terminate the line-number program, fix the region sizes, and (in the
    /// emit pass) publish the finished unit
    pub fn end_pass(&mut self, glue: &mut dyn CodeRegistry) {
        // the stack must be balanced once the operation sequence is done
        if self.stack_size != 0 {
            log::error!(
                "stack size not back to zero at end of pass; got {}",
                self.stack_size
            );
        }

        self.get_cur_code_info(1)[0] = 0; // end of line-number program
        self.align_code_info_to_machine_word(); // keeps the bytecode word-aligned

        if self.pass == Pass::CodeSize {
            self.code_info_size = self.code_info_offset;
            self.bytecode_size = self.bytecode_offset;
            self.code_base = vec![0; self.code_info_size + self.bytecode_size];
        } else if self.pass == Pass::Emit {
            assert_eq!(
                self.code_info_offset, self.code_info_size,
                "code info region size drifted between passes"
            );
            assert_eq!(
                self.bytecode_offset, self.bytecode_size,
                "bytecode region size drifted between passes"
            );

            let n_args = self.scope.num_pos_args + self.scope.num_kwonly_args;
            let arg_names: Vec<Qstr> = self.scope.id_info[..n_args]
                .iter()
                .map(|id| id.name)
                .collect();
            glue.assign_bytecode(
                self.scope.raw_code,
                CodeUnit {
                    code: std::mem::take(&mut self.code_base),
                    n_pos_args: self.scope.num_pos_args,
                    n_kwonly_args: self.scope.num_kwonly_args,
                    arg_names,
                    scope_flags: self.scope.scope_flags,
                },
            );
        }
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    /// Current simulated operand-stack depth
    pub fn stack_size(&self) -> i32 {
        self.stack_size
    }

    pub fn bytecode_offset(&self) -> usize {
        self.bytecode_offset
    }

    pub fn code_info_offset(&self) -> usize {
        self.code_info_offset
    }

    pub fn code_info_size(&self) -> usize {
        self.code_info_size
    }

    pub fn bytecode_size(&self) -> usize {
        self.bytecode_size
    }

    /// Offset a label resolved to, if it has been assigned this pass
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        match self.label_offsets.get(label.strip_break_from_for().id()) {
            Some(&offset) if offset != UNRESOLVED => Some(offset),
            _ => None,
        }
    }

    /// Record a stack delta, update the scope's watermark, and clear the
    /// trailing-return marker
    pub(super) fn pre(&mut self, stack_size_delta: i32) {
        assert!(
            self.stack_size + stack_size_delta >= 0,
            "operand stack underflow ({} {:+})",
            self.stack_size,
            stack_size_delta
        );
        self.stack_size += stack_size_delta;
        if self.stack_size as usize > self.scope.stack_size {
            self.scope.stack_size = self.stack_size as usize;
        }
        self.last_emit_was_return_value = false;
    }

    // ------------------------------------------------------------------
    // code info writes

    /// All code-info writes go through here
    pub(super) fn get_cur_code_info(&mut self, num_bytes: usize) -> &mut [u8] {
        if self.pass < Pass::Emit {
            self.code_info_offset += num_bytes;
            &mut self.dummy[..num_bytes]
        } else {
            assert!(
                self.code_info_offset + num_bytes <= self.code_info_size,
                "write past end of code info region"
            );
            let start = self.code_info_offset;
            self.code_info_offset += num_bytes;
            &mut self.code_base[start..start + num_bytes]
        }
    }

    fn align_code_info_to_machine_word(&mut self) {
        self.code_info_offset = format::align_up(self.code_info_offset);
    }

    fn write_code_info_qstr(&mut self, qstr: Qstr) {
        LittleEndian::write_u32(self.get_cur_code_info(4), qstr.0 as u32);
    }

    /// Emit line-number program bytes covering `bytes_to_skip` bytecode bytes
    /// and `lines_to_skip` source lines
    pub(super) fn write_code_info_bytes_lines(
        &mut self,
        mut bytes_to_skip: usize,
        mut lines_to_skip: usize,
    ) {
        while bytes_to_skip > 0 || lines_to_skip > 0 {
            let skip_bytes = bytes_to_skip.min(31);
            let skip_lines = lines_to_skip.min(7);
            bytes_to_skip -= skip_bytes;
            lines_to_skip -= skip_lines;
            self.get_cur_code_info(1)[0] = (skip_bytes | (skip_lines << 5)) as u8;
        }
    }

    // ------------------------------------------------------------------
    // bytecode writes

    /// All bytecode writes go through here
    pub(super) fn get_cur_bytecode(&mut self, num_bytes: usize) -> &mut [u8] {
        if self.pass < Pass::Emit {
            self.bytecode_offset += num_bytes;
            &mut self.dummy[..num_bytes]
        } else {
            assert!(
                self.bytecode_offset + num_bytes <= self.bytecode_size,
                "write past end of bytecode region"
            );
            let start = self.code_info_size + self.bytecode_offset;
            self.bytecode_offset += num_bytes;
            &mut self.code_base[start..start + num_bytes]
        }
    }

    fn align_bytecode_to_machine_word(&mut self) {
        self.bytecode_offset = format::align_up(self.bytecode_offset);
    }

    pub(super) fn write_bytecode_byte(&mut self, b1: u8) {
        self.get_cur_bytecode(1)[0] = b1;
    }

    pub(super) fn write_bytecode_byte_byte(&mut self, b1: u8, b2: u8) {
        let cur = self.get_cur_bytecode(2);
        cur[0] = b1;
        cur[1] = b2;
    }

    fn write_bytecode_uint(&mut self, num: usize) {
        let mut buf = [0u8; BYTES_FOR_INT];
        let start = format::encode_uint(num, &mut buf);
        self.get_cur_bytecode(BYTES_FOR_INT - start)
            .copy_from_slice(&buf[start..]);
    }

    pub(super) fn write_bytecode_byte_int(&mut self, b1: u8, num: isize) {
        self.write_bytecode_byte(b1);
        let mut buf = [0u8; BYTES_FOR_INT];
        let start = format::encode_int(num, &mut buf);
        self.get_cur_bytecode(BYTES_FOR_INT - start)
            .copy_from_slice(&buf[start..]);
    }

    pub(super) fn write_bytecode_byte_uint(&mut self, b1: u8, num: usize) {
        self.write_bytecode_byte(b1);
        self.write_bytecode_uint(num);
    }

    pub(super) fn write_bytecode_byte_qstr(&mut self, b1: u8, qstr: Qstr) {
        self.write_bytecode_byte_uint(b1, qstr.0);
    }

    /// Opcode followed by a word-aligned machine word, so the GC can scan the
    /// embedded handle
    pub(super) fn write_bytecode_byte_ptr(&mut self, b1: u8, ptr: usize) {
        self.write_bytecode_byte(b1);
        self.align_bytecode_to_machine_word();
        NativeEndian::write_uint(self.get_cur_bytecode(WORD_SIZE), ptr as u64, WORD_SIZE);
    }

    /// Unsigned labels are relative to the ip following the instruction,
    /// stored as 16 bits
    pub(super) fn write_bytecode_byte_unsigned_label(&mut self, b1: u8, label: Label) {
        let relative = if self.pass < Pass::Emit {
            0u16
        } else {
            let target = self.resolved_label_offset(label);
            target.wrapping_sub(self.bytecode_offset + 3) as u16
        };
        let cur = self.get_cur_bytecode(3);
        cur[0] = b1;
        LittleEndian::write_u16(&mut cur[1..3], relative);
    }

    /// Signed labels are relative to the ip following the instruction, stored
    /// as 16 bits in excess-0x8000
    pub(super) fn write_bytecode_byte_signed_label(&mut self, b1: u8, label: Label) {
        let relative = if self.pass < Pass::Emit {
            0u16
        } else {
            let target = self.resolved_label_offset(label) as isize;
            (target - self.bytecode_offset as isize - 3 + 0x8000) as u16
        };
        let cur = self.get_cur_bytecode(3);
        cur[0] = b1;
        LittleEndian::write_u16(&mut cur[1..3], relative);
    }

    fn resolved_label_offset(&self, label: Label) -> usize {
        let offset = self.label_offsets[label.id()];
        assert!(offset != UNRESOLVED, "jump to unassigned label {:?}", label);
        offset
    }
}
