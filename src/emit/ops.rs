use crate::bc::opcode::{self, BinaryOpKind, UnaryOpKind};
use crate::bc::Qstr;
use crate::emit::emitter::{BytecodeEmitter, Label, UNRESOLVED};
use crate::emit::EmitError;
use crate::scope::{IdKind, Pass, Scope, ScopeFlags, StarFlags};

/// Keyword-constant tokens forwarded from the lexer
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConstToken {
    None,
    True,
    False,
    Ellipsis,
}

/// Abstract emitter operation surface.
///
/// One method per abstract instruction, called by the compiler walker in
/// program order within each pass. Every operation records its stack delta
/// and emits its opcode form; a back end other than bytecode (historically, a
/// native-code emitter) implements the same surface.
pub trait Emitter {
    /// Record the current source line; non-monotonic updates are ignored
    fn set_source_line(&mut self, source_line: usize);

    /// Whether the last operation emitted was `return_value`, so the driver
    /// can elide a trailing implicit return
    fn last_emit_was_return_value(&self) -> bool;

    /// Bare stack correction, bypassing the watermark and the trailing-return
    /// marker
    fn adjust_stack_size(&mut self, delta: i32);

    /// Bind `label` to the current bytecode offset
    fn label_assign(&mut self, label: Label) -> Result<(), EmitError>;

    // identifier dispatch on the scope's id table
    fn load_id(&mut self, name: Qstr);
    fn store_id(&mut self, name: Qstr);
    fn delete_id(&mut self, name: Qstr);

    fn import_name(&mut self, name: Qstr);
    fn import_from(&mut self, name: Qstr);
    fn import_star(&mut self);

    fn load_const_tok(&mut self, tok: ConstToken);
    fn load_const_small_int(&mut self, value: isize);
    fn load_const_int(&mut self, value: Qstr);
    fn load_const_dec(&mut self, value: Qstr);
    fn load_const_str(&mut self, value: Qstr, bytes: bool);
    fn load_null(&mut self);

    fn load_fast(&mut self, local_num: usize);
    fn load_deref(&mut self, local_num: usize);
    fn load_name(&mut self, name: Qstr);
    fn load_global(&mut self, name: Qstr);
    fn load_attr(&mut self, attr: Qstr);
    fn load_method(&mut self, method: Qstr);
    fn load_build_class(&mut self);
    fn load_subscr(&mut self);

    fn store_fast(&mut self, local_num: usize);
    fn store_deref(&mut self, local_num: usize);
    fn store_name(&mut self, name: Qstr);
    fn store_global(&mut self, name: Qstr);
    fn store_attr(&mut self, attr: Qstr);
    fn store_subscr(&mut self);

    fn delete_fast(&mut self, local_num: usize);
    fn delete_deref(&mut self, local_num: usize);
    fn delete_name(&mut self, name: Qstr);
    fn delete_global(&mut self, name: Qstr);
    fn delete_attr(&mut self, attr: Qstr);
    fn delete_subscr(&mut self);

    fn dup_top(&mut self);
    fn dup_top_two(&mut self);
    fn pop_top(&mut self);
    fn rot_two(&mut self);
    fn rot_three(&mut self);

    fn jump(&mut self, label: Label);
    fn pop_jump_if_true(&mut self, label: Label);
    fn pop_jump_if_false(&mut self, label: Label);
    fn jump_if_true_or_pop(&mut self, label: Label);
    fn jump_if_false_or_pop(&mut self, label: Label);

    /// Jump that unwinds `except_depth` exception blocks on the way out
    fn unwind_jump(&mut self, label: Label, except_depth: usize);

    fn setup_with(&mut self, label: Label);
    fn with_cleanup(&mut self);
    fn setup_except(&mut self, label: Label);
    fn setup_finally(&mut self, label: Label);
    fn end_finally(&mut self);

    fn get_iter(&mut self);
    fn for_iter(&mut self, label: Label);
    fn for_iter_end(&mut self);
    fn pop_block(&mut self);
    fn pop_except(&mut self);

    fn unary_op(&mut self, op: UnaryOpKind);
    fn binary_op(&mut self, op: BinaryOpKind);

    fn build_tuple(&mut self, n_args: usize);
    fn build_list(&mut self, n_args: usize);
    fn list_append(&mut self, list_stack_index: usize);
    fn build_map(&mut self, n_args: usize);
    fn store_map(&mut self);
    fn map_add(&mut self, map_stack_index: usize);
    fn build_set(&mut self, n_args: usize);
    fn set_add(&mut self, set_stack_index: usize);
    fn build_slice(&mut self, n_args: usize);

    fn unpack_sequence(&mut self, n_args: usize);
    fn unpack_ex(&mut self, n_left: usize, n_right: usize);

    fn make_function(&mut self, child: &Scope, n_pos_defaults: usize, n_kw_defaults: usize);
    fn make_closure(
        &mut self,
        child: &Scope,
        n_closed_over: usize,
        n_pos_defaults: usize,
        n_kw_defaults: usize,
    ) -> Result<(), EmitError>;

    fn call_function(&mut self, n_positional: usize, n_keyword: usize, star_flags: StarFlags);
    fn call_method(&mut self, n_positional: usize, n_keyword: usize, star_flags: StarFlags);

    fn return_value(&mut self);
    fn raise_varargs(&mut self, n_args: usize);
    fn yield_value(&mut self);
    fn yield_from(&mut self);

    /// Stack bookkeeping when entering an exception handler: the VM pushes
    /// the three exception items plus up to three unwind-jump state slots
    fn start_except_handler(&mut self);
    fn end_except_handler(&mut self);
}

impl<'a> BytecodeEmitter<'a> {
    fn call_function_method_helper(
        &mut self,
        stack_adj: i32,
        bytecode_base: u8,
        n_positional: usize,
        n_keyword: usize,
        star_flags: StarFlags,
    ) {
        if !star_flags.is_empty() {
            if !star_flags.contains(StarFlags::SINGLE) {
                // dummy entry for the absent positional sequence
                self.load_null();
                self.rot_two();
            } else if !star_flags.contains(StarFlags::DOUBLE) {
                // dummy entry for the absent keyword dict
                self.load_null();
            }
            self.pre(stack_adj - n_positional as i32 - 2 * n_keyword as i32 - 2);
            self.write_bytecode_byte_uint(bytecode_base + 1, (n_keyword << 8) | n_positional);
        } else {
            self.pre(stack_adj - n_positional as i32 - 2 * n_keyword as i32);
            self.write_bytecode_byte_uint(bytecode_base, (n_keyword << 8) | n_positional);
        }
    }
}

impl<'a> Emitter for BytecodeEmitter<'a> {
    fn set_source_line(&mut self, source_line: usize) {
        if self.settings.opt_level >= 3 {
            // no line numbers at -O3
            return;
        }
        if source_line > self.last_source_line {
            let bytes_to_skip = self.bytecode_offset - self.last_source_line_offset;
            let lines_to_skip = source_line - self.last_source_line;
            self.write_code_info_bytes_lines(bytes_to_skip, lines_to_skip);
            self.last_source_line_offset = self.bytecode_offset;
            self.last_source_line = source_line;
        }
    }

    fn last_emit_was_return_value(&self) -> bool {
        self.last_emit_was_return_value
    }

    fn adjust_stack_size(&mut self, delta: i32) {
        self.stack_size += delta;
    }

    fn label_assign(&mut self, label: Label) -> Result<(), EmitError> {
        self.pre(0);
        let id = label.id();
        if id >= self.max_num_labels {
            return Err(EmitError::TooManyLabels {
                label: id,
                max: self.max_num_labels,
                line: self.last_source_line,
            });
        }
        if self.pass < Pass::Emit {
            assert!(
                self.label_offsets[id] == UNRESOLVED,
                "label {:?} assigned twice",
                label
            );
            self.label_offsets[id] = self.bytecode_offset;
        } else {
            // offset stability across passes is what makes the two-pass
            // scheme correct
            assert_eq!(
                self.label_offsets[id], self.bytecode_offset,
                "label {:?} offset drifted between passes",
                label
            );
        }
        Ok(())
    }

    fn load_id(&mut self, name: Qstr) {
        match self.scope.lookup_id(name) {
            Some(id) => match id.kind {
                IdKind::Local => self.load_fast(id.local_num),
                IdKind::Cell | IdKind::Free => self.load_deref(id.local_num),
                IdKind::GlobalExplicit => self.load_global(name),
                IdKind::GlobalImplicit => self.load_name(name),
            },
            None => self.load_name(name),
        }
    }

    fn store_id(&mut self, name: Qstr) {
        match self.scope.lookup_id(name) {
            Some(id) => match id.kind {
                IdKind::Local => self.store_fast(id.local_num),
                IdKind::Cell | IdKind::Free => self.store_deref(id.local_num),
                IdKind::GlobalExplicit => self.store_global(name),
                IdKind::GlobalImplicit => self.store_name(name),
            },
            None => self.store_name(name),
        }
    }

    fn delete_id(&mut self, name: Qstr) {
        match self.scope.lookup_id(name) {
            Some(id) => match id.kind {
                IdKind::Local => self.delete_fast(id.local_num),
                IdKind::Cell | IdKind::Free => self.delete_deref(id.local_num),
                IdKind::GlobalExplicit => self.delete_global(name),
                IdKind::GlobalImplicit => self.delete_name(name),
            },
            None => self.delete_name(name),
        }
    }

    fn import_name(&mut self, name: Qstr) {
        self.pre(-1);
        self.write_bytecode_byte_qstr(opcode::IMPORT_NAME, name);
    }

    fn import_from(&mut self, name: Qstr) {
        self.pre(1);
        self.write_bytecode_byte_qstr(opcode::IMPORT_FROM, name);
    }

    fn import_star(&mut self) {
        self.pre(-1);
        self.write_bytecode_byte(opcode::IMPORT_STAR);
    }

    fn load_const_tok(&mut self, tok: ConstToken) {
        self.pre(1);
        let op = match tok {
            ConstToken::None => opcode::LOAD_CONST_NONE,
            ConstToken::True => opcode::LOAD_CONST_TRUE,
            ConstToken::False => opcode::LOAD_CONST_FALSE,
            ConstToken::Ellipsis => opcode::LOAD_CONST_ELLIPSIS,
        };
        self.write_bytecode_byte(op);
    }

    fn load_const_small_int(&mut self, value: isize) {
        self.pre(1);
        self.write_bytecode_byte_int(opcode::LOAD_CONST_SMALL_INT, value);
    }

    fn load_const_int(&mut self, value: Qstr) {
        self.pre(1);
        self.write_bytecode_byte_qstr(opcode::LOAD_CONST_INT, value);
    }

    fn load_const_dec(&mut self, value: Qstr) {
        self.pre(1);
        self.write_bytecode_byte_qstr(opcode::LOAD_CONST_DEC, value);
    }

    fn load_const_str(&mut self, value: Qstr, bytes: bool) {
        self.pre(1);
        if bytes {
            self.write_bytecode_byte_qstr(opcode::LOAD_CONST_BYTES, value);
        } else {
            self.write_bytecode_byte_qstr(opcode::LOAD_CONST_STRING, value);
        }
    }

    fn load_null(&mut self) {
        self.pre(1);
        self.write_bytecode_byte(opcode::LOAD_NULL);
    }

    fn load_fast(&mut self, local_num: usize) {
        self.pre(1);
        match local_num {
            0 => self.write_bytecode_byte(opcode::LOAD_FAST_0),
            1 => self.write_bytecode_byte(opcode::LOAD_FAST_1),
            2 => self.write_bytecode_byte(opcode::LOAD_FAST_2),
            _ => self.write_bytecode_byte_uint(opcode::LOAD_FAST_N, local_num),
        }
    }

    fn load_deref(&mut self, local_num: usize) {
        self.pre(1);
        self.write_bytecode_byte_uint(opcode::LOAD_DEREF, local_num);
    }

    fn load_name(&mut self, name: Qstr) {
        self.pre(1);
        self.write_bytecode_byte_qstr(opcode::LOAD_NAME, name);
    }

    fn load_global(&mut self, name: Qstr) {
        self.pre(1);
        self.write_bytecode_byte_qstr(opcode::LOAD_GLOBAL, name);
    }

    fn load_attr(&mut self, attr: Qstr) {
        self.pre(0);
        self.write_bytecode_byte_qstr(opcode::LOAD_ATTR, attr);
    }

    fn load_method(&mut self, method: Qstr) {
        self.pre(1);
        self.write_bytecode_byte_qstr(opcode::LOAD_METHOD, method);
    }

    fn load_build_class(&mut self) {
        self.pre(1);
        self.write_bytecode_byte(opcode::LOAD_BUILD_CLASS);
    }

    fn load_subscr(&mut self) {
        self.pre(-1);
        self.write_bytecode_byte(opcode::LOAD_SUBSCR);
    }

    fn store_fast(&mut self, local_num: usize) {
        self.pre(-1);
        match local_num {
            0 => self.write_bytecode_byte(opcode::STORE_FAST_0),
            1 => self.write_bytecode_byte(opcode::STORE_FAST_1),
            2 => self.write_bytecode_byte(opcode::STORE_FAST_2),
            _ => self.write_bytecode_byte_uint(opcode::STORE_FAST_N, local_num),
        }
    }

    fn store_deref(&mut self, local_num: usize) {
        self.pre(-1);
        self.write_bytecode_byte_uint(opcode::STORE_DEREF, local_num);
    }

    fn store_name(&mut self, name: Qstr) {
        self.pre(-1);
        self.write_bytecode_byte_qstr(opcode::STORE_NAME, name);
    }

    fn store_global(&mut self, name: Qstr) {
        self.pre(-1);
        self.write_bytecode_byte_qstr(opcode::STORE_GLOBAL, name);
    }

    fn store_attr(&mut self, attr: Qstr) {
        self.pre(-2);
        self.write_bytecode_byte_qstr(opcode::STORE_ATTR, attr);
    }

    fn store_subscr(&mut self) {
        self.pre(-3);
        self.write_bytecode_byte(opcode::STORE_SUBSCR);
    }

    // DELETE_FAST and DELETE_DEREF have no stack effect in the VM, so neither
    // records a delta here
    fn delete_fast(&mut self, local_num: usize) {
        self.write_bytecode_byte_uint(opcode::DELETE_FAST, local_num);
    }

    fn delete_deref(&mut self, local_num: usize) {
        self.write_bytecode_byte_uint(opcode::DELETE_DEREF, local_num);
    }

    fn delete_name(&mut self, name: Qstr) {
        self.pre(0);
        self.write_bytecode_byte_qstr(opcode::DELETE_NAME, name);
    }

    fn delete_global(&mut self, name: Qstr) {
        self.pre(0);
        self.write_bytecode_byte_qstr(opcode::DELETE_GLOBAL, name);
    }

    fn delete_attr(&mut self, attr: Qstr) {
        self.load_null();
        self.rot_two();
        self.store_attr(attr);
    }

    fn delete_subscr(&mut self) {
        self.load_null();
        self.rot_three();
        self.store_subscr();
    }

    fn dup_top(&mut self) {
        self.pre(1);
        self.write_bytecode_byte(opcode::DUP_TOP);
    }

    fn dup_top_two(&mut self) {
        self.pre(2);
        self.write_bytecode_byte(opcode::DUP_TOP_TWO);
    }

    fn pop_top(&mut self) {
        self.pre(-1);
        self.write_bytecode_byte(opcode::POP_TOP);
    }

    fn rot_two(&mut self) {
        self.pre(0);
        self.write_bytecode_byte(opcode::ROT_TWO);
    }

    fn rot_three(&mut self) {
        self.pre(0);
        self.write_bytecode_byte(opcode::ROT_THREE);
    }

    fn jump(&mut self, label: Label) {
        self.pre(0);
        self.write_bytecode_byte_signed_label(opcode::JUMP, label);
    }

    fn pop_jump_if_true(&mut self, label: Label) {
        self.pre(-1);
        self.write_bytecode_byte_signed_label(opcode::POP_JUMP_IF_TRUE, label);
    }

    fn pop_jump_if_false(&mut self, label: Label) {
        self.pre(-1);
        self.write_bytecode_byte_signed_label(opcode::POP_JUMP_IF_FALSE, label);
    }

    fn jump_if_true_or_pop(&mut self, label: Label) {
        self.pre(-1);
        self.write_bytecode_byte_signed_label(opcode::JUMP_IF_TRUE_OR_POP, label);
    }

    fn jump_if_false_or_pop(&mut self, label: Label) {
        self.pre(-1);
        self.write_bytecode_byte_signed_label(opcode::JUMP_IF_FALSE_OR_POP, label);
    }

    fn unwind_jump(&mut self, label: Label, except_depth: usize) {
        if except_depth == 0 {
            self.pre(0);
            if label.is_break_from_for() {
                // drop the iterator when breaking out of a for loop
                self.write_bytecode_byte(opcode::POP_TOP);
            }
            self.write_bytecode_byte_signed_label(opcode::JUMP, label.strip_break_from_for());
        } else {
            assert!(except_depth <= 0x7f, "unwind depth does not fit one byte");
            self.write_bytecode_byte_signed_label(
                opcode::UNWIND_JUMP,
                label.strip_break_from_for(),
            );
            let marker = if label.is_break_from_for() { 0x80 } else { 0 };
            self.write_bytecode_byte(marker | except_depth as u8);
        }
    }

    fn setup_with(&mut self, label: Label) {
        self.pre(7);
        self.write_bytecode_byte_unsigned_label(opcode::SETUP_WITH, label);
    }

    fn with_cleanup(&mut self) {
        self.pre(-7);
        self.write_bytecode_byte(opcode::WITH_CLEANUP);
    }

    fn setup_except(&mut self, label: Label) {
        self.pre(0);
        self.write_bytecode_byte_unsigned_label(opcode::SETUP_EXCEPT, label);
    }

    fn setup_finally(&mut self, label: Label) {
        self.pre(0);
        self.write_bytecode_byte_unsigned_label(opcode::SETUP_FINALLY, label);
    }

    fn end_finally(&mut self) {
        self.pre(-1);
        self.write_bytecode_byte(opcode::END_FINALLY);
    }

    fn get_iter(&mut self) {
        self.pre(0);
        self.write_bytecode_byte(opcode::GET_ITER);
    }

    fn for_iter(&mut self, label: Label) {
        self.pre(1);
        self.write_bytecode_byte_unsigned_label(opcode::FOR_ITER, label);
    }

    fn for_iter_end(&mut self) {
        // the iterator is consumed when the loop falls off the end; nothing
        // is emitted
        self.pre(-1);
    }

    fn pop_block(&mut self) {
        self.pre(0);
        self.write_bytecode_byte(opcode::POP_BLOCK);
    }

    fn pop_except(&mut self) {
        self.pre(0);
        self.write_bytecode_byte(opcode::POP_EXCEPT);
    }

    fn unary_op(&mut self, op: UnaryOpKind) {
        if op == UnaryOpKind::Not {
            self.pre(0);
            self.write_bytecode_byte_byte(opcode::UNARY_OP, UnaryOpKind::Bool as u8);
            self.pre(0);
            self.write_bytecode_byte(opcode::NOT);
        } else {
            self.pre(0);
            self.write_bytecode_byte_byte(opcode::UNARY_OP, op as u8);
        }
    }

    fn binary_op(&mut self, op: BinaryOpKind) {
        let (op, invert) = match op {
            BinaryOpKind::NotIn => (BinaryOpKind::In, true),
            BinaryOpKind::IsNot => (BinaryOpKind::Is, true),
            other => (other, false),
        };
        self.pre(-1);
        self.write_bytecode_byte_byte(opcode::BINARY_OP, op as u8);
        if invert {
            self.pre(0);
            self.write_bytecode_byte(opcode::NOT);
        }
    }

    fn build_tuple(&mut self, n_args: usize) {
        self.pre(1 - n_args as i32);
        self.write_bytecode_byte_uint(opcode::BUILD_TUPLE, n_args);
    }

    fn build_list(&mut self, n_args: usize) {
        self.pre(1 - n_args as i32);
        self.write_bytecode_byte_uint(opcode::BUILD_LIST, n_args);
    }

    fn list_append(&mut self, list_stack_index: usize) {
        self.pre(-1);
        self.write_bytecode_byte_uint(opcode::LIST_APPEND, list_stack_index);
    }

    fn build_map(&mut self, n_args: usize) {
        self.pre(1);
        self.write_bytecode_byte_uint(opcode::BUILD_MAP, n_args);
    }

    fn store_map(&mut self) {
        self.pre(-2);
        self.write_bytecode_byte(opcode::STORE_MAP);
    }

    fn map_add(&mut self, map_stack_index: usize) {
        self.pre(-2);
        self.write_bytecode_byte_uint(opcode::MAP_ADD, map_stack_index);
    }

    fn build_set(&mut self, n_args: usize) {
        self.pre(1 - n_args as i32);
        self.write_bytecode_byte_uint(opcode::BUILD_SET, n_args);
    }

    fn set_add(&mut self, set_stack_index: usize) {
        self.pre(-1);
        self.write_bytecode_byte_uint(opcode::SET_ADD, set_stack_index);
    }

    fn build_slice(&mut self, n_args: usize) {
        self.pre(1 - n_args as i32);
        self.write_bytecode_byte_uint(opcode::BUILD_SLICE, n_args);
    }

    fn unpack_sequence(&mut self, n_args: usize) {
        self.pre(-1 + n_args as i32);
        self.write_bytecode_byte_uint(opcode::UNPACK_SEQUENCE, n_args);
    }

    fn unpack_ex(&mut self, n_left: usize, n_right: usize) {
        self.pre((n_left + n_right) as i32);
        self.write_bytecode_byte_uint(opcode::UNPACK_EX, n_left | (n_right << 8));
    }

    fn make_function(&mut self, child: &Scope, n_pos_defaults: usize, n_kw_defaults: usize) {
        if n_pos_defaults == 0 && n_kw_defaults == 0 {
            self.pre(1);
            self.write_bytecode_byte_ptr(opcode::MAKE_FUNCTION, child.raw_code.0);
        } else {
            // consumes the two default sequences already on the stack
            self.pre(-1);
            self.write_bytecode_byte_ptr(opcode::MAKE_FUNCTION_DEFARGS, child.raw_code.0);
        }
    }

    fn make_closure(
        &mut self,
        child: &Scope,
        n_closed_over: usize,
        n_pos_defaults: usize,
        n_kw_defaults: usize,
    ) -> Result<(), EmitError> {
        let count = u8::try_from(n_closed_over).map_err(|_| EmitError::TooManyClosedOver {
            count: n_closed_over,
            line: self.last_source_line,
        })?;
        if n_pos_defaults == 0 && n_kw_defaults == 0 {
            self.pre(1 - n_closed_over as i32);
            self.write_bytecode_byte_ptr(opcode::MAKE_CLOSURE, child.raw_code.0);
        } else {
            self.pre(-1 - n_closed_over as i32);
            self.write_bytecode_byte_ptr(opcode::MAKE_CLOSURE_DEFARGS, child.raw_code.0);
        }
        self.write_bytecode_byte(count);
        Ok(())
    }

    fn call_function(&mut self, n_positional: usize, n_keyword: usize, star_flags: StarFlags) {
        self.call_function_method_helper(
            0,
            opcode::CALL_FUNCTION,
            n_positional,
            n_keyword,
            star_flags,
        );
    }

    fn call_method(&mut self, n_positional: usize, n_keyword: usize, star_flags: StarFlags) {
        // the method value sits below the arguments, hence the extra pop
        self.call_function_method_helper(
            -1,
            opcode::CALL_METHOD,
            n_positional,
            n_keyword,
            star_flags,
        );
    }

    fn return_value(&mut self) {
        self.pre(-1);
        self.last_emit_was_return_value = true;
        self.write_bytecode_byte(opcode::RETURN_VALUE);
    }

    fn raise_varargs(&mut self, n_args: usize) {
        assert!(n_args <= 2, "raise takes at most two operands");
        self.pre(-(n_args as i32));
        self.write_bytecode_byte_byte(opcode::RAISE_VARARGS, n_args as u8);
    }

    fn yield_value(&mut self) {
        self.pre(0);
        self.scope.scope_flags.insert(ScopeFlags::GENERATOR);
        self.write_bytecode_byte(opcode::YIELD_VALUE);
    }

    fn yield_from(&mut self) {
        self.pre(-1);
        self.scope.scope_flags.insert(ScopeFlags::GENERATOR);
        self.write_bytecode_byte(opcode::YIELD_FROM);
    }

    fn start_except_handler(&mut self) {
        self.adjust_stack_size(6);
    }

    fn end_except_handler(&mut self) {
        self.adjust_stack_size(-5);
    }
}
