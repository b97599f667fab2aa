//! Byte-exact scenarios driving the emitter the way the compiler walker does:
//! three passes per scope, then assertions on the published buffer.

use byteorder::{ByteOrder, LittleEndian, NativeEndian};
use py2bc::bc::format::{align_up, WORD_SIZE};
use py2bc::bc::opcode::{self, BinaryOpKind, UnaryOpKind};
use py2bc::bc::{disasm, Qstr};
use py2bc::emit::{
    BytecodeEmitter, CodeTable, ConstToken, EmitError, EmitSettings, Emitter, Label, RawCodeId,
};
use py2bc::scope::{IdInfo, IdKind, Pass, Scope, ScopeFlags, StarFlags};

const Q_SOURCE: Qstr = Qstr(100);
const Q_NAME: Qstr = Qstr(101);

fn test_scope(glue: &mut CodeTable) -> Scope {
    let raw_code = glue.new_raw_code();
    Scope::new(Q_SOURCE, Q_NAME, raw_code)
}

/// Drive one scope through the stack-size, code-size, and emit passes
fn compile<F>(
    scope: &mut Scope,
    max_labels: usize,
    settings: EmitSettings,
    glue: &mut CodeTable,
    ops: F,
) where
    F: Fn(&mut BytecodeEmitter<'_>) -> Result<(), EmitError>,
{
    let mut emit = BytecodeEmitter::new(scope, max_labels, settings);
    for pass in [Pass::StackSize, Pass::CodeSize, Pass::Emit] {
        emit.start_pass(pass).unwrap();
        ops(&mut emit).unwrap();
        emit.end_pass(glue);
    }
}

fn published(glue: &CodeTable, raw_code: RawCodeId) -> Vec<u8> {
    glue.get(raw_code).unwrap().code.clone()
}

fn code_info_size(code: &[u8]) -> usize {
    LittleEndian::read_u32(&code[0..4]) as usize
}

fn bytecode_region(code: &[u8]) -> &[u8] {
    &code[code_info_size(code)..]
}

/// Instruction bytes after the fixed prelude and cell list
fn instructions(code: &[u8]) -> &[u8] {
    let bc = bytecode_region(code);
    let num_cells = bc[4] as usize;
    &bc[5 + num_cells..]
}

#[test]
fn empty_function_emits_prelude_and_return() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    // header: sizes and interned names
    assert_eq!(code_info_size(&code), align_up(13));
    assert_eq!(LittleEndian::read_u32(&code[4..8]), Q_SOURCE.0 as u32);
    assert_eq!(LittleEndian::read_u32(&code[8..12]), Q_NAME.0 as u32);
    // line program is just the terminator
    assert_eq!(code[12], 0);
    // prelude: one state slot, no exception stack, no cells
    let bc = bytecode_region(&code);
    assert_eq!(LittleEndian::read_u16(&bc[0..2]), 1);
    assert_eq!(LittleEndian::read_u16(&bc[2..4]), 0);
    assert_eq!(bc[4], 0);
    assert_eq!(&bc[5..], [opcode::LOAD_CONST_NONE, opcode::RETURN_VALUE]);
    assert_eq!(scope.stack_size, 1);
}

#[test]
fn n_state_is_at_least_one_even_with_no_operations() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(&mut scope, 0, EmitSettings::default(), &mut glue, |_| Ok(()));

    let code = published(&glue, scope.raw_code);
    let bc = bytecode_region(&code);
    // an exception propagated through this frame still needs one state slot
    assert_eq!(LittleEndian::read_u16(&bc[0..2]), 1);
    assert_eq!(bc.len(), 5);
    assert_eq!(scope.stack_size, 0);
}

#[test]
fn forward_jump_lands_on_next_instruction() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    let label = Label::new(0);
    compile(
        &mut scope,
        1,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.jump(label);
            emit.label_assign(label)?;
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let insns = instructions(&code);
    assert_eq!(insns[0], opcode::JUMP);
    // excess-0x8000: a stored value of exactly 0x8000 is zero displacement
    assert_eq!(LittleEndian::read_u16(&insns[1..3]), 0x8000);

    let listing = disasm::disassemble(&code);
    assert!(listing.contains("JUMP -> 8"), "{}", listing);
}

#[test]
fn short_form_store_and_varint_forty_two() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    scope.num_locals = 1;
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_small_int(42);
            emit.store_fast(0);
            emit.load_const_small_int(42);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_CONST_SMALL_INT,
            0x2a,
            opcode::STORE_FAST_0,
            opcode::LOAD_CONST_SMALL_INT,
            0x2a,
            opcode::RETURN_VALUE,
        ]
    );
    // one local plus a one-deep operand stack
    let bc = bytecode_region(&code);
    assert_eq!(LittleEndian::read_u16(&bc[0..2]), 2);
}

#[test]
fn negative_small_int_encodings() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_small_int(-1);
            emit.pop_top();
            emit.load_const_small_int(-64);
            emit.pop_top();
            emit.load_const_small_int(-65);
            emit.pop_top();
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_CONST_SMALL_INT,
            0x7f,
            opcode::POP_TOP,
            opcode::LOAD_CONST_SMALL_INT,
            0x40,
            opcode::POP_TOP,
            opcode::LOAD_CONST_SMALL_INT,
            0xff,
            0x3f,
            opcode::POP_TOP,
            opcode::LOAD_CONST_NONE,
            opcode::RETURN_VALUE,
        ]
    );
}

#[test]
fn line_number_program_packs_byte_and_line_deltas() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.set_source_line(1);
            emit.load_const_tok(ConstToken::None); // offset 0, 1 byte
            emit.pop_top(); // offset 1, 1 byte
            emit.load_const_small_int(300); // offset 2, 3 bytes
            emit.set_source_line(5);
            emit.pop_top(); // offset 5, 1 byte
            emit.load_const_small_int(20000); // offset 6, 4 bytes
            emit.set_source_line(12);
            emit.return_value(); // offset 10
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    // the first delta spans the 5-byte prelude plus the first three ops
    // (db=10, dl=4); the second spans ops four and five (db=5, dl=7)
    assert_eq!(&code[12..15], [0x8a, 0xe5, 0x00]);
    assert_eq!(code_info_size(&code), align_up(15));
}

#[test]
fn opt_level_three_suppresses_the_line_program() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings { opt_level: 3 },
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            emit.set_source_line(9);
            emit.pop_top();
            emit.set_source_line(20);
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(code[12], 0);
    assert_eq!(code_info_size(&code), align_up(13));
}

#[test]
fn is_not_folds_to_is_plus_not() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            emit.load_const_tok(ConstToken::None);
            emit.binary_op(BinaryOpKind::IsNot);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_CONST_NONE,
            opcode::LOAD_CONST_NONE,
            opcode::BINARY_OP,
            BinaryOpKind::Is as u8,
            opcode::NOT,
            opcode::RETURN_VALUE,
        ]
    );
    // the fold never grows the watermark past the two operands
    assert_eq!(scope.stack_size, 2);
}

#[test]
fn not_in_and_unary_not_fold_the_same_way() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            emit.load_const_tok(ConstToken::None);
            emit.binary_op(BinaryOpKind::NotIn);
            emit.unary_op(UnaryOpKind::Not);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_CONST_NONE,
            opcode::LOAD_CONST_NONE,
            opcode::BINARY_OP,
            BinaryOpKind::In as u8,
            opcode::NOT,
            opcode::UNARY_OP,
            UnaryOpKind::Bool as u8,
            opcode::NOT,
            opcode::RETURN_VALUE,
        ]
    );
}

#[test]
fn cell_locals_are_listed_in_the_prelude() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    scope.num_locals = 4;
    scope.id_info = vec![
        IdInfo {
            kind: IdKind::Local,
            local_num: 0,
            name: Qstr(1),
        },
        IdInfo {
            kind: IdKind::Cell,
            local_num: 1,
            name: Qstr(2),
        },
        IdInfo {
            kind: IdKind::Local,
            local_num: 2,
            name: Qstr(3),
        },
        IdInfo {
            kind: IdKind::Cell,
            local_num: 3,
            name: Qstr(4),
        },
    ];
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let bc = bytecode_region(&code);
    assert_eq!(LittleEndian::read_u16(&bc[0..2]), 5);
    assert_eq!(bc[4], 2);
    assert_eq!(&bc[5..7], [1, 3]);
    assert_eq!(bc[7], opcode::LOAD_CONST_NONE);
}

#[test]
fn single_star_call_pushes_null_for_the_missing_kw_dict() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_name(Qstr(20)); // callee
            emit.load_const_small_int(0); // one positional arg
            emit.load_const_tok(ConstToken::None); // the *args sequence
            emit.call_function(1, 0, StarFlags::SINGLE);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_NAME,
            20,
            opcode::LOAD_CONST_SMALL_INT,
            0x00,
            opcode::LOAD_CONST_NONE,
            opcode::LOAD_NULL,
            opcode::CALL_FUNCTION_VAR_KW,
            0x01,
            opcode::RETURN_VALUE,
        ]
    );
}

#[test]
fn double_star_call_rotates_a_null_below_the_kw_dict() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_name(Qstr(20)); // callee
            emit.load_const_tok(ConstToken::None); // the **kwargs dict
            emit.call_function(0, 0, StarFlags::DOUBLE);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_NAME,
            20,
            opcode::LOAD_CONST_NONE,
            opcode::LOAD_NULL,
            opcode::ROT_TWO,
            opcode::CALL_FUNCTION_VAR_KW,
            0x00,
            opcode::RETURN_VALUE,
        ]
    );
}

#[test]
fn call_with_keywords_packs_both_counts_into_one_operand() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_name(Qstr(20));
            emit.load_const_small_int(1); // positional
            emit.load_const_str(Qstr(21), false); // keyword name
            emit.load_const_small_int(2); // keyword value
            emit.call_function(1, 1, StarFlags::empty());
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let insns = instructions(&code);
    // operand is (n_kw << 8) | n_pos = 0x101, varint-encoded as two bytes
    assert_eq!(
        &insns[insns.len() - 4..],
        [opcode::CALL_FUNCTION, 0x82, 0x01, opcode::RETURN_VALUE]
    );
}

#[test]
fn unpack_ex_packs_left_and_right_counts() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    scope.num_locals = 4;
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            emit.unpack_ex(2, 1);
            emit.store_fast(0);
            emit.store_fast(1);
            emit.store_fast(2);
            emit.store_fast(3);
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let insns = instructions(&code);
    // 2 | (1 << 8) = 0x102, varint-encoded as two bytes
    assert_eq!(&insns[1..4], [opcode::UNPACK_EX, 0x82, 0x02]);
    // one sequence becomes left + star + right entries
    assert_eq!(scope.stack_size, 4);
}

#[test]
fn make_function_operand_is_word_aligned() {
    let mut glue = CodeTable::new();
    let child_raw_code = glue.new_raw_code();
    let child = Scope::new(Q_SOURCE, Qstr(30), child_raw_code);
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.make_function(&child, 0, 0);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let bc = bytecode_region(&code);
    assert_eq!(bc[5], opcode::MAKE_FUNCTION);
    let operand_at = align_up(6);
    // word-aligned within the region, and the region itself is word-aligned
    // within the buffer, so the GC can scan the embedded handle
    assert_eq!((code_info_size(&code) + operand_at) % WORD_SIZE, 0);
    let handle = NativeEndian::read_uint(&bc[operand_at..operand_at + WORD_SIZE], WORD_SIZE);
    assert_eq!(handle as usize, child_raw_code.0);
    assert_eq!(bc[operand_at + WORD_SIZE], opcode::RETURN_VALUE);
}

#[test]
fn make_closure_appends_the_closed_over_count() {
    let mut glue = CodeTable::new();
    let child_raw_code = glue.new_raw_code();
    let child = Scope::new(Q_SOURCE, Qstr(30), child_raw_code);
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_null();
            emit.load_null();
            emit.make_closure(&child, 2, 0, 0)?;
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let bc = bytecode_region(&code);
    assert_eq!(bc[7], opcode::MAKE_CLOSURE);
    let operand_at = align_up(8);
    assert_eq!(bc[operand_at + WORD_SIZE], 2);
}

#[test]
fn id_dispatch_follows_the_scope_table() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    scope.num_locals = 2;
    scope.id_info = vec![
        IdInfo {
            kind: IdKind::Local,
            local_num: 0,
            name: Qstr(50),
        },
        IdInfo {
            kind: IdKind::Cell,
            local_num: 1,
            name: Qstr(51),
        },
        IdInfo {
            kind: IdKind::Free,
            local_num: 2,
            name: Qstr(52),
        },
        IdInfo {
            kind: IdKind::GlobalExplicit,
            local_num: 0,
            name: Qstr(53),
        },
        IdInfo {
            kind: IdKind::GlobalImplicit,
            local_num: 0,
            name: Qstr(54),
        },
    ];
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_id(Qstr(50));
            emit.store_id(Qstr(51));
            emit.load_id(Qstr(52));
            emit.store_id(Qstr(53));
            emit.load_id(Qstr(54));
            emit.store_id(Qstr(99)); // not in the table: implicit global
            emit.delete_id(Qstr(50));
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_FAST_0,
            opcode::STORE_DEREF,
            1,
            opcode::LOAD_DEREF,
            2,
            opcode::STORE_GLOBAL,
            53,
            opcode::LOAD_NAME,
            54,
            opcode::STORE_NAME,
            99,
            opcode::DELETE_FAST,
            0,
            opcode::LOAD_CONST_NONE,
            opcode::RETURN_VALUE,
        ]
    );
}

#[test]
fn delete_attr_lowers_to_null_rot_store() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_name(Qstr(20));
            emit.delete_attr(Qstr(21));
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_NAME,
            20,
            opcode::LOAD_NULL,
            opcode::ROT_TWO,
            opcode::STORE_ATTR,
            21,
            opcode::LOAD_CONST_NONE,
            opcode::RETURN_VALUE,
        ]
    );
}

#[test]
fn unwind_jump_with_depth_appends_marker_byte() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    let l_finally = Label::new(0);
    let l_end = Label::new(1);
    compile(
        &mut scope,
        2,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.setup_finally(l_finally);
            emit.unwind_jump(l_end.with_break_from_for(), 1);
            emit.label_assign(l_finally)?;
            emit.load_const_tok(ConstToken::None);
            emit.end_finally();
            emit.label_assign(l_end)?;
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let insns = instructions(&code);
    assert_eq!(insns[3], opcode::UNWIND_JUMP);
    // high bit: break-from-for marker; low bits: unwind depth
    assert_eq!(insns[6], 0x81);
}

#[test]
fn break_from_for_at_depth_zero_pops_the_iterator() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    let l_break = Label::new(0);
    compile(
        &mut scope,
        1,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None); // stands in for the iterator
            emit.unwind_jump(l_break.with_break_from_for(), 0);
            emit.label_assign(l_break)?;
            // the emitted POP_TOP dropped the iterator behind the tracker's
            // back; square the simulated stack the way the walker does
            emit.adjust_stack_size(-1);
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let insns = instructions(&code);
    assert_eq!(&insns[1..5], [opcode::POP_TOP, opcode::JUMP, 0x00, 0x80]);
}

#[test]
fn yield_sets_the_generator_flag() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            emit.yield_value();
            emit.pop_top();
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    assert!(scope.scope_flags.contains(ScopeFlags::GENERATOR));
    let unit = glue.get(scope.raw_code).unwrap();
    assert!(unit.scope_flags.contains(ScopeFlags::GENERATOR));
}

#[test]
fn return_marker_tracks_the_last_operation() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            assert!(!emit.last_emit_was_return_value());
            emit.return_value();
            assert!(emit.last_emit_was_return_value());
            Ok(())
        },
    );
}

#[test]
fn argument_names_are_published_in_declaration_order() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    scope.num_pos_args = 2;
    scope.num_kwonly_args = 1;
    scope.num_locals = 3;
    scope.id_info = vec![
        IdInfo {
            kind: IdKind::Local,
            local_num: 0,
            name: Qstr(60),
        },
        IdInfo {
            kind: IdKind::Local,
            local_num: 1,
            name: Qstr(61),
        },
        IdInfo {
            kind: IdKind::Local,
            local_num: 2,
            name: Qstr(62),
        },
    ];
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let unit = glue.get(scope.raw_code).unwrap();
    assert_eq!(unit.n_pos_args, 2);
    assert_eq!(unit.n_kwonly_args, 1);
    assert_eq!(unit.arg_names, [Qstr(60), Qstr(61), Qstr(62)]);
}

#[test]
fn label_offsets_stay_inside_the_bytecode_region() {
    let mut glue = CodeTable::new();
    let raw_code = glue.new_raw_code();
    let mut scope = Scope::new(Q_SOURCE, Q_NAME, raw_code);
    let l_head = Label::new(0);
    let l_exit = Label::new(1);

    let ops = |emit: &mut BytecodeEmitter<'_>| -> Result<(), EmitError> {
        emit.load_const_tok(ConstToken::True);
        emit.label_assign(l_head)?;
        emit.dup_top();
        emit.pop_jump_if_false(l_exit);
        emit.jump(l_head);
        emit.label_assign(l_exit)?;
        emit.return_value();
        Ok(())
    };

    let mut emit = BytecodeEmitter::new(&mut scope, 2, EmitSettings::default());
    for pass in [Pass::StackSize, Pass::CodeSize, Pass::Emit] {
        emit.start_pass(pass).unwrap();
        ops(&mut emit).unwrap();
        emit.end_pass(&mut glue);

        if pass >= Pass::CodeSize {
            for label in [l_head, l_exit] {
                let offset = emit.label_offset(label).unwrap();
                assert!(offset < emit.bytecode_size());
            }
        }
    }
}

#[test]
fn disassembly_names_every_emitted_instruction() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    scope.num_locals = 1;
    let l_loop = Label::new(0);
    let l_done = Label::new(1);
    compile(
        &mut scope,
        2,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.set_source_line(2);
            emit.load_name(Qstr(4));
            emit.get_iter();
            emit.label_assign(l_loop)?;
            emit.for_iter(l_done);
            emit.store_fast(0);
            emit.jump(l_loop);
            emit.label_assign(l_done)?;
            emit.for_iter_end();
            emit.load_const_small_int(-7);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    let listing = disasm::disassemble(&code);
    for expected in [
        "LOAD_NAME q4",
        "GET_ITER",
        "FOR_ITER ->",
        "STORE_FAST_0",
        "JUMP ->",
        "LOAD_CONST_SMALL_INT -7",
        "RETURN_VALUE",
        "; line 2 from bytecode offset 5",
    ] {
        assert!(listing.contains(expected), "{:?} missing in:\n{}", expected, listing);
    }
}

#[test]
fn method_calls_classes_and_raise() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_name(Qstr(20));
            emit.load_method(Qstr(21));
            emit.call_method(0, 0, StarFlags::empty());
            emit.pop_top();
            emit.load_build_class();
            emit.call_function(0, 0, StarFlags::empty());
            emit.pop_top();
            emit.load_name(Qstr(22));
            emit.load_const_small_int(0);
            emit.load_subscr();
            emit.pop_top();
            emit.load_name(Qstr(23));
            emit.raise_varargs(1);
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_NAME,
            20,
            opcode::LOAD_METHOD,
            21,
            opcode::CALL_METHOD,
            0x00,
            opcode::POP_TOP,
            opcode::LOAD_BUILD_CLASS,
            opcode::CALL_FUNCTION,
            0x00,
            opcode::POP_TOP,
            opcode::LOAD_NAME,
            22,
            opcode::LOAD_CONST_SMALL_INT,
            0x00,
            opcode::LOAD_SUBSCR,
            opcode::POP_TOP,
            opcode::LOAD_NAME,
            23,
            opcode::RAISE_VARARGS,
            0x01,
            opcode::LOAD_CONST_NONE,
            opcode::RETURN_VALUE,
        ]
    );
    assert_eq!(scope.stack_size, 2);
}

#[test]
fn subscript_store_and_delete() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.load_name(Qstr(20)); // value
            emit.load_name(Qstr(21)); // object
            emit.load_const_small_int(3); // index
            emit.store_subscr();
            emit.load_name(Qstr(21));
            emit.load_const_small_int(4);
            emit.delete_subscr();
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::LOAD_NAME,
            20,
            opcode::LOAD_NAME,
            21,
            opcode::LOAD_CONST_SMALL_INT,
            0x03,
            opcode::STORE_SUBSCR,
            opcode::LOAD_NAME,
            21,
            opcode::LOAD_CONST_SMALL_INT,
            0x04,
            opcode::LOAD_NULL,
            opcode::ROT_THREE,
            opcode::STORE_SUBSCR,
            opcode::LOAD_CONST_NONE,
            opcode::RETURN_VALUE,
        ]
    );
    assert_eq!(scope.stack_size, 3);
}

#[test]
fn container_builders_and_comprehension_helpers() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    compile(
        &mut scope,
        0,
        EmitSettings::default(),
        &mut glue,
        |emit| {
            emit.build_map(0);
            emit.load_const_small_int(1); // value
            emit.load_const_small_int(2); // key
            emit.store_map();
            emit.pop_top();
            emit.build_list(0);
            emit.load_const_small_int(7);
            emit.list_append(1);
            emit.pop_top();
            emit.load_const_tok(ConstToken::None);
            emit.return_value();
            Ok(())
        },
    );

    let code = published(&glue, scope.raw_code);
    assert_eq!(
        instructions(&code),
        [
            opcode::BUILD_MAP,
            0x00,
            opcode::LOAD_CONST_SMALL_INT,
            0x01,
            opcode::LOAD_CONST_SMALL_INT,
            0x02,
            opcode::STORE_MAP,
            opcode::POP_TOP,
            opcode::BUILD_LIST,
            0x00,
            opcode::LOAD_CONST_SMALL_INT,
            0x07,
            opcode::LIST_APPEND,
            0x01,
            opcode::POP_TOP,
            opcode::LOAD_CONST_NONE,
            opcode::RETURN_VALUE,
        ]
    );
}

#[test]
fn too_many_cells_is_a_clean_error() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    scope.num_locals = 300;
    scope.id_info = (0..300)
        .map(|index| IdInfo {
            kind: IdKind::Cell,
            local_num: index,
            name: Qstr(1000 + index),
        })
        .collect();

    let mut emit = BytecodeEmitter::new(&mut scope, 0, EmitSettings::default());
    match emit.start_pass(Pass::StackSize) {
        Err(EmitError::TooManyCells { count: 300, .. }) => {}
        other => panic!("expected TooManyCells, got {:?}", other),
    }
}

#[test]
fn out_of_range_label_is_a_clean_error() {
    let mut glue = CodeTable::new();
    let mut scope = test_scope(&mut glue);
    let mut emit = BytecodeEmitter::new(&mut scope, 1, EmitSettings::default());
    emit.start_pass(Pass::StackSize).unwrap();
    match emit.label_assign(Label::new(5)) {
        Err(EmitError::TooManyLabels { label: 5, max: 1, .. }) => {}
        other => panic!("expected TooManyLabels, got {:?}", other),
    }
}
