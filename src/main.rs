use clap::{App, Arg};
use py2bc::bc::opcode::BinaryOpKind;
use py2bc::bc::{disasm, Qstr};
use py2bc::emit::{
    BytecodeEmitter, CodeTable, ConstToken, EmitError, EmitSettings, Emitter, Label, RawCodeId,
};
use py2bc::scope::{IdInfo, IdKind, Pass, Scope, StarFlags};
use std::fmt::Write;

// interned strings the samples pretend the lexer produced
const Q_SOURCE: Qstr = Qstr(1);
const Q_X: Qstr = Qstr(2);
const Q_Y: Qstr = Qstr(3);
const Q_RANGE: Qstr = Qstr(4);
const Q_I: Qstr = Qstr(5);

/// A canned operation sequence standing in for the compiler walker
struct Sample {
    name: &'static str,
    description: &'static str,
    build_scope: fn(RawCodeId) -> Scope,
    emit_ops: fn(&mut BytecodeEmitter<'_>) -> Result<(), EmitError>,
}

const SAMPLES: &[Sample] = &[
    Sample {
        name: "empty",
        description: "function body with nothing but the implicit return",
        build_scope: plain_scope,
        emit_ops: empty_ops,
    },
    Sample {
        name: "locals",
        description: "store two locals and return their product",
        build_scope: locals_scope,
        emit_ops: locals_ops,
    },
    Sample {
        name: "loop",
        description: "for loop over range(3) with a break",
        build_scope: loop_scope,
        emit_ops: loop_ops,
    },
    Sample {
        name: "tryexcept",
        description: "try block with a bare except clause",
        build_scope: plain_scope,
        emit_ops: try_except_ops,
    },
];

fn plain_scope(raw_code: RawCodeId) -> Scope {
    Scope::new(Q_SOURCE, Qstr(10), raw_code)
}

fn empty_ops(emit: &mut BytecodeEmitter<'_>) -> Result<(), EmitError> {
    emit.load_const_tok(ConstToken::None);
    emit.return_value();
    Ok(())
}

fn locals_scope(raw_code: RawCodeId) -> Scope {
    let mut scope = Scope::new(Q_SOURCE, Qstr(11), raw_code);
    scope.num_locals = 2;
    scope.id_info = vec![
        IdInfo {
            kind: IdKind::Local,
            local_num: 0,
            name: Q_X,
        },
        IdInfo {
            kind: IdKind::Local,
            local_num: 1,
            name: Q_Y,
        },
    ];
    scope
}

fn locals_ops(emit: &mut BytecodeEmitter<'_>) -> Result<(), EmitError> {
    emit.set_source_line(1);
    emit.load_const_small_int(6);
    emit.store_id(Q_X);
    emit.set_source_line(2);
    emit.load_const_small_int(7);
    emit.store_id(Q_Y);
    emit.set_source_line(3);
    emit.load_id(Q_X);
    emit.load_id(Q_Y);
    emit.binary_op(BinaryOpKind::Multiply);
    emit.return_value();
    Ok(())
}

fn loop_scope(raw_code: RawCodeId) -> Scope {
    let mut scope = Scope::new(Q_SOURCE, Qstr(12), raw_code);
    scope.num_locals = 1;
    scope.id_info = vec![IdInfo {
        kind: IdKind::Local,
        local_num: 0,
        name: Q_I,
    }];
    scope
}

fn loop_ops(emit: &mut BytecodeEmitter<'_>) -> Result<(), EmitError> {
    let l_continue = Label::new(0);
    let l_else = Label::new(1);
    let l_break = Label::new(2);
    let l_skip = Label::new(3);

    emit.set_source_line(1);
    emit.load_id(Q_RANGE);
    emit.load_const_small_int(3);
    emit.call_function(1, 0, StarFlags::empty());
    emit.get_iter();
    emit.label_assign(l_continue)?;
    emit.for_iter(l_else);
    emit.store_id(Q_I);
    emit.set_source_line(2);
    emit.load_id(Q_I);
    emit.load_const_small_int(1);
    emit.binary_op(BinaryOpKind::Equal);
    emit.pop_jump_if_false(l_skip);
    emit.set_source_line(3);
    emit.unwind_jump(l_break.with_break_from_for(), 0);
    emit.label_assign(l_skip)?;
    emit.jump(l_continue);
    emit.label_assign(l_else)?;
    emit.for_iter_end();
    emit.label_assign(l_break)?;
    emit.load_const_tok(ConstToken::None);
    emit.return_value();
    Ok(())
}

fn try_except_ops(emit: &mut BytecodeEmitter<'_>) -> Result<(), EmitError> {
    let l_handler = Label::new(0);
    let l_end = Label::new(1);

    emit.set_source_line(1);
    emit.setup_except(l_handler);
    emit.pop_block();
    emit.jump(l_end);
    emit.label_assign(l_handler)?;
    emit.start_except_handler();
    emit.set_source_line(3);
    emit.pop_top();
    emit.pop_except();
    emit.jump(l_end);
    emit.end_except_handler();
    emit.label_assign(l_end)?;
    emit.load_const_tok(ConstToken::None);
    emit.return_value();
    Ok(())
}

fn run_sample(sample: &Sample, opt_level: u8, glue: &mut CodeTable) -> Result<(), EmitError> {
    log::info!("Emitting sample '{}'", sample.name);
    let raw_code = glue.new_raw_code();
    let mut scope = (sample.build_scope)(raw_code);
    {
        let mut emit = BytecodeEmitter::new(&mut scope, 8, EmitSettings { opt_level });
        for pass in [Pass::StackSize, Pass::CodeSize, Pass::Emit] {
            emit.start_pass(pass)?;
            (sample.emit_ops)(&mut emit)?;
            emit.end_pass(glue);
        }
    }

    let unit = glue.get(raw_code).expect("unit was just published");
    println!("=== {}: {}", sample.name, sample.description);
    println!(
        "{} bytes, max stack {}, flags {:?}",
        unit.total_size(),
        scope.stack_size,
        unit.scope_flags
    );
    print!("{}", hex_dump(&unit.code));
    print!("{}", disasm::disassemble(&unit.code));
    println!();
    Ok(())
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|byte| format!("{:02x}", byte)).collect();
        writeln!(out, "{:04x}  {}", row * 16, hex.join(" ")).unwrap();
    }
    out
}

fn main() -> Result<(), EmitError> {
    env_logger::init();

    let matches = App::new("py2bc bytecode emitter demo")
        .version("0.1.0")
        .about("Runs built-in sample programs through the bytecode emitter")
        .arg(
            Arg::with_name("sample")
                .long("sample")
                .value_name("NAME")
                .help("Only emit the named sample")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("opt")
                .long("opt")
                .value_name("LEVEL")
                .help("Optimization level; 3 and above drops line numbers")
                .takes_value(true),
        )
        .get_matches();

    let opt_level: u8 = matches
        .value_of("opt")
        .unwrap_or("0")
        .parse()
        .expect("optimization level must be a small integer");
    let selected = matches.value_of("sample");

    let mut glue = CodeTable::new();
    let mut emitted = 0;
    for sample in SAMPLES {
        if selected.map_or(true, |name| name == sample.name) {
            run_sample(sample, opt_level, &mut glue)?;
            emitted += 1;
        }
    }
    if emitted == 0 {
        eprintln!(
            "no sample named {:?}; known samples:",
            selected.unwrap_or("")
        );
        for sample in SAMPLES {
            eprintln!("  {}: {}", sample.name, sample.description);
        }
        std::process::exit(2);
    }
    Ok(())
}
