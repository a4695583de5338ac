//! Property-based checks of the peephole optimizer's structural
//! guarantees: it never grows a tape, never leaves a branch dangling, and
//! never touches the symbol tables.

use proptest::prelude::*;

use jv_core::tape::FnFlags;
use jv_core::{optimize, Instruction, Op, Symbol, Tape, TapeBuilder};

#[derive(Debug, Clone, Copy)]
enum GenIns {
    PushInt(i8),
    ResInt(i8),
    PushNoArg,
    ResNoArg,
    Peek,
    Add,
    Sub,
    Set(u8),
    Res(u8),
    Push(u8),
    ResNil,
    PushNil,
    Jmp(u8),
    If(u8),
    Ret,
    Nop,
}

fn gen_program() -> impl Strategy<Value = Vec<GenIns>> {
    let ins = prop_oneof![
        any::<i8>().prop_map(GenIns::PushInt),
        any::<i8>().prop_map(GenIns::ResInt),
        Just(GenIns::PushNoArg),
        Just(GenIns::ResNoArg),
        Just(GenIns::Peek),
        Just(GenIns::Add),
        Just(GenIns::Sub),
        (0u8..3).prop_map(GenIns::Set),
        (0u8..3).prop_map(GenIns::Res),
        (0u8..3).prop_map(GenIns::Push),
        Just(GenIns::ResNil),
        Just(GenIns::PushNil),
        (0u8..6).prop_map(GenIns::Jmp),
        (0u8..6).prop_map(GenIns::If),
        Just(GenIns::Ret),
        Just(GenIns::Nop),
    ];
    proptest::collection::vec(ins, 1..60)
}

fn build_tape(program: &[GenIns]) -> Tape {
    let vars = ["a", "b", "c"];
    let mut builder = TapeBuilder::new(Symbol::intern("generated"));
    for (i, ins) in program.iter().enumerate() {
        // Sprinkle a function label so entry remapping is exercised.
        if i == program.len() / 2 {
            builder.label_function(Symbol::intern("midpoint"), FnFlags::empty());
        }
        let instruction = match ins {
            GenIns::PushInt(v) => Instruction::int(Op::PUSH, *v as i32),
            GenIns::ResInt(v) => Instruction::int(Op::RES, *v as i32),
            GenIns::PushNoArg => Instruction::no_arg(Op::PUSH),
            GenIns::ResNoArg => Instruction::no_arg(Op::RES),
            GenIns::Peek => Instruction::no_arg(Op::PEEK),
            GenIns::Add => Instruction::no_arg(Op::ADD),
            GenIns::Sub => Instruction::no_arg(Op::SUB),
            GenIns::Set(v) => Instruction::id(Op::SET, Symbol::intern(vars[*v as usize])),
            GenIns::Res(v) => Instruction::id(Op::RES, Symbol::intern(vars[*v as usize])),
            GenIns::Push(v) => Instruction::id(Op::PUSH, Symbol::intern(vars[*v as usize])),
            GenIns::ResNil => Instruction::id(Op::RES, Symbol::intern("Nil")),
            GenIns::PushNil => Instruction::id(Op::PUSH, Symbol::intern("Nil")),
            GenIns::Jmp(d) => Instruction::int(Op::JMP, *d as i32),
            GenIns::If(d) => Instruction::int(Op::IF, *d as i32),
            GenIns::Ret => Instruction::no_arg(Op::RET),
            GenIns::Nop => Instruction::no_arg(Op::NOP),
        };
        builder.add(instruction);
    }
    builder.add(Instruction::int(Op::EXIT, 0));
    builder.finish()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn optimization_never_grows_or_breaks_a_tape(program in gen_program()) {
        let raw = build_tape(&program);
        let optimized = optimize(raw.clone());

        prop_assert!(optimized.len() <= raw.len());

        // Every surviving branch resolves inside the tape (the end position
        // is a legal fall-off return).
        for (i, ins) in optimized.instructions().iter().enumerate() {
            if ins.op.is_relative_jump() {
                let offset = ins.arg.as_int().expect("jump operand");
                let target = i as i64 + 1 + offset as i64;
                prop_assert!(target >= 0, "branch at {i} resolves to {target}");
                prop_assert!(
                    target <= optimized.len() as i64,
                    "branch at {i} resolves to {target} past {}",
                    optimized.len()
                );
            }
        }

        // Symbol tables survive untouched apart from remapped offsets.
        prop_assert_eq!(optimized.module_name(), raw.module_name());
        let raw_fns: Vec<Symbol> = raw.functions().keys().copied().collect();
        let opt_fns: Vec<Symbol> = optimized.functions().keys().copied().collect();
        prop_assert_eq!(raw_fns, opt_fns);
        for fref in optimized.functions().values() {
            prop_assert!(fref.index <= optimized.len());
        }
    }

    #[test]
    fn optimization_is_deterministic(program in gen_program()) {
        let raw = build_tape(&program);
        let once = optimize(raw.clone());
        let again = optimize(raw);
        prop_assert_eq!(once.instructions(), again.instructions());
    }
}
