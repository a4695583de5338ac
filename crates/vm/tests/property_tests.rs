//! Property-based invariants: primitive promotion, member edge balance,
//! and optimizer equivalence over generated programs.

use proptest::prelude::*;

use jv_core::primitive::{self, Primitive, PrimitiveType};
use jv_core::{optimize, Entity, Instruction, Op, Symbol, Tape, TapeBuilder};
use jv_vm::{Payload, Vm};

fn any_primitive() -> impl Strategy<Value = Primitive> {
    prop_oneof![
        any::<u8>().prop_map(Primitive::Char),
        any::<i32>().prop_map(Primitive::Int),
        (-1e9f64..1e9f64).prop_map(Primitive::Float),
    ]
}

proptest! {
    /// The result type of promoting arithmetic is the wider of the operand
    /// types, and the arithmetic agrees with wrapping i32 / IEEE f64.
    #[test]
    fn promotion_picks_the_wider_type(a in any_primitive(), b in any_primitive()) {
        let wider = a.type_of().max(b.type_of());
        for op in [primitive::add, primitive::sub, primitive::mult] {
            let result = op(a, b);
            prop_assert_eq!(result.type_of(), wider);
        }

        let sum = primitive::add(a, b);
        match wider {
            PrimitiveType::Float => {
                prop_assert_eq!(sum.as_float(), a.as_float() + b.as_float());
            }
            PrimitiveType::Int => {
                prop_assert_eq!(sum.as_int(), a.as_int().wrapping_add(b.as_int()));
            }
            PrimitiveType::Char => {
                prop_assert_eq!(sum.as_char(), a.as_char().wrapping_add(b.as_char()));
            }
        }
    }

    /// Comparisons promote the same way and agree with the widened values.
    #[test]
    fn comparisons_agree_with_widened_values(a in any_primitive(), b in any_primitive()) {
        match a.type_of().max(b.type_of()) {
            PrimitiveType::Float => {
                prop_assert_eq!(primitive::lt(a, b), a.as_float() < b.as_float());
                prop_assert_eq!(primitive::eq(a, b), a.as_float() == b.as_float());
            }
            _ => {
                prop_assert_eq!(primitive::lt(a, b), a.as_int() < b.as_int());
                prop_assert_eq!(primitive::eq(a, b), a.as_int() == b.as_int());
            }
        }
    }
}

/// One randomly chosen member-map operation.
#[derive(Debug, Clone, Copy)]
enum MemberOp {
    SetChild(u8, u8),
    SetInt(u8, u8),
    Remove(u8, u8),
}

fn member_ops() -> impl Strategy<Value = Vec<MemberOp>> {
    let op = prop_oneof![
        (0u8..4, 0u8..6).prop_map(|(p, k)| MemberOp::SetChild(p, k)),
        (0u8..4, 0u8..6).prop_map(|(p, k)| MemberOp::SetInt(p, k)),
        (0u8..4, 0u8..6).prop_map(|(p, k)| MemberOp::Remove(p, k)),
    ];
    proptest::collection::vec(op, 0..64)
}

proptest! {
    /// After any sequence of member writes, every parent->child edge count
    /// equals the number of member entries on the parent holding that
    /// child.
    #[test]
    fn member_edge_counts_match_member_entries(ops in member_ops()) {
        let mut vm = Vm::new();
        let core = vm.mm.core();
        let heap = &mut vm.main_process().heap;

        let parents: Vec<_> = (0..4)
            .map(|_| {
                let h = heap.new_object(core.object, Payload::None);
                heap.make_root(h);
                h
            })
            .collect();
        let child = heap.new_object(core.object, Payload::None);
        let keys: Vec<Symbol> = (0..6).map(|i| Symbol::intern(&format!("k{i}"))).collect();

        for op in ops {
            match op {
                MemberOp::SetChild(p, k) => {
                    heap.set_member(parents[p as usize], keys[k as usize], Entity::Object(child));
                }
                MemberOp::SetInt(p, k) => {
                    heap.set_member(parents[p as usize], keys[k as usize], Entity::int(k as i32));
                }
                MemberOp::Remove(p, k) => {
                    heap.remove_member(parents[p as usize], keys[k as usize]);
                }
            }
        }

        for parent in &parents {
            let holding = heap
                .get(*parent)
                .members
                .values()
                .filter(|e| **e == Entity::Object(child))
                .count() as u32;
            prop_assert_eq!(heap.edge_count(*parent, child), holding);
        }
    }
}

/// One instruction of a generated straight-line program. Jumps are forward
/// only, so every program terminates.
#[derive(Debug, Clone, Copy)]
enum GenIns {
    PushInt(i8),
    ResInt(i8),
    PushRes,
    Peek,
    Add,
    Sub,
    Mult,
    Set(u8),
    Res(u8),
    Push(u8),
    Inc(u8),
    Jmp(u8),
    If(u8),
    Prnt,
}

fn gen_program() -> impl Strategy<Value = Vec<GenIns>> {
    let ins = prop_oneof![
        any::<i8>().prop_map(GenIns::PushInt),
        any::<i8>().prop_map(GenIns::ResInt),
        Just(GenIns::PushRes),
        Just(GenIns::Peek),
        Just(GenIns::Add),
        Just(GenIns::Sub),
        Just(GenIns::Mult),
        (0u8..3).prop_map(GenIns::Set),
        (0u8..3).prop_map(GenIns::Res),
        (0u8..3).prop_map(GenIns::Push),
        (0u8..3).prop_map(GenIns::Inc),
        (0u8..4).prop_map(GenIns::Jmp),
        (0u8..4).prop_map(GenIns::If),
        Just(GenIns::Prnt),
    ];
    proptest::collection::vec(ins, 1..40)
}

fn build_tape(program: &[GenIns]) -> Tape {
    let vars = ["a", "b", "c"];
    let mut builder = TapeBuilder::new(Symbol::intern("generated"));
    // Prelude: initialize every variable and lay down a deep operand
    // cushion, so no generated path can see nil operands or underflow the
    // stack (a raise would make error-message wording observable, and the
    // peepholes rewrite wording-relevant sequences).
    builder.add(Instruction::int(Op::RES, 7));
    for var in vars {
        builder.add(Instruction::id(Op::SET, Symbol::intern(var)));
    }
    for _ in 0..(2 * program.len() + 2) {
        builder.add(Instruction::int(Op::PUSH, 3));
    }
    for ins in program {
        let instruction = match ins {
            GenIns::PushInt(v) => Instruction::int(Op::PUSH, *v as i32),
            GenIns::ResInt(v) => Instruction::int(Op::RES, *v as i32),
            GenIns::PushRes => Instruction::no_arg(Op::PUSH),
            GenIns::Peek => Instruction::no_arg(Op::PEEK),
            GenIns::Add => Instruction::no_arg(Op::ADD),
            GenIns::Sub => Instruction::no_arg(Op::SUB),
            GenIns::Mult => Instruction::no_arg(Op::MULT),
            GenIns::Set(v) => Instruction::id(Op::SET, Symbol::intern(vars[*v as usize])),
            GenIns::Res(v) => Instruction::id(Op::RES, Symbol::intern(vars[*v as usize])),
            GenIns::Push(v) => Instruction::id(Op::PUSH, Symbol::intern(vars[*v as usize])),
            GenIns::Inc(v) => Instruction::id(Op::INC, Symbol::intern(vars[*v as usize])),
            GenIns::Jmp(d) => Instruction::int(Op::JMP, *d as i32),
            GenIns::If(d) => Instruction::int(Op::IF, *d as i32),
            GenIns::Prnt => Instruction::no_arg(Op::PRNT),
        };
        builder.add(instruction);
    }
    builder.add(Instruction::int(Op::EXIT, 0));
    builder.finish()
}

fn run_generated(tape: Tape) -> (Entity, String) {
    let (mut vm, capture) = Vm::with_capture();
    let module = vm.load_tape(tape).expect("hydrate");
    let result = vm.run_module(module).expect("run");
    let output = capture.lock().clone();
    (result, output)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Executing a generated tape and its optimized form yields the same
    /// final resval and the same printed output.
    #[test]
    fn optimizer_preserves_generated_program_behavior(program in gen_program()) {
        let raw = build_tape(&program);
        let optimized = optimize(raw.clone());
        let (raw_result, raw_output) = run_generated(raw);
        let (opt_result, opt_output) = run_generated(optimized);
        prop_assert_eq!(raw_result, opt_result);
        prop_assert_eq!(raw_output, opt_output);
    }

    /// Every branch in a generated tape still lands on the image of its
    /// original target after optimization: jumps never point outside the
    /// tape and never land mid-pattern on a rewritten pair. Checked
    /// indirectly through execution above; here we check the offsets stay
    /// in bounds.
    #[test]
    fn optimized_branches_stay_in_bounds(program in gen_program()) {
        let optimized = optimize(build_tape(&program));
        for (i, ins) in optimized.instructions().iter().enumerate() {
            if ins.op.is_relative_jump() {
                let offset = ins.arg.as_int().expect("jump operand");
                let target = i as i64 + 1 + offset as i64;
                prop_assert!(target >= 0);
                prop_assert!(target <= optimized.len() as i64);
            }
        }
    }
}
