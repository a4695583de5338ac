//! The peephole passes.
//!
//! Each pass is a single left-to-right scan that records rewrites against an
//! [`OptimizeHelper`]. A pass never rewrites across a branch target: every
//! instruction participating in a candidate is checked against the target
//! set recorded before the pass ran. The one deliberate exception is
//! `jmp_res`, which exists to delete a redundant `res` *at* a back-jump
//! target; its guards prove both paths into the target leave resval equal.

use crate::instruction::{Arg, Instruction};
use crate::keywords;
use crate::op::Op;
use crate::optimize::helper::OptimizeHelper;
use crate::primitive::Primitive;

fn code(oh: &OptimizeHelper) -> Vec<Instruction> {
    oh.tape().instructions().to_vec()
}

fn is_int_one(arg: &Arg) -> bool {
    matches!(arg, Arg::Primitive(Primitive::Int(1)))
}

/// `res x; push` => `push x`.
pub(crate) fn res_push(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op == Op::RES
            && !first.arg.is_none()
            && second.op == Op::PUSH
            && second.arg.is_none()
            && !oh.any_target(&[i - 1, i])
        {
            oh.remove(i);
            oh.set_op(i - 1, Op::PUSH);
        }
    }
}

/// `set/let x; res x` => `set/let x` (the value is still in resval).
pub(crate) fn set_res(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if matches!(first.op, Op::SET | Op::LET)
            && second.op == Op::RES
            && first.arg.as_id().is_some()
            && first.arg.as_id() == second.arg.as_id()
            && !oh.any_target(&[i - 1, i])
        {
            oh.remove(i);
        }
    }
}

/// `set/let x; push x` => `set/let x; push` (skip the redundant lookup).
pub(crate) fn set_push(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if matches!(first.op, Op::SET | Op::LET)
            && second.op == Op::PUSH
            && first.arg.as_id().is_some()
            && first.arg.as_id() == second.arg.as_id()
            && !oh.any_target(&[i - 1, i])
        {
            oh.replace(i, Instruction::no_arg(Op::PUSH));
        }
    }
}

/// `get x; push` => `gtsh x`.
pub(crate) fn get_push(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op == Op::GET
            && !first.arg.is_none()
            && second.op == Op::PUSH
            && second.arg.is_none()
            && !oh.any_target(&[i - 1, i])
        {
            oh.remove(i);
            oh.set_op(i - 1, Op::GTSH);
        }
    }
}

/// Removes a `res x` at a back-jump target when both the fall-in and the
/// jump-in path end with `set x`; resval already holds x on both.
pub(crate) fn jmp_res(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op != Op::SET || second.op != Op::JMP {
            continue;
        }
        let Some(jmp_val) = second.arg.as_int() else {
            continue;
        };
        if jmp_val >= 0 {
            continue;
        }
        let target = i as i64 + jmp_val as i64;
        if target < 1 {
            continue;
        }
        let (jump_to_parent, jump_to) = (code[target as usize - 1], code[target as usize]);
        if jump_to_parent.op != Op::SET
            || jump_to_parent.arg.as_id() != first.arg.as_id()
            || jump_to.op != Op::RES
            || jump_to.arg.as_id().is_none()
            || jump_to.arg.as_id() != first.arg.as_id()
        {
            continue;
        }
        oh.remove(target as usize);
    }
}

/// `push v; res v` (same operand) => `psrs v`.
pub(crate) fn push_res(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op != Op::PUSH || second.op != Op::RES || first.arg != second.arg
            || first.arg.is_none()
            || oh.any_target(&[i - 1, i])
        {
            continue;
        }
        oh.remove(i);
        oh.set_op(i - 1, Op::PSRS);
    }
}

/// `res; push` (both no-arg) => `peek`.
pub(crate) fn res_push2(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op == Op::RES
            && first.arg.is_none()
            && second.op == Op::PUSH
            && second.arg.is_none()
            && !oh.any_target(&[i - 1, i])
        {
            oh.remove(i);
            oh.set_op(i - 1, Op::PEEK);
        }
    }
}

/// Collapses consecutive `ret`.
pub(crate) fn ret_ret(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op == Op::RET
            && first.arg.is_none()
            && second.op == Op::RET
            && second.arg.is_none()
            && !oh.any_target(&[i - 1, i])
        {
            oh.remove(i);
        }
    }
}

/// Drops a `peek` immediately before a `res` or `tlen`; both overwrite
/// resval without reading it.
pub(crate) fn peek_res(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op == Op::PEEK
            && matches!(second.op, Op::RES | Op::TLEN)
            && !oh.is_target(i - 1)
        {
            oh.remove(i - 1);
        }
    }
}

/// `push x; push 1; add; set x` => `inc x` (and the sub/dec analogue), plus
/// the three-op variant that starts from `res x`.
pub(crate) fn increment(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 3..code.len() {
        let (first, second, third, fourth) = (code[i - 3], code[i - 2], code[i - 1], code[i]);
        if first.op == Op::PUSH
            && first.arg.as_id().is_some()
            && second.op == Op::PUSH
            && is_int_one(&second.arg)
            && matches!(third.op, Op::ADD | Op::SUB)
            && third.arg.is_none()
            && fourth.op == Op::SET
            && fourth.arg.as_id() == first.arg.as_id()
            && !oh.any_target(&[i - 3, i - 2, i - 1, i])
        {
            oh.remove(i);
            oh.remove(i - 1);
            oh.remove(i - 2);
            oh.set_op(i - 3, if third.op == Op::ADD { Op::INC } else { Op::DEC });
        }
    }

    for i in 2..code.len() {
        let (first, second, third) = (code[i - 2], code[i - 1], code[i]);
        if first.op == Op::RES
            && first.arg.as_id().is_some()
            && matches!(second.op, Op::ADD | Op::SUB)
            && is_int_one(&second.arg)
            && third.op == Op::SET
            && third.arg.as_id() == first.arg.as_id()
            && !oh.any_target(&[i - 2, i - 1, i])
        {
            oh.remove(i);
            oh.remove(i - 1);
            oh.set_op(i - 2, if second.op == Op::ADD { Op::INC } else { Op::DEC });
        }
    }
}

/// Drops `tget n; set _` pairs binding to the ignore name.
pub(crate) fn set_empty(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op == Op::TGET
            && first.arg.as_primitive().is_some()
            && matches!(second.op, Op::SET | Op::LET)
            && second.arg.as_id() == Some(*keywords::IGNORE)
            && !oh.any_target(&[i - 1, i])
        {
            oh.remove(i - 1);
            oh.remove(i);
        }
    }
}

/// `push; res` (both no-arg) cancel: push resval, then pop it right back.
pub(crate) fn push_res_empty(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op == Op::PUSH
            && first.arg.is_none()
            && second.op == Op::RES
            && second.arg.is_none()
            && !oh.any_target(&[i - 1, i])
        {
            oh.remove(i - 1);
            oh.remove(i);
        }
    }
}

/// Second chance for `push; res` pairs left behind by earlier passes.
pub(crate) fn push_res2(oh: &mut OptimizeHelper) {
    push_res_empty(oh);
}

/// Consecutive `peek` collapses to one.
pub(crate) fn peek_peek(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 1..code.len() {
        let (first, second) = (code[i - 1], code[i]);
        if first.op == Op::PEEK
            && first.arg.is_none()
            && second.op == Op::PEEK
            && second.arg.is_none()
            && !oh.any_target(&[i - 1, i])
        {
            oh.remove(i - 1);
        }
    }
}

/// Folds `push a; push b; <op>` into `res a; <op> b` when `b` is a literal
/// or identifier. Runs after `res_push`.
pub(crate) fn simple_math(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for i in 2..code.len() {
        let (first, second, third) = (code[i - 2], code[i - 1], code[i]);
        if first.op == Op::PUSH
            && second.op == Op::PUSH
            && third.op.is_math()
            && third.arg.is_none()
            && matches!(second.arg, Arg::Primitive(_) | Arg::Id(_))
            && !oh.any_target(&[i - 1, i])
        {
            if first.arg.is_none() {
                oh.remove(i - 2);
            } else {
                oh.set_op(i - 2, Op::RES);
            }
            oh.set_op(i - 1, third.op);
            oh.remove(i);
        }
    }
}

/// Replaces `res Nil` / `push Nil` with the dedicated `rnil` / `pnil` ops.
pub(crate) fn nil(oh: &mut OptimizeHelper) {
    let code = code(oh);
    for (i, ins) in code.iter().enumerate() {
        if !matches!(ins.op, Op::RES | Op::PUSH) {
            continue;
        }
        if ins.arg.as_id() != Some(*keywords::NIL) {
            continue;
        }
        let replacement = if ins.op == Op::RES { Op::RNIL } else { Op::PNIL };
        oh.replace(i, Instruction::no_arg(replacement));
    }
}
