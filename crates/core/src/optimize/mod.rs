//! Peephole optimization.
//!
//! Rewrites a tape into a semantically equivalent tape with local
//! instruction patterns collapsed. Passes run in a fixed order, each as one
//! scan over the whole tape; after every pass the recorded deletions are
//! applied and all jump offsets recomputed (see [`helper::OptimizeHelper`]).

pub mod helper;
mod passes;

pub use helper::OptimizeHelper;

use crate::tape::Tape;

type Pass = fn(&mut OptimizeHelper);

const PASSES: &[(&str, Pass)] = &[
    ("ResPush", passes::res_push),
    ("SetRes", passes::set_res),
    ("SetPush", passes::set_push),
    ("GetPush", passes::get_push),
    ("JmpRes", passes::jmp_res),
    ("PushRes", passes::push_res),
    ("ResPush2", passes::res_push2),
    ("RetRet", passes::ret_ret),
    ("PeekRes", passes::peek_res),
    ("Increment", passes::increment),
    ("SetEmpty", passes::set_empty),
    ("PushResEmpty", passes::push_res_empty),
    ("PushRes2", passes::push_res2),
    ("PeekPeek", passes::peek_peek),
    ("SimpleMath", passes::simple_math),
    ("Nil", passes::nil),
];

/// Optimizes a tape, preserving every branch target.
pub fn optimize(tape: Tape) -> Tape {
    let mut tape = tape;
    for (name, pass) in PASSES {
        let before = tape.len();
        let mut helper = OptimizeHelper::new(&tape);
        pass(&mut helper);
        tape = helper.apply();
        if tape.len() != before {
            log::debug!("peephole {name}: {before} -> {} instructions", tape.len());
        }
    }
    tape
}
