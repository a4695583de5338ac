//! Command-line drivers for the Jv tools.
//!
//! `jvc` reads module files, optionally optimizes them, and emits textual
//! assembly and/or binary bytecode. `jlr` registers module files with a VM
//! and runs the first as the main module.

/// Argument definitions.
pub mod args;
/// Library module location.
pub mod lib_finder;

use std::path::Path;

use anyhow::{Context as _, Result};

use jv_core::{optimize, Tape};
use jv_vm::module_manager::read_tape;
use jv_vm::Vm;

use args::{CompileArgs, RunArgs};

/// Reads one module file into a tape, optionally optimized.
fn read_file(path: &Path, run_optimizer: bool) -> Result<Tape> {
    let tape = read_tape(path).with_context(|| format!("reading '{}'", path.display()))?;
    Ok(if run_optimizer { optimize(tape) } else { tape })
}

/// Writes a tape's output files per the compile flags.
fn write_tape(tape: &Tape, args: &CompileArgs) -> Result<()> {
    let name = tape.module_name().as_str();
    if args.out_asm {
        std::fs::create_dir_all(&args.asm_dir)?;
        let path = args.asm_dir.join(format!("{name}.ja"));
        std::fs::write(&path, jv_asm::tape_write(tape))
            .with_context(|| format!("writing '{}'", path.display()))?;
        log::info!("wrote {}", path.display());
    }
    if args.out_bin {
        std::fs::create_dir_all(&args.bin_dir)?;
        let path = args.bin_dir.join(format!("{name}.jb"));
        std::fs::write(&path, jv_core::tape_write_binary(tape))
            .with_context(|| format!("writing '{}'", path.display()))?;
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

/// The `jvc` entry point: process every input, emit requested outputs.
pub fn compile(args: &CompileArgs) -> Result<()> {
    for file in &args.files {
        let tape = read_file(file, args.optimize)?;
        write_tape(&tape, args)?;
    }
    Ok(())
}

/// The `jlr` entry point: register inputs and library modules, run the
/// first input as main.
pub fn run(args: &RunArgs) -> Result<i32> {
    let mut vm = Vm::new();

    let mut main_name = None;
    for file in &args.files {
        let name = vm
            .register_file(file)
            .with_context(|| format!("registering '{}'", file.display()))?;
        if main_name.is_none() {
            main_name = Some(name);
        }
    }
    for lib in lib_finder::all_modules() {
        // Inputs win over library files with the same stem.
        let _ = vm.register_file(&lib);
    }

    vm.set_args(&args.arg_pairs());

    let main_name = main_name.expect("clap requires at least one file");
    vm.run_main(main_name)
        .with_context(|| format!("running module '{main_name}'"))?;
    Ok(0)
}
