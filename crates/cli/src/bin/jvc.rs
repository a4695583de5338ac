//! The `jvc` compiler driver.

use clap::Parser;

use jv_cli::args::CompileArgs;

fn main() {
    env_logger::init();
    let args = CompileArgs::parse();
    if let Err(error) = jv_cli::compile(&args) {
        eprintln!("jvc: {error:#}");
        std::process::exit(1);
    }
}
