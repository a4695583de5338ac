//! The `jlr` runner.

use clap::Parser;

use jv_cli::args::RunArgs;

fn main() {
    env_logger::init();
    let args = RunArgs::parse();
    match jv_cli::run(&args) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("jlr: {error:#}");
            std::process::exit(1);
        }
    }
}
