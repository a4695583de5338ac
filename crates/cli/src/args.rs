//! Command-line arguments for the Jv tools.

use clap::Parser;
use std::path::PathBuf;

/// Arguments of the `jvc` compiler driver.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "jvc",
    version = env!("CARGO_PKG_VERSION"),
    about = "Jv compiler driver: assembles and optimizes module tapes"
)]
pub struct CompileArgs {
    /// Module files to process (.ja assembly or .jb bytecode)
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Run the peephole optimizer over each tape
    #[arg(long = "optimize")]
    pub optimize: bool,

    /// Emit textual assembly per input
    #[arg(long = "out-asm")]
    pub out_asm: bool,

    /// Emit binary bytecode per input
    #[arg(long = "out-bin")]
    pub out_bin: bool,

    /// Directory for emitted .ja files
    #[arg(long = "asm-dir", value_name = "DIR", default_value = ".")]
    pub asm_dir: PathBuf,

    /// Directory for emitted .jb files
    #[arg(long = "bin-dir", value_name = "DIR", default_value = ".")]
    pub bin_dir: PathBuf,
}

/// Arguments of the `jlr` runner.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "jlr",
    version = env!("CARGO_PKG_VERSION"),
    about = "Jv runner: loads module files and executes the first as main"
)]
pub struct RunArgs {
    /// Module files to register; the first is the main module
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// key=value pairs exposed as members of the global `args` object
    #[arg(long = "args", value_name = "KEY=VALUE", num_args = 0..)]
    pub args: Vec<String>,
}

impl RunArgs {
    /// Splits the `--args` pairs into (key, value) tuples.
    pub fn arg_pairs(&self) -> Vec<(String, String)> {
        self.args
            .iter()
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_owned(), value.to_owned()),
                None => (pair.clone(), String::new()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_args_parse() {
        let args =
            CompileArgs::parse_from(["jvc", "main.ja", "--optimize", "--out-bin", "--bin-dir", "out"]);
        assert_eq!(args.files.len(), 1);
        assert!(args.optimize);
        assert!(args.out_bin);
        assert!(!args.out_asm);
        assert_eq!(args.bin_dir, PathBuf::from("out"));
    }

    #[test]
    fn run_args_split_pairs() {
        let args = RunArgs::parse_from(["jlr", "main.ja", "--args", "mode=fast", "flag"]);
        assert_eq!(
            args.arg_pairs(),
            vec![
                ("mode".to_owned(), "fast".to_owned()),
                ("flag".to_owned(), String::new())
            ]
        );
    }
}
