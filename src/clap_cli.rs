//! The cli parser defined via the clap crate and its tooling.

use clap::{command, Args, Parser};

/// The clap cli interface commands.
#[derive(Parser)]
#[command(version, about, long_about = None)]
#[derive(Debug, PartialEq, Clone)]
pub enum CliCommand {
    /// Runs a program, via the JIT where available, the interpreter otherwise
    Run(RunArgs),
    /// Parses a program and writes its bytecode-text form to stdout
    Dump(DumpArgs),
}

/// Arguments for the `run` command.
#[derive(Args)]
#[derive(Debug, PartialEq, Clone)]
pub struct RunArgs {
    /// Path to the program file
    pub file_path: String,

    /// Interpret the file as bytecode-text rather than brainfuck source
    #[arg(long, short, default_value_t = false)]
    pub bytecode: bool,

    /// Skip the optimizer and run the program as parsed
    #[arg(long, short = 'O', default_value_t = false)]
    pub no_optimize: bool,

    /// Force the tree-walking interpreter even where the JIT is available
    #[arg(long, short, default_value_t = false)]
    pub no_jit: bool,

    /// On EOF, feed `in` this fixed byte instead of leaving the cell unchanged
    #[arg(long)]
    pub eof_byte: Option<u8>,

    /// Use the single-mapping tape backend instead of the paged one
    #[arg(long, default_value_t = false)]
    pub mapped_tape: bool,

    /// Dump the tape head position to stderr once the program halts
    #[arg(long, short, default_value_t = false)]
    pub dump_head: bool,
}

/// Arguments for the `dump` command.
#[derive(Args)]
#[derive(Debug, PartialEq, Clone)]
pub struct DumpArgs {
    /// Path to the program file
    pub file_path: String,

    /// Interpret the file as bytecode-text rather than brainfuck source
    #[arg(long, short, default_value_t = false)]
    pub bytecode: bool,

    /// Skip the optimizer and dump the program as parsed
    #[arg(long, short = 'O', default_value_t = false)]
    pub no_optimize: bool,

    /// Spaces of indentation per level of loop nesting
    #[arg(long, default_value_t = 2)]
    pub indent: usize,

    /// Render internal-only fields (loop distances) as trailing comments
    #[arg(long, default_value_t = false)]
    pub show_internal: bool,
}
