pub mod clap_cli;
pub mod config;
pub mod error;
pub mod interp;
pub mod ir;
pub mod opt;
pub mod parser;
pub mod tape;

#[cfg(all(target_arch = "x86_64", unix))]
pub mod jit;
