use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

use bfcore::clap_cli::{CliCommand, DumpArgs, RunArgs};
use bfcore::config::{InterpreterConfig, JitConfig, OptConfig, TapeBackendChoice};
use bfcore::error::Diagnostic;
use bfcore::interp::{EofPolicy, Interpreter};
use bfcore::ir::{DumpOptions, Program};
use bfcore::opt;
use bfcore::parser::{self, BrainfuckParseOptions};
use bfcore::tape::{Paged, Tape};

fn main() -> ExitCode {
    env_logger::init();

    let result = match CliCommand::parse() {
        CliCommand::Run(args) => run(args),
        CliCommand::Dump(args) => dump(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{} {msg}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn load_program(file_path: &str, bytecode: bool, no_optimize: bool) -> Result<Program, String> {
    let raw = fs::read(file_path).map_err(|e| format!("reading {file_path}: {e}"))?;

    let program = if bytecode {
        let text = String::from_utf8(raw).map_err(|e| format!("{file_path} is not valid utf-8: {e}"))?;
        parser::parse_bytecode_text(&text).map_err(|e| e.describe(Some(&text)))?
    } else {
        let text = String::from_utf8_lossy(&raw).into_owned();
        let (program, _) = parser::parse_brainfuck(&raw, BrainfuckParseOptions::default())
            .map_err(|e| e.describe(Some(&text)))?;
        program
    };

    let opt_cfg = OptConfig::new();
    let level = if no_optimize { opt::OptLevel::None } else { opt_cfg.level };
    Ok(opt::optimize(&program, level, opt_cfg.max_iterations))
}

fn run(args: RunArgs) -> Result<(), String> {
    let program = load_program(&args.file_path, args.bytecode, args.no_optimize)?;

    let interp_cfg = InterpreterConfig::new()
        .with_eof_policy(args.eof_byte.map_or(EofPolicy::LeaveUnchanged, EofPolicy::Substitute))
        .with_tape_backend(if args.mapped_tape { TapeBackendChoice::Mapped } else { TapeBackendChoice::Paged });
    let jit_cfg = JitConfig::new().with_enabled(!args.no_jit);

    let head = if jit_cfg.enabled && try_jit(&program, interp_cfg)? {
        None
    } else {
        Some(run_interpreted(&program, interp_cfg)?)
    };

    if args.dump_head {
        if let Some(head) = head {
            eprintln!("tape head: {head}");
        } else {
            eprintln!("tape head: (not observable through the JIT)");
        }
    }
    Ok(())
}

/// Attempts the JIT path. Returns `Ok(true)` if it ran the program,
/// `Ok(false)` if the JIT isn't available on this host/config and the
/// caller should fall back to the interpreter.
///
/// The JIT's `in` callback can only express "here is a byte" or "fatal
/// error", so it has no way to express
/// [`EofPolicy::LeaveUnchanged`]; that policy always falls back to the
/// interpreter rather than silently reinterpreting it as a substitution.
#[cfg(all(target_arch = "x86_64", unix))]
fn try_jit(program: &Program, cfg: InterpreterConfig) -> Result<bool, String> {
    use bfcore::jit::JitProgram;
    use bfcore::tape::Mapped;

    if cfg.tape_backend != TapeBackendChoice::Mapped || !Mapped::supported() {
        return Ok(false);
    }
    let EofPolicy::Substitute(eof_byte) = cfg.eof_policy else {
        return Ok(false);
    };

    let jit = match JitProgram::compile(program) {
        Ok(jit) => jit,
        Err(e) => {
            log::debug!("jit compile failed, falling back to interpreter: {e}");
            return Ok(false);
        }
    };

    let mut tape = Mapped::new().map_err(|e| e.to_string())?;
    let ctx = JitIoCtx { eof_byte };
    let ctx_ptr = &ctx as *const JitIoCtx as *mut std::ffi::c_void;

    // SAFETY: `tape` reserves exactly 2^32 bytes, matching the JIT's
    // addressing assumption; the trampolines below satisfy the declared
    // `extern "sysv64"` signatures.
    let rc = unsafe { jit.call(tape.as_mut_ptr(), jit_read, ctx_ptr, jit_write, ctx_ptr) };
    if rc != 0 {
        return Err(format!("jit execution failed with code {rc}"));
    }
    Ok(true)
}

#[cfg(not(all(target_arch = "x86_64", unix)))]
fn try_jit(_program: &Program, _cfg: InterpreterConfig) -> Result<bool, String> {
    Ok(false)
}

#[cfg(all(target_arch = "x86_64", unix))]
struct JitIoCtx {
    eof_byte: u8,
}

#[cfg(all(target_arch = "x86_64", unix))]
extern "sysv64" fn jit_read(ctx: *mut std::ffi::c_void) -> i32 {
    let mut buf = [0u8; 1];
    // SAFETY: stdin is a valid fd for the process lifetime.
    let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr() as *mut std::ffi::c_void, 1) };
    if n == 1 {
        return buf[0] as i32;
    }
    // SAFETY: `ctx` is the `JitIoCtx` this run's `try_jit` allocated on its
    // own stack frame, which outlives the call.
    let ctx = unsafe { &*(ctx as *const JitIoCtx) };
    ctx.eof_byte as i32
}

#[cfg(all(target_arch = "x86_64", unix))]
extern "sysv64" fn jit_write(_ctx: *mut std::ffi::c_void, byte: u8) -> i32 {
    let buf = [byte];
    // SAFETY: stdout is a valid fd for the process lifetime.
    let n = unsafe { libc::write(libc::STDOUT_FILENO, buf.as_ptr() as *const std::ffi::c_void, 1) };
    if n < 0 {
        -1
    } else {
        0
    }
}

fn run_interpreted(program: &Program, cfg: InterpreterConfig) -> Result<u32, String> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out_lock = stdout.lock();

    let head = match cfg.tape_backend {
        TapeBackendChoice::Paged => {
            let tape = Tape::new(Paged::new());
            let mut interp = Interpreter::new(program, stdin.lock(), &mut out_lock, tape, cfg.eof_policy);
            interp.run().map_err(|e| e.to_string())?;
            interp.tape().head()
        }
        TapeBackendChoice::Mapped => {
            #[cfg(unix)]
            {
                use bfcore::tape::Mapped;
                let tape = Tape::new(Mapped::new().map_err(|e| e.to_string())?);
                let mut interp = Interpreter::new(program, stdin.lock(), &mut out_lock, tape, cfg.eof_policy);
                interp.run().map_err(|e| e.to_string())?;
                interp.tape().head()
            }
            #[cfg(not(unix))]
            {
                return Err("the mapped tape backend is not supported on this host".to_string());
            }
        }
    };
    out_lock.flush().map_err(|e| e.to_string())?;
    Ok(head)
}

fn dump(args: DumpArgs) -> Result<(), String> {
    let program = load_program(&args.file_path, args.bytecode, args.no_optimize)?;
    let opts = DumpOptions { indent_per_nest: args.indent, show_internal: args.show_internal };
    print!("{}", program.dump(opts));
    Ok(())
}
