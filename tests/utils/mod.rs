#![allow(dead_code)]

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const BFCORE: &str = env!("CARGO_BIN_EXE_bfcore");
const TMP_DIR: &str = env!("CARGO_TARGET_TMPDIR");

#[derive(Debug)]
pub struct Output {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Writes `source` to a scratch file under the cargo target tmp dir and
/// returns its path.
pub fn write_program(name: &str, source: &[u8]) -> PathBuf {
    let path = Path::new(TMP_DIR).join(name);
    std::fs::write(&path, source).unwrap();
    path
}

/// Runs the `bfcore` binary with `args`, feeding `stdin` and capturing
/// stdout/stderr/exit code.
pub fn run(args: &[&str], stdin: &[u8]) -> Output {
    let mut child = Command::new(BFCORE)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    child.stdin.take().unwrap().write_all(stdin).unwrap();
    let output = child.wait_with_output().unwrap();

    Output {
        exit_code: output.status.code().unwrap(),
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}
