//! An x86-64 JIT backend, built on the same IR the interpreter
//! walks. Only available on `x86_64` + unix targets; elsewhere
//! [`JitProgram::compile`] isn't compiled in at all, and callers fall back
//! to [`crate::interp::Interpreter`].
//!
//! The page lifecycle mirrors the tape's own mmap/mprotect/munmap usage
//! (see [`crate::tape::Mapped`]); the byte-level x86-64 encoder itself is
//! built straight from the SysV calling convention and the instruction
//! encodings it needs.

mod codegen;

use std::ffi::c_void;
use std::os::raw::c_int;

use log::debug;
use thiserror::Error;

use crate::error::Diagnostic;
use crate::ir::Program;

/// Signature the compiled function is called through. `memory` is the
/// tape's base pointer; `input`/`output` are trampolines into the Rust
/// I/O streams, each returning a negative value on failure. SysV ABI:
/// integer args in `rdi, rsi, rdx, rcx, r8`, return in `rax`.
pub type InputFn = extern "sysv64" fn(*mut c_void) -> i32;
pub type OutputFn = extern "sysv64" fn(*mut c_void, u8) -> i32;
type CompiledFn = extern "sysv64" fn(*mut u8, InputFn, *mut c_void, OutputFn, *mut c_void) -> i32;

#[derive(Debug, Error)]
pub enum JitError {
    #[error("jit codegen does not support this program: {0}")]
    Unsupported(&'static str),
    #[error("mmap failed: {0}")]
    Mmap(#[source] std::io::Error),
    #[error("mprotect failed: {0}")]
    Mprotect(#[source] std::io::Error),
}

impl Diagnostic for JitError {}

/// An executable mapping holding one compiled program. Frees the mapping
/// on drop.
pub struct JitProgram {
    ptr: *mut c_void,
    len: usize,
}

// SAFETY: the mapping is read/executed but never mutated after `compile`
// returns, so sharing a `&JitProgram` (and thus sending one, once no
// thread still holds an outstanding call into it) across threads is sound.
unsafe impl Send for JitProgram {}
unsafe impl Sync for JitProgram {}

impl JitProgram {
    /// Translates `program` to machine code and maps it executable.
    pub fn compile(program: &Program) -> Result<JitProgram, JitError> {
        let code = codegen::translate(program)?;
        let len = page_align(code.len().max(1));

        // RW during the write, then flipped to RX: never both writable and
        // executable at once.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(JitError::Mmap(std::io::Error::last_os_error()));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());
        }

        let rc = unsafe { libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_EXEC) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::munmap(ptr, len);
            }
            return Err(JitError::Mprotect(err));
        }

        debug!("jit: compiled {} ir instructions into {} bytes ({} mapped)", program.len(), code.len(), len);
        Ok(JitProgram { ptr, len })
    }

    /// Invokes the compiled program. `memory` must stay valid and exclusive
    /// for the whole call: the generated code indexes `[rdi + cursor]`
    /// directly with no bounds checking beyond what the tape backend that
    /// sized `memory` already guarantees.
    ///
    /// # Safety
    /// `memory` must be at least as large as the tape backend the program
    /// was compiled to run against, and `input`/`output`/their contexts
    /// must satisfy the `extern "sysv64"` calling convention declared by
    /// [`InputFn`]/[`OutputFn`].
    pub unsafe fn call(
        &self,
        memory: *mut u8,
        input: InputFn,
        in_ctx: *mut c_void,
        output: OutputFn,
        out_ctx: *mut c_void,
    ) -> c_int {
        let f: CompiledFn = std::mem::transmute(self.ptr);
        f(memory, input, in_ctx, output, out_ctx)
    }
}

impl Drop for JitProgram {
    fn drop(&mut self) {
        // The page lifecycle flips executable pages back to RW before
        // freeing them, even though nothing writes to them again.
        unsafe {
            libc::mprotect(self.ptr, self.len, libc::PROT_READ | libc::PROT_WRITE);
            libc::munmap(self.ptr, self.len);
        }
    }
}

fn page_align(len: usize) -> usize {
    let page = page_size();
    (len + page - 1) / page * page
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Instr;

    #[test]
    fn compiles_and_maps_a_trivial_program() {
        let mut p = Program::new();
        p.push(Instr::output_value(65));
        p.push(Instr::halt());

        let jit = JitProgram::compile(&p).unwrap();
        assert!(jit.len >= page_size());
    }

    #[test]
    fn page_align_rounds_up_to_the_next_page() {
        let page = page_size();
        assert_eq!(page_align(1), page);
        assert_eq!(page_align(page), page);
        assert_eq!(page_align(page + 1), page * 2);
    }
}
