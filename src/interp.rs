//! A straight dispatch-table interpreter over the bytecode IR,
//! generic over the I/O streams and [`TapeBackend`] so the same machinery
//! runs against a [`Paged`](crate::tape::Paged) tape in tests and a
//! [`Mapped`](crate::tape::Mapped) tape in production.

use std::io::{self, Read, Write};

use log::debug;
use thiserror::Error;

use crate::error::Diagnostic;
use crate::ir::{Program, Tag};
use crate::tape::{Tape, TapeBackend};

/// How `in` behaves once the input stream is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofPolicy {
    /// Leave the target cell at whatever it already held.
    LeaveUnchanged,
    /// Overwrite the target cell with a fixed byte.
    Substitute(u8),
}

/// What [`Interpreter::step`] did on its last call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Halted,
    Breakpoint,
    Running,
}

/// Interpreter state: program counter, tape, I/O streams and EOF policy.
/// Borrows the [`Program`] rather than owning it, since the same compiled
/// program is commonly run more than once (e.g. the JIT's reference test).
pub struct Interpreter<'p, R, W, B> {
    program: &'p Program,
    pc: u32,
    tape: Tape<B>,
    input: R,
    output: W,
    eof_policy: EofPolicy,
}

impl<'p, R: Read, W: Write, B: TapeBackend> Interpreter<'p, R, W, B> {
    pub fn new(program: &'p Program, input: R, output: W, tape: Tape<B>, eof_policy: EofPolicy) -> Self {
        Interpreter { program, pc: 0, tape, input, output, eof_policy }
    }

    pub fn tape(&self) -> &Tape<B> {
        &self.tape
    }

    /// Executes instructions until `halt`, a `breakpoint`, or an I/O error.
    /// Resumes transparently past a `breakpoint`; callers that want to
    /// stop there should call [`Interpreter::step`] directly instead.
    pub fn run(&mut self) -> Result<(), InterpError> {
        loop {
            match self.step()? {
                Status::Halted => return Ok(()),
                Status::Breakpoint => debug!("breakpoint hit at pc={}", self.pc.wrapping_sub(1)),
                Status::Running => {}
            }
        }
    }

    /// Executes exactly one instruction and reports what happened.
    pub fn step(&mut self) -> Result<Status, InterpError> {
        let instr = self.program.get(self.pc as usize);

        match instr.tag {
            Tag::Halt => return Ok(Status::Halted),
            Tag::Breakpoint => {
                self.pc = self.pc.wrapping_add(1);
                return Ok(Status::Breakpoint);
            }
            Tag::Set => self.tape.set(instr.offset, instr.value),
            Tag::Add => self.tape.add(instr.offset, instr.value),
            Tag::AddMul => {
                let src = instr.offset.wrapping_add(instr.extra);
                let k = self.tape.get(src);
                self.tape.add(instr.offset, instr.value.wrapping_mul(k));
            }
            Tag::Move => self.tape.move_head(instr.extra),
            Tag::Seek => self.tape.seek(instr.offset, instr.value, instr.extra),
            Tag::In => self.do_input(instr.offset)?,
            Tag::Out => {
                let v = self.tape.get(instr.offset);
                self.write_byte(v)?;
            }
            Tag::OutValue => self.write_byte(instr.value)?,
            Tag::LoopStart => {
                if self.tape.get(0) == 0 {
                    self.pc = self.pc.wrapping_add(instr.extra).wrapping_add(1);
                    return Ok(Status::Running);
                }
            }
            Tag::LoopEnd => {
                if self.tape.get(0) != 0 {
                    self.pc = self.pc.wrapping_add(instr.extra).wrapping_add(1);
                    return Ok(Status::Running);
                }
            }
        }

        self.pc = self.pc.wrapping_add(1);
        Ok(Status::Running)
    }

    fn do_input(&mut self, offset: u32) -> Result<(), InterpError> {
        let mut buf = [0u8; 1];
        let n = self.input.read(&mut buf).map_err(InterpError::Input)?;
        if n == 0 {
            match self.eof_policy {
                EofPolicy::LeaveUnchanged => {}
                EofPolicy::Substitute(b) => self.tape.set(offset, b),
            }
        } else {
            self.tape.set(offset, buf[0]);
        }
        Ok(())
    }

    fn write_byte(&mut self, b: u8) -> Result<(), InterpError> {
        self.output.write_all(&[b]).map_err(InterpError::Output)
    }
}

#[derive(Debug, Error)]
pub enum InterpError {
    #[error("input error: {0}")]
    Input(#[source] io::Error),
    #[error("output error: {0}")]
    Output(#[source] io::Error),
}

impl Diagnostic for InterpError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Instr;
    use crate::tape::Paged;
    use std::io::Cursor;

    fn run_program(p: &Program, input: &[u8]) -> Vec<u8> {
        let mut output = Vec::new();
        let tape = Tape::new(Paged::new());
        let mut interp =
            Interpreter::new(p, Cursor::new(input.to_vec()), &mut output, tape, EofPolicy::Substitute(0));
        interp.run().unwrap();
        output
    }

    #[test]
    fn echoes_one_byte() {
        let mut p = Program::new();
        p.push(Instr::input(0));
        p.push(Instr::output(0));
        p.push(Instr::halt());

        assert_eq!(run_program(&p, b"A"), b"A");
    }

    #[test]
    fn out_value_needs_no_tape_read() {
        let mut p = Program::new();
        p.push(Instr::output_value(65));
        p.push(Instr::halt());

        assert_eq!(run_program(&p, b""), b"A");
    }

    #[test]
    fn loop_runs_until_head_is_zero() {
        // set 3 @ 0; [- out_value 'X' ]; halt -- prints X three times.
        let mut p = Program::new();
        p.push(Instr::set(0, 3));
        let ls = p.push(Instr::loop_start(0));
        p.push(Instr::add(0, 255));
        p.push(Instr::output_value(b'X'));
        let le = p.push(Instr::loop_end(0));
        let dist = (le - ls) as u32;
        p.set_extra(ls, dist);
        p.set_extra(le, dist.wrapping_neg());
        p.push(Instr::halt());

        assert_eq!(run_program(&p, b""), b"XXX");
    }

    #[test]
    fn add_mul_multiplies_into_destination() {
        let mut p = Program::new();
        p.push(Instr::set(1, 6));
        p.push(Instr::add_mul(0, 7, 1));
        p.push(Instr::output(0));
        p.push(Instr::halt());

        assert_eq!(run_program(&p, b""), vec![42]);
    }

    #[test]
    fn seek_scans_for_target_byte() {
        let mut p = Program::new();
        p.push(Instr::set(3, 9));
        p.push(Instr::seek(0, 9, 1));
        p.push(Instr::output(0));
        p.push(Instr::halt());

        // head lands on offset 3, where `out` reads relative to the new head (0).
        assert_eq!(run_program(&p, b""), vec![9]);
    }

    #[test]
    fn eof_substitute_policy_writes_fixed_byte() {
        let mut p = Program::new();
        p.push(Instr::input(0));
        p.push(Instr::output(0));
        p.push(Instr::halt());

        assert_eq!(run_program(&p, b""), vec![0]);
    }

    #[test]
    fn eof_leave_unchanged_keeps_prior_value() {
        let mut p = Program::new();
        p.push(Instr::set(0, 77));
        p.push(Instr::input(0));
        p.push(Instr::output(0));
        p.push(Instr::halt());

        let mut output = Vec::new();
        let tape = Tape::new(Paged::new());
        let mut interp =
            Interpreter::new(&p, Cursor::new(Vec::new()), &mut output, tape, EofPolicy::LeaveUnchanged);
        interp.run().unwrap();
        assert_eq!(output, vec![77]);
    }

    #[test]
    fn breakpoint_pauses_and_step_resumes() {
        let mut p = Program::new();
        p.push(Instr::breakpoint());
        p.push(Instr::output_value(1));
        p.push(Instr::halt());

        let mut output = Vec::new();
        let tape = Tape::new(Paged::new());
        let mut interp = Interpreter::new(&p, Cursor::new(Vec::new()), &mut output, tape, EofPolicy::LeaveUnchanged);

        assert_eq!(interp.step().unwrap(), Status::Breakpoint);
        assert_eq!(interp.step().unwrap(), Status::Running);
        assert_eq!(interp.step().unwrap(), Status::Halted);
        assert_eq!(output, vec![1]);
    }
}
