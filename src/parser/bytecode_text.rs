//! The peer textual IR format:
//!
//! ```text
//! <name> [value] [, extra] [@ offset]   # comment
//! ```
//!
//! Whitespace-insensitive, blank and comment-only lines skipped. Loop
//! `extra` values are never read from source; they're reconstructed by
//! the same bracket-linking stack the brainfuck parser uses, from the
//! sequence of `loop_start`/`loop_end` mnemonics alone.

use thiserror::Error;

use crate::error::{Diagnostic, Severity, Span};
use crate::ir::{Instr, Program, Tag};

use super::link_loop;

pub fn parse(src: &str) -> Result<Program, BytecodeTextError> {
    let mut program = Program::new();
    let mut loop_stack: Vec<usize> = Vec::new();

    for (line_no, raw_line) in src.lines().enumerate() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let instr = parse_line(line, line_no)?;

        match instr.tag {
            Tag::LoopStart => {
                let idx = program.push(Instr::loop_start(0));
                loop_stack.push(idx);
            }
            Tag::LoopEnd => {
                let idx = program.push(Instr::loop_end(0));
                if link_loop(&mut program, &mut loop_stack, idx).is_none() {
                    return Err(BytecodeTextError::UnmatchedClose { line: line_no });
                }
            }
            _ => {
                program.push(instr);
            }
        }
    }

    if !loop_stack.is_empty() {
        return Err(BytecodeTextError::UnmatchedOpen { line: src.lines().count() });
    }

    if program.is_empty() || program.tag(program.len() - 1) != Tag::Halt {
        program.push(Instr::halt());
    }

    Ok(program)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(at) => &line[..at],
        None => line,
    }
}

/// Parses one non-empty, comment-stripped line into an [`Instr`] whose
/// `offset`/`extra` loop fields (if it's a loop instruction) are
/// placeholders, patched later by the bracket-linking stack.
fn parse_line(line: &str, line_no: usize) -> Result<Instr, BytecodeTextError> {
    // Split off an "@ offset" suffix first, since it may itself contain
    // no comma and must not be confused with the value/extra list.
    let (body, offset) = match line.split_once('@') {
        Some((b, o)) => (b.trim(), Some(parse_u32(o.trim(), line_no)?)),
        None => (line, None),
    };

    let mut parts = body.split_whitespace();
    let name = parts.next().ok_or(BytecodeTextError::MissingName { line: line_no })?;
    let tag = Tag::from_mnemonic(name).ok_or_else(|| BytecodeTextError::UnknownOpcode {
        line: line_no,
        name: name.to_string(),
    })?;

    let rest: String = parts.collect::<Vec<_>>().join(" ");
    let (first, extra) = match rest.split_once(',') {
        Some((f, e)) => (f.trim(), Some(parse_u32(e.trim(), line_no)?)),
        None => (rest.trim(), None),
    };

    let value = if first.is_empty() { None } else { Some(parse_u8(first, line_no)?) };

    let offset = offset.unwrap_or(0);
    let extra = extra.unwrap_or(0);

    Ok(match tag {
        Tag::Halt => Instr::halt(),
        Tag::Breakpoint => Instr::breakpoint(),
        Tag::Set => Instr::set(offset, value.unwrap_or(0)),
        Tag::Add => Instr::add(offset, value.unwrap_or(0)),
        Tag::AddMul => Instr::add_mul(offset, value.unwrap_or(0), extra),
        Tag::Move => Instr::mov(extra),
        Tag::Seek => Instr::seek(offset, value.unwrap_or(0), extra),
        Tag::In => Instr::input(offset),
        Tag::Out => Instr::output(offset),
        Tag::OutValue => Instr::output_value(value.unwrap_or(0)),
        // placeholders; distance patched by the caller's bracket stack.
        Tag::LoopStart => Instr::loop_start(0),
        Tag::LoopEnd => Instr::loop_end(0),
    })
}

fn parse_u8(s: &str, line: usize) -> Result<u8, BytecodeTextError> {
    s.parse::<u8>().map_err(|_| BytecodeTextError::MalformedInteger { line, text: s.to_string() })
}

fn parse_u32(s: &str, line: usize) -> Result<u32, BytecodeTextError> {
    s.parse::<u32>().map_err(|_| BytecodeTextError::MalformedInteger { line, text: s.to_string() })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeTextError {
    #[error("line {line}: missing instruction name")]
    MissingName { line: usize },
    #[error("line {line}: unknown opcode \"{name}\"")]
    UnknownOpcode { line: usize, name: String },
    #[error("line {line}: malformed integer \"{text}\"")]
    MalformedInteger { line: usize, text: String },
    #[error("line {line}: unmatched 'loop_end'")]
    UnmatchedClose { line: usize },
    #[error("unmatched 'loop_start', {line} lines of input")]
    UnmatchedOpen { line: usize },
}

impl Diagnostic for BytecodeTextError {
    fn span(&self) -> Option<Span> {
        None
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }
}
