//! Translates raw brainfuck source into a well-formed [`Program`],
//! fusing consecutive `+`/`-` and `<`/`>` runs into single `add`/`move`
//! instructions as it goes (independent of, and always applied ahead of,
//! the optimizer passes in [`crate::opt`]).

use thiserror::Error;

use crate::error::{Diagnostic, Severity, Span};
use crate::ir::{Instr, Program};

use super::link_loop;

/// Controls how the brainfuck parser treats its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrainfuckParseOptions {
    /// When set, the first `!` byte splits the source into program text
    /// (before) and a static input stream (after); only the first `!` is
    /// meaningful. When unset, `!` is ignored like any other comment byte.
    pub split_on_bang: bool,
}

/// A pending, not-yet-emitted operation the parser is accumulating.
enum Pending {
    None,
    Add(u8),
    Move(u32),
}

/// Parses brainfuck source into a [`Program`].
///
/// Returns the program and, when [`BrainfuckParseOptions::split_on_bang`]
/// is set and a `!` is present, the static input stream found after it.
pub fn parse(src: &[u8], opts: BrainfuckParseOptions) -> Result<(Program, Option<Vec<u8>>), ParseError> {
    let (code, static_input) = if opts.split_on_bang {
        match src.iter().position(|&b| b == b'!') {
            Some(at) => (&src[..at], Some(src[at + 1..].to_vec())),
            None => (src, None),
        }
    } else {
        (src, None)
    };

    let mut program = Program::with_capacity(code.len());
    let mut pending = Pending::None;
    let mut loop_stack: Vec<usize> = Vec::new();

    let flush = |program: &mut Program, pending: &mut Pending| match std::mem::replace(pending, Pending::None) {
        Pending::None => {}
        Pending::Add(0) => {}
        Pending::Add(v) => {
            program.push(Instr::add(0, v));
        }
        Pending::Move(0) => {}
        Pending::Move(d) => {
            program.push(Instr::mov(d));
        }
    };

    for (idx, &byte) in code.iter().enumerate() {
        match byte {
            b'+' => {
                if let Pending::Add(v) = pending {
                    pending = Pending::Add(v.wrapping_add(1));
                } else {
                    flush(&mut program, &mut pending);
                    pending = Pending::Add(1);
                }
            }
            b'-' => {
                if let Pending::Add(v) = pending {
                    pending = Pending::Add(v.wrapping_sub(1));
                } else {
                    flush(&mut program, &mut pending);
                    pending = Pending::Add(255);
                }
            }
            b'>' => {
                if let Pending::Move(d) = pending {
                    pending = Pending::Move(d.wrapping_add(1));
                } else {
                    flush(&mut program, &mut pending);
                    pending = Pending::Move(1);
                }
            }
            b'<' => {
                if let Pending::Move(d) = pending {
                    pending = Pending::Move(d.wrapping_sub(1));
                } else {
                    flush(&mut program, &mut pending);
                    pending = Pending::Move(u32::MAX);
                }
            }
            b',' => {
                flush(&mut program, &mut pending);
                program.push(Instr::input(0));
            }
            b'.' => {
                flush(&mut program, &mut pending);
                program.push(Instr::output(0));
            }
            b'#' => {
                flush(&mut program, &mut pending);
                program.push(Instr::breakpoint());
            }
            b'[' => {
                flush(&mut program, &mut pending);
                let idx_pushed = program.push(Instr::loop_start(0));
                loop_stack.push(idx_pushed);
            }
            b']' => {
                flush(&mut program, &mut pending);
                let close_idx = program.push(Instr::loop_end(0));
                if link_loop(&mut program, &mut loop_stack, close_idx).is_none() {
                    return Err(ParseError::UnmatchedClose { at: idx });
                }
            }
            _ => {}
        }
    }

    flush(&mut program, &mut pending);

    if let Some(&open_idx) = loop_stack.first() {
        // recover a source-relative offset for diagnostics: scan back for
        // the byte that produced this loop_start.
        let at = byte_offset_of_nth_bracket(code, open_idx, &program);
        return Err(ParseError::UnmatchedOpen { at });
    }

    program.push(Instr::halt());

    Ok((program, static_input))
}

/// Best-effort recovery of a source byte offset for an unmatched
/// `loop_start` at IR index `ir_idx`, by counting brackets already seen.
fn byte_offset_of_nth_bracket(code: &[u8], ir_idx: usize, program: &Program) -> usize {
    let target_bracket_ordinal = program.tags()[..=ir_idx]
        .iter()
        .filter(|t| **t == crate::ir::Tag::LoopStart)
        .count();

    let mut seen = 0;
    for (i, &b) in code.iter().enumerate() {
        if b == b'[' {
            seen += 1;
            if seen == target_bracket_ordinal {
                return i;
            }
        }
    }
    code.len()
}

/// An error in brainfuck source: unbalanced brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unmatched ']'")]
    UnmatchedClose { at: usize },
    #[error("unmatched '['")]
    UnmatchedOpen { at: usize },
}

impl Diagnostic for ParseError {
    fn span(&self) -> Option<Span> {
        match *self {
            ParseError::UnmatchedClose { at } | ParseError::UnmatchedOpen { at } => Some(Span::at(at)),
        }
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Tag;

    fn parse_ok(src: &str) -> Program {
        parse(src.as_bytes(), BrainfuckParseOptions::default()).unwrap().0
    }

    #[test]
    fn fuses_runs_of_add_and_move() {
        let p = parse_ok("+++>>>--<");
        // add 3 @0, move 3, add -2 (254), move -1 (wrap), halt
        assert_eq!(p.get(0), Instr::add(0, 3));
        assert_eq!(p.get(1), Instr::mov(3));
        assert_eq!(p.get(2), Instr::add(0, 254));
        assert_eq!(p.get(3), Instr::mov(u32::MAX));
        assert_eq!(p.tag(4), Tag::Halt);
        assert_eq!(p.len(), 5);
    }

    #[test]
    fn drops_net_zero_add() {
        let p = parse_ok("+-");
        assert_eq!(p.len(), 1);
        assert_eq!(p.tag(0), Tag::Halt);
    }

    #[test]
    fn links_nested_loops() {
        let p = parse_ok("+[-[+]]");
        assert_eq!(p.tag(1), Tag::LoopStart);
        let outer_extra = p.get(1).extra;
        assert_eq!(p.tag(1 + outer_extra as usize), Tag::LoopEnd);
    }

    #[test]
    fn reports_unmatched_close() {
        let err = parse("]".as_bytes(), BrainfuckParseOptions::default()).unwrap_err();
        assert_eq!(err, ParseError::UnmatchedClose { at: 0 });
    }

    #[test]
    fn reports_unmatched_open() {
        let err = parse("[+".as_bytes(), BrainfuckParseOptions::default()).unwrap_err();
        assert!(matches!(err, ParseError::UnmatchedOpen { .. }));
    }

    #[test]
    fn splits_on_bang_when_enabled() {
        let (p, input) = parse(b",.!ZZ", BrainfuckParseOptions { split_on_bang: true }).unwrap();
        assert_eq!(input, Some(b"ZZ".to_vec()));
        assert_eq!(p.tag(0), Tag::In);
    }

    #[test]
    fn ignores_bang_when_disabled() {
        let (_, input) = parse(b",.!ZZ", BrainfuckParseOptions::default()).unwrap();
        assert_eq!(input, None);
    }

    #[test]
    fn breakpoint_opcode() {
        let p = parse_ok("#");
        assert_eq!(p.tag(0), Tag::Breakpoint);
    }
}
