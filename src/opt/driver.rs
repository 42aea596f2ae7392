//! Drives `condense`/`recognize_loops` to a fixed point (or gives up
//! after a configurable number of iterations).

use log::{debug, trace};

use crate::ir::Program;
use crate::opt::{condense, recognize_loops};

/// How aggressively [`optimize`] rewrites a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// No passes; the input program is returned unchanged.
    None,
    /// `condense` + `recognize_loops`, iterated to a fixed point.
    #[default]
    Normal,
}

/// Default cap on `condense`/`recognize_loops` cycles, guarding against a
/// pathological program that never converges.
pub const DEFAULT_MAX_ITERATIONS: u32 = 64;

/// Runs the optimizer to a fixed point: applies `condense` then
/// `recognize_loops` repeatedly, comparing content hashes before and after
/// each full cycle, stopping when a cycle changes nothing or
/// `max_iterations` is reached.
pub fn optimize(input: &Program, level: OptLevel, max_iterations: u32) -> Program {
    if level == OptLevel::None {
        return input.clone();
    }

    let mut current = input.clone();
    for iteration in 0..max_iterations {
        let before = current.content_hash();
        let next = recognize_loops(&condense(&current));
        let after = next.content_hash();
        trace!("optimizer: iteration {iteration}, {} -> {} instrs, hash {before:#x} -> {after:#x}", current.len(), next.len());
        if after == before {
            debug!("optimizer: converged after {} iteration(s)", iteration + 1);
            return next;
        }
        current = next;
    }
    debug!("optimizer: gave up after {max_iterations} iteration(s) without converging");
    current
}
