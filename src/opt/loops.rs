//! Recognizes three loop idioms that the brainfuck source level
//! expresses as `[...]` but that have a closed-form translation: clearing
//! loops and multiplication loops collapse to straight-line arithmetic,
//! seek loops collapse to a single scan instruction.

use std::collections::HashMap;

use crate::ir::{Instr, Program, Tag};

/// Walks `input`, replacing recognized loop bodies with their closed form
/// and leaving everything else (including unrecognized loops) untouched.
pub fn recognize_loops(input: &Program) -> Program {
    let mut out = Program::with_capacity(input.len());
    let mut loop_stack: Vec<usize> = Vec::new();

    let mut i = 0;
    while i < input.len() {
        let instr = input.get(i);

        if instr.tag == Tag::LoopStart {
            let body_start = i + 1;
            let body_end = i + instr.extra as usize; // index of the matching loop_end
            if let Some(replacement) = recognize_body(input, body_start, body_end) {
                for r in replacement {
                    out.push(r);
                }
                i = body_end + 1;
                continue;
            }

            let idx = out.push(Instr::loop_start(0));
            loop_stack.push(idx);
            i += 1;
            continue;
        }

        if instr.tag == Tag::LoopEnd {
            let close_idx = out.push(Instr::loop_end(0));
            if let Some(open_idx) = loop_stack.pop() {
                let distance = (close_idx - open_idx) as u32;
                out.set_extra(open_idx, distance);
                out.set_extra(close_idx, distance.wrapping_neg());
            }
            i += 1;
            continue;
        }

        out.push(instr);
        i += 1;
    }

    out
}

/// Attempts to recognize the body `input[body_start..body_end]` (exclusive
/// of both `loop_start`/`loop_end` arms) as a multiplication or seek loop.
/// Returns the closed-form replacement instructions, or `None` if the body
/// should be emitted as an ordinary loop.
fn recognize_body(input: &Program, body_start: usize, body_end: usize) -> Option<Vec<Instr>> {
    let body: Vec<Instr> = (body_start..body_end).map(|idx| input.get(idx)).collect();

    if body.iter().all(|i| i.tag == Tag::Add) {
        return recognize_multiplication(&body);
    }
    if body.iter().all(|i| i.tag == Tag::Move) {
        return Some(recognize_seek(&body));
    }
    None
}

/// Body contains only `add`s: sums the net add per offset and, if the head
/// offset's net add makes the loop provably terminate, emits the
/// closed-form replacement.
fn recognize_multiplication(body: &[Instr]) -> Option<Vec<Instr>> {
    let mut sums: HashMap<u32, u8> = HashMap::new();
    let mut order: Vec<u32> = Vec::new();
    for instr in body {
        let entry = sums.entry(instr.offset).or_insert_with(|| {
            order.push(instr.offset);
            0
        });
        *entry = entry.wrapping_add(instr.value);
    }

    let b = *sums.get(&0).unwrap_or(&0);
    let others: Vec<u32> = order.into_iter().filter(|&o| o != 0).collect();

    if b == 1 || b == 255 {
        let neg_b = b.wrapping_neg();
        let mut out = Vec::with_capacity(others.len() + 1);
        for o in others {
            let a = sums[&o];
            out.push(Instr::add_mul(o, neg_b.wrapping_mul(a), o.wrapping_neg()));
        }
        out.push(Instr::set(0, 0));
        return Some(out);
    }

    if b % 2 == 1 && others.is_empty() {
        return Some(vec![Instr::set(0, 0)]);
    }

    None
}

/// Body contains only `move`s: sums the net step and emits a single `seek`
/// that scans for a 0 cell at that stride.
fn recognize_seek(body: &[Instr]) -> Vec<Instr> {
    let mut step: u32 = 0;
    for instr in body {
        step = step.wrapping_add(instr.extra);
    }
    vec![Instr::seek(0, 0, step)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(p: &mut Program, open: usize, close: usize) {
        let dist = (close - open) as u32;
        p.set_extra(open, dist);
        p.set_extra(close, dist.wrapping_neg());
    }

    #[test]
    fn recognizes_clearing_loop() {
        let mut p = Program::new();
        let ls = p.push(Instr::loop_start(0));
        p.push(Instr::add(0, 255));
        let le = p.push(Instr::loop_end(0));
        link(&mut p, ls, le);
        p.push(Instr::halt());

        let out = recognize_loops(&p);
        assert_eq!(out.len(), 2);
        assert_eq!(out.get(0), Instr::set(0, 0));
        assert_eq!(out.tag(1), Tag::Halt);
    }

    #[test]
    fn recognizes_multiplication_loop() {
        // [->+++<] : head -1, offset 1 gets +3 per iteration.
        let mut p = Program::new();
        let ls = p.push(Instr::loop_start(0));
        p.push(Instr::add(0, 255));
        p.push(Instr::add(1, 3));
        let le = p.push(Instr::loop_end(0));
        link(&mut p, ls, le);
        p.push(Instr::halt());

        let out = recognize_loops(&p);
        assert_eq!(out.len(), 3);
        assert_eq!(out.get(0), Instr::add_mul(1, 3, 1u32.wrapping_neg()));
        assert_eq!(out.get(1), Instr::set(0, 0));
    }

    #[test]
    fn recognizes_seek_loop() {
        let mut p = Program::new();
        let ls = p.push(Instr::loop_start(0));
        p.push(Instr::mov(3));
        let le = p.push(Instr::loop_end(0));
        link(&mut p, ls, le);
        p.push(Instr::halt());

        let out = recognize_loops(&p);
        assert_eq!(out.len(), 2);
        assert_eq!(out.get(0), Instr::seek(0, 0, 3));
    }

    #[test]
    fn odd_base_step_with_no_other_offsets_clears() {
        // a loop that decrements by 3 each iteration always reaches 0
        // mod 256 since gcd(3, 256) == 1.
        let mut p = Program::new();
        let ls = p.push(Instr::loop_start(0));
        p.push(Instr::add(0, 253)); // -3
        let le = p.push(Instr::loop_end(0));
        link(&mut p, ls, le);
        p.push(Instr::halt());

        let out = recognize_loops(&p);
        assert_eq!(out.get(0), Instr::set(0, 0));
    }

    #[test]
    fn unrecognized_loop_passes_through() {
        // even, non-unit base step with another offset touched: not
        // deterministically terminating under this analysis.
        let mut p = Program::new();
        let ls = p.push(Instr::loop_start(0));
        p.push(Instr::add(0, 254)); // -2
        p.push(Instr::add(1, 1));
        let le = p.push(Instr::loop_end(0));
        link(&mut p, ls, le);
        p.push(Instr::halt());

        let out = recognize_loops(&p);
        assert_eq!(out.tag(0), Tag::LoopStart);
        assert_eq!(out.tag(out.len() - 2), Tag::LoopEnd);
    }

    #[test]
    fn nested_loops_each_considered_independently() {
        let mut p = Program::new();
        let outer_ls = p.push(Instr::loop_start(0));
        p.push(Instr::input(1)); // makes the outer body mixed: not recognized
        let inner_ls = p.push(Instr::loop_start(0));
        p.push(Instr::add(0, 255));
        let inner_le = p.push(Instr::loop_end(0));
        link(&mut p, inner_ls, inner_le);
        let outer_le = p.push(Instr::loop_end(0));
        link(&mut p, outer_ls, outer_le);
        p.push(Instr::halt());

        let out = recognize_loops(&p);
        // outer loop survives (mixed body); inner clearing loop collapses.
        assert_eq!(out.tag(0), Tag::LoopStart);
        assert_eq!(out.get(2), Instr::set(0, 0));
    }
}
