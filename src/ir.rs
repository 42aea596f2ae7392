//! The bytecode IR: instruction schema, construction, content hashing and
//! the bytecode-text writer (the dump format described alongside the
//! bytecode-text parser in [`crate::parser::bytecode_text`]).
//!
//! Instructions are stored column-major (parallel arrays of tag/value/
//! offset/extra) rather than as one array of tagged records, so passes
//! that only touch one or two fields (the loop recognizer scanning tags,
//! the JIT reading offsets) don't drag the rest of the record through
//! cache. [`Instr`] is the per-index materialized view callers actually
//! work with; [`Program`] is the column store.

use std::fmt;

/// One decoded instruction, materialized from a [`Program`]'s columns.
///
/// Unused fields per opcode are unspecified; callers must not rely on
/// reading them back for opcodes that don't define them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub tag: Tag,
    pub value: u8,
    pub offset: u32,
    pub extra: u32,
}

impl Instr {
    pub fn halt() -> Instr {
        Instr { tag: Tag::Halt, value: 0, offset: 0, extra: 0 }
    }

    pub fn breakpoint() -> Instr {
        Instr { tag: Tag::Breakpoint, value: 0, offset: 0, extra: 0 }
    }

    pub fn set(offset: u32, value: u8) -> Instr {
        Instr { tag: Tag::Set, value, offset, extra: 0 }
    }

    pub fn add(offset: u32, value: u8) -> Instr {
        Instr { tag: Tag::Add, value, offset, extra: 0 }
    }

    pub fn add_mul(offset: u32, value: u8, src_extra: u32) -> Instr {
        Instr { tag: Tag::AddMul, value, offset, extra: src_extra }
    }

    pub fn mov(delta: u32) -> Instr {
        Instr { tag: Tag::Move, value: 0, offset: 0, extra: delta }
    }

    pub fn seek(offset: u32, target: u8, step: u32) -> Instr {
        Instr { tag: Tag::Seek, value: target, offset, extra: step }
    }

    pub fn input(offset: u32) -> Instr {
        Instr { tag: Tag::In, value: 0, offset, extra: 0 }
    }

    pub fn output(offset: u32) -> Instr {
        Instr { tag: Tag::Out, value: 0, offset, extra: 0 }
    }

    pub fn output_value(value: u8) -> Instr {
        Instr { tag: Tag::OutValue, value, offset: 0, extra: 0 }
    }

    pub fn loop_start(extra: u32) -> Instr {
        Instr { tag: Tag::LoopStart, value: 0, offset: 0, extra }
    }

    pub fn loop_end(extra: u32) -> Instr {
        Instr { tag: Tag::LoopEnd, value: 0, offset: 0, extra }
    }
}

/// Opcode discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Halt = 0,
    Breakpoint = 1,
    Set = 2,
    Add = 3,
    AddMul = 4,
    Move = 5,
    Seek = 6,
    In = 7,
    Out = 8,
    OutValue = 9,
    LoopStart = 10,
    LoopEnd = 11,
}

impl Tag {
    /// The textual mnemonic used by the bytecode-text format.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Tag::Halt => "halt",
            Tag::Breakpoint => "breakpoint",
            Tag::Set => "set",
            Tag::Add => "add",
            Tag::AddMul => "add_mul",
            Tag::Move => "move",
            Tag::Seek => "seek",
            Tag::In => "in",
            Tag::Out => "out",
            Tag::OutValue => "out_value",
            Tag::LoopStart => "loop_start",
            Tag::LoopEnd => "loop_end",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Tag> {
        Some(match name {
            "halt" => Tag::Halt,
            "breakpoint" => Tag::Breakpoint,
            "set" => Tag::Set,
            "add" => Tag::Add,
            "add_mul" => Tag::AddMul,
            "move" => Tag::Move,
            "seek" => Tag::Seek,
            "in" => Tag::In,
            "out" => Tag::Out,
            "out_value" => Tag::OutValue,
            "loop_start" => Tag::LoopStart,
            "loop_end" => Tag::LoopEnd,
            _ => return None,
        })
    }
}

/// A well-formed program: a column store of instructions, always ending
/// in [`Tag::Halt`], with every `loop_start`/`loop_end` pair linked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    tags: Vec<Tag>,
    values: Vec<u8>,
    offsets: Vec<u32>,
    extras: Vec<u32>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub fn with_capacity(cap: usize) -> Program {
        Program {
            tags: Vec::with_capacity(cap),
            values: Vec::with_capacity(cap),
            offsets: Vec::with_capacity(cap),
            extras: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn push(&mut self, instr: Instr) -> usize {
        let idx = self.len();
        self.tags.push(instr.tag);
        self.values.push(instr.value);
        self.offsets.push(instr.offset);
        self.extras.push(instr.extra);
        idx
    }

    pub fn get(&self, idx: usize) -> Instr {
        Instr {
            tag: self.tags[idx],
            value: self.values[idx],
            offset: self.offsets[idx],
            extra: self.extras[idx],
        }
    }

    pub fn tag(&self, idx: usize) -> Tag {
        self.tags[idx]
    }

    /// Overwrites the `extra` field of an already-pushed instruction.
    /// Used to back-patch loop-bracket distances once the matching arm's
    /// index is known.
    pub fn set_extra(&mut self, idx: usize, extra: u32) {
        self.extras[idx] = extra;
    }

    pub fn iter(&self) -> impl Iterator<Item = Instr> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn extras(&self) -> &[u32] {
        &self.extras
    }

    /// A deterministic, byte-for-byte content hash over every field of
    /// every instruction (FNV-1a). Used by the optimizer driver to detect
    /// a fixed point, and by tests to assert semantics-preservation.
    pub fn content_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325;
        let mix = |h: &mut u64, byte: u8| {
            *h ^= byte as u64;
            *h = h.wrapping_mul(0x100000001b3);
        };

        for i in 0..self.len() {
            mix(&mut h, self.tags[i] as u8);
            mix(&mut h, self.values[i]);
            for b in self.offsets[i].to_le_bytes() {
                mix(&mut h, b);
            }
            for b in self.extras[i].to_le_bytes() {
                mix(&mut h, b);
            }
        }

        h
    }

    /// Renders the program in the bytecode-text format.
    pub fn dump(&self, opts: DumpOptions) -> String {
        let mut out = String::new();
        let mut depth: usize = 0;

        for idx in 0..self.len() {
            let instr = self.get(idx);
            if instr.tag == Tag::LoopEnd {
                depth = depth.saturating_sub(1);
            }

            out.push_str(&" ".repeat(depth * opts.indent_per_nest));
            out.push_str(instr.tag.mnemonic());

            match instr.tag {
                Tag::Set | Tag::Add | Tag::OutValue | Tag::AddMul | Tag::Seek => {
                    out.push(' ');
                    out.push_str(&instr.value.to_string());
                }
                _ => {}
            }

            if matches!(instr.tag, Tag::AddMul | Tag::Move | Tag::Seek) {
                out.push_str(" , ");
                out.push_str(&instr.extra.to_string());
            }

            match instr.tag {
                Tag::Set | Tag::Add | Tag::AddMul | Tag::Seek | Tag::In | Tag::Out => {
                    out.push_str(" @ ");
                    out.push_str(&instr.offset.to_string());
                }
                _ => {}
            }

            if opts.show_internal && matches!(instr.tag, Tag::LoopStart | Tag::LoopEnd) {
                out.push_str("  # extra=");
                out.push_str(&instr.extra.to_string());
            }

            out.push('\n');

            if instr.tag == Tag::LoopStart {
                depth += 1;
            }
        }

        out
    }
}

/// Options controlling [`Program::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpOptions {
    /// Spaces of indentation added per level of loop nesting.
    pub indent_per_nest: usize,
    /// Whether to render internal-only fields (loop distances) as
    /// trailing comments, for diagnostic round-tripping.
    pub show_internal: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions { indent_per_nest: 2, show_internal: false }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump(DumpOptions::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get_roundtrip() {
        let mut p = Program::new();
        p.push(Instr::add(3, 5));
        p.push(Instr::halt());

        assert_eq!(p.len(), 2);
        assert_eq!(p.get(0), Instr::add(3, 5));
        assert_eq!(p.get(1), Instr::halt());
    }

    #[test]
    fn hash_differs_on_single_field_change() {
        let mut a = Program::new();
        a.push(Instr::add(0, 5));
        let mut b = Program::new();
        b.push(Instr::add(0, 6));

        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_equal_for_equal_sequences() {
        let mut a = Program::new();
        a.push(Instr::set(2, 9));
        a.push(Instr::halt());
        let mut b = Program::new();
        b.push(Instr::set(2, 9));
        b.push(Instr::halt());

        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn dump_indents_by_loop_nesting() {
        let mut p = Program::new();
        p.push(Instr::loop_start(2));
        p.push(Instr::add(0, 1));
        p.push(Instr::loop_end(2));
        p.push(Instr::halt());

        let text = p.dump(DumpOptions { indent_per_nest: 2, show_internal: false });
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "loop_start");
        assert_eq!(lines[1], "  add 1 @ 0");
        assert_eq!(lines[2], "loop_end");
    }
}
