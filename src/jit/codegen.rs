//! Translates a [`Program`] into x86-64 machine code.
//!
//! Register discipline (all caller-saved, nothing preserved across a call
//! the emitted code doesn't explicitly save itself):
//!
//! - `eax`: tape cursor, `mp + lazy_offset`. A 32-bit write to `eax`
//!   zero-extends into `rax`, which is what keeps `[rdi + rax]` a valid
//!   64-bit address without ever touching the top half by hand.
//! - `rdi`: tape base pointer.
//! - `rsi` / `rdx`: input function pointer / input context.
//! - `rcx` / `r8`: output function pointer / output context.
//! - `r10` / `r11`: scratch, never live across a `call`.
//!
//! Every instruction that touches the tape folds its static offset into
//! `eax` before addressing `[rdi + rax]`, then leaves `eax` sitting at
//! that offset so a run of same-offset accesses (e.g. an `add_mul` pair)
//! doesn't re-fold redundantly.

use crate::ir::Program;

const RAX: u8 = 0;
const RDX: u8 = 2;
const RSP: u8 = 4;
const RBP: u8 = 5;
const RSI: u8 = 6;
const RDI: u8 = 7;
const R8: u8 = 8;
const R10: u8 = 10;
const RCX: u8 = 1;

/// Growable machine-code buffer plus the bookkeeping needed to back-patch
/// forward jumps (loop starts, halts, I/O error exits) once their targets
/// are known.
pub struct CodeGen {
    code: Vec<u8>,
    /// Offset (in `code`) of each `halt`/I-O-failure exit jump; patched to
    /// the epilogue once the whole program has been emitted.
    exit_patches: Vec<usize>,
    /// The tape displacement currently folded into `eax`.
    current_offset: u32,
}

impl CodeGen {
    pub fn new() -> CodeGen {
        CodeGen { code: Vec::new(), exit_patches: Vec::new(), current_offset: 0 }
    }

    fn push_u8(&mut self, b: u8) {
        self.code.push(b);
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn push_i32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn patch_rel32(&mut self, patch_at: usize, target: usize) {
        let rel = (target as i64 - (patch_at as i64 + 4)) as i32;
        self.code[patch_at..patch_at + 4].copy_from_slice(&rel.to_le_bytes());
    }

    fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
        0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8)
    }

    fn modrm_direct(reg: u8, rm: u8) -> u8 {
        0xC0 | ((reg & 7) << 3) | (rm & 7)
    }

    /// ModRM/SIB pair shared by every `[rdi + rax]`-addressed tape access:
    /// ModRM = mod=00, rm=100 (SIB follows); SIB = scale=00, index=rax, base=rdi.
    const MODRM_SIB_FOLLOWS: u8 = 0x04;
    const SIB_RDI_PLUS_RAX: u8 = 0x07;

    fn push_reg(&mut self, reg: u8) {
        if reg >= 8 {
            self.push_u8(Self::rex(false, false, false, true));
        }
        self.push_u8(0x50 + (reg & 7));
    }

    fn pop_reg(&mut self, reg: u8) {
        if reg >= 8 {
            self.push_u8(Self::rex(false, false, false, true));
        }
        self.push_u8(0x58 + (reg & 7));
    }

    /// `mov dst, src`, 64-bit GPRs.
    fn mov_reg_reg(&mut self, dst: u8, src: u8) {
        self.push_u8(Self::rex(true, src >= 8, false, dst >= 8));
        self.push_u8(0x89);
        self.push_u8(Self::modrm_direct(src, dst));
    }

    /// `call reg`, 64-bit indirect.
    fn call_reg(&mut self, reg: u8) {
        if reg >= 8 {
            self.push_u8(Self::rex(false, false, false, true));
        }
        self.push_u8(0xFF);
        self.push_u8(0xD0 | (reg & 7));
    }

    /// `add eax, imm32`, zero-extending into `rax`.
    fn add_eax_imm32(&mut self, imm: u32) {
        if imm == 0 {
            return;
        }
        self.push_u8(0x05);
        self.push_i32(imm as i32);
    }

    /// Brings `eax` in line with `target`, an offset relative to the
    /// committed tape head, updating `current_offset` to match.
    fn fold_offset(&mut self, target: u32) {
        let delta = target.wrapping_sub(self.current_offset);
        self.add_eax_imm32(delta);
        self.current_offset = target;
    }

    /// Resets `eax` to the bare tape head (`current_offset == 0`). Needed
    /// at every site multiple predecessors converge on: a loop's `cmp`
    /// is reached both by falling in from outside and by the back-edge,
    /// since those predecessors may leave different offsets folded in.
    fn flush_offset(&mut self) {
        let delta = 0u32.wrapping_sub(self.current_offset);
        self.add_eax_imm32(delta);
        self.current_offset = 0;
    }

    pub fn emit_prologue(&mut self) {
        self.push_u8(0x55); // push rbp
        self.mov_reg_reg(RBP, RSP); // mov rbp, rsp
        self.push_bytes(&[0x31, 0xC0]); // xor eax, eax
    }

    /// Writes the unified exit and patches every pending jump to land here.
    /// Call exactly once, last; `eax` must already hold the return value.
    pub fn emit_epilogue(&mut self) {
        let exit_at = self.here();
        self.mov_reg_reg(RSP, RBP); // mov rsp, rbp
        self.push_u8(0x5D); // pop rbp
        self.push_u8(0xC3); // ret

        let patches = std::mem::take(&mut self.exit_patches);
        for patch_at in patches {
            self.patch_rel32(patch_at, exit_at);
        }
    }

    fn emit_jmp_to_exit(&mut self) {
        self.push_u8(0xE9);
        self.exit_patches.push(self.here());
        self.push_i32(0); // patched by emit_epilogue
    }

    pub fn emit_halt(&mut self) {
        self.push_bytes(&[0x31, 0xC0]); // xor eax, eax: success return code
        self.emit_jmp_to_exit();
    }

    pub fn emit_set(&mut self, offset: u32, value: u8) {
        self.fold_offset(offset);
        // mov byte [rdi+rax], imm8
        self.push_bytes(&[0xC6, Self::MODRM_SIB_FOLLOWS, Self::SIB_RDI_PLUS_RAX, value]);
    }

    pub fn emit_add(&mut self, offset: u32, value: u8) {
        if value == 0 {
            return;
        }
        self.fold_offset(offset);
        // add byte [rdi+rax], imm8
        self.push_bytes(&[0x80, Self::MODRM_SIB_FOLLOWS, Self::SIB_RDI_PLUS_RAX, value]);
    }

    /// `[offset] += value * [offset + extra]`. Loads the source byte into
    /// `r10b` (zero-extended to `r10d`), multiplies by `value` with a
    /// 16-bit `imul` (only the low byte of the product is ever added
    /// back, so the upper multiply bits are immaterial), then adds the
    /// low byte into the destination cell.
    pub fn emit_add_mul(&mut self, offset: u32, value: u8, extra: u32) {
        let src = offset.wrapping_add(extra);
        self.fold_offset(src);
        // movzx r10d, byte [rdi+rax]
        self.push_u8(Self::rex(false, true, false, false));
        self.push_bytes(&[0x0F, 0xB6]);
        self.push_bytes(&[0x14, Self::SIB_RDI_PLUS_RAX]); // ModRM: mod=00 reg=r10(010) rm=100(SIB)

        // imul r10w, r10w, imm16 (operand-size override, low 16 bits only)
        self.push_u8(0x66);
        self.push_u8(Self::rex(false, true, false, true));
        self.push_u8(0x69);
        self.push_u8(Self::modrm_direct(R10, R10));
        self.code.extend_from_slice(&(value as i16).to_le_bytes());

        self.fold_offset(offset);
        // add byte [rdi+rax], r10b
        self.push_u8(Self::rex(false, true, false, false));
        self.push_bytes(&[0x00, 0x14, Self::SIB_RDI_PLUS_RAX]);
    }

    pub fn emit_move(&mut self, delta: u32) {
        let step = delta.wrapping_sub(self.current_offset);
        self.add_eax_imm32(step);
        self.current_offset = 0;
    }

    /// Materializes `r10 = rdi + rax`, then loops comparing `[r10]`
    /// against `target` and advancing by `step` until it matches; finally
    /// rederives `eax` as the net offset from the tape base.
    pub fn emit_seek(&mut self, offset: u32, target: u8, step: u32) {
        self.fold_offset(offset);
        // lea r10, [rdi+rax]
        self.push_u8(Self::rex(true, true, false, false));
        self.push_bytes(&[0x8D, 0x14, Self::SIB_RDI_PLUS_RAX]);

        let loop_top = self.here();
        // cmp byte [r10], imm8
        self.push_u8(Self::rex(false, false, false, true));
        self.push_bytes(&[0x80, 0x3A, target]);
        // je done (patched below)
        self.push_bytes(&[0x0F, 0x84]);
        let je_patch = self.here();
        self.push_i32(0);
        // add r10, imm32 (sign-extended)
        self.push_u8(Self::rex(true, false, false, true));
        self.push_bytes(&[0x81, 0xC2]);
        self.push_i32(step as i32);
        // jmp loop_top
        self.push_u8(0xE9);
        let jmp_at = self.here();
        self.push_i32(0);
        self.patch_rel32(jmp_at, loop_top);

        let done = self.here();
        self.patch_rel32(je_patch, done);

        // rax = r10 - rdi, the cell index the head now sits at.
        self.mov_reg_reg(RAX, R10);
        self.push_u8(Self::rex(true, false, false, false));
        self.push_bytes(&[0x29, Self::modrm_direct(RDI, RAX)]); // sub rax, rdi
        self.current_offset = 0;
    }

    fn save_volatile(&mut self) {
        for r in [RAX, RDI, RSI, RDX, RCX, R8] {
            self.push_reg(r);
        }
    }

    fn restore_volatile(&mut self) {
        for r in [R8, RCX, RDX, RSI, RDI, RAX] {
            self.pop_reg(r);
        }
    }

    /// Shared tail for `out`/`out_value`: save everything the callback
    /// might clobber, call it, stash the return code in `r10` (outliving
    /// the restores), then branch to the unified exit on a negative
    /// (error) return.
    fn emit_call_and_check(&mut self, fn_reg: u8, ctx_reg: u8) {
        self.save_volatile();
        self.mov_reg_reg(RDI, ctx_reg);
        self.call_reg(fn_reg);
        self.mov_reg_reg(R10, RAX);
        self.restore_volatile();

        // test r10d, r10d
        self.push_u8(Self::rex(false, true, false, true));
        self.push_bytes(&[0x85, Self::modrm_direct(R10, R10)]);
        // jns ok (patched below)
        self.push_bytes(&[0x0F, 0x89]);
        let ok_patch = self.here();
        self.push_i32(0);

        self.mov_reg_reg(RAX, R10);
        self.emit_jmp_to_exit();

        let ok_at = self.here();
        self.patch_rel32(ok_patch, ok_at);
    }

    pub fn emit_in(&mut self, offset: u32) {
        self.fold_offset(offset);
        self.save_volatile();
        self.mov_reg_reg(RDI, RDX);
        self.call_reg(RSI);
        self.mov_reg_reg(R10, RAX);
        self.restore_volatile();

        self.push_u8(Self::rex(false, true, false, true));
        self.push_bytes(&[0x85, Self::modrm_direct(R10, R10)]);
        self.push_bytes(&[0x0F, 0x89]);
        let ok_patch = self.here();
        self.push_i32(0);

        self.mov_reg_reg(RAX, R10);
        self.emit_jmp_to_exit();

        let ok_at = self.here();
        self.patch_rel32(ok_patch, ok_at);

        // mov byte [rdi+rax], r10b
        self.push_u8(Self::rex(false, true, false, false));
        self.push_bytes(&[0x88, 0x14, Self::SIB_RDI_PLUS_RAX]);
    }

    pub fn emit_out(&mut self, offset: u32) {
        self.fold_offset(offset);
        // mov sil, byte [rdi+rax] -- REX (even with no extension bits) is
        // required here: without it, ModRM reg=6 addresses dh, not sil.
        self.push_u8(Self::rex(false, false, false, false));
        self.push_bytes(&[0x8A, 0x34, Self::SIB_RDI_PLUS_RAX]);
        self.emit_call_and_check(RCX, R8);
    }

    pub fn emit_out_value(&mut self, value: u8) {
        // mov sil, imm8
        self.push_bytes(&[0x40, 0xB6, value]);
        self.emit_call_and_check(RCX, R8);
    }

    /// Emits the `cmp`/`je` that may skip the loop body entirely. Returns
    /// the patch site for [`CodeGen::emit_loop_end`] to resolve once the
    /// body's end is known.
    pub fn emit_loop_start(&mut self) -> usize {
        self.flush_offset();
        // cmp byte [rdi+rax], 0
        self.push_bytes(&[0x80, 0x3C, Self::SIB_RDI_PLUS_RAX, 0x00]);
        // je skip (patched by emit_loop_end)
        self.push_bytes(&[0x0F, 0x84]);
        let je_patch = self.here();
        self.push_i32(0);
        je_patch
    }

    /// Emits the back-edge (`cmp`/`jne` to `body_start`) and patches the
    /// matching `loop_start`'s forward jump to land just past it.
    pub fn emit_loop_end(&mut self, je_patch: usize, body_start: usize) {
        self.flush_offset();
        // cmp byte [rdi+rax], 0
        self.push_bytes(&[0x80, 0x3C, Self::SIB_RDI_PLUS_RAX, 0x00]);
        // jne body_start
        self.push_bytes(&[0x0F, 0x85]);
        let jne_patch = self.here();
        self.push_i32(0);
        self.patch_rel32(jne_patch, body_start);

        let after = self.here();
        self.patch_rel32(je_patch, after);
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    pub fn position(&self) -> usize {
        self.here()
    }
}

/// Drives [`CodeGen`] instruction-by-instruction over a [`Program`]. Split
/// from `CodeGen` itself so the emitter's byte-level concerns stay
/// separate from IR traversal.
pub fn translate(program: &Program) -> Result<Vec<u8>, super::JitError> {
    use crate::ir::Tag;

    let mut gen = CodeGen::new();
    gen.emit_prologue();

    // loop_start pc -> (je_patch, body_start_addr), matched LIFO.
    let mut loop_sites: Vec<(usize, usize)> = Vec::new();

    for pc in 0..program.len() {
        let instr = program.get(pc);
        match instr.tag {
            Tag::Halt => gen.emit_halt(),
            Tag::Breakpoint => {} // no native debugger hook; a no-op under the JIT
            Tag::Set => gen.emit_set(instr.offset, instr.value),
            Tag::Add => gen.emit_add(instr.offset, instr.value),
            Tag::AddMul => gen.emit_add_mul(instr.offset, instr.value, instr.extra),
            Tag::Move => gen.emit_move(instr.extra),
            Tag::Seek => gen.emit_seek(instr.offset, instr.value, instr.extra),
            Tag::In => gen.emit_in(instr.offset),
            Tag::Out => gen.emit_out(instr.offset),
            Tag::OutValue => gen.emit_out_value(instr.value),
            Tag::LoopStart => {
                let je_patch = gen.emit_loop_start();
                let body_start = gen.position();
                loop_sites.push((je_patch, body_start));
            }
            Tag::LoopEnd => {
                let (je_patch, body_start) =
                    loop_sites.pop().ok_or(super::JitError::Unsupported("unbalanced loop"))?;
                gen.emit_loop_end(je_patch, body_start);
            }
        }
    }

    if !loop_sites.is_empty() {
        return Err(super::JitError::Unsupported("unbalanced loop"));
    }

    // a program lacking a trailing halt still needs a well-defined return.
    gen.emit_halt();
    gen.emit_epilogue();
    Ok(gen.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Instr;

    #[test]
    fn translates_a_straight_line_program_without_error() {
        let mut p = Program::new();
        p.push(Instr::set(0, 65));
        p.push(Instr::output(0));
        p.push(Instr::halt());

        let code = translate(&p).unwrap();
        assert!(!code.is_empty());
        // ret (0xC3) appears exactly once, at the very end: the shared exit.
        assert_eq!(code.iter().filter(|&&b| b == 0xC3).count(), 1);
        assert_eq!(*code.last().unwrap(), 0xC3);
    }

    #[test]
    fn unbalanced_loop_end_is_rejected() {
        let mut p = Program::new();
        p.push(Instr::loop_end(0));
        p.push(Instr::halt());
        assert!(translate(&p).is_err());
    }

    #[test]
    fn balanced_loop_translates() {
        let mut p = Program::new();
        let ls = p.push(Instr::loop_start(0));
        p.push(Instr::add(0, 255));
        let le = p.push(Instr::loop_end(0));
        let dist = (le - ls) as u32;
        p.set_extra(ls, dist);
        p.set_extra(le, dist.wrapping_neg());
        p.push(Instr::halt());

        assert!(translate(&p).is_ok());
    }
}
