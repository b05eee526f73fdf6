//! x86-64 encodings used to redirect execution

pub mod stub;

use std::slice;

use iced_x86::{Decoder, DecoderOptions, FlowControl, Instruction};

use crate::error::{Error, Result};

/// Longest possible x86 instruction
pub const MAX_INSTRUCTION_LEN: usize = 15;
/// `jmp rel32`
pub const JMP_REL32_LEN: usize = 5;
/// `jmp [rip+0]` followed by the 8-byte target
pub const JMP_ABS_LEN: usize = 14;
/// Single byte `nop`
pub const NOP: u8 = 0x90;

/// Generates an absolute jump (`jmp [rip+0]; dq target`) to a specified address and returns bytecode
pub fn jmp_abs(target: usize) -> [u8; JMP_ABS_LEN] {
    let mut code = [0u8; JMP_ABS_LEN];
    code[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&(target as u64).to_le_bytes());
    code
}

/// Generates `jmp rel32` placed at `source` landing on `target`.
///
/// Returns `None` when the distance does not fit in a signed 32-bit displacement.
pub fn jmp_rel32(source: usize, target: usize) -> Option<[u8; JMP_REL32_LEN]> {
    let next = source.wrapping_add(JMP_REL32_LEN) as i64;
    let displacement = i32::try_from((target as i64).wrapping_sub(next)).ok()?;
    let mut code = [0xE9, 0, 0, 0, 0];
    code[1..].copy_from_slice(&displacement.to_le_bytes());
    Some(code)
}

/// Builds the bytes written over a hook site: the shortest jump reaching `target`, padded with
/// `nop` up to `len` bytes.
///
/// Returns `None` if the jump does not fit in `len` bytes.
pub fn site_patch(source: usize, target: usize, len: usize) -> Option<Vec<u8>> {
    let jump = match jmp_rel32(source, target) {
        Some(rel) => rel.to_vec(),
        None => jmp_abs(target).to_vec(),
    };
    if jump.len() > len {
        return None;
    }
    let mut patch = jump;
    patch.resize(len, NOP);
    Some(patch)
}

/// Number of bytes a jump from `source` to `target` needs
pub fn jump_len(source: usize, target: usize) -> usize {
    if jmp_rel32(source, target).is_some() {
        JMP_REL32_LEN
    } else {
        JMP_ABS_LEN
    }
}

/// Whole instructions that a patch of at least `min_len` bytes at `site` would overwrite
#[derive(Debug, Clone)]
pub struct Displaced {
    /// Decoded instructions, still carrying their original addresses
    pub instructions: Vec<Instruction>,
    /// Total length of the instructions in bytes, at least `min_len`
    pub len: usize,
}

/// Decodes instructions from `site` until at least `min_len` bytes are covered.
///
/// Fails if the bytes do not decode, or if control leaves the function (return or unconditional
/// jump) before the patch is covered, since the bytes after it may belong to something else.
///
/// # Safety
///
/// `site` must be [valid](https://doc.rust-lang.org/stable/std/ptr/index.html#safety) for reads of `min_len + MAX_INSTRUCTION_LEN - 1` bytes
pub unsafe fn displaced_instructions(site: usize, min_len: usize) -> Result<Displaced> {
    // Add MAX_INSTRUCTION_LEN - 1 in case we stop on the first byte of the longest instruction
    let window = slice::from_raw_parts(site as *const u8, min_len + MAX_INSTRUCTION_LEN - 1);
    let mut decoder = Decoder::with_ip(64, window, site as u64, DecoderOptions::NONE);

    let mut instructions = Vec::new();
    let mut len = 0;
    while len < min_len {
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(Error::Relocation(format!(
                "invalid instruction at {:#x}",
                site + len
            )));
        }
        len += instruction.len();
        let leaves = matches!(
            instruction.flow_control(),
            FlowControl::Return | FlowControl::UnconditionalBranch | FlowControl::IndirectBranch
        );
        instructions.push(instruction);
        if leaves && len < min_len {
            return Err(Error::Relocation(format!(
                "code at {site:#x} leaves the function after {len} bytes, {min_len} needed"
            )));
        }
    }
    Ok(Displaced { instructions, len })
}
