//! Generated code placed in executable memory next to a hook site
//!
//! Both generators end with the relocated instructions displaced by the site patch, followed by an
//! absolute jump back to the first untouched byte of the original code.

use iced_x86::code_asm::*;
use iced_x86::{IcedError, Instruction};

/// Bytes reserved on the stack for `xmm0..xmm15`
const XMM_AREA: i32 = 16 * 16;
/// Home space the Windows x64 convention requires above the return address
const SHADOW_SPACE: i32 = 0x20;

/// Builds the mid-hook stub at `ip`.
///
/// The stub saves the flags, the fifteen general purpose registers (everything but `rsp`) and
/// `xmm0..xmm15` so that, read from the final `rsp` upwards, the stack holds
/// `xmm0..xmm15, rax, rcx, rdx, rbx, rbp, rsi, rdi, r8..r15, rflags`. It then calls
/// `dispatch(context, data)` with the arguments in both the Windows (`rcx`, `rdx`) and System V
/// (`rdi`, `rsi`) registers, reloads everything from the possibly modified context, and falls
/// through into the displaced instructions.
pub fn mid_hook(
    ip: u64,
    dispatch: u64,
    data: u64,
    displaced: &[Instruction],
    resume: u64,
) -> Result<Vec<u8>, IcedError> {
    let gprs = [
        r15, r14, r13, r12, r11, r10, r9, r8, rdi, rsi, rbp, rbx, rdx, rcx, rax,
    ];
    let xmms = [
        xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13,
        xmm14, xmm15,
    ];

    let mut a = CodeAssembler::new(64)?;

    // save
    a.pushfq()?;
    for reg in gprs {
        a.push(reg)?;
    }
    a.sub(rsp, XMM_AREA)?;
    for (i, xmm) in xmms.iter().enumerate() {
        a.movdqu(xmmword_ptr(rsp + (i as i32) * 16), *xmm)?;
    }

    // call out on a 16-byte aligned stack, keeping the context pointer in a callee-saved register
    a.mov(rcx, rsp)?;
    a.mov(rdi, rsp)?;
    a.mov(rdx, data)?;
    a.mov(rsi, data)?;
    a.mov(rbx, rsp)?;
    a.and(rsp, -16)?;
    a.sub(rsp, SHADOW_SPACE)?;
    a.mov(rax, dispatch)?;
    a.call(rax)?;
    a.mov(rsp, rbx)?;

    // restore
    for (i, xmm) in xmms.iter().enumerate() {
        a.movdqu(*xmm, xmmword_ptr(rsp + (i as i32) * 16))?;
    }
    a.add(rsp, XMM_AREA)?;
    for reg in gprs.iter().rev() {
        a.pop(*reg)?;
    }
    a.popfq()?;

    append_trampoline(&mut a, displaced, resume)?;
    a.assemble(ip)
}

/// Builds a trampoline at `ip`: the displaced instructions followed by a jump to `resume`.
///
/// Calling the trampoline behaves like calling the original, unpatched code.
pub fn trampoline(ip: u64, displaced: &[Instruction], resume: u64) -> Result<Vec<u8>, IcedError> {
    let mut a = CodeAssembler::new(64)?;
    append_trampoline(&mut a, displaced, resume)?;
    a.assemble(ip)
}

/// Re-encodes `displaced` at the assembler's position and jumps back to `resume`.
///
/// The block encoder fixes up rip-relative operands and branch targets for the new location.
fn append_trampoline(
    a: &mut CodeAssembler,
    displaced: &[Instruction],
    resume: u64,
) -> Result<(), IcedError> {
    for instruction in displaced {
        a.add_instruction(*instruction)?;
    }
    let mut target = a.create_label();
    a.jmp(qword_ptr(target))?;
    a.set_label(&mut target)?;
    a.dq(&[resume])?;
    Ok(())
}
