//! # Resolve
//!
//! This module turns instruction operands and pointer slots into absolute addresses

pub mod poll;

use std::ptr;

pub use poll::{poll_non_null, PollPolicy, Sleep, ThreadSleep};

use crate::error::{Error, Result};

/// Size of a relative operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandWidth {
    /// `rel8`, short branches
    Rel8,
    /// `rel16`
    Rel16,
    /// `rel32`, near branches and rip-relative memory operands
    Rel32,
    /// 64-bit displacement
    Rel64,
}

impl OperandWidth {
    /// Operand size in bytes
    pub fn bytes(self) -> usize {
        match self {
            Self::Rel8 => 1,
            Self::Rel16 => 2,
            Self::Rel32 => 4,
            Self::Rel64 => 8,
        }
    }
}

impl TryFrom<usize> for OperandWidth {
    type Error = Error;

    fn try_from(bytes: usize) -> Result<Self> {
        match bytes {
            1 => Ok(Self::Rel8),
            2 => Ok(Self::Rel16),
            4 => Ok(Self::Rel32),
            8 => Ok(Self::Rel64),
            _ => Err(Error::OperandWidth(bytes)),
        }
    }
}

/// Computes the target of a next-instruction-relative operand.
///
/// Reads a signed displacement of `width` at `operand` and returns
/// `operand + width + displacement`. The arithmetic wraps, matching what the CPU does.
///
/// Instructions that carry an immediate after the displacement (for example `cmp [rip+d], 0`)
/// end past the operand; callers add the immediate's size to the result.
///
/// # Safety
///
/// `operand` must be [valid](https://doc.rust-lang.org/stable/std/ptr/index.html#safety) for reads of `width` bytes
pub unsafe fn resolve_relative(operand: usize, width: OperandWidth) -> usize {
    let p = operand as *const u8;
    let displacement = match width {
        OperandWidth::Rel8 => ptr::read_unaligned(p as *const i8) as isize,
        OperandWidth::Rel16 => ptr::read_unaligned(p as *const i16) as isize,
        OperandWidth::Rel32 => ptr::read_unaligned(p as *const i32) as isize,
        OperandWidth::Rel64 => ptr::read_unaligned(p as *const i64) as isize,
    };
    operand.wrapping_add(width.bytes()).wrapping_add_signed(displacement)
}

/// Dereferences the pointer-sized value stored at `address`.
///
/// # Safety
///
/// `address` must be valid for reads of `usize`
pub unsafe fn follow_indirection(address: usize) -> usize {
    ptr::read_volatile(address as *const usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Places `d` in a buffer and resolves it as if the buffer lived at a synthetic address
    fn resolve_at(d: i32) -> (usize, usize) {
        let buf = d.to_le_bytes();
        let a = buf.as_ptr() as usize;
        (a, unsafe { resolve_relative(a, OperandWidth::Rel32) })
    }

    #[test]
    fn relative_positive_and_negative() {
        for d in [0x10, -0x10, 0, 1, -1] {
            let (a, resolved) = resolve_at(d);
            assert_eq!(resolved, (a as isize + 4 + d as isize) as usize);
        }
    }

    #[test]
    fn relative_boundaries() {
        let (a, resolved) = resolve_at(i32::MAX);
        assert_eq!(resolved, a.wrapping_add(4).wrapping_add(i32::MAX as usize));
        let (a, resolved) = resolve_at(i32::MIN);
        assert_eq!(resolved, a.wrapping_add(4).wrapping_sub(1usize << 31));
    }

    #[test]
    fn relative_other_widths() {
        let buf = [0xFEu8];
        let a = buf.as_ptr() as usize;
        // jmp short -2 style operand lands on the operand's own opcode byte
        assert_eq!(unsafe { resolve_relative(a, OperandWidth::Rel8) }, a + 1 - 2);

        let buf = 0x20i64.to_le_bytes();
        let a = buf.as_ptr() as usize;
        assert_eq!(unsafe { resolve_relative(a, OperandWidth::Rel64) }, a + 8 + 0x20);
    }

    #[test]
    fn widths_from_byte_counts() {
        assert_eq!(OperandWidth::try_from(2).unwrap(), OperandWidth::Rel16);
        assert_eq!(OperandWidth::try_from(8).unwrap().bytes(), 8);
        // no 3-byte displacements on x86
        assert!(matches!(OperandWidth::try_from(3), Err(Error::OperandWidth(3))));
        assert!(matches!(OperandWidth::try_from(0), Err(Error::OperandWidth(0))));

        let buf = (-4i16).to_le_bytes();
        let a = buf.as_ptr() as usize;
        let width = OperandWidth::try_from(buf.len()).unwrap();
        assert_eq!(unsafe { resolve_relative(a, width) }, a + 2 - 4);
    }

    #[test]
    fn cmp_rip_with_trailing_immediate() {
        // 48 83 3D <disp32> 00   cmp qword ptr [rip+disp32], 0
        let mut code = vec![0x48u8, 0x83, 0x3D, 0, 0, 0, 0, 0x00];
        code[3..7].copy_from_slice(&0x100i32.to_le_bytes());
        let operand = code.as_ptr() as usize + 3;
        let slot = unsafe { resolve_relative(operand, OperandWidth::Rel32) } + 1;
        assert_eq!(slot, code.as_ptr() as usize + code.len() + 0x100);
    }

    #[test]
    fn indirection() {
        let target = 0x1234_5678usize;
        let slot = Box::new(target);
        let address = &*slot as *const usize as usize;
        assert_eq!(unsafe { follow_indirection(address) }, target);
    }
}
