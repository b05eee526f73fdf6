//! CPU state captured by a mid-hook stub

/// One `xmm` register as raw little-endian bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Xmm(pub [u8; 16]);

impl Xmm {
    /// Single precision lane `lane` (0..4)
    pub fn f32(&self, lane: usize) -> f32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.0[lane * 4..lane * 4 + 4]);
        f32::from_le_bytes(bytes)
    }

    /// Overwrites single precision lane `lane` (0..4)
    pub fn set_f32(&mut self, lane: usize, value: f32) {
        self.0[lane * 4..lane * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Double precision lane `lane` (0..2)
    pub fn f64(&self, lane: usize) -> f64 {
        f64::from_bits(self.u64(lane))
    }

    /// Overwrites double precision lane `lane` (0..2)
    pub fn set_f64(&mut self, lane: usize, value: f64) {
        self.set_u64(lane, value.to_bits());
    }

    /// Quadword lane `lane` (0..2)
    pub fn u64(&self, lane: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.0[lane * 8..lane * 8 + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Overwrites quadword lane `lane` (0..2)
    pub fn set_u64(&mut self, lane: usize, value: u64) {
        self.0[lane * 8..lane * 8 + 8].copy_from_slice(&value.to_le_bytes());
    }
}

/// Registers at the hooked instruction, exactly as the stub laid them out on the stack.
///
/// Writes made by a callback are loaded back into the CPU before the original code resumes.
#[repr(C)]
#[derive(Debug, Clone, Default)]
#[allow(missing_docs, clippy::missing_docs_in_private_items)]
pub struct RegisterContext {
    pub xmm: [Xmm; 16],
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rflags: u64,
}

impl RegisterContext {
    /// `rsp` at the hooked instruction.
    ///
    /// Only meaningful for a context that lives on the stack of a mid-hook stub, where the saved
    /// registers sit directly below the original stack pointer.
    pub fn stack_pointer(&self) -> usize {
        self as *const Self as usize + std::mem::size_of::<Self>()
    }
}
