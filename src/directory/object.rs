//! Typed access to objects resolved from the directory

use std::fmt;

/// How a value write treats the object's flag word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagWrite {
    /// Only the set-by priority bits change; every other flag survives
    SetBy,
    /// The whole word becomes the set-by-code value
    Overwrite,
}

/// Field offsets inside a console variable object.
///
/// These are fixed for one build of the target runtime and are not derived at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLayout {
    /// 32-bit flag word
    pub flags_offset: usize,
    /// Bits of the flag word holding who last set the value
    pub set_by_mask: u32,
    /// Set-by value marking the variable as last set by code
    pub set_by_code: u32,
    /// Value read by the game thread
    pub value_offset: usize,
    /// Shadow copy read by the render thread
    pub shadow_offset: usize,
    /// Flag word treatment on writes
    pub flag_write: FlagWrite,
}

impl ObjectLayout {
    /// Console variable layout of the supported engine build
    pub const CONSOLE_VARIABLE: Self = Self {
        flags_offset: 0x18,
        set_by_mask: 0xFF00_0000,
        set_by_code: 0x0A00_0000,
        value_offset: 0x60,
        shadow_offset: 0x64,
        flag_write: FlagWrite::SetBy,
    };

    /// Same layout with the flag word replaced outright on writes
    pub const fn overwriting_flags(self) -> Self {
        Self {
            flag_write: FlagWrite::Overwrite,
            ..self
        }
    }
}

impl Default for ObjectLayout {
    fn default() -> Self {
        Self::CONSOLE_VARIABLE
    }
}

/// A live console variable owned by the target process
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConsoleVariable {
    /// Object address
    address: usize,
    /// Field offsets
    layout: ObjectLayout,
}

impl fmt::Debug for ConsoleVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConsoleVariable({:#x})", self.address)
    }
}

impl ConsoleVariable {
    /// Wraps the object at `address`.
    ///
    /// # Safety
    ///
    /// `address` must point to a live console variable laid out as `layout` describes, which stays
    /// alive as long as the returned value is used
    pub unsafe fn new(address: usize, layout: ObjectLayout) -> Self {
        Self { address, layout }
    }

    /// Object address
    pub fn address(&self) -> usize {
        self.address
    }

    /// Current value as a float
    pub fn get_f32(&self) -> f32 {
        f32::from_bits(self.read(self.layout.value_offset))
    }

    /// Current value as an integer
    pub fn get_i32(&self) -> i32 {
        self.read(self.layout.value_offset) as i32
    }

    /// Sets a float value on both copies and marks it as set by code
    pub fn set_f32(&self, value: f32) {
        self.store(value.to_bits());
    }

    /// Sets an integer value on both copies and marks it as set by code
    pub fn set_i32(&self, value: i32) {
        self.store(value as u32);
    }

    /// Current flag word
    pub fn flags(&self) -> u32 {
        self.read(self.layout.flags_offset)
    }

    /// Reads the 32-bit field at `offset`
    fn read(&self, offset: usize) -> u32 {
        // Safety: guaranteed by the constructor's contract
        unsafe { ((self.address + offset) as *const u32).read_volatile() }
    }

    /// Writes a 32-bit field at `offset`
    fn write(&self, offset: usize, bits: u32) {
        // Safety: guaranteed by the constructor's contract
        unsafe { ((self.address + offset) as *mut u32).write_volatile(bits) }
    }

    /// Writes the flag word and both value copies
    fn store(&self, bits: u32) {
        let layout = &self.layout;
        let flags = match layout.flag_write {
            FlagWrite::SetBy => (self.flags() & !layout.set_by_mask) | layout.set_by_code,
            FlagWrite::Overwrite => layout.set_by_code,
        };
        self.write(layout.flags_offset, flags);
        self.write(layout.value_offset, bits);
        self.write(layout.shadow_offset, bits);
    }
}
