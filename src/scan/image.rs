//! The loaded module the engine operates on

use std::ptr;

use tracing::info;

use crate::error::{Error, Result};

use super::{scan, Landmark, Pattern};

/// `MZ`
const DOS_SIGNATURE: u16 = 0x5A4D;
/// `PE\0\0`
const NT_SIGNATURE: u32 = 0x0000_4550;
/// Offset of `e_lfanew` in the DOS header
const E_LFANEW_OFFSET: usize = 0x3C;
/// Offset of `FileHeader.TimeDateStamp` from the NT headers
const TIMESTAMP_OFFSET: usize = 0x08;
/// Offset of `OptionalHeader.SizeOfImage` from the NT headers (same for PE32 and PE32+)
const SIZE_OF_IMAGE_OFFSET: usize = 0x50;

/// Base address and size of one contiguous loaded module.
///
/// Constructing an image is unsafe because every scan through it trusts that the whole range is readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleImage {
    /// First byte of the module
    base: usize,
    /// Size of the mapped image in bytes
    size: usize,
}

impl ModuleImage {
    /// Wraps an already known module range.
    ///
    /// # Safety
    ///
    /// `base` must be readable for `size` bytes for as long as the image is used
    pub unsafe fn from_raw_parts(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Reads the image size from the PE headers mapped at `base`.
    ///
    /// Returns `None` if the DOS or NT signature is missing.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped module whose headers are readable
    pub unsafe fn from_pe_header(base: usize) -> Option<Self> {
        let nt = Self::nt_headers(base, usize::MAX)?;
        let size = ptr::read_unaligned((nt + SIZE_OF_IMAGE_OFFSET) as *const u32) as usize;
        Some(Self { base, size })
    }

    /// Locates the NT headers of the module at `base`, reading nothing past `base + limit`
    unsafe fn nt_headers(base: usize, limit: usize) -> Option<usize> {
        if base == 0 || limit < E_LFANEW_OFFSET + 4 {
            return None;
        }
        if ptr::read_unaligned(base as *const u16) != DOS_SIGNATURE {
            return None;
        }
        let e_lfanew = ptr::read_unaligned((base + E_LFANEW_OFFSET) as *const u32) as usize;
        if e_lfanew.checked_add(4)? > limit {
            return None;
        }
        let nt = base.checked_add(e_lfanew)?;
        (ptr::read_unaligned(nt as *const u32) == NT_SIGNATURE).then_some(nt)
    }

    /// Link timestamp from the PE file header, if the image has one
    pub fn timestamp(&self) -> Option<u32> {
        // Safety: the image was constructed over readable memory
        unsafe {
            let nt = Self::nt_headers(self.base, self.size)?;
            if nt - self.base + TIMESTAMP_OFFSET + 4 > self.size {
                return None;
            }
            Some(ptr::read_unaligned((nt + TIMESTAMP_OFFSET) as *const u32))
        }
    }

    /// First byte of the module
    pub fn base(&self) -> usize {
        self.base
    }

    /// Size of the module in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether `address` lies inside the module
    pub fn contains(&self, address: usize) -> bool {
        (self.base..self.base + self.size).contains(&address)
    }

    /// Module-relative offset of `address`, as printed in log lines
    pub fn offset_of(&self, address: usize) -> usize {
        address.wrapping_sub(self.base)
    }

    /// Scans the whole module for `pattern`
    pub fn scan(&self, pattern: &Pattern) -> Option<usize> {
        // Safety: the image was constructed over readable memory
        unsafe { scan(self.base, self.size, pattern) }
    }

    /// Scans for a landmark and applies its offset.
    ///
    /// Success is logged here. A miss is returned as [`Error::ScanNotFound`] for the caller to report.
    pub fn locate(&self, landmark: &Landmark) -> Result<usize> {
        let hit = self
            .scan(&landmark.pattern)
            .ok_or_else(|| Error::ScanNotFound(landmark.name.to_owned()))?;
        let address = hit.wrapping_add_signed(landmark.offset);
        info!(
            "{}: Address is module+{:#x}",
            landmark.name,
            self.offset_of(address)
        );
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal buffer that looks like a mapped PE image
    fn fake_pe(size_of_image: u32, timestamp: u32) -> Vec<u8> {
        let mut image = vec![0u8; 0x200];
        image[0..2].copy_from_slice(&DOS_SIGNATURE.to_le_bytes());
        image[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
        image[0x80..0x84].copy_from_slice(&NT_SIGNATURE.to_le_bytes());
        image[0x88..0x8C].copy_from_slice(&timestamp.to_le_bytes());
        image[0xD0..0xD4].copy_from_slice(&size_of_image.to_le_bytes());
        image
    }

    #[test]
    fn reads_pe_headers() {
        let buf = fake_pe(0x200, 0x66B1_2C00);
        let base = buf.as_ptr() as usize;
        let image = unsafe { ModuleImage::from_pe_header(base) }.unwrap();
        assert_eq!(image.base(), base);
        assert_eq!(image.size(), 0x200);
        assert_eq!(image.timestamp(), Some(0x66B1_2C00));
    }

    #[test]
    fn rejects_non_pe_memory() {
        let buf = vec![0u8; 0x100];
        assert!(unsafe { ModuleImage::from_pe_header(buf.as_ptr() as usize) }.is_none());
        let image = unsafe { ModuleImage::from_raw_parts(buf.as_ptr() as usize, buf.len()) };
        assert_eq!(image.timestamp(), None);
    }

    #[test]
    fn timestamp_stays_inside_the_image() {
        // DOS header only, e_lfanew pointing far past the end
        let mut buf = vec![0u8; 0x40];
        buf[..2].copy_from_slice(b"MZ");
        buf[0x3C..0x40].copy_from_slice(&0x1000u32.to_le_bytes());
        let image = unsafe { ModuleImage::from_raw_parts(buf.as_ptr() as usize, buf.len()) };
        assert_eq!(image.timestamp(), None);

        // too short for e_lfanew itself
        let image = unsafe { ModuleImage::from_raw_parts(buf.as_ptr() as usize, 0x20) };
        assert_eq!(image.timestamp(), None);

        // NT signature in range but the file header is cut off
        let mut buf = fake_pe(0x200, 0x66B1_2C00);
        let e_lfanew = u32::from_le_bytes(buf[0x3C..0x40].try_into().unwrap()) as usize;
        buf.truncate(e_lfanew + 8);
        let image = unsafe { ModuleImage::from_raw_parts(buf.as_ptr() as usize, buf.len()) };
        assert_eq!(image.timestamp(), None);
    }

    #[test]
    fn locate_applies_offset() {
        let buf = [0x00u8, 0x00, 0x45, 0x0F, 0x74, 0x05, 0x0F, 0x2F];
        let base = buf.as_ptr() as usize;
        let image = unsafe { ModuleImage::from_raw_parts(base, buf.len()) };
        let landmark = Landmark::new("Aspect Ratio Limit", "45 ?? 74", 3).unwrap();
        assert_eq!(image.locate(&landmark).unwrap(), base + 5);
        assert_eq!(image.offset_of(base + 5), 5);
        assert!(image.contains(base + 7));
        assert!(!image.contains(base + 8));

        let missing = Landmark::new("Gameplay FOV", "F3 0F", 0).unwrap();
        assert!(matches!(image.locate(&missing), Err(Error::ScanNotFound(name)) if name == "Gameplay FOV"));
    }
}
