//! # Directory
//!
//! Read-only walk over a string-keyed hash map owned by the target process.
//!
//! The map is an open hash: a sparse array of elements, each holding a key, a value pointer and
//! the index of the next element in the same bucket, plus a bucket array holding the index of the
//! first element of every chain. Nothing here owns or modifies the map.

pub mod hash;
pub mod object;
#[cfg(test)]
pub(crate) mod testing;

use std::slice;

pub use hash::{KeyHasher, Strihash};
pub use object::{ConsoleVariable, FlagWrite, ObjectLayout};

/// Chain terminator and empty-bucket marker
pub const INDEX_NONE: i32 = -1;

/// Offsets describing the map's binary layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    /// Pointer to the element array
    pub elements_offset: usize,
    /// Number of element slots (including free ones) as `i32`
    pub element_count_offset: usize,
    /// Inline bucket storage, used while the bucket count is at most one
    pub inline_buckets_offset: usize,
    /// Pointer to the bucket array when it lives on the heap
    pub buckets_offset: usize,
    /// Bucket count as `i32`, always a power of two
    pub bucket_count_offset: usize,
    /// Bytes per element
    pub entry_stride: usize,
    /// Key string inside an element: UTF-16 data pointer followed by an `i32` length including the terminator
    pub key_offset: usize,
    /// Value pointer inside an element
    pub value_offset: usize,
    /// Next element index inside an element
    pub next_offset: usize,
}

impl TableLayout {
    /// Layout of a string-keyed pointer map in the supported engine build
    pub const STRING_MAP: Self = Self {
        elements_offset: 0x0,
        element_count_offset: 0x8,
        inline_buckets_offset: 0x38,
        buckets_offset: 0x40,
        bucket_count_offset: 0x48,
        entry_stride: 0x20,
        key_offset: 0x0,
        value_offset: 0x10,
        next_offset: 0x18,
    };
}

impl Default for TableLayout {
    fn default() -> Self {
        Self::STRING_MAP
    }
}

/// Longest key the walk will read, in code units
const MAX_KEY_LEN: i32 = 1024;

/// Capability to look names up in a foreign map
pub struct NamedObjectTable<H = Strihash> {
    /// Address of the map header
    base: usize,
    /// Binary layout of the map
    layout: TableLayout,
    /// Hash the map was built with
    hasher: H,
}

impl NamedObjectTable<Strihash> {
    /// Wraps the map at `base` using the default layout and hash.
    ///
    /// # Safety
    ///
    /// See [`NamedObjectTable::with_layout`]
    pub unsafe fn new(base: usize) -> Self {
        Self::with_layout(base, TableLayout::default(), Strihash)
    }
}

impl<H: KeyHasher> NamedObjectTable<H> {
    /// Wraps the map at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a live map laid out as `layout` describes, and no other thread may be
    /// restructuring it while lookups run
    pub unsafe fn with_layout(base: usize, layout: TableLayout, hasher: H) -> Self {
        Self {
            base,
            layout,
            hasher,
        }
    }

    /// Number of element slots, or 0 for a table that looks invalid
    pub fn len(&self) -> usize {
        if self.read_usize(self.layout.elements_offset) == 0 {
            return 0;
        }
        usize::try_from(self.read_i32(self.base + self.layout.element_count_offset)).unwrap_or(0)
    }

    /// Whether the table holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address of the object stored under `name`, compared case-insensitively
    pub fn resolve(&self, name: &str) -> Option<usize> {
        let count = self.len();
        let bucket_count = self.read_i32(self.base + self.layout.bucket_count_offset);
        if count == 0 || bucket_count <= 0 {
            return None;
        }

        let buckets = if bucket_count == 1 {
            self.base + self.layout.inline_buckets_offset
        } else {
            self.read_usize(self.layout.buckets_offset)
        };
        if buckets == 0 {
            return None;
        }

        let wanted: Vec<u16> = name.encode_utf16().map(hash::upper).collect();
        let bucket = self.hasher.hash(name) & (bucket_count as u32 - 1);
        let elements = self.read_usize(self.layout.elements_offset);

        let mut index = self.read_i32(buckets + bucket as usize * 4);
        // a chain can never be longer than the table
        for _ in 0..count {
            let Ok(slot) = usize::try_from(index) else {
                return None;
            };
            if slot >= count {
                return None;
            }
            let entry = elements + slot * self.layout.entry_stride;
            if self.key_matches(entry, &wanted) {
                let value = self.read_usize_at(entry + self.layout.value_offset);
                return (value != 0).then_some(value);
            }
            index = self.read_i32(entry + self.layout.next_offset);
        }
        None
    }

    /// Compares the key stored in `entry` with upper-cased `wanted`
    fn key_matches(&self, entry: usize, wanted: &[u16]) -> bool {
        let data = self.read_usize_at(entry + self.layout.key_offset);
        let len = self.read_i32(entry + self.layout.key_offset + 8);
        if data == 0 || len <= 0 || len > MAX_KEY_LEN {
            return false;
        }
        // the stored length counts the terminator
        let stored_len = len as usize - 1;
        if stored_len != wanted.len() {
            return false;
        }
        // Safety: the key points to `len` readable code units by the table's contract
        let stored = unsafe { slice::from_raw_parts(data as *const u16, stored_len) };
        stored.iter().zip(wanted).all(|(&a, &b)| hash::upper(a) == b)
    }

    /// Reads a pointer-sized field of the map header
    fn read_usize(&self, offset: usize) -> usize {
        self.read_usize_at(self.base + offset)
    }

    /// Reads a pointer-sized value at an absolute address
    fn read_usize_at(&self, address: usize) -> usize {
        // Safety: guaranteed by the constructor's contract
        unsafe { (address as *const usize).read_unaligned() }
    }

    /// Reads an `i32` at an absolute address
    fn read_i32(&self, address: usize) -> i32 {
        // Safety: guaranteed by the constructor's contract
        unsafe { (address as *const i32).read_unaligned() }
    }
}
