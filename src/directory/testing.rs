//! Synthetic string maps laid out like the ones the target runtime builds

use super::{KeyHasher, NamedObjectTable, Strihash, INDEX_NONE};

/// One element of a synthetic map, laid out like [`TableLayout::STRING_MAP`](super::TableLayout::STRING_MAP)
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code, clippy::missing_docs_in_private_items)]
pub struct Element {
    pub key_data: *const u16,
    pub key_len: i32,
    pub key_max: i32,
    pub value: usize,
    pub next: i32,
    pub bucket: i32,
}

/// Map header, laid out like [`TableLayout::STRING_MAP`](super::TableLayout::STRING_MAP)
#[repr(C)]
#[allow(dead_code, clippy::missing_docs_in_private_items)]
pub struct Header {
    pub elements: *const Element,
    pub count: i32,
    pub max: i32,
    pub unused: [u8; 0x28],
    pub inline_bucket: i32,
    pub pad: i32,
    pub buckets: *const i32,
    pub bucket_count: i32,
    pub pad2: i32,
}

/// A map built the way the target runtime builds it
pub struct SyntheticTable {
    /// Map header handed to the walk
    pub header: Box<Header>,
    /// Key storage the elements point into
    _keys: Vec<Vec<u16>>,
    /// Element storage the header points into
    pub elements_store: Vec<Element>,
    /// Bucket storage the header points into
    _buckets: Vec<i32>,
}

impl SyntheticTable {
    /// Inserts `entries` in order into a map with `bucket_count` buckets
    pub fn build(entries: &[(&str, usize)], bucket_count: usize) -> Self {
        let keys: Vec<Vec<u16>> = entries
            .iter()
            .map(|(name, _)| name.encode_utf16().chain([0]).collect())
            .collect();
        let mut buckets = vec![INDEX_NONE; bucket_count];
        let mut elements = Vec::new();
        for (i, ((name, value), key)) in entries.iter().zip(&keys).enumerate() {
            let bucket = (Strihash.hash(name) as usize) & (bucket_count - 1);
            // new elements are linked at the head of their chain
            elements.push(Element {
                key_data: key.as_ptr(),
                key_len: key.len() as i32,
                key_max: key.len() as i32,
                value: *value,
                next: buckets[bucket],
                bucket: bucket as i32,
            });
            buckets[bucket] = i as i32;
        }
        let header = Box::new(Header {
            elements: elements.as_ptr(),
            count: elements.len() as i32,
            max: elements.len() as i32,
            unused: [0; 0x28],
            inline_bucket: buckets[0],
            pad: 0,
            buckets: if bucket_count == 1 { std::ptr::null() } else { buckets.as_ptr() },
            bucket_count: bucket_count as i32,
            pad2: 0,
        });
        Self {
            header,
            _keys: keys,
            elements_store: elements,
            _buckets: buckets,
        }
    }

    /// Lookup capability over the map
    pub fn table(&self) -> NamedObjectTable {
        unsafe { NamedObjectTable::new(self.address()) }
    }

    /// Address of the map header
    pub fn address(&self) -> usize {
        &*self.header as *const Header as usize
    }
}
