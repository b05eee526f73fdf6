//! String hashes used by the target runtime's hash maps

/// Hash function a [`NamedObjectTable`](super::NamedObjectTable) was built with
pub trait KeyHasher {
    /// Hashes `key` the same way the target runtime hashed the stored keys
    fn hash(&self, key: &str) -> u32;
}

/// Reflected CRC-32 table for polynomial `0xEDB88320`
const CRC_TABLE: [u32; 256] = crc_table();

/// Builds [`CRC_TABLE`] at compile time
const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Case-insensitive CRC-32 over the UTF-16 code units of a key.
///
/// Every code unit is upper-cased (ASCII only) and fed low byte then high byte through the
/// CRC table, starting from zero with no final inversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct Strihash;

impl Strihash {
    /// Hashes raw UTF-16 code units
    pub fn hash_units(units: impl IntoIterator<Item = u16>) -> u32 {
        units.into_iter().fold(0u32, |hash, unit| {
            let unit = upper(unit);
            let hash = (hash >> 8) ^ CRC_TABLE[((hash ^ (unit & 0xFF) as u32) & 0xFF) as usize];
            (hash >> 8) ^ CRC_TABLE[((hash ^ (unit >> 8) as u32) & 0xFF) as usize]
        })
    }
}

impl KeyHasher for Strihash {
    fn hash(&self, key: &str) -> u32 {
        Self::hash_units(key.encode_utf16())
    }
}

/// ASCII upper-case of one UTF-16 code unit
pub(crate) fn upper(unit: u16) -> u16 {
    if (b'a' as u16..=b'z' as u16).contains(&unit) {
        unit - 0x20
    } else {
        unit
    }
}
