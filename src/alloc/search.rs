//! Walks the address space page by page looking for unmapped memory

use std::ops::Range;

/// Which way a [`FreePages`] walk moves away from its origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards lower addresses
    Down,
    /// Towards higher addresses
    Up,
}

/// Iterator over the start addresses of unmapped pages inside `range`, nearest to the origin first.
///
/// Mapped regions are skipped whole. Errors other than [`region::Error::UnmappedRegion`] are yielded so
/// the caller can decide whether to keep walking.
pub struct FreePages {
    /// Addresses the walk may visit
    range: Range<usize>,
    /// Walk direction
    direction: Direction,
    /// Next address to query, `None` once the walk left `range`
    cursor: Option<usize>,
    /// Page granularity of the walk
    page_size: usize,
}

impl FreePages {
    /// Starts a walk at the page containing `origin`
    pub fn new(origin: usize, range: Range<usize>, direction: Direction) -> Self {
        let page_size = region::page::size();
        Self {
            range,
            direction,
            cursor: Some(origin & !(page_size - 1)),
            page_size,
        }
    }

    /// Moves the cursor to the page after (or before) `current`
    fn step_from(&self, current: usize) -> Option<usize> {
        match self.direction {
            Direction::Down => current.checked_sub(self.page_size),
            Direction::Up => current.checked_add(self.page_size),
        }
    }
}

impl Iterator for FreePages {
    type Item = Result<usize, region::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.cursor.filter(|&c| c != 0 && self.range.contains(&c))?;
            match region::query(current as *const u8) {
                Ok(mapped) => {
                    // jump over the whole mapping
                    let bounds = mapped.as_range();
                    self.cursor = match self.direction {
                        Direction::Down => bounds.start.checked_sub(self.page_size),
                        Direction::Up => Some(bounds.end),
                    };
                }
                Err(region::Error::UnmappedRegion) => {
                    self.cursor = self.step_from(current);
                    return Some(Ok(current));
                }
                Err(e) => {
                    self.cursor = self.step_from(current);
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_free_pages_near_code() {
        let origin = finds_free_pages_near_code as usize;
        let range = origin.saturating_sub(0x8000_0000)..origin.saturating_add(0x8000_0000);

        // both directions produce something inside the range on any normal process layout
        let up = FreePages::new(origin, range.clone(), Direction::Up)
            .find_map(|page| page.ok())
            .unwrap();
        assert!(up > origin && range.contains(&up));
        assert_eq!(up % region::page::size(), 0);

        // the page really is unmapped
        assert!(matches!(
            region::query(up as *const u8),
            Err(region::Error::UnmappedRegion)
        ));
    }

    #[test]
    fn stops_at_range_bounds() {
        let origin = stops_at_range_bounds as usize;
        let page = region::page::size();
        let start = origin & !(page - 1);
        // a range covering only the mapped page of this function yields nothing
        let mut walk = FreePages::new(origin, start..start + page, Direction::Up);
        assert!(walk.next().is_none());
    }
}
