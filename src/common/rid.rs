use std::fmt;

use crate::common::config::PageId;

/// Tuple identifier: the page a row lives on and its slot within that page.
/// Slots are stable for the lifetime of a row, so a `Rid` can be used as a
/// key for index values and version links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.page_id, self.slot)
    }
}
