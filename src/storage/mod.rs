pub mod access;
pub mod bplus_tree;
pub mod lru;
pub mod page;
pub mod pager;
pub mod tuple;

use serde::{Deserialize, Serialize};

/// Physical address of a tuple inside a table file. Stable under in-place
/// updates; a relocating update yields a new location.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Location {
    pub page_id: u32,
    pub slot_id: u16,
}

impl Location {
    pub fn new(page_id: u32, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_id)
    }
}
