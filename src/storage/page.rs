use crate::error::{DbError, DbResult};

pub const PAGE_HEADER_SIZE: usize = 16;
const SLOT_COUNT_SIZE: usize = 2;
const SLOT_ENTRY_SIZE: usize = 4;

/// Fixed page header: flags, a reserved word, and the LSN of the last
/// modification (used to make redo application idempotent).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageHeader {
    pub flags: u32,
    pub reserved: u32,
    pub lsn: u64,
}

impl PageHeader {
    pub fn serialize(&self) -> [u8; PAGE_HEADER_SIZE] {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.flags.to_le_bytes());
        buf[4..8].copy_from_slice(&self.reserved.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lsn.to_le_bytes());
        buf
    }

    pub fn deserialize(buf: &[u8]) -> DbResult<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(DbError::Page("page header truncated".to_string()));
        }
        let mut u32buf = [0u8; 4];
        let mut u64buf = [0u8; 8];
        u32buf.copy_from_slice(&buf[0..4]);
        let flags = u32::from_le_bytes(u32buf);
        u32buf.copy_from_slice(&buf[4..8]);
        let reserved = u32::from_le_bytes(u32buf);
        u64buf.copy_from_slice(&buf[8..16]);
        let lsn = u64::from_le_bytes(u64buf);
        Ok(Self {
            flags,
            reserved,
            lsn,
        })
    }
}

/// One slot directory entry. `length == 0` marks a deleted (or moved)
/// tuple; the payload bytes stay in the heap until compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub length: u16,
}

/// A slotted page: header, slot directory growing forward, tuple heap
/// growing backward from the page end. Slot ids are stable for the
/// lifetime of the page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    header: PageHeader,
    slots: Vec<Slot>,
    /// Raw page buffer; the heap region holds the tuple payloads at
    /// their slot offsets.
    data: Vec<u8>,
    /// Lowest heap offset handed out so far.
    heap_start: usize,
}

impl Page {
    pub fn new(page_size: usize) -> Self {
        Self {
            header: PageHeader::default(),
            slots: Vec::new(),
            data: vec![0u8; page_size],
            heap_start: page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_directory_end(&self, slot_count: usize) -> usize {
        PAGE_HEADER_SIZE + SLOT_COUNT_SIZE + SLOT_ENTRY_SIZE * slot_count
    }

    /// Whether a payload of `length` bytes (plus its slot entry) still
    /// fits on this page.
    pub fn has_room(&self, length: usize) -> bool {
        length <= self.heap_start
            && self.slot_directory_end(self.slots.len() + 1) <= self.heap_start - length
    }

    pub fn insert(&mut self, payload: &[u8]) -> DbResult<u16> {
        if !self.has_room(payload.len()) {
            return Err(DbError::Page(format!(
                "no room for {} bytes (free: {})",
                payload.len(),
                self.heap_start
                    .saturating_sub(self.slot_directory_end(self.slots.len() + 1)),
            )));
        }
        let offset = self.heap_start - payload.len();
        self.data[offset..offset + payload.len()].copy_from_slice(payload);
        self.heap_start = offset;
        self.slots.push(Slot {
            offset: offset as u16,
            length: payload.len() as u16,
        });
        Ok((self.slots.len() - 1) as u16)
    }

    /// Returns the payload; an empty vec for a tombstoned slot.
    pub fn select(&self, slot_id: u16) -> DbResult<Vec<u8>> {
        let slot = self
            .slots
            .get(slot_id as usize)
            .ok_or_else(|| DbError::Page(format!("no such slot {}", slot_id)))?;
        if slot.length == 0 {
            return Ok(Vec::new());
        }
        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        Ok(self.data[start..end].to_vec())
    }

    /// In-place update when the new payload fits the old slot; otherwise
    /// the old slot is tombstoned and a fresh slot is returned.
    pub fn update(&mut self, slot_id: u16, payload: &[u8]) -> DbResult<u16> {
        let slot = *self
            .slots
            .get(slot_id as usize)
            .ok_or_else(|| DbError::Page(format!("no such slot {}", slot_id)))?;
        if slot.length == 0 {
            return Err(DbError::Page(format!("slot {} is dead", slot_id)));
        }
        if payload.len() <= slot.length as usize {
            let start = slot.offset as usize;
            self.data[start..start + payload.len()].copy_from_slice(payload);
            self.slots[slot_id as usize].length = payload.len() as u16;
            return Ok(slot_id);
        }
        // allocate first so a full page leaves the old tuple intact
        let new_slot_id = self.insert(payload)?;
        self.slots[slot_id as usize].length = 0;
        Ok(new_slot_id)
    }

    pub fn delete(&mut self, slot_id: u16) -> DbResult<()> {
        let slot = self
            .slots
            .get_mut(slot_id as usize)
            .ok_or_else(|| DbError::Page(format!("no such slot {}", slot_id)))?;
        slot.length = 0;
        Ok(())
    }

    /// Re-create a tuple at a known slot id. Redo and undo application
    /// must reproduce exact locations, including on pages that never made
    /// it to disk, so missing intermediate slots are filled with
    /// tombstones.
    pub fn restore_slot(&mut self, slot_id: u16, payload: &[u8]) -> DbResult<()> {
        while self.slots.len() < slot_id as usize {
            self.slots.push(Slot {
                offset: 0,
                length: 0,
            });
        }
        if self.slots.len() == slot_id as usize {
            let assigned = self.insert(payload)?;
            debug_assert_eq!(assigned, slot_id);
            return Ok(());
        }
        let slot = self.slots[slot_id as usize];
        if payload.len() <= slot.length as usize {
            let start = slot.offset as usize;
            self.data[start..start + payload.len()].copy_from_slice(payload);
            self.slots[slot_id as usize].length = payload.len() as u16;
            return Ok(());
        }
        if !self.has_room(payload.len()) {
            return Err(DbError::Page("no room to restore tuple".to_string()));
        }
        let offset = self.heap_start - payload.len();
        self.data[offset..offset + payload.len()].copy_from_slice(payload);
        self.heap_start = offset;
        self.slots[slot_id as usize] = Slot {
            offset: offset as u16,
            length: payload.len() as u16,
        };
        Ok(())
    }

    pub fn set_header(&mut self, flags: u32) {
        self.header.flags = flags;
    }

    pub fn lsn(&self) -> u64 {
        self.header.lsn
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        self.header.lsn = lsn;
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.data.clone();
        buf[0..PAGE_HEADER_SIZE].copy_from_slice(&self.header.serialize());
        let count_at = PAGE_HEADER_SIZE;
        buf[count_at..count_at + SLOT_COUNT_SIZE]
            .copy_from_slice(&(self.slots.len() as u16).to_le_bytes());
        for (i, slot) in self.slots.iter().enumerate() {
            let at = PAGE_HEADER_SIZE + SLOT_COUNT_SIZE + i * SLOT_ENTRY_SIZE;
            buf[at..at + 2].copy_from_slice(&slot.offset.to_le_bytes());
            buf[at + 2..at + 4].copy_from_slice(&slot.length.to_le_bytes());
        }
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> DbResult<Self> {
        let header = PageHeader::deserialize(bytes)?;
        if bytes.len() < PAGE_HEADER_SIZE + SLOT_COUNT_SIZE {
            return Err(DbError::Page("page truncated".to_string()));
        }
        let mut u16buf = [0u8; 2];
        u16buf.copy_from_slice(&bytes[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + SLOT_COUNT_SIZE]);
        let slot_count = u16::from_le_bytes(u16buf) as usize;
        if PAGE_HEADER_SIZE + SLOT_COUNT_SIZE + slot_count * SLOT_ENTRY_SIZE > bytes.len() {
            return Err(DbError::Page("slot directory out of bounds".to_string()));
        }
        let mut slots = Vec::with_capacity(slot_count);
        let mut heap_start = bytes.len();
        for i in 0..slot_count {
            let at = PAGE_HEADER_SIZE + SLOT_COUNT_SIZE + i * SLOT_ENTRY_SIZE;
            u16buf.copy_from_slice(&bytes[at..at + 2]);
            let offset = u16::from_le_bytes(u16buf);
            u16buf.copy_from_slice(&bytes[at + 2..at + 4]);
            let length = u16::from_le_bytes(u16buf);
            if offset as usize + length as usize > bytes.len() {
                return Err(DbError::Page("slot points out of page".to_string()));
            }
            // tombstones keep their heap space until compaction; only
            // the zero-offset fillers from slot restoration hold none
            if length > 0 || offset > 0 {
                heap_start = heap_start.min(offset as usize);
            }
            slots.push(Slot { offset, length });
        }
        Ok(Self {
            header,
            slots,
            data: bytes.to_vec(),
            heap_start,
        })
    }
}
