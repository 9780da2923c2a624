//! The in-memory archive: an ordered entry table, each entry holding the
//! raw chunks preserved for it, plus the bounded error log.
//!
//! Two memory models share one type. Dynamic archives give every entry its
//! own growable chunk array; fixed archives carve all entries out of a
//! single preallocated arena addressed by `(start, len)` ranges, so the
//! whole chunk region is one contiguous byte span that can be written out
//! in a single call. Ranges rather than borrowed views: growth can never
//! invalidate them.

use crate::archive::entry::EntryView;
use crate::archive::errlog::ErrorLog;
use crate::chunk::Chunk;
use crate::context::{Context, RawLock};
use std::sync::Arc;

/// Dynamic entry chunk arrays start at 64 KiB and double to 8 MiB, then
/// grow linearly by that step.
const ENTRY_INITIAL_BYTES: usize = 64 * 1024;
const ENTRY_DOUBLE_CEIL_BYTES: usize = 8 * 1024 * 1024;

/// Dynamic entry tables start at 32 slots, double to 1024, then add 1024.
const TABLE_INITIAL: usize = 32;
const TABLE_DOUBLE_CEIL: usize = 1024;

pub(crate) enum EntryStore {
    Dynamic(Vec<u8>),
    Arena { start: usize, len: usize },
}

pub struct Entry {
    pub(crate) store: EntryStore,
}

struct Arena {
    bytes: Vec<u8>,
    cap: usize,
}

/// Raised when a fixed arena or fixed entry table runs out of room; the
/// parser turns it into the fatal structural diagnostic.
pub(crate) struct CapacityExceeded;

pub struct Archive {
    ctx: Arc<Context>,
    entries: Vec<Entry>,
    arena: Option<Arena>,
    log: ErrorLog,
    lock: Option<Arc<dyn RawLock>>,
    raw_code_lines: bool,
    pub(crate) next_uid: u32,
}

impl Archive {
    /// An empty archive under `ctx`. With a fixed context the whole chunk
    /// arena is allocated here, up front.
    pub fn new(ctx: Arc<Context>) -> Archive {
        let arena = if ctx.is_fixed() {
            let cap = ctx.blocks_fixed() as usize * 4;
            ctx.account(cap as u64);
            Some(Arena {
                bytes: Vec::with_capacity(cap),
                cap,
            })
        } else {
            None
        };
        let table_cap = if ctx.is_fixed() {
            ctx.entries_fixed() as usize
        } else {
            TABLE_INITIAL
        };
        ctx.account((table_cap * std::mem::size_of::<Entry>()) as u64);
        let lock = ctx.new_lock();
        Archive {
            ctx,
            entries: Vec::with_capacity(table_cap),
            arena,
            log: ErrorLog::new(),
            lock,
            raw_code_lines: false,
            next_uid: 1,
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn log(&self) -> &ErrorLog {
        &self.log
    }

    pub(crate) fn log_mut(&mut self) -> &mut ErrorLog {
        &mut self.log
    }

    /// Number of entries (marker 0 included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_fixed(&self) -> bool {
        self.arena.is_some()
    }

    /// Total bytes of all preserved chunks, in marker order.
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| self.entry_len(e) as u64)
            .sum()
    }

    pub fn entry(&self, i: usize) -> Option<EntryView<'_>> {
        self.entry_bytes(i)
            .map(|bytes| EntryView::new(bytes, self.raw_code_lines))
    }

    pub fn entries(&self) -> impl Iterator<Item = EntryView<'_>> {
        (0..self.len()).filter_map(|i| self.entry(i))
    }

    pub fn entry_bytes(&self, i: usize) -> Option<&[u8]> {
        let e = self.entries.get(i)?;
        Some(match &e.store {
            EntryStore::Dynamic(v) => v.as_slice(),
            EntryStore::Arena { start, len } => {
                let arena = self.arena.as_ref().expect("arena entry without arena");
                &arena.bytes[*start..*start + *len]
            }
        })
    }

    /// Look an entry up by its UID info chunk (INHERIT resolution).
    pub fn entry_by_uid(&self, uid: u32) -> Option<usize> {
        (0..self.len()).find(|&i| self.entry(i).and_then(|v| v.uid()) == Some(uid))
    }

    /// The arena's contiguous chunk region, when this archive is
    /// arena-backed. This is the single span the writer emits in one call.
    pub fn arena_bytes(&self) -> Option<&[u8]> {
        self.arena.as_ref().map(|a| a.bytes.as_slice())
    }

    /// Clear entries, arena cursor and error log so the same (possibly
    /// preallocated) archive block can host a fresh scan.
    pub fn reset(&mut self) {
        self.entries.clear();
        if let Some(a) = &mut self.arena {
            a.bytes.clear();
        }
        self.log.clear();
        self.next_uid = 1;
    }

    pub(crate) fn set_raw_code_lines(&mut self, raw: bool) {
        self.raw_code_lines = raw;
    }

    pub(crate) fn lock_handle(&self) -> Option<Arc<dyn RawLock>> {
        self.lock.clone()
    }

    fn entry_len(&self, e: &Entry) -> usize {
        match &e.store {
            EntryStore::Dynamic(v) => v.len(),
            EntryStore::Arena { len, .. } => *len,
        }
    }

    /// Open the entry slot for `marker_id`, storing the marker chunk at
    /// offset 0. Slots are dense: marker N always lands in slot N, replacing
    /// whatever a previous scan left there.
    pub(crate) fn begin_entry(
        &mut self,
        marker_id: usize,
        marker: Chunk,
    ) -> Result<(), CapacityExceeded> {
        if self.arena.is_some() {
            if marker_id >= self.ctx.entries_fixed() as usize {
                return Err(CapacityExceeded);
            }
        } else if marker_id >= self.entries.capacity() {
            let old = self.entries.capacity();
            let mut cap = old;
            while marker_id >= cap {
                cap = if cap < TABLE_DOUBLE_CEIL {
                    cap * 2
                } else {
                    cap + TABLE_DOUBLE_CEIL
                };
            }
            self.entries.reserve_exact(cap - self.entries.len());
            self.ctx
                .account(((cap - old) * std::mem::size_of::<Entry>()) as u64);
        }

        let store = if let Some(a) = &self.arena {
            EntryStore::Arena {
                start: a.bytes.len(),
                len: 0,
            }
        } else {
            self.ctx.account(ENTRY_INITIAL_BYTES as u64);
            EntryStore::Dynamic(Vec::with_capacity(ENTRY_INITIAL_BYTES))
        };

        if marker_id < self.entries.len() {
            self.entries[marker_id] = Entry { store };
        } else {
            // Marker ordering is validated by the parser, so this only ever
            // appends the next dense slot.
            self.entries.push(Entry { store });
        }
        self.push_bytes(marker_id, &marker.0)
    }

    /// Append raw chunk bytes to an entry. `bytes.len()` is always a
    /// multiple of 4. Fails only when a fixed arena is out of room.
    pub(crate) fn push_bytes(
        &mut self,
        entry: usize,
        bytes: &[u8],
    ) -> Result<(), CapacityExceeded> {
        match &mut self.entries[entry].store {
            EntryStore::Dynamic(v) => {
                let needed = v.len() + bytes.len();
                if needed > v.capacity() {
                    let old = v.capacity();
                    let mut cap = old.max(ENTRY_INITIAL_BYTES);
                    while needed > cap {
                        cap = if cap < ENTRY_DOUBLE_CEIL_BYTES {
                            cap * 2
                        } else {
                            cap + ENTRY_DOUBLE_CEIL_BYTES
                        };
                    }
                    v.reserve_exact(cap - v.len());
                    self.ctx.account((cap - old) as u64);
                }
                v.extend_from_slice(bytes);
                Ok(())
            }
            EntryStore::Arena { len, .. } => {
                let a = self.arena.as_mut().expect("arena entry without arena");
                if a.bytes.len() + bytes.len() > a.cap {
                    return Err(CapacityExceeded);
                }
                a.bytes.extend_from_slice(bytes);
                *len += bytes.len();
                Ok(())
            }
        }
    }

    pub(crate) fn push_chunk(&mut self, entry: usize, c: Chunk) -> Result<(), CapacityExceeded> {
        self.push_bytes(entry, &c.0)
    }

    /// Mutable view of an entry's bytes (builder patching).
    pub(crate) fn entry_bytes_mut(&mut self, i: usize) -> &mut [u8] {
        match &mut self.entries[i].store {
            EntryStore::Dynamic(v) => v.as_mut_slice(),
            EntryStore::Arena { start, len } => {
                let arena = self.arena.as_mut().expect("arena entry without arena");
                &mut arena.bytes[*start..*start + *len]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{CHUNK_MARKER, Chunk};

    #[test]
    fn dynamic_entries_hold_their_own_chunks() {
        let ctx = Arc::new(Context::new());
        let mut arc = Archive::new(ctx);
        arc.begin_entry(0, Chunk::marker(0)).ok().unwrap();
        arc.push_chunk(0, Chunk([1, 2, 3, 4])).ok().unwrap();
        arc.begin_entry(1, Chunk::marker(1)).ok().unwrap();

        let e0 = arc.entry_bytes(0).unwrap();
        assert_eq!(e0.len(), 8);
        assert_eq!(e0[0], CHUNK_MARKER);
        assert_eq!(&e0[4..], &[1, 2, 3, 4]);
        assert_eq!(arc.entry_bytes(1).unwrap(), Chunk::marker(1).0);
        assert_eq!(arc.total_bytes(), 12);
    }

    #[test]
    fn arena_entries_share_one_contiguous_region() {
        let mut ctx = Context::new();
        ctx.set_fixed(16, 0);
        let mut arc = Archive::new(Arc::new(ctx));
        arc.begin_entry(0, Chunk::marker(0)).ok().unwrap();
        arc.push_chunk(0, Chunk([9, 9, 9, 9])).ok().unwrap();
        arc.begin_entry(1, Chunk::marker(1)).ok().unwrap();

        let arena = arc.arena_bytes().unwrap();
        assert_eq!(arena.len(), 12);
        assert_eq!(arc.entry_bytes(1).unwrap(), Chunk::marker(1).0);
    }

    #[test]
    fn arena_overflow_is_an_error_not_truncation() {
        let mut ctx = Context::new();
        ctx.set_fixed(2, 0); // 8 bytes of arena
        let mut arc = Archive::new(Arc::new(ctx));
        arc.begin_entry(0, Chunk::marker(0)).ok().unwrap();
        arc.push_chunk(0, Chunk([1, 1, 1, 1])).ok().unwrap();
        assert!(arc.push_chunk(0, Chunk([2, 2, 2, 2])).is_err());
        // Nothing was silently dropped.
        assert_eq!(arc.entry_bytes(0).unwrap().len(), 8);
    }

    #[test]
    fn fixed_entry_table_rejects_slot_overflow() {
        let mut ctx = Context::new();
        ctx.set_fixed(64, 1);
        let mut arc = Archive::new(Arc::new(ctx));
        arc.begin_entry(0, Chunk::marker(0)).ok().unwrap();
        assert!(arc.begin_entry(1, Chunk::marker(1)).is_err());
    }

    #[test]
    fn reset_clears_entries_and_arena_cursor() {
        let mut ctx = Context::new();
        ctx.set_fixed(16, 0);
        let mut arc = Archive::new(Arc::new(ctx));
        arc.begin_entry(0, Chunk::marker(0)).ok().unwrap();
        arc.log_mut().push("boom");
        arc.reset();
        assert!(arc.is_empty());
        assert!(arc.log().is_empty());
        assert_eq!(arc.arena_bytes().unwrap().len(), 0);
    }
}
