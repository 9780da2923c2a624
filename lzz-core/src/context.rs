//! Process-wide customization injected into every archive.
//!
//! A `Context` is configured once, wrapped in an `Arc`, and then shared by
//! every archive, scan and memory adapter it parents. It is never mutated
//! after that point; the only moving part is the byte-allocation counter.

use crate::archive::model::Archive;
use crate::chunk::Chunk;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handler for chunks with a type code in `5..=255`.
///
/// The parser calls `probe` first with the declared payload size; the
/// returned value is the number of payload chunks the handler wants consumed
/// (0 skips the chunk). When non-zero, the payload is read into the current
/// entry and `consume` is called with it. Handlers see the archive in the
/// parser's intermediate state and must not re-enter scanning on it.
pub trait CustomChunk: Send + Sync {
    fn probe(&self, arc: &Archive, header: Chunk, declared_chunks: usize) -> usize;
    fn consume(&self, arc: &Archive, header: Chunk, payload: &[u8]);
}

/// Opt-in locking. When hooks are installed every archive owns one lock,
/// acquired at scan/write entry and released at exit.
pub trait RawLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

pub trait LockHooks: Send + Sync {
    fn create(&self) -> Arc<dyn RawLock>;
}

pub type Reporter = Box<dyn Fn(&str) + Send + Sync>;

/// Entry-slot default when a fixed arena is configured with `entries = 0`.
pub const DEFAULT_ENTRIES_FIXED: u32 = 800;
pub const DEFAULT_CUSTOM_LIMIT: u32 = 4096;

pub struct Context {
    blocks_fixed: u32,
    entries_fixed: u32,
    custom_limit: u32,
    custom: HashMap<u8, Box<dyn CustomChunk>>,
    reporter: Reporter,
    lock_hooks: Option<Box<dyn LockHooks>>,
    bytes_allocated: AtomicU64,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context {
            blocks_fixed: 0,
            entries_fixed: 0,
            custom_limit: DEFAULT_CUSTOM_LIMIT,
            custom: HashMap::new(),
            reporter: Box::new(|msg| {
                eprintln!("{msg}");
                std::process::exit(-1);
            }),
            lock_hooks: None,
            bytes_allocated: AtomicU64::new(0),
        }
    }

    /// Switch to the fixed-arena memory model: every archive created under
    /// this context preallocates `blocks` chunks up front and never grows.
    /// `entries = 0` selects the default entry-table size.
    pub fn set_fixed(&mut self, blocks: u32, entries: u32) {
        self.blocks_fixed = blocks;
        self.entries_fixed = if entries == 0 {
            DEFAULT_ENTRIES_FIXED
        } else {
            entries
        };
    }

    /// Return to dynamically allocated archives.
    pub fn set_dynamic(&mut self) {
        self.blocks_fixed = 0;
    }

    pub fn set_custom(&mut self, type_code: u8, handler: Box<dyn CustomChunk>) {
        self.custom.insert(type_code, handler);
    }

    pub fn set_custom_limit(&mut self, bytes: u32) {
        self.custom_limit = bytes;
    }

    pub fn set_reporter(&mut self, reporter: Reporter) {
        self.reporter = reporter;
    }

    pub fn set_lock_hooks(&mut self, hooks: Box<dyn LockHooks>) {
        self.lock_hooks = Some(hooks);
    }

    pub fn blocks_fixed(&self) -> u32 {
        self.blocks_fixed
    }

    pub fn entries_fixed(&self) -> u32 {
        self.entries_fixed
    }

    pub fn is_fixed(&self) -> bool {
        self.blocks_fixed != 0
    }

    pub fn custom_limit(&self) -> u32 {
        self.custom_limit
    }

    pub(crate) fn custom_handler(&self, type_code: u8) -> Option<&dyn CustomChunk> {
        self.custom.get(&type_code).map(|h| h.as_ref())
    }

    pub(crate) fn new_lock(&self) -> Option<Arc<dyn RawLock>> {
        self.lock_hooks.as_ref().map(|h| h.create())
    }

    /// Route a configuration error through the reporter. The default
    /// reporter writes to stderr and terminates the process; install a
    /// custom one to observe these instead.
    pub fn report(&self, msg: &str) {
        tracing::error!(target: "lzz", "{msg}");
        (self.reporter)(msg);
    }

    /// Accumulating allocation counter, bumped on every growth path (entry
    /// tables, chunk arrays, arenas, owned memory adapters).
    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    pub(crate) fn account(&self, bytes: u64) {
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
    }
}
