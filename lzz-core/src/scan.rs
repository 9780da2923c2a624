//! Single-pass parser over the chunk stream.
//!
//! Solid compression rules out seeking, so everything happens in one
//! forward walk: read a 4-byte header, decide the payload size from the
//! type byte, then keep or skip the payload according to the scan depth.
//! The error policy is lenient: diagnostics go to the archive's log and the
//! walk continues, except for marker-ordering violations and fixed-arena
//! overflow, which abort.

use crate::archive::model::Archive;
use crate::chunk::{
    CHUNK_DATA, CHUNK_INFO, CHUNK_MARKER, CHUNK_STOP, CHUNK_TAG, Chunk, DATA_HASH, HASH_SHA256,
    HASH_SHA256_BYTES, HASH_SHA512, HASH_SHA512_BYTES, INFO_CHUNK_LIMIT, INFO_ELF_CRC, INFO_MIME,
    MIN_ARCHIVE_BYTES, aligned_len, elf_hash,
};
use crate::context::Context;
use crate::io::{ByteIo, Format, read_full, sniff};
use crate::io::file::FileIo;
use crate::io::lz4f::Lz4Reader;
use crate::io::mem::BorrowedIo;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const READ_NORMAL: u32 = 0;
pub const READ_MINIMAL: u32 = 1;
pub const READ_FULL: u32 = 2;
pub const READ_DECODE: u32 = 1 << 8;
pub const READ_HALT: u32 = 2 << 8;
pub const READ_HALTHASH: u32 = 3 << 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ScanDepth {
    /// Only `title` tags and the core info codes 0x00..=0x07 plus MIME.
    Minimal,
    /// All tag and info chunks; data payloads skipped.
    #[default]
    Normal,
    /// Everything, data payloads included.
    Full,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum HaltPolicy {
    /// Ignore what you don't understand; log and keep walking.
    #[default]
    Lenient,
    /// Any logged error stops the scan.
    OnAnyError,
    /// Only an ELF CRC mismatch stops the scan.
    OnHashMismatch,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct ScanOptions {
    pub depth: ScanDepth,
    pub halt: HaltPolicy,
    /// Suppress code-line decoding on the resulting archive.
    pub raw_code_lines: bool,
}

impl ScanOptions {
    pub fn minimal() -> Self {
        ScanOptions {
            depth: ScanDepth::Minimal,
            ..Default::default()
        }
    }

    pub fn normal() -> Self {
        ScanOptions::default()
    }

    pub fn full() -> Self {
        ScanOptions {
            depth: ScanDepth::Full,
            ..Default::default()
        }
    }

    pub fn with_halt(mut self, halt: HaltPolicy) -> Self {
        self.halt = halt;
        self
    }

    /// Decode the wire flag word: depth in the low byte, modifier field in
    /// the high byte.
    pub fn from_flags(flags: u32) -> Self {
        let depth = match flags & 0xFF {
            READ_MINIMAL => ScanDepth::Minimal,
            READ_FULL => ScanDepth::Full,
            _ => ScanDepth::Normal,
        };
        let mut opts = ScanOptions {
            depth,
            ..Default::default()
        };
        match flags & 0xFF00 {
            READ_DECODE => opts.raw_code_lines = true,
            READ_HALT => opts.halt = HaltPolicy::OnAnyError,
            READ_HALTHASH => opts.halt = HaltPolicy::OnHashMismatch,
            _ => {}
        }
        opts
    }
}

/// Scan a file, sniffing the first four bytes for the LZ4 frame magic.
/// Always returns an archive; consult its error log.
pub fn scan_file(ctx: &Arc<Context>, path: &Path, opts: ScanOptions) -> Archive {
    let mut arc = Archive::new(ctx.clone());
    scan_file_into(&mut arc, path, opts);
    arc
}

pub fn scan_memory(ctx: &Arc<Context>, block: &[u8], opts: ScanOptions) -> Archive {
    let mut arc = Archive::new(ctx.clone());
    scan_memory_into(&mut arc, block, opts);
    arc
}

pub fn scan_io(ctx: &Arc<Context>, io: &mut dyn ByteIo, opts: ScanOptions) -> Archive {
    let mut arc = Archive::new(ctx.clone());
    scan_io_into(&mut arc, io, opts);
    arc
}

/// Scan into an existing archive, reusing its memory. A second scan lands
/// marker N in entry slot N again; call [`Archive::reset`] first for a
/// fresh parse.
pub fn scan_file_into(arc: &mut Archive, path: &Path, opts: ScanOptions) {
    use std::io::Read;
    // Sniff the magic, then hand the file to the matching adapter, which
    // re-opens it from the start.
    let mut head = [0u8; 4];
    let got = match std::fs::File::open(path).and_then(|mut f| f.read(&mut head)) {
        Ok(n) => n,
        Err(e) => {
            arc.log_mut().push(&format!("[0] Open failed: {e}"));
            return;
        }
    };

    match sniff(&head[..got]) {
        Format::Lz4 => match Lz4Reader::open(path) {
            Ok(mut io) => scan_io_into(arc, &mut io, opts),
            Err(e) => {
                arc.log_mut().push(&format!("[0] Open failed: {e}"));
            }
        },
        Format::Raw => match FileIo::open(path) {
            Ok(mut io) => scan_io_into(arc, &mut io, opts),
            Err(e) => {
                arc.log_mut().push(&format!("[0] Open failed: {e}"));
            }
        },
        Format::Unknown => {
            arc.log_mut().push("[0] Open failed: Unknown file format.");
        }
    }
}

pub fn scan_memory_into(arc: &mut Archive, block: &[u8], opts: ScanOptions) {
    if block.len() < MIN_ARCHIVE_BYTES {
        arc.log_mut()
            .push("[0] Open memory failed: Length under 44 bytes.");
        return;
    }
    match sniff(block) {
        Format::Lz4 => match Lz4Reader::from_slice(block) {
            Ok(mut io) => scan_io_into(arc, &mut io, opts),
            Err(e) => {
                arc.log_mut().push(&format!("[0] Open failed: {e}"));
            }
        },
        Format::Raw => {
            let mut io = BorrowedIo::reader(block);
            scan_io_into(arc, &mut io, opts);
        }
        Format::Unknown => {
            arc.log_mut().push("[0] Open failed: Unknown file format.");
        }
    }
}

pub fn scan_io_into(arc: &mut Archive, io: &mut dyn ByteIo, opts: ScanOptions) {
    let lock = arc.lock_handle();
    if let Some(l) = &lock {
        l.acquire();
    }
    debug!(target: "lzz::scan", depth = ?opts.depth, "scan start");
    arc.set_raw_code_lines(opts.raw_code_lines);
    let mut parser = Parser {
        io,
        arc: &mut *arc,
        opts,
        pos: 0,
        hash: 0,
        marker: None,
        cur: None,
        scratch: [0u8; SCRATCH_BYTES],
        saw_stop: false,
        stray_logged: false,
        halted: false,
    };
    parser.run();
    finish(arc);
    debug!(target: "lzz::scan", entries = arc.len(), errors = arc.log().len(), "scan end");
    if let Some(l) = &lock {
        l.release();
    }
}

/// Post-scan bookkeeping: INHERIT targets are resolved by UID lookup and
/// logged (never fatal) when missing or self-referential.
fn finish(arc: &mut Archive) {
    let mut warnings = Vec::new();
    for i in 0..arc.len() {
        let Some(view) = arc.entry(i) else { continue };
        let Some(uid) = view.inherit_uid() else {
            continue;
        };
        match arc.entry_by_uid(uid) {
            Some(target) if target == i => {
                warnings.push(format!("[{i:X}] inherit chunk is self-referential uid {uid:X}"));
            }
            Some(_) => {}
            None => {
                warnings.push(format!("[{i:X}] inherit chunk names unknown uid {uid:X}"));
            }
        }
    }
    for w in warnings {
        arc.log_mut().push(&w);
    }
}

const SCRATCH_BYTES: usize = 8192;

struct Parser<'a> {
    io: &'a mut dyn ByteIo,
    arc: &'a mut Archive,
    opts: ScanOptions,
    pos: u64,
    hash: u32,
    marker: Option<u32>,
    cur: Option<usize>,
    scratch: [u8; SCRATCH_BYTES],
    saw_stop: bool,
    stray_logged: bool,
    halted: bool,
}

impl Parser<'_> {
    fn run(&mut self) {
        loop {
            let mut header = [0u8; 4];
            let got = match read_full(self.io, &mut header) {
                Ok(n) => n,
                Err(e) => {
                    if self.pos == 0 && e.kind() == ErrorKind::Unsupported {
                        // Configuration error: wrong-direction adapter.
                        self.arc.context().report(&e.to_string());
                    }
                    let msg = self
                        .io
                        .last_error()
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string());
                    self.note(&format!("stream read failed: {msg}"));
                    return;
                }
            };
            if got == 0 {
                // Clean end-of-stream.
                if !self.saw_stop && self.opts.halt == HaltPolicy::OnAnyError {
                    self.note("stream ended without stop chunk");
                }
                return;
            }
            if got < 4 {
                self.note("unexpected end of stream mid-chunk");
                return;
            }

            let chunk = Chunk(header);
            let pre_hash = self.hash;
            self.hash = elf_hash(self.hash, &header);
            self.pos += 4;

            match chunk.kind() {
                CHUNK_MARKER => {
                    if !self.on_marker(chunk) {
                        return;
                    }
                }
                CHUNK_STOP => {
                    self.saw_stop = true;
                    if let Some(cur) = self.cur {
                        // The stop chunk belongs to the last entry's array so
                        // a FULL scan re-serializes byte-identically.
                        let _ = self.push(cur, &chunk.0);
                    }
                    return;
                }
                CHUNK_TAG => self.on_tag(chunk),
                CHUNK_INFO => self.on_info(chunk, pre_hash),
                CHUNK_DATA => self.on_data(chunk),
                _ => self.on_custom(chunk),
            }

            if self.halted {
                return;
            }
        }
    }

    /// Returns false when the scan must abort.
    fn on_marker(&mut self, chunk: Chunk) -> bool {
        let id = chunk.marker_id();
        let expected = self.marker.map_or(0, |m| m + 1);
        if id != expected {
            self.log_at(format!(
                "Misformed archive missed expected marker {expected:X}"
            ));
            tracing::warn!(target: "lzz::scan", expected, got = id, "marker ordering violated");
            return false;
        }
        if self.arc.begin_entry(id as usize, chunk).is_err() {
            self.log_at(format!("Too many entries for this fixed archive {}", id + 1));
            return false;
        }
        self.marker = Some(id);
        self.cur = Some(id as usize);
        true
    }

    fn on_tag(&mut self, chunk: Chunk) {
        let sz = chunk.0[1] as usize + chunk.0[2] as usize;
        let len = aligned_len(sz);
        if self.opts.depth != ScanDepth::Minimal {
            self.keep(chunk, len);
        } else {
            // The name decides whether the tag is kept, so the payload is
            // read through scratch either way.
            if self.scan_to_scratch(len) {
                let name_len = chunk.0[1] as usize;
                if name_len >= 5 && self.scratch[..5] == *b"title" {
                    self.keep_scratch(chunk, len);
                }
            }
        }
    }

    fn on_info(&mut self, chunk: Chunk, pre_hash: u32) {
        let code = chunk.0[1];
        let len = if code > 0x7F {
            let chunks = chunk.len16();
            if chunks == 0 || chunks > INFO_CHUNK_LIMIT {
                self.note("info chunk exceeds 2047 size limit");
                if chunks > INFO_CHUNK_LIMIT {
                    self.skip(chunks as usize * 4);
                }
                return;
            }
            chunks as usize * 4
        } else {
            4
        };

        let keep = match self.opts.depth {
            ScanDepth::Minimal => code <= 0x07 || code == INFO_MIME,
            _ => true,
        };
        if !keep {
            self.skip(len);
            return;
        }

        let payload_start = self.cur.and_then(|c| self.arc.entry_bytes(c)).map(|b| b.len());
        self.keep(chunk, len);

        // An ELF CRC carries the running hash of everything before its own
        // header; verify it against the stream state we just passed.
        if code == INFO_ELF_CRC {
            let stored = self.cur.zip(payload_start).and_then(|(cur, start)| {
                let bytes = self.arc.entry_bytes(cur)?;
                (bytes.len() >= start + 8).then(|| Chunk::read(&bytes[start + 4..]).value_u32())
            });
            if let Some(stored) = stored {
                if stored != pre_hash {
                    self.log_at(format!(
                        "elf crc32 mismatch (stream {pre_hash:08X} archive {stored:08X})"
                    ));
                    if matches!(
                        self.opts.halt,
                        HaltPolicy::OnAnyError | HaltPolicy::OnHashMismatch
                    ) {
                        self.halted = true;
                    }
                }
            }
        }
    }

    fn on_data(&mut self, chunk: Chunk) {
        let subtype = chunk.0[1];
        if subtype > DATA_HASH {
            self.note("data chunk type byte invalid");
            return;
        }
        let sz = if subtype == DATA_HASH {
            match chunk.0[2] {
                HASH_SHA256 => HASH_SHA256_BYTES,
                HASH_SHA512 => HASH_SHA512_BYTES,
                _ => {
                    self.note("data hash chunk type byte invalid");
                    return;
                }
            }
        } else {
            chunk.len16() as usize
        };
        let len = aligned_len(sz);
        if self.opts.depth == ScanDepth::Full {
            self.keep(chunk, len);
        } else {
            self.skip(len);
        }
    }

    fn on_custom(&mut self, chunk: Chunk) {
        let declared = chunk.len16() as usize;
        let len = aligned_len(declared);
        let ctx = self.arc.context().clone();
        let Some(handler) = ctx.custom_handler(chunk.kind()) else {
            self.skip(len);
            return;
        };
        if declared as u32 > ctx.custom_limit() {
            self.note("custom chunk exceeds context payload limit");
            self.skip(len);
            return;
        }
        let declared_chunks = len / 4;
        let want = handler.probe(self.arc, chunk, declared_chunks);
        if want == 0 {
            self.skip(len);
            return;
        }
        if want > declared_chunks {
            self.note("custom chunk read request too long");
            self.skip(len);
            return;
        }
        let payload_start = self.cur.and_then(|c| self.arc.entry_bytes(c)).map(|b| b.len());
        self.keep(chunk, len);
        if self.halted {
            return;
        }
        if let (Some(cur), Some(start)) = (self.cur, payload_start) {
            if let Some(bytes) = self.arc.entry_bytes(cur) {
                if bytes.len() >= start + 4 {
                    handler.consume(self.arc, chunk, &bytes[start + 4..]);
                }
            }
        }
    }

    /// Copy header + payload into the current entry, hashing and advancing.
    fn keep(&mut self, header: Chunk, payload_len: usize) {
        let Some(cur) = self.cur else {
            self.stray();
            self.skip(payload_len);
            return;
        };
        if self.push(cur, &header.0).is_err() {
            return;
        }
        let mut left = payload_len;
        while left > 0 {
            let n = left.min(SCRATCH_BYTES);
            match read_full(self.io, &mut self.scratch[..n]) {
                Ok(got) if got == n => {
                    self.hash = elf_hash(self.hash, &self.scratch[..n]);
                    self.pos += n as u64;
                    let chunk_bytes: Vec<u8> = self.scratch[..n].to_vec();
                    if self.push(cur, &chunk_bytes).is_err() {
                        return;
                    }
                }
                _ => {
                    self.note("data chunk read invalid length");
                    self.halted = true;
                    return;
                }
            }
            left -= n;
        }
    }

    /// Append a header plus an already-scanned scratch payload (MINIMAL
    /// title tags; payloads here never exceed the scratch buffer).
    fn keep_scratch(&mut self, header: Chunk, payload_len: usize) {
        let Some(cur) = self.cur else {
            self.stray();
            return;
        };
        if self.push(cur, &header.0).is_ok() {
            let payload: Vec<u8> = self.scratch[..payload_len].to_vec();
            let _ = self.push(cur, &payload);
        }
    }

    fn push(&mut self, cur: usize, bytes: &[u8]) -> Result<(), ()> {
        if self.arc.push_bytes(cur, bytes).is_err() {
            let id = self.marker.map_or(0, |m| m + 1);
            self.log_at(format!("Too many entries for this fixed archive {id}"));
            self.halted = true;
            return Err(());
        }
        Ok(())
    }

    /// Read `len` bytes into scratch, hashing and advancing. `len` must fit
    /// the scratch buffer. Returns false after logging a stream error.
    fn scan_to_scratch(&mut self, len: usize) -> bool {
        match read_full(self.io, &mut self.scratch[..len]) {
            Ok(got) if got == len => {
                self.hash = elf_hash(self.hash, &self.scratch[..len]);
                self.pos += len as u64;
                true
            }
            _ => {
                self.note("data chunk read invalid length");
                self.halted = true;
                false
            }
        }
    }

    /// Advance past `len` payload bytes without retaining them. Skipped
    /// bytes still feed the rolling hash so CRC chunks verify at any depth.
    fn skip(&mut self, len: usize) {
        let mut left = len;
        while left > 0 {
            let n = left.min(SCRATCH_BYTES);
            match read_full(self.io, &mut self.scratch[..n]) {
                Ok(got) if got == n => {
                    self.hash = elf_hash(self.hash, &self.scratch[..n]);
                    self.pos += n as u64;
                }
                _ => {
                    self.note("data chunk stream read error");
                    self.halted = true;
                    return;
                }
            }
            left -= n;
        }
    }

    fn stray(&mut self) {
        if !self.stray_logged {
            self.log_at("chunk precedes first marker".to_string());
            self.stray_logged = true;
        }
    }

    /// Log a recoverable diagnostic and apply the halt policy.
    fn note(&mut self, msg: &str) {
        self.log_at(msg.to_string());
        if self.opts.halt == HaltPolicy::OnAnyError {
            self.halted = true;
        }
    }

    fn log_at(&mut self, msg: String) {
        let pos = self.pos;
        self.arc.log_mut().push(&format!("[{pos:X}] {msg}"));
    }
}
