//! End-to-end laws: build, write, detect, rescan.

use lzz_core::archive::model::Archive;
use lzz_core::chunk::Chunk;
use lzz_core::context::{Context, CustomChunk, LockHooks, RawLock};
use lzz_core::error::LzzError;
use lzz_core::io::lz4f::Lz4Reader;
use lzz_core::io::mem::{BorrowedIo, MemIo};
use lzz_core::scan::{ScanOptions, scan_file, scan_io, scan_memory, scan_memory_into};
use lzz_core::write::{WriteMode, write_file, write_io, write_memory};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

fn ctx() -> Arc<Context> {
    Arc::new(Context::new())
}

fn sample_archive(ctx: &Arc<Context>) -> Archive {
    let mut arc = Archive::create(ctx.clone(), "sample archive").unwrap();
    arc.add_folder("docs").unwrap();
    arc.add_entry(
        "docs/readme.md",
        ".md",
        "text/markdown",
        None,
        Some(b"# lzz\nsolid archives\n"),
    )
    .unwrap();
    arc.add_entry("logo.png", ".png", "image/png", None, Some(&[0x89u8; 300]))
        .unwrap();
    arc.finalize().unwrap();
    arc
}

/// Structural equivalence: same entries, same preserved chunks.
fn assert_same_archive(a: &Archive, b: &Archive) {
    assert_eq!(a.len(), b.len());
    for i in 0..a.len() {
        assert_eq!(a.entry_bytes(i).unwrap(), b.entry_bytes(i).unwrap(), "entry {i}");
    }
}

#[test]
fn scan_of_flat_write_is_structurally_equivalent() {
    let ctx = ctx();
    let arc = sample_archive(&ctx);
    let bytes = write_memory(&arc, WriteMode::Flat).unwrap();
    let back = scan_memory(&ctx, &bytes, ScanOptions::full());
    assert!(back.log().is_empty(), "{:?}", back.log().iter().collect::<Vec<_>>());
    assert_same_archive(&arc, &back);

    // And the rescan re-serializes byte-identically.
    assert_eq!(write_memory(&back, WriteMode::Flat).unwrap(), bytes);
}

#[test]
fn lz4_transparency_law() {
    let ctx = ctx();
    let arc = sample_archive(&ctx);

    // scan(lz4(write(a, FLAT))) == scan(write(a, FAST))
    let flat = write_memory(&arc, WriteMode::Flat).unwrap();
    let fast = write_memory(&arc, WriteMode::Fast).unwrap();
    assert_ne!(flat, fast);

    let via_fast = scan_memory(&ctx, &fast, ScanOptions::full());
    assert!(via_fast.log().is_empty());
    let via_flat = scan_memory(&ctx, &flat, ScanOptions::full());
    assert_same_archive(&via_flat, &via_fast);

    // HC frames decode to the same archive as well.
    let hc = write_memory(&arc, WriteMode::Hc).unwrap();
    let via_hc = scan_memory(&ctx, &hc, ScanOptions::full());
    assert_same_archive(&via_fast, &via_hc);
}

#[test]
fn file_detection_covers_both_extensions() {
    let ctx = ctx();
    let arc = sample_archive(&ctx);
    let dir = tempfile::tempdir().unwrap();

    let uzz = dir.path().join("sample.uzz");
    write_file(&arc, WriteMode::Flat, &uzz).unwrap();
    let back = scan_file(&ctx, &uzz, ScanOptions::full());
    assert!(back.log().is_empty());
    assert_same_archive(&arc, &back);

    let lzz = dir.path().join("sample.lzz");
    write_file(&arc, WriteMode::Hc, &lzz).unwrap();
    let back = scan_file(&ctx, &lzz, ScanOptions::full());
    assert!(back.log().is_empty());
    assert_same_archive(&arc, &back);

    // Anything else is refused at the magic check.
    let junk = dir.path().join("junk.bin");
    std::fs::write(&junk, b"PK\x03\x04not an archive").unwrap();
    let bad = scan_file(&ctx, &junk, ScanOptions::full());
    assert!(bad.log().get(0).unwrap().contains("Unknown file format."));
}

#[test]
fn flat_write_fits_a_borrowed_buffer_of_exact_size() {
    let ctx = ctx();
    let arc = sample_archive(&ctx);
    let total = arc.total_bytes() as usize;

    let mut buf = vec![0u8; total];
    let mut io = BorrowedIo::writer(&mut buf);
    let written = write_io(&arc, &mut io).unwrap();
    assert_eq!(written as usize, total);
    let back = scan_memory(&ctx, &buf, ScanOptions::full());
    assert_same_archive(&arc, &back);

    // One byte short: the remote buffer refuses to expand.
    let mut small = vec![0u8; total - 1];
    let mut io = BorrowedIo::writer(&mut small);
    let err = write_io(&arc, &mut io).unwrap_err();
    assert!(err.to_string().contains("remote buffer"));
}

#[test]
fn scan_into_reuses_an_archive_after_reset() {
    let ctx = ctx();
    let arc = sample_archive(&ctx);
    let bytes = write_memory(&arc, WriteMode::Flat).unwrap();

    let mut target = Archive::new(ctx.clone());
    scan_memory_into(&mut target, &bytes, ScanOptions::full());
    assert_eq!(target.len(), 4);

    target.reset();
    scan_memory_into(&mut target, &bytes, ScanOptions::full());
    assert_eq!(target.len(), 4);
    assert!(target.log().is_empty());
    assert_same_archive(&arc, &target);
}

struct Recorder {
    seen: Mutex<Vec<(u8, Vec<u8>)>>,
    over_ask: bool,
}

impl CustomChunk for Recorder {
    fn probe(&self, _arc: &Archive, _header: Chunk, declared_chunks: usize) -> usize {
        if self.over_ask {
            declared_chunks + 1
        } else {
            declared_chunks
        }
    }

    fn consume(&self, _arc: &Archive, header: Chunk, payload: &[u8]) {
        self.seen
            .lock()
            .unwrap()
            .push((header.kind(), payload.to_vec()));
    }
}

fn canonical_with_custom(code: u8, payload: &[u8]) -> Vec<u8> {
    let ctx = ctx();
    let mut arc = Archive::create(ctx, "").unwrap();
    arc.finalize().unwrap();
    let mut bytes = write_memory(&arc, WriteMode::Flat).unwrap();
    // Splice a custom chunk in front of the stop chunk.
    let stop = bytes.len() - 4;
    let mut tail = vec![code, 0, payload.len() as u8, (payload.len() >> 8) as u8];
    tail.extend_from_slice(payload);
    tail.extend_from_slice(&Chunk::STOP.0);
    bytes.truncate(stop);
    bytes.extend_from_slice(&tail);
    bytes
}

#[test]
fn custom_chunks_probe_then_consume() {
    let mut c = Context::new();
    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
        over_ask: false,
    });
    struct Fwd(Arc<Recorder>);
    impl CustomChunk for Fwd {
        fn probe(&self, a: &Archive, h: Chunk, n: usize) -> usize {
            self.0.probe(a, h, n)
        }
        fn consume(&self, a: &Archive, h: Chunk, p: &[u8]) {
            self.0.consume(a, h, p)
        }
    }
    c.set_custom(0x42, Box::new(Fwd(recorder.clone())));
    let ctx = Arc::new(c);

    let bytes = canonical_with_custom(0x42, b"user data");
    let arc = scan_memory(&ctx, &bytes, ScanOptions::full());
    assert!(arc.log().is_empty(), "{:?}", arc.log().iter().collect::<Vec<_>>());

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, 0x42);
    // Payload arrives aligned; the declared length is in the header.
    assert_eq!(&seen[0].1[..9], b"user data");
}

#[test]
fn unregistered_custom_chunks_are_skipped() {
    let bytes = canonical_with_custom(0x42, b"user data");
    let arc = scan_memory(&ctx(), &bytes, ScanOptions::full());
    assert!(arc.log().is_empty());
    // Skipped wholesale: nothing of type 0x42 was preserved.
    let kept = arc.entry_bytes(0).unwrap();
    assert!(kept.chunks(4).all(|c| c[0] != 0x42));
}

#[test]
fn over_asking_custom_handler_is_logged_and_skipped() {
    let mut c = Context::new();
    c.set_custom(
        0x42,
        Box::new(Recorder {
            seen: Mutex::new(Vec::new()),
            over_ask: true,
        }),
    );
    let ctx = Arc::new(c);
    let bytes = canonical_with_custom(0x42, b"user data");
    let arc = scan_memory(&ctx, &bytes, ScanOptions::full());
    assert_eq!(arc.log().len(), 1);
    assert!(
        arc.log()
            .get(0)
            .unwrap()
            .contains("custom chunk read request too long")
    );
    // The stream stayed in sync: the stop chunk was still found.
    let kept = arc.entry_bytes(0).unwrap();
    assert!(Chunk::read(&kept[kept.len() - 4..]).is_stop());
}

struct CountingLocks {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

struct CountingLock {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl RawLock for CountingLock {
    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }
    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl LockHooks for CountingLocks {
    fn create(&self) -> Arc<dyn RawLock> {
        Arc::new(CountingLock {
            acquired: self.acquired.clone(),
            released: self.released.clone(),
        })
    }
}

#[test]
fn lock_hooks_wrap_scan_and_write() {
    let acquired = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let mut c = Context::new();
    c.set_lock_hooks(Box::new(CountingLocks {
        acquired: acquired.clone(),
        released: released.clone(),
    }));
    let ctx = Arc::new(c);

    let mut arc = Archive::create(ctx.clone(), "locked").unwrap();
    arc.finalize().unwrap();
    let bytes = write_memory(&arc, WriteMode::Flat).unwrap();
    let back = scan_memory(&ctx, &bytes, ScanOptions::full());
    assert!(back.log().is_empty());

    // One pair for the write, one for the scan.
    assert_eq!(acquired.load(Ordering::SeqCst), 2);
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[test]
fn scan_io_reads_from_an_owned_memory_adapter() {
    let ctx = ctx();
    let arc = sample_archive(&ctx);
    let bytes = write_memory(&arc, WriteMode::Flat).unwrap();
    let mut io = MemIo::from_vec(&ctx, bytes);
    let back = scan_io(&ctx, &mut io, ScanOptions::full());
    assert!(back.log().is_empty());
    assert_same_archive(&arc, &back);
}

#[test]
fn direction_misuse_reaches_the_reporter() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut c = Context::new();
    let sink = hits.clone();
    c.set_reporter(Box::new(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    }));
    let ctx = Arc::new(c);

    let mut arc = Archive::create(ctx.clone(), "t").unwrap();
    arc.finalize().unwrap();
    let frame = write_memory(&arc, WriteMode::Fast).unwrap();

    // Writing through a read-mode adapter is a configuration error.
    let mut rd = Lz4Reader::from_slice(&frame).unwrap();
    let err = write_io(&arc, &mut rd).unwrap_err();
    assert!(matches!(err, LzzError::Config(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn allocation_counter_observes_growth() {
    let ctx = ctx();
    let before = ctx.bytes_allocated();
    let arc = sample_archive(&ctx);
    assert!(ctx.bytes_allocated() > before);
    let _ = write_memory(&arc, WriteMode::Flat).unwrap();
    assert!(ctx.bytes_allocated() > before + arc.total_bytes());
}
