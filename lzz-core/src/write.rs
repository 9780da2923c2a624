//! Linearize an in-memory archive to any adapter.
//!
//! The output mode only picks the adapter; the write itself is the same
//! either way. Arena-backed archives are one contiguous chunk region and go
//! out in a single call; dynamic archives stream entry arrays back-to-back
//! in marker order. The writer never mutates the archive, so a FULL scan
//! re-serializes byte-identically.

use crate::archive::model::Archive;
use crate::error::{LzzError, Result};
use crate::io::file::FileIo;
use crate::io::lz4f::{Lz4Writer, hc_level};
use crate::io::mem::MemIo;
use crate::io::{ByteIo, write_full};
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

pub const WRITE_FAST: u32 = 0;
pub const WRITE_HC: u32 = 1;
pub const WRITE_FLAT: u32 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Fast LZ4 frame.
    #[default]
    Fast,
    /// High-compression LZ4 frame.
    Hc,
    /// Uncompressed chunk stream.
    Flat,
}

impl WriteMode {
    pub fn from_flag(flag: u32) -> Option<WriteMode> {
        match flag {
            WRITE_FAST => Some(WriteMode::Fast),
            WRITE_HC => Some(WriteMode::Hc),
            WRITE_FLAT => Some(WriteMode::Flat),
            _ => None,
        }
    }
}

/// Write the archive through an already-constructed adapter. The adapter is
/// not closed; callers that own it decide when the frame ends. Returns the
/// raw (pre-compression) byte count.
pub fn write_io(arc: &Archive, io: &mut dyn ByteIo) -> Result<u64> {
    let lock = arc.lock_handle();
    if let Some(l) = &lock {
        l.acquire();
    }
    let result = write_inner(arc, io);
    if let Some(l) = &lock {
        l.release();
    }
    result
}

fn write_inner(arc: &Archive, io: &mut dyn ByteIo) -> Result<u64> {
    debug!(target: "lzz::write", entries = arc.len(), bytes = arc.total_bytes(), "write start");
    let emit = |io: &mut dyn ByteIo, bytes: &[u8]| -> Result<()> {
        write_full(io, bytes).map_err(|e| {
            if e.kind() == ErrorKind::Unsupported {
                // Wrong-direction adapter: a configuration error by policy.
                arc.context().report(&e.to_string());
                return LzzError::Config(e.to_string());
            }
            match io.last_error() {
                Some(msg) => LzzError::Format(format!("archive write failed: {msg}")),
                None => LzzError::Io(e),
            }
        })
    };

    if let Some(region) = arc.arena_bytes() {
        emit(io, region)?;
        return Ok(region.len() as u64);
    }

    let mut total = 0u64;
    for i in 0..arc.len() {
        let bytes = arc.entry_bytes(i).expect("dense entry table");
        emit(io, bytes)?;
        total += bytes.len() as u64;
    }
    Ok(total)
}

/// Write to a file in the given mode, closing (and for LZ4, finishing) the
/// output. Convention: `.lzz` for framed output, `.uzz` for flat.
pub fn write_file(arc: &Archive, mode: WriteMode, path: &Path) -> Result<u64> {
    write_file_level(arc, mode, 0, path)
}

/// Like [`write_file`] with an HC level adjustment in [-5, +3] (ignored by
/// the other modes).
pub fn write_file_level(arc: &Archive, mode: WriteMode, level: i32, path: &Path) -> Result<u64> {
    let n = match mode {
        WriteMode::Flat => {
            let mut io = FileIo::create(path)?;
            let n = write_io(arc, &mut io)?;
            io.close()?;
            n
        }
        WriteMode::Fast => {
            let mut io = Lz4Writer::create(path)?;
            let n = write_io(arc, &mut io)?;
            io.close()?;
            n
        }
        WriteMode::Hc => {
            let mut io = Lz4Writer::create_hc(path, level)?;
            let n = write_io(arc, &mut io)?;
            io.close()?;
            n
        }
    };
    Ok(n)
}

/// Write to a fresh memory buffer and return the encoded bytes.
pub fn write_memory(arc: &Archive, mode: WriteMode) -> Result<Vec<u8>> {
    match mode {
        WriteMode::Flat => {
            let initial = (arc.total_bytes() as usize).max(64);
            let mut io = MemIo::new(arc.context(), initial, 0);
            write_io(arc, &mut io)?;
            io.close()?;
            Ok(io.into_bytes())
        }
        WriteMode::Fast => {
            let mut io = Lz4Writer::to_vec(0)?;
            write_io(arc, &mut io)?;
            io.close()?;
            Ok(io.into_inner().expect("closed lz4 frame"))
        }
        WriteMode::Hc => {
            let mut io = Lz4Writer::to_vec(hc_level(0))?;
            write_io(arc, &mut io)?;
            io.close()?;
            Ok(io.into_inner().expect("closed lz4 frame"))
        }
    }
}
