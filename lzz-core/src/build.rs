//! Append-only construction of archives in memory.
//!
//! Entries are emitted in marker order and only the newest entry can be
//! extended; the stream is solid, so there is no editing in the middle.
//! [`Archive::finalize`] settles everything that is only known at the end:
//! entry 0's totals, the stop chunk, and the ELF CRC payloads.

use crate::archive::entry::payload_len;
use crate::archive::model::Archive;
use crate::chunk::{
    CHUNK_INFO, Chunk, DATA_BINARY, INFO_CHUNK_LIMIT, INFO_CONTENT_COUNT, INFO_ELF_CRC,
    INFO_EXTENSION, INFO_INHERIT, INFO_MIME, INFO_TOTAL_DATA_SIZE, INFO_TOTAL_SIZE, INFO_UID,
    aligned_len, elf_hash, u48_parts,
};
use crate::context::Context;
use crate::error::{LzzError, Result};
use std::sync::Arc;

/// Largest data payload one block header can describe, kept chunk-aligned.
const MAX_DATA_BLOCK: usize = 0xFFFC;

pub const NODATA_EXTENSION: &str = "nodata";

fn arena_full() -> LzzError {
    LzzError::Format("fixed archive arena exhausted".to_string())
}

impl Archive {
    /// An empty archive whose entry 0 carries the required metadata: the
    /// title tag, CONTENT COUNT, TOTAL SIZE and the `nodata` extension.
    /// Counts and sizes are settled by [`Archive::finalize`].
    pub fn create(ctx: Arc<Context>, title: &str) -> Result<Archive> {
        let mut arc = Archive::new(ctx);
        arc.begin(0)?;
        arc.emit_info_u32(INFO_CONTENT_COUNT, 0)?;
        arc.emit_info_u48(INFO_TOTAL_SIZE, 0)?;
        arc.emit_extension(NODATA_EXTENSION)?;
        arc.emit_tag("title", title, 0)?;
        Ok(arc)
    }

    /// A `nodata` entry: a titled anchor other entries can inherit tags
    /// from. Returns the new marker ID.
    pub fn add_folder(&mut self, title: &str) -> Result<u32> {
        if title.len() > 255 {
            return Err(LzzError::Format("title over 255 bytes".to_string()));
        }
        let id = self.begin_next()?;
        let uid = self.next_uid;
        self.next_uid += 1;
        self.emit_info_u32(INFO_UID, uid)?;
        self.emit_extension(NODATA_EXTENSION)?;
        self.emit_tag("title", title, 0)?;
        self.emit_crc_slot()?;
        Ok(id)
    }

    /// A content entry. `extension` is at most 6 ASCII bytes, dot included;
    /// non-`nodata` entries always carry a TOTAL DATA SIZE info, even for
    /// empty data. Returns the new marker ID.
    pub fn add_entry(
        &mut self,
        title: &str,
        extension: &str,
        mime: &str,
        uid: Option<u32>,
        data: Option<&[u8]>,
    ) -> Result<u32> {
        if extension.len() > 6 || !extension.is_ascii() {
            return Err(LzzError::Format(format!(
                "extension must be at most 6 ascii bytes: {extension:?}"
            )));
        }
        if title.len() > 255 {
            return Err(LzzError::Format("title over 255 bytes".to_string()));
        }
        let id = self.begin_next()?;
        let uid = match uid {
            Some(u) => {
                self.next_uid = self.next_uid.max(u + 1);
                u
            }
            None => {
                let u = self.next_uid;
                self.next_uid += 1;
                u
            }
        };
        self.emit_info_u32(INFO_UID, uid)?;
        self.emit_extension(extension)?;
        if extension != NODATA_EXTENSION {
            self.emit_info_u48(
                INFO_TOTAL_DATA_SIZE,
                data.map_or(0, |d| d.len() as u64),
            )?;
        }
        if !mime.is_empty() {
            self.emit_mime(mime)?;
        }
        self.emit_tag("title", title, 0)?;
        if let Some(data) = data {
            for block in data.chunks(MAX_DATA_BLOCK) {
                self.emit_payload(Chunk::data_header(DATA_BINARY, block.len() as u16), block)?;
            }
        }
        self.emit_crc_slot()?;
        Ok(id)
    }

    /// Attach a tag to the newest entry. Name and value are each capped at
    /// 255 UTF-8 bytes; byte 3 of the header is free for the caller.
    pub fn add_tag(&mut self, name: &str, value: &str, user: u8) -> Result<()> {
        self.emit_tag(name, value, user)
    }

    /// Mark the newest entry as inheriting tags from the entry with `uid`.
    pub fn set_inherit(&mut self, uid: u32) -> Result<()> {
        self.emit_info_u32(INFO_INHERIT, uid)
    }

    /// Settle the end-of-stream state: patch entry 0's CONTENT COUNT and
    /// TOTAL SIZE, append the stop chunk when missing, then recompute every
    /// ELF CRC payload in one forward pass. Scanned archives are already
    /// settled; finalizing is for archives built in memory.
    pub fn finalize(&mut self) -> Result<()> {
        if self.is_empty() {
            return Err(LzzError::Format("archive has no entries".to_string()));
        }

        if !self.ends_with_stop() {
            if self.len() > 1 {
                self.emit_crc_slot()?;
            }
            let last = self.len() - 1;
            self.push_chunk(last, Chunk::STOP).map_err(|_| arena_full())?;
        }

        let count = self.len() as u32;
        let total = self.total_bytes();
        self.patch_entry0(count, total);
        self.recompute_crcs();
        Ok(())
    }

    fn ends_with_stop(&self) -> bool {
        self.entry_bytes(self.len() - 1)
            .and_then(|b| b.len().checked_sub(4).map(|at| Chunk::read(&b[at..]).is_stop()))
            .unwrap_or(false)
    }

    fn begin(&mut self, id: u32) -> Result<()> {
        self.begin_entry(id as usize, Chunk::marker(id))
            .map_err(|_| arena_full())
    }

    fn begin_next(&mut self) -> Result<u32> {
        if self.is_empty() {
            return Err(LzzError::Format(
                "archive metadata entry missing; build with Archive::create".to_string(),
            ));
        }
        let id = self.len() as u32;
        self.begin(id)?;
        Ok(id)
    }

    /// Header plus padded payload onto the newest entry.
    fn emit_payload(&mut self, header: Chunk, payload: &[u8]) -> Result<()> {
        let last = self.len() - 1;
        self.push_chunk(last, header).map_err(|_| arena_full())?;
        self.push_bytes(last, payload).map_err(|_| arena_full())?;
        let pad = aligned_len(payload.len()) - payload.len();
        if pad > 0 {
            self.push_bytes(last, &[0u8; 3][..pad])
                .map_err(|_| arena_full())?;
        }
        Ok(())
    }

    fn emit_tag(&mut self, name: &str, value: &str, user: u8) -> Result<()> {
        if self.is_empty() {
            return Err(LzzError::Format("archive has no entries".to_string()));
        }
        if name.len() > 255 || value.len() > 255 {
            return Err(LzzError::Format(format!(
                "tag name/value over 255 bytes: {name:?}"
            )));
        }
        let header = Chunk::tag_header(name.len() as u8, value.len() as u8, user);
        let mut payload = Vec::with_capacity(name.len() + value.len());
        payload.extend_from_slice(name.as_bytes());
        payload.extend_from_slice(value.as_bytes());
        self.emit_payload(header, &payload)
    }

    fn emit_info_u32(&mut self, code: u8, value: u32) -> Result<()> {
        self.emit_payload(Chunk::info_header(code, 0, 0), &value.to_le_bytes())
    }

    fn emit_info_u48(&mut self, code: u8, value: u64) -> Result<()> {
        let (lo, payload) = u48_parts(value);
        self.emit_payload(Chunk::info_header(code, lo[0], lo[1]), &payload.0)
    }

    fn emit_extension(&mut self, extension: &str) -> Result<()> {
        let mut six = [0u8; 6];
        six[..extension.len()].copy_from_slice(extension.as_bytes());
        self.emit_payload(Chunk::info_header(INFO_EXTENSION, six[0], six[1]), &six[2..])
    }

    fn emit_mime(&mut self, mime: &str) -> Result<()> {
        let chunks = aligned_len(mime.len()) / 4;
        if chunks as u16 > INFO_CHUNK_LIMIT {
            return Err(LzzError::Format("mime type too long".to_string()));
        }
        let header = Chunk::info_header(INFO_MIME, chunks as u8, (chunks >> 8) as u8);
        let last = self.len() - 1;
        self.push_chunk(last, header).map_err(|_| arena_full())?;
        self.push_bytes(last, mime.as_bytes()).map_err(|_| arena_full())?;
        let pad = chunks * 4 - mime.len();
        if pad > 0 {
            self.push_bytes(last, &[0u8; 3][..pad])
                .map_err(|_| arena_full())?;
        }
        Ok(())
    }

    /// A zeroed ELF CRC info; the value is settled in `finalize`.
    fn emit_crc_slot(&mut self) -> Result<()> {
        self.emit_info_u32(INFO_ELF_CRC, 0)
    }

    fn patch_entry0(&mut self, count: u32, total: u64) {
        let bytes = self.entry_bytes_mut(0);
        let mut off = 0;
        while off + 4 <= bytes.len() {
            let header = Chunk::read(&bytes[off..]);
            let plen = payload_len(header).min(bytes.len() - off - 4);
            if header.kind() == CHUNK_INFO && plen >= 4 {
                match header.0[1] {
                    INFO_CONTENT_COUNT => {
                        bytes[off + 4..off + 8].copy_from_slice(&count.to_le_bytes());
                    }
                    INFO_TOTAL_SIZE => {
                        let (lo, payload) = u48_parts(total);
                        bytes[off + 2] = lo[0];
                        bytes[off + 3] = lo[1];
                        bytes[off + 4..off + 8].copy_from_slice(&payload.0);
                    }
                    _ => {}
                }
            }
            off += 4 + plen;
        }
    }

    /// One forward pass over the whole chunk stream. Each CRC payload is
    /// set to the rolling hash of everything before its own header, then
    /// the patched bytes feed the hash like any other chunk.
    fn recompute_crcs(&mut self) {
        let mut hash = 0u32;
        for i in 0..self.len() {
            let bytes = self.entry_bytes_mut(i);
            let mut off = 0;
            while off + 4 <= bytes.len() {
                let header = Chunk::read(&bytes[off..]);
                let plen = payload_len(header).min(bytes.len() - off - 4);
                if header.kind() == CHUNK_INFO && header.0[1] == INFO_ELF_CRC && plen >= 4 {
                    bytes[off + 4..off + 8].copy_from_slice(&hash.to_le_bytes());
                }
                hash = elf_hash(hash, &bytes[off..off + 4 + plen]);
                off += 4 + plen;
            }
        }
    }
}
