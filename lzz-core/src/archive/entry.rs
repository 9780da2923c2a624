//! On-demand decoding of an entry's preserved chunks.
//!
//! The parser only records chunks; turning them into titles, extensions,
//! MIME strings, UIDs and data blobs happens here, after the scan, against
//! the borrowed chunk bytes. Unknown chunks are walked over, never an
//! error.

use crate::chunk::{
    self, CHUNK_DATA, CHUNK_INFO, CHUNK_MARKER, CHUNK_STOP, CHUNK_TAG, Chunk, DATA_BINARY,
    DATA_CODE_LINE, DATA_HASH, HASH_SHA256, HASH_SHA256_BYTES, HASH_SHA512, HASH_SHA512_BYTES,
    INFO_CODE_LINES, INFO_CONTENT_COUNT, INFO_ELF_CRC, INFO_EXTENSION, INFO_INHERIT, INFO_MIME,
    INFO_TOTAL_DATA_SIZE, INFO_TOTAL_SIZE, INFO_UID, aligned_len,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HashKind {
    Sha256,
    Sha512,
}

#[derive(Copy, Clone, Debug)]
pub struct Tag<'a> {
    pub name: &'a str,
    pub value: &'a str,
    pub user: u8,
}

/// Borrowed decoding facade over one entry's chunk bytes.
#[derive(Copy, Clone)]
pub struct EntryView<'a> {
    bytes: &'a [u8],
    raw_code_lines: bool,
}

impl<'a> EntryView<'a> {
    pub(crate) fn new(bytes: &'a [u8], raw_code_lines: bool) -> Self {
        EntryView {
            bytes,
            raw_code_lines,
        }
    }

    pub fn chunk_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.bytes.len() / 4
    }

    /// The marker chunk sits at offset 0 of every entry.
    pub fn marker_id(&self) -> u32 {
        Chunk::read(self.bytes).marker_id()
    }

    /// Walk the preserved records: `(header, payload bytes)` pairs.
    fn records(&self) -> RecordIter<'a> {
        RecordIter {
            bytes: self.bytes,
            pos: 0,
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = Tag<'a>> {
        self.records().filter_map(|(h, payload)| {
            if h.kind() != CHUNK_TAG {
                return None;
            }
            let name_len = h.0[1] as usize;
            let value_len = h.0[2] as usize;
            if payload.len() < name_len + value_len {
                return None;
            }
            Some(Tag {
                name: std::str::from_utf8(&payload[..name_len]).ok()?,
                value: std::str::from_utf8(&payload[name_len..name_len + value_len]).ok()?,
                user: h.0[3],
            })
        })
    }

    pub fn tag(&self, name: &str) -> Option<Tag<'a>> {
        self.tags().find(|t| t.name == name)
    }

    pub fn title(&self) -> Option<&'a str> {
        self.tag("title").map(|t| t.value)
    }

    fn info(&self, code: u8) -> Option<(Chunk, &'a [u8])> {
        self.records()
            .find(|(h, _)| h.kind() == CHUNK_INFO && h.0[1] == code)
    }

    fn info_u32(&self, code: u8) -> Option<u32> {
        let (_, payload) = self.info(code)?;
        (payload.len() >= 4).then(|| Chunk::read(payload).value_u32())
    }

    fn info_u48(&self, code: u8) -> Option<u64> {
        let (h, payload) = self.info(code)?;
        (payload.len() >= 4).then(|| chunk::u48_value(h, Chunk::read(payload)))
    }

    pub fn content_count(&self) -> Option<u32> {
        self.info_u32(INFO_CONTENT_COUNT)
    }

    pub fn total_size(&self) -> Option<u64> {
        self.info_u48(INFO_TOTAL_SIZE)
    }

    pub fn total_data_size(&self) -> Option<u64> {
        self.info_u48(INFO_TOTAL_DATA_SIZE)
    }

    pub fn uid(&self) -> Option<u32> {
        self.info_u32(INFO_UID)
    }

    pub fn inherit_uid(&self) -> Option<u32> {
        self.info_u32(INFO_INHERIT)
    }

    pub fn code_line_count(&self) -> Option<u32> {
        self.info_u32(INFO_CODE_LINES)
    }

    /// Value of the last ELF CRC info preserved for this entry.
    pub fn elf_crc(&self) -> Option<u32> {
        self.records()
            .filter(|(h, _)| h.kind() == CHUNK_INFO && h.0[1] == INFO_ELF_CRC)
            .last()
            .and_then(|(_, p)| (p.len() >= 4).then(|| Chunk::read(p).value_u32()))
    }

    /// Six ASCII bytes spread over the header and its payload chunk,
    /// NUL-padded on the wire. `nodata` marks an entry without contents.
    pub fn extension(&self) -> Option<String> {
        let (h, payload) = self.info(INFO_EXTENSION)?;
        if payload.len() < 4 {
            return None;
        }
        let raw = [h.0[2], h.0[3], payload[0], payload[1], payload[2], payload[3]];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(6);
        std::str::from_utf8(&raw[..end]).ok().map(str::to_string)
    }

    pub fn is_nodata(&self) -> bool {
        self.extension().as_deref() == Some("nodata")
    }

    pub fn mime(&self) -> Option<String> {
        let (_, payload) = self.info(INFO_MIME)?;
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        std::str::from_utf8(&payload[..end]).ok().map(str::to_string)
    }

    /// Entry contents, assembled from binary and code-line data blocks with
    /// the alignment padding trimmed. Only present when the scan kept data
    /// payloads (FULL depth).
    pub fn data(&self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        let mut any = false;
        for (h, payload) in self.records() {
            if h.kind() == CHUNK_DATA && (h.0[1] == DATA_BINARY || h.0[1] == DATA_CODE_LINE) {
                let len = (h.len16() as usize).min(payload.len());
                out.extend_from_slice(&payload[..len]);
                any = true;
            }
        }
        any.then_some(out)
    }

    /// One line per code-line data block, terminators trimmed. `None` when
    /// the scan suppressed code-line decoding (the DECODE modifier) or no
    /// code-line blocks were preserved.
    pub fn code_lines(&self) -> Option<Vec<&'a str>> {
        if self.raw_code_lines {
            return None;
        }
        let mut lines = Vec::new();
        for (h, payload) in self.records() {
            if h.kind() == CHUNK_DATA && h.0[1] == DATA_CODE_LINE {
                let len = (h.len16() as usize).min(payload.len());
                let line = std::str::from_utf8(&payload[..len]).ok()?;
                lines.push(line.trim_end_matches(['\r', '\n']));
            }
        }
        (!lines.is_empty()).then_some(lines)
    }

    /// HASH OF DATA blocks as opaque byte spans.
    pub fn data_hashes(&self) -> Vec<(HashKind, &'a [u8])> {
        self.records()
            .filter_map(|(h, payload)| {
                if h.kind() != CHUNK_DATA || h.0[1] != DATA_HASH {
                    return None;
                }
                match h.0[2] {
                    HASH_SHA256 => Some((HashKind::Sha256, &payload[..HASH_SHA256_BYTES])),
                    HASH_SHA512 => Some((HashKind::Sha512, &payload[..HASH_SHA512_BYTES])),
                    _ => None,
                }
            })
            .collect()
    }
}

struct RecordIter<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = (Chunk, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 4 > self.bytes.len() {
            return None;
        }
        let h = Chunk::read(&self.bytes[self.pos..]);
        self.pos += 4;
        let len = payload_len(h).min(self.bytes.len() - self.pos);
        let payload = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Some((h, payload))
    }
}

/// Payload length implied by a header, for walking preserved chunk arrays.
/// Entries only ever hold complete records, so this mirrors the parser's
/// sizing rules.
pub(crate) fn payload_len(h: Chunk) -> usize {
    match h.kind() {
        CHUNK_MARKER | CHUNK_STOP => 0,
        CHUNK_TAG => aligned_len(h.0[1] as usize + h.0[2] as usize),
        CHUNK_INFO => {
            if h.0[1] > 0x7F {
                h.len16() as usize * 4
            } else {
                4
            }
        }
        CHUNK_DATA => match h.0[1] {
            DATA_HASH => match h.0[2] {
                HASH_SHA256 => HASH_SHA256_BYTES,
                HASH_SHA512 => HASH_SHA512_BYTES,
                _ => 0,
            },
            _ => aligned_len(h.len16() as usize),
        },
        _ => aligned_len(h.len16() as usize),
    }
}
