//! LZ4-framed adapters.
//!
//! The frame codec itself is a black box (the `lz4` crate); these adapters
//! wrap it around any inner `std::io` stream so the parser and writer see
//! the same `ByteIo` surface as a flat file. Direction is fixed at
//! construction: a reader drains the decompressor, a writer carries
//! compressor state and finishes the frame on close.

use super::{ByteIo, direction_error};
use lz4::{Decoder, Encoder, EncoderBuilder};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

/// HC default of the frame codec; adjustments ride on top of it.
pub const HC_CLEVEL_DEFAULT: i32 = 9;
pub const HC_ADJUST_MIN: i32 = -5;
pub const HC_ADJUST_MAX: i32 = 3;

/// Map an HC level adjustment in [-5, +3] onto the codec's level scale.
pub fn hc_level(adjust: i32) -> u32 {
    let adjust = adjust.clamp(HC_ADJUST_MIN, HC_ADJUST_MAX);
    (HC_CLEVEL_DEFAULT + adjust) as u32
}

pub struct Lz4Reader<R: Read> {
    dec: Option<Decoder<R>>,
    err: Option<String>,
}

impl Lz4Reader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<'a> Lz4Reader<Cursor<&'a [u8]>> {
    pub fn from_slice(bytes: &'a [u8]) -> io::Result<Self> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read> Lz4Reader<R> {
    /// The decoder consumes the frame header up front, so the inner stream
    /// must start at the `04 22 4D 18` magic.
    pub fn new(inner: R) -> io::Result<Self> {
        Ok(Lz4Reader {
            dec: Some(Decoder::new(inner)?),
            err: None,
        })
    }
}

impl<R: Read> ByteIo for Lz4Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.dec.as_mut() {
            Some(d) => match d.read(buf) {
                Ok(n) => Ok(n),
                Err(e) => {
                    self.err = Some(e.to_string());
                    Err(e)
                }
            },
            None => Ok(0),
        }
    }

    fn write(&mut self, _data: &[u8]) -> io::Result<usize> {
        let e = direction_error("write to a read-mode lz4 adapter");
        self.err = Some(e.to_string());
        Err(e)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(d) = self.dec.take() {
            let (_, result) = d.finish();
            if let Err(e) = result {
                self.err = Some(e.to_string());
                return Err(e);
            }
        }
        Ok(())
    }

    fn last_error(&self) -> Option<&str> {
        self.err.as_deref()
    }
}

pub struct Lz4Writer<W: Write> {
    enc: Option<Encoder<W>>,
    out: Option<W>,
    err: Option<String>,
}

impl Lz4Writer<BufWriter<File>> {
    /// Fast-mode frame writer over a new file.
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?), 0)
    }

    /// HC frame writer; `adjust` is added to the HC default level.
    pub fn create_hc(path: &Path, adjust: i32) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?), hc_level(adjust))
    }
}

impl Lz4Writer<Vec<u8>> {
    pub fn to_vec(level: u32) -> io::Result<Self> {
        Self::new(Vec::new(), level)
    }
}

impl<W: Write> Lz4Writer<W> {
    pub fn new(inner: W, level: u32) -> io::Result<Self> {
        let enc = EncoderBuilder::new().level(level).build(inner)?;
        Ok(Lz4Writer {
            enc: Some(enc),
            out: None,
            err: None,
        })
    }

    /// The inner stream, available once the frame has been closed.
    pub fn into_inner(mut self) -> Option<W> {
        self.out.take()
    }
}

impl<W: Write> ByteIo for Lz4Writer<W> {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        let e = direction_error("read from a write-mode lz4 adapter");
        self.err = Some(e.to_string());
        Err(e)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.enc.as_mut() {
            Some(e) => match e.write(data) {
                Ok(n) => Ok(n),
                Err(e) => {
                    self.err = Some(e.to_string());
                    Err(e)
                }
            },
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "lz4 frame already finished",
            )),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(enc) = self.enc.take() {
            let (mut inner, result) = enc.finish();
            if let Err(e) = result {
                self.err = Some(e.to_string());
                return Err(e);
            }
            inner.flush().inspect_err(|e| {
                self.err = Some(e.to_string());
            })?;
            self.out = Some(inner);
        }
        Ok(())
    }

    fn last_error(&self) -> Option<&str> {
        self.err.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hc_level_clamps_the_adjustment() {
        assert_eq!(hc_level(0), 9);
        assert_eq!(hc_level(-5), 4);
        assert_eq!(hc_level(3), 12);
        assert_eq!(hc_level(-100), 4);
        assert_eq!(hc_level(100), 12);
    }

    #[test]
    fn frame_round_trips_through_memory() {
        let mut w = Lz4Writer::to_vec(0).unwrap();
        w.write(b"solid archive payload, repeated payload payload")
            .unwrap();
        w.close().unwrap();
        let frame = w.into_inner().unwrap();
        assert_eq!(&frame[..4], &super::super::LZ4_FRAME_MAGIC);

        let mut r = Lz4Reader::from_slice(&frame).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"solid archive payload, repeated payload payload");
    }

    #[test]
    fn direction_misuse_is_reported_as_unsupported() {
        let mut w = Lz4Writer::to_vec(0).unwrap();
        assert_eq!(
            w.read(&mut [0u8; 4]).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        let frame = {
            let mut w = Lz4Writer::to_vec(0).unwrap();
            w.write(b"x").unwrap();
            w.close().unwrap();
            w.into_inner().unwrap()
        };
        let mut r = Lz4Reader::from_slice(&frame).unwrap();
        assert_eq!(
            r.write(b"y").unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        assert!(r.last_error().is_some());
    }
}
