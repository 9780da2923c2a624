//! Memory-backed adapters: an owned growable buffer and a borrowed span.

use super::{ByteIo, direction_error};
use crate::context::Context;
use std::io;
use std::sync::Arc;

pub const DEFAULT_MAX_DOUBLE: usize = 1 << 23;

/// Owned buffer. Grows by doubling until `max_double`, then linearly by
/// `max_double` per step; growth is charged to the owning context's
/// allocation counter. The bytes are dropped with the adapter.
pub struct MemIo {
    ctx: Arc<Context>,
    bytes: Vec<u8>,
    pos: usize,
    max_double: usize,
    err: Option<String>,
}

impl MemIo {
    pub fn new(ctx: &Arc<Context>, initial: usize, max_double: usize) -> Self {
        let max_double = if max_double == 0 {
            DEFAULT_MAX_DOUBLE
        } else {
            max_double
        };
        ctx.account(initial as u64);
        MemIo {
            ctx: ctx.clone(),
            bytes: vec![0; initial],
            pos: 0,
            max_double,
            err: None,
        }
    }

    /// Adapter positioned at the start of an existing buffer (read side).
    pub fn from_vec(ctx: &Arc<Context>, bytes: Vec<u8>) -> Self {
        ctx.account(bytes.len() as u64);
        MemIo {
            ctx: ctx.clone(),
            bytes,
            pos: 0,
            max_double: DEFAULT_MAX_DOUBLE,
            err: None,
        }
    }

    /// The written prefix, consuming the adapter.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bytes.truncate(self.pos);
        self.bytes
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn ensure(&mut self, needed: usize) {
        if needed <= self.bytes.len() {
            return;
        }
        let mut nlen = self.bytes.len().max(64);
        while nlen < needed {
            if nlen < self.max_double {
                nlen <<= 1;
            } else {
                nlen += self.max_double;
            }
        }
        self.ctx.account((nlen - self.bytes.len()) as u64);
        self.bytes.resize(nlen, 0);
    }
}

impl ByteIo for MemIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.bytes.len() - self.pos);
        buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.ensure(self.pos + data.len());
        self.bytes[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        Ok(data.len())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn last_error(&self) -> Option<&str> {
        self.err.as_deref()
    }
}

enum Span<'a> {
    Ro(&'a [u8]),
    Rw(&'a mut [u8]),
}

impl Span<'_> {
    fn len(&self) -> usize {
        match self {
            Span::Ro(b) => b.len(),
            Span::Rw(b) => b.len(),
        }
    }
}

/// Caller-provided fixed span. Never owned, never grown: reads past the end
/// return end-of-stream (exactly when `pos == len`), writes past the end
/// fail with the remote-buffer error.
pub struct BorrowedIo<'a> {
    span: Span<'a>,
    pos: usize,
    err: Option<String>,
}

impl<'a> BorrowedIo<'a> {
    pub fn reader(bytes: &'a [u8]) -> Self {
        BorrowedIo {
            span: Span::Ro(bytes),
            pos: 0,
            err: None,
        }
    }

    pub fn writer(bytes: &'a mut [u8]) -> Self {
        BorrowedIo {
            span: Span::Rw(bytes),
            pos: 0,
            err: None,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl ByteIo for BorrowedIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.span.len();
        if self.pos == len {
            return Ok(0);
        }
        let n = buf.len().min(len - self.pos);
        match &self.span {
            Span::Ro(b) => buf[..n].copy_from_slice(&b[self.pos..self.pos + n]),
            Span::Rw(b) => buf[..n].copy_from_slice(&b[self.pos..self.pos + n]),
        }
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let msg = "cannot expand a remote buffer (write failure)";
        match &mut self.span {
            Span::Rw(b) => {
                if self.pos + data.len() > b.len() {
                    self.err = Some(msg.to_string());
                    return Err(io::Error::new(io::ErrorKind::WriteZero, msg));
                }
                b[self.pos..self.pos + data.len()].copy_from_slice(data);
                self.pos += data.len();
                Ok(data.len())
            }
            Span::Ro(_) => {
                let e = direction_error("write to a read-only borrowed buffer");
                self.err = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn last_error(&self) -> Option<&str> {
        self.err.as_deref()
    }
}
