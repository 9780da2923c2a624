//! Buffered sequential file adapter. Direction is fixed at construction.

use super::{ByteIo, direction_error};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

enum Backend {
    Read(BufReader<File>),
    Write(BufWriter<File>),
}

pub struct FileIo {
    inner: Option<Backend>,
    err: Option<String>,
}

impl FileIo {
    pub fn open(path: &Path) -> io::Result<Self> {
        let f = File::open(path)?;
        Ok(FileIo {
            inner: Some(Backend::Read(BufReader::new(f))),
            err: None,
        })
    }

    pub fn create(path: &Path) -> io::Result<Self> {
        let f = File::create(path)?;
        Ok(FileIo {
            inner: Some(Backend::Write(BufWriter::new(f))),
            err: None,
        })
    }

    fn capture(&mut self, e: &io::Error) {
        self.err = Some(e.to_string());
    }
}

impl ByteIo for FileIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(Backend::Read(r)) => r.read(buf).inspect_err(|e| {
                let msg = e.to_string();
                self.err = Some(msg);
            }),
            Some(Backend::Write(_)) => {
                let e = direction_error("read from a write-mode file adapter");
                self.capture(&e);
                Err(e)
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(Backend::Write(w)) => match w.write(data) {
                Ok(n) => Ok(n),
                Err(e) => {
                    let msg = e.to_string();
                    self.err = Some(msg);
                    Err(e)
                }
            },
            Some(Backend::Read(_)) => {
                let e = direction_error("write to a read-mode file adapter");
                self.capture(&e);
                Err(e)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "file adapter already closed",
            )),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(Backend::Write(mut w)) => w.flush().inspect_err(|e| {
                self.err = Some(e.to_string());
            }),
            _ => Ok(()),
        }
    }

    fn last_error(&self) -> Option<&str> {
        self.err.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn round_trips_bytes_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io.bin");

        let mut w = FileIo::create(&path).unwrap();
        assert_eq!(w.write(b"chunked").unwrap(), 7);
        w.close().unwrap();

        let mut r = FileIo::open(&path).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(r.read(&mut buf).unwrap(), 7);
        assert_eq!(&buf[..7], b"chunked");
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn wrong_direction_is_a_dedicated_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dir.bin");
        let mut w = FileIo::create(&path).unwrap();
        let e = w.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Unsupported);
        assert!(w.last_error().is_some());
    }
}
