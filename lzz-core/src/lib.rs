#![forbid(unsafe_code)]

//! lzz: an LZ4-solid chunk archive format.
//!
//! The stream is a sequence of 4-byte chunks (markers, tags, infos, data,
//! one stop), optionally wrapped whole in an LZ4 frame. Solid compression
//! means no seeking: reading is a single forward scan that fills an
//! [`Archive`], and writing linearizes one back out through any adapter.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;

pub mod chunk;
pub mod context;
pub mod io;

pub mod archive {
    pub mod entry;
    pub mod errlog;
    pub mod model;
}

pub mod build;
pub mod scan;
pub mod write;

pub use crate::error::Result;

pub use archive::entry::{EntryView, HashKind, Tag};
pub use archive::errlog::ErrorLog;
pub use archive::model::Archive;
pub use context::Context;

pub use scan::{
    HaltPolicy, ScanDepth, ScanOptions, scan_file, scan_file_into, scan_io, scan_io_into,
    scan_memory, scan_memory_into,
};
pub use write::{WriteMode, write_file, write_file_level, write_io, write_memory};

pub mod prelude {
    pub use crate::Result;
    pub use crate::archive::entry::EntryView;
    pub use crate::archive::model::Archive;
    pub use crate::context::Context;
    pub use crate::scan::{ScanOptions, scan_file, scan_io, scan_memory};
    pub use crate::write::{WriteMode, write_file, write_io, write_memory};
}
