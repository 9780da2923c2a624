use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "lzzdev CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Mode {
    /// Fast LZ4 frame (.lzz)
    Fast,
    /// High-compression LZ4 frame (.lzz)
    Hc,
    /// Uncompressed chunk stream (.uzz)
    Flat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pack files and directories into an archive
    Pack {
        out: PathBuf,
        inputs: Vec<PathBuf>,

        #[arg(long, value_enum, default_value = "fast")]
        mode: Mode,

        /// HC level adjustment in [-5, 3], added to the codec default
        #[arg(long, default_value_t = 0)]
        level: i32,
    },

    /// List archive entries
    List {
        archive: PathBuf,
    },

    /// Unpack an archive into a destination directory
    Unpack {
        archive: PathBuf,
        dest: PathBuf,
    },
}
