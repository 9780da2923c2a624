pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use lzz_core::error::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Pack {
            out,
            inputs,
            mode,
            level,
        } => handlers::handle_pack(out, inputs, mode, level),
        Commands::List { archive } => handlers::handle_list(archive),
        Commands::Unpack { archive, dest } => handlers::handle_unpack(archive, dest),
    }
}
