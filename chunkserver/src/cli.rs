use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chunkserver", version, about = "Chunk server daemon CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chunk server daemon with config file
    Start {
        #[arg(short, long)]
        config: PathBuf,
    },
}
