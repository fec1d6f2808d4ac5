use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP translation service
    Serve {
        /// Listen address, overrides [server].bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Translate a single piece of text
    Translate {
        /// Text to translate
        text: String,

        /// Source language code ("auto" to detect)
        #[arg(short, long, default_value = "auto")]
        from: String,

        /// Target language code
        #[arg(short, long, default_value = "it")]
        to: String,

        /// Queue priority: critical, normal or background
        #[arg(short, long, default_value = "normal")]
        priority: String,
    },

    /// Translate every line of a text file
    Batch {
        /// Input file, one text per line
        #[arg(short, long)]
        input: PathBuf,

        /// Output file, defaults to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Source language code ("auto" to detect)
        #[arg(short, long, default_value = "auto")]
        from: String,

        /// Target language code
        #[arg(short, long, default_value = "it")]
        to: String,

        /// Queue priority: critical, normal or background
        #[arg(short, long, default_value = "background")]
        priority: String,
    },

    /// Stream a chat completion to stdout
    Chat {
        /// User message
        message: String,

        /// Optional system instruction
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Probe the LLM backend
    Health,

    /// Write a configuration file with default values
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "parley.toml")]
        output: PathBuf,
    },
}
