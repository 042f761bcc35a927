use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chat-warden", version, about = "Abuse-guarded chat relay for website widgets")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Listen address (overrides config file setting)
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory for stored conversations (overrides config file setting)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory with knowledge documents (overrides config file setting)
    #[arg(long)]
    pub knowledge_dir: Option<PathBuf>,
}
