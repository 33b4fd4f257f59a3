use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "barkline-server", about = "Barkline realtime messaging server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/barkline.toml")]
    pub config: String,
}
