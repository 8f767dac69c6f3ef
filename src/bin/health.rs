use anyhow::{bail, Result};
use clap::Parser;
use reqwest::Url;

/// Exits with a non-zero status when the digit runner does not answer
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Endpoint that is expected to answer with 200
    #[arg(env = "HEALTH_URL", default_value = "http://127.0.0.1:8000/metrics")]
    url: Url,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let response = reqwest::blocking::get(args.url.clone())?;
    if !response.status().is_success() {
        bail!("{} answered with {}", args.url, response.status())
    }

    Ok(())
}
