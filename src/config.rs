use std::path::Path;

use anyhow::Result;
use clap_serde_derive::ClapSerde;

pub const DEFAULT_CONFIG_FILE: &str = "DigitRunner.toml";

#[derive(ClapSerde, Debug)]
pub struct Config {
    /// The address the listener binds to
    #[default("0.0.0.0".to_string())]
    #[arg(short, long, env)]
    pub address: String,

    /// The port the listener binds to
    #[default(8000)]
    #[arg(short, long, env)]
    pub port: u16,

    /// Largest accepted request body in bytes
    #[default(10_000_000)]
    #[arg(short, long, env)]
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_toml(path: &Path) -> Result<<Self as ClapSerde>::Opt> {
        let str = std::fs::read_to_string(path)?;
        let config = toml::from_str(&str)?;
        Ok(config)
    }

    /// Layers defaults, the TOML file and CLI/env options, later ones win.
    ///
    /// A missing file is only an error when it was asked for explicitly.
    pub fn load(path: &Path, cli: &mut <Self as ClapSerde>::Opt) -> Result<Self> {
        match Config::from_toml(path) {
            Ok(file) => Ok(Config::from(file).merge(cli)),
            Err(_) if path == Path::new(DEFAULT_CONFIG_FILE) => Ok(Config::from(cli)),
            Err(err) => Err(err.context(format!(
                "Failed to read configuration file {}",
                path.display()
            ))),
        }
    }
}
