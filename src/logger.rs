use anyhow::Result;
use anyhow::anyhow;
use ftail::Ftail;
use log::LevelFilter;
use log::info;
use std::env;
use std::fs;
use std::path::PathBuf;

const LOGS_DIR: &str = ".logs";
const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// `~/.logs/<pkg>/`
pub fn logs_dir() -> Result<PathBuf> {
    match env::home_dir() {
        Some(h) => Ok(h.join(LOGS_DIR).join(PKG_NAME)),
        None => Err(anyhow!("Could not determine $HOME")),
    }
}

pub fn init_logger(verbose: bool) -> Result<()> {
    let logs_path = logs_dir()?;
    let logs_file = logs_path.join(format!("{}.log", PKG_NAME));

    if let Err(e) = fs::create_dir_all(&logs_path) {
        return Err(anyhow!(
            "Could not create logs dir at {:#?}: {}",
            &logs_path,
            e
        ));
    }

    let console_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    match Ftail::new()
        .console(console_level)
        .single_file(&logs_file, true, LevelFilter::Info)
        .init()
    {
        Ok(_) => {
            info!("Logger initialized.");
            Ok(())
        }
        Err(e) => Err(anyhow!("Could not initialize logger: {}", e)),
    }
}
