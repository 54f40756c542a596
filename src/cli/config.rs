use crate::config::{user_config_path, SYSTEM_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

pub const SAMPLE_CONFIG: &str = include_str!("../../samples/sample-config.yml");

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    if stdout {
        print!("{}", SAMPLE_CONFIG);
        return Ok(());
    }

    // Prefer ~/.config/cwtail/config.yml, fall back to /etc/cwtail/config.yml
    let config_path = user_config_path()
        .filter(|path| match path.parent() {
            Some(parent) => match fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
                    false
                }
            },
            None => false,
        })
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));

    let written = write_config(&config_path, SAMPLE_CONFIG)?;
    println!("Config file written to {}", written.display());
    Ok(())
}

/// Write `content` to `path`, refusing to overwrite an existing file.
pub fn write_config(path: &Path, content: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(path.to_path_buf())
}
