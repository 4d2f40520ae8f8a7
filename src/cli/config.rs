use std::fs;
use std::path::PathBuf;

use crate::config::generate::generate_starter_config;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let content = generate_starter_config();
    if stdout {
        print!("{}", content);
        return Ok(());
    }

    let config_path = user_config_path().unwrap_or_else(|| PathBuf::from("/etc/segmail/config.yml"));

    if config_path.exists() {
        eprintln!(
            "Error: Config file already exists at {}",
            config_path.display()
        );
        eprintln!("Remove it first or use --stdout to print the config");
        std::process::exit(1);
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

// ~/.config/segmail/config.yml, if its directory can be created
fn user_config_path() -> Option<PathBuf> {
    let user_config = dirs::home_dir()?.join(".config/segmail/config.yml");
    let parent = user_config.parent()?;
    match fs::create_dir_all(parent) {
        Ok(()) => Some(user_config),
        Err(_) => {
            eprintln!("Warning: Could not create directory {}", parent.display());
            eprintln!("Falling back to /etc/segmail/config.yml");
            None
        }
    }
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    match crate::config::load_config(&path) {
        Ok(config) => {
            println!(
                "Config is valid ({:?} provider, batch size {})",
                config.provider.kind,
                config.provider.batch_size
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Config validation failed:\n{}", e);
            std::process::exit(1);
        }
    }
}
