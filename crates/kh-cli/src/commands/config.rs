//! Config command implementations
//!
//! These work on the agent's TOML file as a plain table. `set` rewrites the
//! whole file, so comments in it are lost.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use kh_core::config::{self, AgentConfig};

fn config_file(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Look up a dotted key (e.g. `askpass.program`)
fn lookup<'a>(table: &'a toml::Table, key: &str) -> Option<&'a toml::Value> {
    let mut parts = key.split('.');
    let mut current = table.get(parts.next()?)?;
    for part in parts {
        current = current.as_table()?.get(part)?;
    }
    Some(current)
}

/// Parse a command-line value as the most specific TOML type it fits
fn parse_value(value: &str) -> toml::Value {
    if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = value.parse::<f64>() {
        toml::Value::Float(f)
    } else {
        toml::Value::String(value.to_string())
    }
}

/// Get a config value by key
pub fn config_get(config_path: Option<&PathBuf>, key: &str) -> Result<()> {
    let path = config_file(config_path);
    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        print_info("Run 'keyhold config init' to create one");
        return Ok(());
    }

    let table = read_table(&path)?;
    let Some(value) = lookup(&table, key) else {
        bail!("Key not found: {}", key);
    };

    match value {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Array(items) => {
            for item in items {
                match item.as_str() {
                    Some(s) => println!("{}", s),
                    None => println!("{}", item),
                }
            }
        }
        toml::Value::Table(_) => println!("{}", toml::to_string_pretty(value)?),
        other => println!("{}", other),
    }
    Ok(())
}

/// Set a config value by key
///
/// The edited file must still load as an agent config, so a typo can't
/// leave the agent unable to start.
pub fn config_set(config_path: Option<&PathBuf>, key: &str, value: &str) -> Result<()> {
    let path = config_file(config_path);
    if !path.exists() {
        print_info("Creating default configuration...");
        config_init(config_path, false)?;
    }

    let mut table = read_table(&path)?;
    let parts: Vec<&str> = key.split('.').collect();
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| anyhow!("Invalid key: {}", key))?;

    let mut current = &mut table;
    for part in parents {
        current = current
            .entry(part.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow!("Cannot navigate to key: {}", key))?;
    }
    current.insert(last.to_string(), parse_value(value));

    toml::Value::Table(table.clone())
        .try_into::<AgentConfig>()
        .with_context(|| format!("{} = {} is not a valid setting", key, value))?;

    config::save_config(&path, &table)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = config_file(config_path);
    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'keyhold config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);
    Ok(())
}

/// Initialize default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let config_file = config_file(config_path);

    if let Some(config_dir) = config_file.parent() {
        if !config_dir.exists() {
            std::fs::create_dir_all(config_dir).with_context(|| {
                format!("Failed to create config directory: {:?}", config_dir)
            })?;
            print_success(&format!("Created config directory: {:?}", config_dir));
        }
    }

    if config_file.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_file));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    std::fs::write(&config_file, generate_default_config())
        .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

    print_success(&format!("Created configuration file: {:?}", config_file));
    Ok(())
}

/// Open config in editor
pub fn config_edit(config_path: Option<&PathBuf>) -> Result<()> {
    let path = config_file(config_path);
    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        print_info("Run 'keyhold config init' to create one");
        return Ok(());
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "vi".to_string());

    print_info(&format!("Opening config with: {}", editor));

    std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("Failed to open editor: {}", editor))?;

    Ok(())
}

/// Generate default configuration content
fn generate_default_config() -> String {
    format!(
        r#"# keyhold agent configuration

# Socket to listen on
# socket_path = "{socket}"

# Key files loaded when the agent starts
keys = []

# Send startup keys to the agent in encrypted form, decrypting on first use
add_encrypted = false

# Seconds a passphrase prompt may stay open before it counts as refused
prompt_timeout = 300

# Program that asks for passphrases. Without this section the agent falls
# back to $SSH_ASKPASS. {{{{comment}}}} is replaced by the key's comment.
# [askpass]
# program = "/usr/bin/ssh-askpass"
# args = ["Passphrase for key \"{{{{comment}}}}\":"]
"#,
        socket = config::default_socket_path().display()
    )
}
