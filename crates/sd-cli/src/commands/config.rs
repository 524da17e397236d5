//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info};
use sd_core::config::{self, DeployConfig};

/// Print the effective configuration (file, environment and flags merged) as TOML
pub fn config_show(config: &DeployConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

/// Print one value of the effective configuration, e.g. `nodes.production.address`
pub fn config_get(config: &DeployConfig, key: &str) -> Result<()> {
    let root = toml::Value::try_from(config).context("Failed to render configuration")?;

    let mut current = &root;
    for part in key.split('.') {
        match current {
            toml::Value::Table(t) => match t.get(part) {
                Some(v) => current = v,
                None => {
                    print_error(&format!("Key not found: {}", key));
                    anyhow::bail!("unknown config key {}", key);
                }
            },
            _ => {
                print_error(&format!("Key not found: {}", key));
                anyhow::bail!("unknown config key {}", key);
            }
        }
    }

    match current {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Integer(i) => println!("{}", i),
        toml::Value::Float(f) => println!("{}", f),
        toml::Value::Boolean(b) => println!("{}", b),
        toml::Value::Array(a) => {
            for item in a {
                match item {
                    toml::Value::String(s) => println!("{}", s),
                    other => println!("{}", other),
                }
            }
        }
        toml::Value::Table(_) => {
            println!("{}", toml::to_string_pretty(current)?);
        }
        toml::Value::Datetime(d) => println!("{}", d),
    }

    Ok(())
}

/// Print the config file in effect, or where one would be looked up
pub fn config_path(explicit: Option<&Path>) {
    match explicit.map(Path::to_path_buf).or_else(config::discover_config_path) {
        Some(path) => println!("{}", path.display()),
        None => {
            print_info(&format!(
                "No config file found; looked for ./{} and {}",
                config::LOCAL_CONFIG_FILE,
                config::default_config_path().display()
            ));
        }
    }
}
