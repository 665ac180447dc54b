use eyre::{Error, WrapErr};
use std::path::Path;
use std::str::FromStr;
use toml::{Table, Value};
use tracing::info;

#[derive(Debug, Default)]
pub struct Config {
    conf: Table,
}

impl Config {
    pub fn load(file_name: &Path) -> Result<Config, Error> {
        let content = std::fs::read_to_string(file_name)
            .wrap_err_with(|| format!("cannot read configuration file {}", file_name.display()))?;
        content.parse().wrap_err("cannot load configuration file")
    }

    /// Load `file_name` if it exists, or use built-in defaults otherwise.
    pub fn load_or_default(file_name: &Path) -> Result<Config, Error> {
        if file_name.exists() {
            Self::load(file_name)
        } else {
            info!(file = %file_name.display(), "no configuration file, using defaults");
            Ok(Config::default())
        }
    }

    /// Override a single `section.key` entry, as done by command-line flags.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<Value>) {
        let section = self
            .conf
            .entry(section)
            .or_insert_with(|| Value::Table(Table::new()));
        if let Value::Table(table) = section {
            table.insert(key.to_owned(), value.into());
        }
    }
}

impl FromStr for Config {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Config {
            conf: toml::from_str(s)?,
        })
    }
}

pub fn get_config(config: &Config, section: &str, key: &str) -> Option<String> {
    config
        .conf
        .get(section)
        .and_then(Value::as_table)
        .and_then(|s| s.get(key))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_read_as_strings() {
        let config: Config = "[server]\naddress = \"127.0.0.1:9000\"\n[store]\nfallback = false\n"
            .parse()
            .unwrap();
        assert_eq!(
            get_config(&config, "server", "address").as_deref(),
            Some("127.0.0.1:9000")
        );
        assert_eq!(
            get_config(&config, "store", "fallback").as_deref(),
            Some("false")
        );
        assert_eq!(get_config(&config, "store", "url"), None);
        assert_eq!(get_config(&config, "seed", "demo"), None);
    }

    #[test]
    fn overrides_create_sections() {
        let mut config = Config::default();
        config.set("seed", "demo", true);
        config.set("server", "address", "0.0.0.0:1");
        assert_eq!(get_config(&config, "seed", "demo").as_deref(), Some("true"));
        assert_eq!(
            get_config(&config, "server", "address").as_deref(),
            Some("0.0.0.0:1")
        );
    }
}
