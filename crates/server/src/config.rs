use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use crate::network::DEFAULT_PORT;

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Io,
    Parse,
    Missing,
    Invalid,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "configuration io failure"),
            Self::Parse => write!(f, "configuration parse failure"),
            Self::Missing => write!(f, "configuration key missing"),
            Self::Invalid => write!(f, "configuration value invalid"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub certificate_file: String,
    pub key_file: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mysql: MysqlConfig,
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            mysql: MysqlConfig {
                host: "127.0.0.1".to_string(),
                port: 3306,
                username: String::new(),
                password: String::new(),
            },
            tls: TlsConfig {
                certificate_file: "certs.pem".to_string(),
                key_file: "key.pem".to_string(),
                password: String::new(),
            },
        }
    }
}

/// Loads the server configuration from an INI file with environment
/// overrides (`QUILL_HOST`, `QUILL_PORT`, `QUILL_TLS_CERT`, `QUILL_TLS_KEY`).
pub fn load_configuration(path: &Path) -> Result<ServerConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|_| ConfigError::Io)?;
    let mut section = String::new();
    let mut map = HashMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            section = trimmed
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            continue;
        }
        let parts: Vec<&str> = trimmed.splitn(2, '=').collect();
        if parts.len() != 2 {
            return Err(ConfigError::Parse);
        }
        let key = if section.is_empty() {
            parts[0].trim().to_string()
        } else {
            format!("{}.{}", section, parts[0].trim())
        };
        map.insert(key, parts[1].trim().to_string());
    }

    let host = required(override_env("QUILL_HOST", map.remove("server.host"))?)?;
    let port_raw = required(override_env("QUILL_PORT", map.remove("server.port"))?)?;
    let port = parse_port(&port_raw)?;

    let mysql_host = map
        .remove("mysql.host")
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let mysql_port_raw = map
        .remove("mysql.port")
        .unwrap_or_else(|| "3306".to_string());
    let mysql_port = parse_port(&mysql_port_raw)?;
    let mysql_username = map.remove("mysql.username").unwrap_or_default();
    let mysql_password = map.remove("mysql.password").unwrap_or_default();

    let certificate_file = required(override_env(
        "QUILL_TLS_CERT",
        map.remove("ssl.certificate_file"),
    )?)?;
    let key_file = required(override_env("QUILL_TLS_KEY", map.remove("ssl.key_file"))?)?;
    let tls_password = map.remove("ssl.password").unwrap_or_default();

    Ok(ServerConfig {
        host,
        port,
        mysql: MysqlConfig {
            host: mysql_host,
            port: mysql_port,
            username: mysql_username,
            password: mysql_password,
        },
        tls: TlsConfig {
            certificate_file,
            key_file,
            password: tls_password,
        },
    })
}

/// Materializes the default configuration file for the operator to edit.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| ConfigError::Io)?;
    }
    let defaults = ServerConfig::default();
    let contents = format!(
        "[server]\nhost = {}\nport = {}\n\n[mysql]\nhost = {}\nport = {}\nusername = {}\npassword = {}\n\n[ssl]\ncertificate_file = {}\nkey_file = {}\npassword = {}\n",
        defaults.host,
        defaults.port,
        defaults.mysql.host,
        defaults.mysql.port,
        defaults.mysql.username,
        defaults.mysql.password,
        defaults.tls.certificate_file,
        defaults.tls.key_file,
        defaults.tls.password,
    );
    fs::write(path, contents).map_err(|_| ConfigError::Io)
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    let value = raw.parse::<i64>().map_err(|_| ConfigError::Invalid)?;
    if !(0..=65_535).contains(&value) {
        return Err(ConfigError::Invalid);
    }
    Ok(value as u16)
}

fn override_env(key: &str, current: Option<String>) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(current),
        Err(_) => Err(ConfigError::Invalid),
    }
}

fn required(value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or(ConfigError::Missing)
}
