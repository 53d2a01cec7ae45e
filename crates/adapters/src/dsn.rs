//! Go-driver style DSNs: `[user[:password]@][net[(addr)]]/dbname[?param=value&...]`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DsnError {
    #[error("missing the slash separating the database name")]
    MissingDatabaseSeparator,
    #[error("unknown network type `{0}` (expected tcp or unix)")]
    UnknownNetwork(String),
    #[error("network address is not closed with `)`")]
    UnterminatedAddress,
    #[error("unix socket path is empty")]
    EmptySocketPath,
    #[error("invalid port `{0}`")]
    InvalidPort(String),
    #[error("invalid value `{value}` for parameter `{name}`")]
    InvalidParam { name: String, value: String },
    #[error("invalid connection URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp { host: String, port: u16 },
    Socket(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsSetting {
    #[default]
    Disabled,
    Verified,
    SkipVerify,
}

#[derive(Clone, PartialEq, Eq)]
pub struct DsnParts {
    pub user: Option<String>,
    pub password: Option<String>,
    pub address: Address,
    pub database: Option<String>,
    pub tls: TlsSetting,
    pub params: BTreeMap<String, String>,
}

impl std::fmt::Debug for DsnParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsnParts")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("address", &self.address)
            .field("database", &self.database)
            .field("tls", &self.tls)
            .field("params", &self.params)
            .finish()
    }
}

pub fn parse_dsn(raw: &str) -> Result<DsnParts, DsnError> {
    let raw = raw.trim();
    let slash = raw.rfind('/').ok_or(DsnError::MissingDatabaseSeparator)?;
    let (head, tail) = (&raw[..slash], &raw[slash + 1..]);

    let (database, query) = match tail.split_once('?') {
        Some((database, query)) => (database, Some(query)),
        None => (tail, None),
    };

    let (credentials, net_address) = match head.rfind('@') {
        Some(at) => (Some(&head[..at]), &head[at + 1..]),
        None => (None, head),
    };
    let (user, password) = match credentials {
        Some(credentials) => match credentials.split_once(':') {
            Some((user, password)) => (non_empty(user), non_empty(password)),
            None => (non_empty(credentials), None),
        },
        None => (None, None),
    };

    let address = parse_address(net_address)?;
    let params = parse_params(query);
    let tls = match params.get("tls").map(String::as_str) {
        None | Some("false" | "") => TlsSetting::Disabled,
        // mysql_async cannot fall back to plaintext, so `preferred` means required.
        Some("true" | "preferred") => TlsSetting::Verified,
        Some("skip-verify") => TlsSetting::SkipVerify,
        Some(other) => {
            return Err(DsnError::InvalidParam {
                name: "tls".to_string(),
                value: other.to_string(),
            })
        }
    };

    Ok(DsnParts {
        user,
        password,
        address,
        database: non_empty(database),
        tls,
        params,
    })
}

fn parse_address(net_address: &str) -> Result<Address, DsnError> {
    if net_address.is_empty() {
        return Ok(Address::Tcp {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        });
    }

    let (network, address) = match net_address.find('(') {
        Some(open) => {
            let inner = net_address[open + 1..]
                .strip_suffix(')')
                .ok_or(DsnError::UnterminatedAddress)?;
            (&net_address[..open], inner)
        }
        None => (net_address, ""),
    };

    match network {
        "tcp" | "tcp6" => {
            let (host, port) = split_host_port(address)?;
            Ok(Address::Tcp { host, port })
        }
        "unix" => {
            if address.is_empty() {
                return Err(DsnError::EmptySocketPath);
            }
            Ok(Address::Socket(PathBuf::from(address)))
        }
        other => Err(DsnError::UnknownNetwork(other.to_string())),
    }
}

/// Splits `host[:port]`, accepting bracketed IPv6 literals.
pub fn split_host_port(address: &str) -> Result<(String, u16), DsnError> {
    if address.is_empty() {
        return Ok((DEFAULT_HOST.to_string(), DEFAULT_PORT));
    }

    let (host, port) = if let Some(bracketed) = address.strip_prefix('[') {
        match bracketed.split_once(']') {
            Some((host, rest)) => (host, rest.strip_prefix(':')),
            None => return Err(DsnError::UnterminatedAddress),
        }
    } else {
        match address.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    let port = match port {
        None | Some("") => DEFAULT_PORT,
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| DsnError::InvalidPort(port.to_string()))?,
    };
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    Ok((host.to_string(), port))
}

fn parse_params(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .into_iter()
        .flat_map(|query| query.split('&'))
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
