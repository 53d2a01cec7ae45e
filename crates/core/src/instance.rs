use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONNECTION_NAME: &str = "unnamed";

const REDACTED: &str = "***";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown DBMS `{0}` (expected one of: mysql, mariadb)")]
    UnknownDbms(String),
    #[error("blank DSN is invalid")]
    EmptyDsn,
    #[error("blank connection name is invalid")]
    EmptyName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbmsKind {
    Mysql,
    Mariadb,
}

impl DbmsKind {
    pub const ALL: [Self; 2] = [Self::Mysql, Self::Mariadb];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Mariadb => "mariadb",
        }
    }
}

impl fmt::Display for DbmsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbmsKind {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| ValidationError::UnknownDbms(normalized.to_string()))
    }
}

/// Connection string for one instance.
///
/// `Debug` and `Display` only ever show the redacted form; use [`Dsn::expose`]
/// when handing the string to a database client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dsn(String);

impl Dsn {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn redacted(&self) -> String {
        match self.credentials() {
            Some((scheme, user, _password, host)) => format!("{scheme}{user}:{REDACTED}{host}"),
            None => self.0.clone(),
        }
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        let (_, _, password, _) = self.credentials()?;
        (!password.is_empty()).then_some(password)
    }

    /// Splits into scheme, user, password and the remainder starting at the
    /// `@` that closes the credentials.
    fn credentials(&self) -> Option<(&str, &str, &str, &str)> {
        let (scheme, rest) = match self.0.find("://") {
            Some(index) => self.0.split_at(index + 3),
            None => ("", self.0.as_str()),
        };

        let at = if scheme.is_empty() {
            // Driver form: the database name follows the last `/`.
            let path_start = rest.rfind('/').unwrap_or(rest.len());
            rest[..path_start].rfind('@').or_else(|| rest.rfind('@'))?
        } else {
            // URL form: host and path never contain `@`, the password may contain `/`.
            rest.rfind('@')?
        };

        let (user, password) = rest[..at].split_once(':')?;
        Some((scheme, user, password, &rest[at..]))
    }

    /// Removes the raw DSN and its password from a client error message.
    #[must_use]
    pub fn scrub(&self, message: &str) -> String {
        if self.0.is_empty() {
            return message.to_string();
        }
        let mut scrubbed = message.replace(&self.0, &self.redacted());
        if let Some(password) = self.password() {
            scrubbed = scrubbed.replace(password, REDACTED);
        }
        scrubbed
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dsn").field(&self.redacted()).finish()
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(rename = "conn-name")]
    pub connection_name: String,
    pub dbms: DbmsKind,
    pub dsn: Dsn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Instance {
    #[must_use]
    pub fn new(connection_name: impl Into<String>, dbms: DbmsKind, dsn: Dsn) -> Self {
        Self {
            connection_name: connection_name.into(),
            dbms,
            dsn,
            group: None,
        }
    }

    /// Builds an instance from operator text, rejecting unknown engines and blank DSNs.
    pub fn parse(
        connection_name: &str,
        dbms: &str,
        dsn: &str,
        group: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let dbms = dbms.parse::<DbmsKind>()?;
        let name = match connection_name.trim() {
            "" => DEFAULT_CONNECTION_NAME,
            name => name,
        };
        let mut instance = Self::new(name, dbms, Dsn::new(dsn));
        instance.group = group
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_string);
        instance.validate()?;
        Ok(instance)
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.connection_name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.dsn.is_empty() {
            return Err(ValidationError::EmptyDsn);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    Online,
    Offline,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
        })
    }
}
