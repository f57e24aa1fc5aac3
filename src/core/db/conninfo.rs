// src/core/db/conninfo.rs

//! Rendering of database connection strings, used for the standby's
//! replication source and for base backups.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::SslMode;

/// A `key=value` connection string builder. Keys render in a fixed order so
/// that two logically equal conninfos compare byte-for-byte equal, which the
/// standby reconfiguration relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnInfo {
    params: BTreeMap<&'static str, String>,
}

impl ConnInfo {
    pub fn new(host: &str, port: u16) -> Self {
        let mut conninfo = Self::default();
        conninfo.set("host", host);
        conninfo.set("port", port.to_string());
        conninfo
    }

    pub fn user(mut self, user: &str) -> Self {
        self.set("user", user);
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.set("password", password);
        self
    }

    pub fn dbname(mut self, dbname: &str) -> Self {
        self.set("dbname", dbname);
        self
    }

    pub fn application_name(mut self, name: &str) -> Self {
        self.set("application_name", name);
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.set("sslmode", mode.to_string());
        self
    }

    pub fn ssl_ca_file(mut self, path: &str) -> Self {
        self.set("sslrootcert", path);
        self
    }

    fn set(&mut self, key: &'static str, value: impl Into<String>) {
        self.params.insert(key, value.into());
    }
}

impl fmt::Display for ConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.params {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            if value.is_empty() || value.contains([' ', '\'', '\\']) {
                let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
                write!(f, "{key}='{escaped}'")?;
            } else {
                write!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}
