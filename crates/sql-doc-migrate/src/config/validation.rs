//! Configuration validation.

use super::{Config, NoSqlConnection, SqlConnection};
use crate::error::{MigrateError, Result};

/// A connection section that can check its own required fields.
pub trait ConnectionConfig {
    /// Section name used in error messages.
    fn section(&self) -> &'static str;

    /// Fields that must be present and non-empty.
    fn required_fields(&self) -> &'static [&'static str];

    /// Value of a named field, if set.
    fn field(&self, name: &str) -> Option<&str>;

    /// First missing required field, if any.
    fn missing_field(&self) -> Option<&'static str> {
        self.required_fields()
            .iter()
            .copied()
            .find(|name| self.field(name).map_or(true, |v| v.trim().is_empty()))
    }

    fn is_valid(&self) -> bool {
        self.missing_field().is_none()
    }

    fn connection_string(&self) -> String;
}

impl ConnectionConfig for SqlConnection {
    fn section(&self) -> &'static str {
        "sql_connection"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["adapter", "host", "database"]
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "adapter" => Some(&self.adapter),
            "host" => Some(&self.host),
            "database" => Some(&self.database),
            "username" => self.username.as_deref(),
            "password" => self.password.as_deref(),
            _ => None,
        }
    }

    fn connection_string(&self) -> String {
        SqlConnection::connection_string(self)
    }
}

impl ConnectionConfig for NoSqlConnection {
    fn section(&self) -> &'static str {
        "no_sql_connection"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["host", "database"]
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "adapter" => Some(&self.adapter),
            "host" => Some(&self.host),
            "database" => Some(&self.database),
            "username" => self.username.as_deref(),
            "password" => self.password.as_deref(),
            _ => None,
        }
    }

    fn connection_string(&self) -> String {
        NoSqlConnection::connection_string(self)
    }
}

fn check(connection: &dyn ConnectionConfig) -> Result<()> {
    match connection.missing_field() {
        Some(field) => Err(MigrateError::Config(format!(
            "{}.{} is required",
            connection.section(),
            field
        ))),
        None => Ok(()),
    }
}

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    check(&config.sql_connection)?;
    check(&config.no_sql_connection)?;

    if let Some(0) = config.migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }

    Ok(())
}
