//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Unique, non-empty server and group names
//! - Built-in proxy names stay reserved
//! - Include entries name a backend
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Rule/proxy cross-references are checked when the rule chain is built,
//!   where the full proxy-name set is known

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::Config;
use crate::routing::rule::{DIRECT, GLOBAL, REJECT};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("include #{0} has no storage type")]
    IncludeWithoutType(usize),

    #[error("{kind} #{index} has an empty name")]
    EmptyName { kind: &'static str, index: usize },

    #[error("duplicate proxy name `{0}`")]
    DuplicateName(String),

    #[error("`{0}` is a reserved proxy name")]
    ReservedName(String),

    #[error("group `{0}` has no members")]
    EmptyGroup(String),
}

/// Check a decoded configuration for semantic problems.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (i, include) in config.include.iter().enumerate() {
        if include.typ.trim().is_empty() {
            errors.push(ValidationError::IncludeWithoutType(i));
        }
    }

    let mut seen = HashSet::new();
    let names = config
        .server
        .iter()
        .map(|s| ("server", &s.name))
        .chain(config.server_group.iter().map(|g| ("server_group", &g.name)));
    for (index, (kind, name)) in names.enumerate() {
        if name.trim().is_empty() {
            errors.push(ValidationError::EmptyName { kind, index });
            continue;
        }
        if [DIRECT, REJECT, GLOBAL].contains(&name.as_str()) {
            errors.push(ValidationError::ReservedName(name.clone()));
        } else if !seen.insert(name.as_str()) {
            errors.push(ValidationError::DuplicateName(name.clone()));
        }
    }

    for group in &config.server_group {
        if group.servers.is_empty() {
            errors.push(ValidationError::EmptyGroup(group.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{GroupConfig, ServerConfig, StorageRef};

    fn server(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.into(),
            protocol: "socks5".into(),
            host: "127.0.0.1".into(),
            port: 1080,
            params: Default::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let mut config = Config::default();
        config.server.push(server("a"));
        config.server_group.push(GroupConfig {
            name: "Auto".into(),
            strategy: "select".into(),
            servers: vec!["a".into()],
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.include.push(StorageRef {
            typ: " ".into(),
            params: Default::default(),
        });
        config.server.push(server("a"));
        config.server.push(server("a"));
        config.server.push(server("DIRECT"));
        config.server.push(server(""));
        config.server_group.push(GroupConfig {
            name: "a".into(),
            strategy: "select".into(),
            servers: vec![],
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::IncludeWithoutType(0),
                ValidationError::DuplicateName("a".into()),
                ValidationError::ReservedName("DIRECT".into()),
                ValidationError::EmptyName {
                    kind: "server",
                    index: 3
                },
                ValidationError::DuplicateName("a".into()),
                ValidationError::EmptyGroup("a".into()),
            ]
        );
    }
}
