//! Configuration variables and per-store settings.
//!
//! Every setting is a string variable addressed by a dotted key. Store
//! settings live under `mailstore.<store>.<key>`, for example
//! `mailstore.work.host`. Free-form session properties are written as
//! `mailstore.<store>.properties.<name>`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Namespace under which store variables are addressed.
pub const NAMESPACE: &str = "mailstore";

/// Segment that introduces free-form session properties.
pub const PROPERTIES: &str = "properties.";

/// Session properties, such as `mail.imap.ssl.enable`.
pub type Properties = BTreeMap<String, String>;

/// Ordered key/value configuration variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    /// Creates an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds variables from a JSON document.
    ///
    /// Nested objects are flattened into dotted keys; scalars are rendered as
    /// strings and `null` values are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the document root is not an object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::Configuration {
                store: String::new(),
                message: "configuration document must be a JSON object".to_string(),
            });
        };

        let mut vars = Self::new();
        for (key, value) in map {
            vars.flatten(key, value);
        }
        Ok(vars)
    }

    /// Parses variables from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid JSON or not an object.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }

    /// Loads variables from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    fn flatten(&mut self, key: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                for (child, value) in map {
                    self.flatten(&format!("{key}.{child}"), value);
                }
            }
            Value::Null => {}
            Value::String(s) => self.set(key, s.clone()),
            other => self.set(key, other.to_string()),
        }
    }

    /// Sets a variable, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns a variable value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns a store-scoped variable, `mailstore.<store>.<key>`.
    #[must_use]
    pub fn store_var(&self, store: &str, key: &str) -> Option<&str> {
        self.get(&store_key(store, key))
    }

    /// Returns a store-scoped variable, treating blank values as absent.
    #[must_use]
    pub fn store_value(&self, store: &str, key: &str) -> Option<&str> {
        self.store_var(store, key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Iterates over all variables whose key starts with `prefix`, yielding
    /// the remainder of the key and the value.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.values
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(move |(k, v)| (&k[prefix.len()..], v.as_str()))
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Self::new();
        for (key, value) in iter {
            vars.set(key, value);
        }
        vars
    }
}

/// Builds the full key of a store-scoped variable.
#[must_use]
pub fn store_key(store: &str, key: &str) -> String {
    format!("{NAMESPACE}.{store}.{key}")
}

/// How a handled message reaches its destination folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovingMethod {
    /// Re-create the message in the destination folder.
    #[default]
    Append,
    /// Use the server-native copy operation.
    Copy,
}

impl MovingMethod {
    /// Resolves the moving method configured for a store.
    ///
    /// A blank or absent value selects [`MovingMethod::Append`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any other unrecognized value.
    pub fn resolve(vars: &Variables, store: &str) -> Result<Self> {
        match vars.store_value(store, "movingMethod") {
            None => Ok(Self::default()),
            Some(value) => value.parse().map_err(|()| Error::Configuration {
                store: store.to_string(),
                message: format!("unknown moving method '{value}', expected APPEND or COPY"),
            }),
        }
    }
}

impl FromStr for MovingMethod {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("append") {
            Ok(Self::Append)
        } else if s.eq_ignore_ascii_case("copy") {
            Ok(Self::Copy)
        } else {
            Err(())
        }
    }
}

impl fmt::Display for MovingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => f.write_str("APPEND"),
            Self::Copy => f.write_str("COPY"),
        }
    }
}

/// Connection settings resolved for one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Store name the settings were resolved for.
    pub store: String,
    /// Protocol name, such as `imap` or `imaps`.
    pub protocol: String,
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Whether protocol tracing is enabled.
    pub debug: bool,
}

impl StoreSettings {
    /// Resolves `protocol`, `host`, `port` and `debug` for a store.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if protocol, host or port is missing, or
    /// if the port is not a valid number.
    pub fn resolve(vars: &Variables, store: &str) -> Result<Self> {
        let required = |key: &str| {
            vars.store_value(store, key)
                .map(ToString::to_string)
                .ok_or_else(|| Error::Configuration {
                    store: store.to_string(),
                    message: format!("missing variable '{}'", store_key(store, key)),
                })
        };

        let protocol = required("protocol")?.to_ascii_lowercase();
        let host = required("host")?;
        let port = required("port")?;
        let port = port.parse::<u16>().map_err(|e| Error::Configuration {
            store: store.to_string(),
            message: format!("invalid port '{port}': {e}"),
        })?;

        Ok(Self {
            store: store.to_string(),
            protocol,
            host,
            port,
            debug: resolve_debug(vars, store),
        })
    }
}

/// Returns true if `mailstore.<store>.debug` is `true`, ignoring case.
#[must_use]
pub fn resolve_debug(vars: &Variables, store: &str) -> bool {
    vars.store_value(store, "debug")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Parses a boolean session property; only `true` (any case) is true.
#[must_use]
pub fn bool_property(properties: &Properties, name: &str) -> bool {
    properties
        .get(name)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn work_vars() -> Variables {
        [
            ("mailstore.work.protocol", "IMAPS"),
            ("mailstore.work.host", "imap.example.com"),
            ("mailstore.work.port", "993"),
            ("mailstore.work.debug", "TRUE"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_flatten_json() {
        let vars = Variables::from_json_str(
            r#"{
                "mailstore": {
                    "work": {
                        "host": "imap.example.com",
                        "port": 993,
                        "debug": true,
                        "properties": { "mail.imap.ssl.enable": "true" }
                    }
                },
                "ignored": null
            }"#,
        )
        .unwrap();

        assert_eq!(vars.store_var("work", "host"), Some("imap.example.com"));
        assert_eq!(vars.store_var("work", "port"), Some("993"));
        assert_eq!(vars.store_var("work", "debug"), Some("true"));
        assert_eq!(
            vars.get("mailstore.work.properties.mail.imap.ssl.enable"),
            Some("true")
        );
        assert_eq!(vars.get("ignored"), None);
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn test_json_root_must_be_object() {
        assert!(Variables::from_json_str("[1, 2]").is_err());
        assert!(Variables::from_json_str("not json").is_err());
    }

    #[test]
    fn test_with_prefix() {
        let vars: Variables = [
            ("mailstore.work.properties.mail.imap.timeout", "1000"),
            ("mailstore.work.properties.mail.imap.ssl.enable", "true"),
            ("mailstore.work.host", "h"),
            ("mailstore.workshop.properties.other", "x"),
        ]
        .into_iter()
        .collect();

        let props: Vec<_> = vars.with_prefix("mailstore.work.properties.").collect();
        assert_eq!(
            props,
            vec![
                ("mail.imap.ssl.enable", "true"),
                ("mail.imap.timeout", "1000")
            ]
        );
    }

    #[test]
    fn test_store_settings_resolve() {
        let settings = StoreSettings::resolve(&work_vars(), "work").unwrap();
        assert_eq!(settings.protocol, "imaps");
        assert_eq!(settings.host, "imap.example.com");
        assert_eq!(settings.port, 993);
        assert!(settings.debug);
    }

    #[test]
    fn test_store_settings_missing_host() {
        let mut vars = work_vars();
        vars.set("mailstore.work.host", "  ");
        let err = StoreSettings::resolve(&vars, "work").unwrap_err();
        assert!(err.to_string().contains("mailstore.work.host"));
    }

    #[test]
    fn test_store_settings_invalid_port() {
        let mut vars = work_vars();
        vars.set("mailstore.work.port", "99999");
        assert!(matches!(
            StoreSettings::resolve(&vars, "work"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_debug_defaults_to_false() {
        let vars = Variables::new();
        assert!(!resolve_debug(&vars, "work"));

        let vars: Variables = [("mailstore.work.debug", "yes")].into_iter().collect();
        assert!(!resolve_debug(&vars, "work"));
    }

    mod moving_method_tests {
        use super::*;

        #[test]
        fn test_default_is_append() {
            assert_eq!(
                MovingMethod::resolve(&Variables::new(), "work").unwrap(),
                MovingMethod::Append
            );

            let vars: Variables = [("mailstore.work.movingMethod", " ")].into_iter().collect();
            assert_eq!(
                MovingMethod::resolve(&vars, "work").unwrap(),
                MovingMethod::Append
            );
        }

        #[test]
        fn test_case_insensitive() {
            let vars: Variables = [("mailstore.work.movingMethod", "copy")]
                .into_iter()
                .collect();
            assert_eq!(
                MovingMethod::resolve(&vars, "work").unwrap(),
                MovingMethod::Copy
            );
        }

        #[test]
        fn test_unknown_value_is_rejected() {
            let vars: Variables = [("mailstore.work.movingMethod", "MOVE")]
                .into_iter()
                .collect();
            assert!(matches!(
                MovingMethod::resolve(&vars, "work"),
                Err(Error::Configuration { .. })
            ));
        }

        #[test]
        fn test_display() {
            assert_eq!(MovingMethod::Append.to_string(), "APPEND");
            assert_eq!(MovingMethod::Copy.to_string(), "COPY");
        }
    }
}
