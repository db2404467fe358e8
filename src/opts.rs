//! Connection options and connection targets.

use std::time::Duration;

/// How a raw result materializes rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Rows keyed by column name
    #[default]
    Object,
    /// Rows as positional arrays
    Array,
}

/// The identity of a data source: either a ready-made connection
/// descriptor or a structured attribute map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A flat descriptor such as `DSN=warehouse;UID=report;`
    Descriptor(String),
    /// Ordered `key=value` attributes, serialized on demand
    Attributes(Vec<(String, String)>),
}

impl Target {
    /// The flat descriptor handed to the raw handle.
    ///
    /// Attribute maps become `key=value;` pairs in insertion order.
    pub fn descriptor(&self) -> String {
        match self {
            Target::Descriptor(s) => s.clone(),
            Target::Attributes(attrs) => {
                let mut out = String::new();
                for (key, value) in attrs {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                    out.push(';');
                }
                out
            }
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::Descriptor(s.to_string())
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::Descriptor(s)
    }
}

impl From<&String> for Target {
    fn from(s: &String) -> Self {
        Target::Descriptor(s.clone())
    }
}

impl From<Vec<(String, String)>> for Target {
    fn from(attrs: Vec<(String, String)>) -> Self {
        Target::Attributes(attrs)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Target {
    fn from(attrs: [(&str, &str); N]) -> Self {
        Target::Attributes(
            attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Connection options.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Target remembered for reconnects before the first `open`.
    ///
    /// Default: `None`
    pub connection: Option<Target>,

    /// Fetch mode applied to every result produced by the connection.
    ///
    /// Default: `None` (driver default)
    pub fetch_mode: Option<FetchMode>,

    /// Connect timeout set on the raw handle before opening. `Some(ZERO)` is still applied.
    ///
    /// Default: `None`
    pub connect_timeout: Option<Duration>,

    /// Login timeout set on the raw handle before opening. `Some(ZERO)` is still applied.
    ///
    /// Default: `None`
    pub login_timeout: Option<Duration>,

    /// Delay before a pool drains, letting in-flight recycles settle.
    ///
    /// Default: `2s`
    pub pool_close_grace: Duration,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            connection: None,
            fetch_mode: None,
            connect_timeout: None,
            login_timeout: None,
            pool_close_grace: Duration::from_secs(2),
        }
    }
}

impl Opts {
    /// Options with a default target.
    pub fn with_connection(target: impl Into<Target>) -> Self {
        Self {
            connection: Some(target.into()),
            ..Default::default()
        }
    }
}
