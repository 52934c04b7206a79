//! Options normalization: URL-or-map input (spec §6), well-known merge
//! (left-preserving — explicit options win), and defaults.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::well_known;

/// Login credentials (spec §6 `auth`).
#[derive(Debug, Clone)]
pub enum Auth {
    Plain { user: String, pass: String },
    XOAuth2 { user: String, token: String },
}

/// Caller-supplied options: a URL string or a partially-filled `Options` map.
/// Either form normalizes to the same `ResolvedOptions` (spec §4.4).
pub enum PoolConfig {
    Url(String),
    Options(Options),
}

impl From<&str> for PoolConfig {
    fn from(url: &str) -> Self {
        PoolConfig::Url(url.to_owned())
    }
}

impl From<String> for PoolConfig {
    fn from(url: String) -> Self {
        PoolConfig::Url(url)
    }
}

impl From<Options> for PoolConfig {
    fn from(options: Options) -> Self {
        PoolConfig::Options(options)
    }
}

/// Caller-facing options (spec §6's recognized keys), all optional: unset
/// fields fall back to the well-known service (if any) and finally to the
/// built-in defaults during `normalize`.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure: Option<bool>,
    pub ignore_tls: Option<bool>,
    pub auth: Option<Auth>,
    pub auth_method: Option<String>,
    pub name: Option<String>,
    pub local_address: Option<String>,
    pub connection_timeout: Option<Duration>,
    pub greeting_timeout: Option<Duration>,
    pub socket_timeout: Option<Duration>,
    pub debug: Option<bool>,
    pub service: Option<String>,
    pub max_connections: Option<u32>,
    pub max_messages: Option<u32>,
    pub rate_limit: Option<u32>,
}

impl Options {
    pub fn parse_url(url: &str) -> Result<Options, ConfigError> {
        let parsed = Url::parse(url).map_err(|e| ConfigError::new(format!("bad url: {}", e)))?;

        let secure = match parsed.scheme() {
            "smtps" => Some(true),
            "smtp" => None,
            other => return Err(ConfigError::new(format!("unsupported scheme {:?}", other))),
        };

        let mut options = Options {
            host: parsed.host_str().map(|h| h.to_owned()),
            port: parsed.port(),
            secure,
            ..Default::default()
        };

        if !parsed.username().is_empty() {
            let user = urlencoding_decode(parsed.username());
            let pass = parsed.password().map(urlencoding_decode).unwrap_or_default();
            options.auth = Some(Auth::Plain { user, pass });
        }

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "maxConnections" => {
                    options.max_connections = Some(
                        value
                            .parse()
                            .map_err(|_| ConfigError::new("maxConnections must be an integer"))?,
                    )
                }
                "maxMessages" => {
                    options.max_messages = Some(
                        value
                            .parse()
                            .map_err(|_| ConfigError::new("maxMessages must be an integer"))?,
                    )
                }
                "rateLimit" => {
                    options.rate_limit = Some(
                        value
                            .parse()
                            .map_err(|_| ConfigError::new("rateLimit must be an integer"))?,
                    )
                }
                "service" => options.service = Some(value.into_owned()),
                "name" => options.name = Some(value.into_owned()),
                "authMethod" => options.auth_method = Some(value.into_owned()),
                "ignoreTLS" => options.ignore_tls = Some(value == "true"),
                "debug" => options.debug = Some(value == "true"),
                // unrecognized query params (e.g. `logger`) are accepted and ignored
                _ => {}
            }
        }

        Ok(options)
    }
}

fn urlencoding_decode(s: &str) -> String {
    percent_decode(s)
}

// Minimal percent-decoding for the userinfo component; `url` already decodes
// most of the URL for us via `query_pairs`, but `username()`/`password()`
// return the raw (percent-encoded) component.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Fully resolved, frozen options (spec §3 `Pool State`: "options (frozen
/// after construction)").
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub ignore_tls: bool,
    pub auth: Option<Auth>,
    pub auth_method: Option<String>,
    pub name: String,
    pub local_address: Option<String>,
    pub connection_timeout: Duration,
    pub greeting_timeout: Duration,
    pub socket_timeout: Duration,
    pub debug: bool,
    pub max_connections: u32,
    pub max_messages: u32,
    pub rate_limit: Option<u32>,
}

impl ResolvedOptions {
    /// Normalize caller options: merge in the well-known service (if any,
    /// left-preserving so explicit options always win), then apply defaults.
    pub fn normalize(mut options: Options) -> Result<ResolvedOptions, ConfigError> {
        if let Some(service) = options.service.clone() {
            let wk = well_known::lookup(&service)
                .ok_or_else(|| ConfigError::new(format!("unknown well-known service {:?}", service)))?;
            options.host.get_or_insert_with(|| wk.host.to_owned());
            options.port.get_or_insert(wk.port);
            options.secure.get_or_insert(wk.secure);
        }

        let secure = options.secure.unwrap_or(false);
        Ok(ResolvedOptions {
            host: options.host.unwrap_or_else(|| "localhost".to_owned()),
            port: options.port.unwrap_or(if secure { 465 } else { 25 }),
            secure,
            ignore_tls: options.ignore_tls.unwrap_or(false),
            auth: options.auth,
            auth_method: options.auth_method,
            name: options.name.unwrap_or_else(|| "localhost".to_owned()),
            local_address: options.local_address,
            connection_timeout: options.connection_timeout.unwrap_or(Duration::from_secs(2 * 60)),
            greeting_timeout: options.greeting_timeout.unwrap_or(Duration::from_secs(30)),
            socket_timeout: options.socket_timeout.unwrap_or(Duration::from_secs(10 * 60)),
            debug: options.debug.unwrap_or(false),
            max_connections: options.max_connections.unwrap_or(5),
            max_messages: options.max_messages.unwrap_or(100),
            rate_limit: options.rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_merge_is_left_preserving() {
        let mut options = Options::default();
        options.service = Some("Gmail".to_owned());
        options.port = Some(2525); // explicit, must win over Gmail's 465
        let resolved = ResolvedOptions::normalize(options).unwrap();
        assert_eq!(resolved.host, "smtp.gmail.com");
        assert_eq!(resolved.port, 2525);
        assert!(resolved.secure);
    }

    #[test]
    fn defaults_are_five_and_hundred() {
        let resolved = ResolvedOptions::normalize(Options::default()).unwrap();
        assert_eq!(resolved.max_connections, 5);
        assert_eq!(resolved.max_messages, 100);
        assert!(resolved.rate_limit.is_none());
    }

    #[test]
    fn url_form_parses_query_options() {
        let options =
            Options::parse_url("smtp://user%40example.com:pw@mail.example.com:2525/?maxConnections=3&rateLimit=10")
                .unwrap();
        assert_eq!(options.host.as_deref(), Some("mail.example.com"));
        assert_eq!(options.port, Some(2525));
        assert_eq!(options.max_connections, Some(3));
        assert_eq!(options.rate_limit, Some(10));
        match options.auth {
            Some(Auth::Plain { user, pass }) => {
                assert_eq!(user, "user@example.com");
                assert_eq!(pass, "pw");
            }
            other => panic!("unexpected auth: {:?}", other),
        }
    }

    #[test]
    fn unknown_service_is_rejected() {
        let mut options = Options::default();
        options.service = Some("not-a-service".to_owned());
        assert!(ResolvedOptions::normalize(options).is_err());
    }
}
