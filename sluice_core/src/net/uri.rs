//! Ring URIs.
//!
//! `tcp://host[:port]/name` names a ring behind the bridge daemon on
//! `host`; anything without a scheme is a local ring name. No other
//! schemes exist.

use crate::error::{SluiceError, SluiceResult};

/// Port the bridge daemon listens on unless configured otherwise.
pub const DEFAULT_BRIDGE_PORT: u16 = 29_000;

/// A parsed ring address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingUri {
    /// Shared-memory attachment on this host.
    Local { name: String },
    /// Attachment through the bridge daemon on `host`.
    Remote {
        host: String,
        port: u16,
        name: String,
    },
}

impl RingUri {
    /// Parse a bare name or a `tcp://` URI.
    pub fn parse(input: &str) -> SluiceResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SluiceError::invalid_input("empty ring URI"));
        }

        if let Some(rest) = input.strip_prefix("tcp://") {
            let (authority, name) = rest.split_once('/').ok_or_else(|| {
                SluiceError::invalid_input(format!(
                    "remote URI '{}' is missing the /ringname part",
                    input
                ))
            })?;
            if name.is_empty() {
                return Err(SluiceError::invalid_input(format!(
                    "remote URI '{}' has an empty ring name",
                    input
                )));
            }
            let (host, port) = match authority.rsplit_once(':') {
                Some((h, p)) => {
                    let port: u16 = p.parse().map_err(|_| {
                        SluiceError::invalid_input(format!(
                            "remote URI '{}' has an invalid port '{}'",
                            input, p
                        ))
                    })?;
                    (h, port)
                }
                None => (authority, DEFAULT_BRIDGE_PORT),
            };
            if host.is_empty() {
                return Err(SluiceError::invalid_input(format!(
                    "remote URI '{}' has an empty host",
                    input
                )));
            }
            return Ok(RingUri::Remote {
                host: host.to_string(),
                port,
                name: name.to_string(),
            });
        }

        if input.contains("://") {
            return Err(SluiceError::invalid_input(format!(
                "unsupported URI scheme in '{}' (only tcp:// and bare names)",
                input
            )));
        }

        Ok(RingUri::Local {
            name: input.to_string(),
        })
    }

    /// The ring name regardless of locality.
    pub fn name(&self) -> &str {
        match self {
            RingUri::Local { name } => name,
            RingUri::Remote { name, .. } => name,
        }
    }
}

impl std::fmt::Display for RingUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingUri::Local { name } => write!(f, "{}", name),
            RingUri::Remote { host, port, name } => {
                write!(f, "tcp://{}:{}/{}", host, port, name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_is_local() {
        assert_eq!(
            RingUri::parse("rawdata").unwrap(),
            RingUri::Local {
                name: "rawdata".into()
            }
        );
    }

    #[test]
    fn tcp_uri_with_port() {
        assert_eq!(
            RingUri::parse("tcp://daq01:4000/rawdata").unwrap(),
            RingUri::Remote {
                host: "daq01".into(),
                port: 4000,
                name: "rawdata".into()
            }
        );
    }

    #[test]
    fn tcp_uri_defaults_port() {
        let uri = RingUri::parse("tcp://localhost/r").unwrap();
        assert_eq!(
            uri,
            RingUri::Remote {
                host: "localhost".into(),
                port: DEFAULT_BRIDGE_PORT,
                name: "r".into()
            }
        );
        assert_eq!(uri.name(), "r");
    }

    #[test]
    fn rejects_garbage() {
        for bad in [
            "",
            "tcp://",
            "tcp://host",
            "tcp://host/",
            "tcp:///name",
            "tcp://host:notaport/name",
            "udp://host/name",
        ] {
            assert!(
                matches!(RingUri::parse(bad), Err(SluiceError::InvalidInput(_))),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn display_round_trips() {
        for s in ["plain", "tcp://h:1234/r"] {
            let uri = RingUri::parse(s).unwrap();
            assert_eq!(RingUri::parse(&uri.to_string()).unwrap(), uri);
        }
    }
}
