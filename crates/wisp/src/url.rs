//! Server URL parsing and version-compatibility comparison.

use crate::error::Error;

/// Immutable `{ host, port, secure }`, derived from a URL string. Owned by
/// the [`crate::Client`]; never mutated after construction except when
/// HTTPS→HTTP fallback rewrites `secure` to `false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub host: String,
    pub port: Option<u16>,
    pub secure: bool,
}

/// Trims the input, defaults a missing scheme to `https`, strips trailing
/// slashes, and splits host/port/scheme. Rejects an empty host.
pub fn parse_server_url(input: &str) -> Result<ServerTarget, Error> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::validation("empty_server_url", "server URL is empty"));
    }

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("https".to_string(), trimmed),
    };
    let secure = match scheme.as_str() {
        "https" | "wss" => true,
        "http" | "ws" => false,
        other => {
            return Err(Error::validation(
                "unsupported_scheme",
                format!("unsupported URL scheme: {other}"),
            ))
        }
    };

    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return Err(Error::validation("empty_host", "server URL has no host"));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str.parse().map_err(|_| {
                Error::validation("invalid_port", format!("invalid port: {port_str}"))
            })?;
            (host.to_string(), Some(port))
        }
        None => (authority.to_string(), None),
    };

    if host.is_empty() {
        return Err(Error::validation("empty_host", "server URL has no host"));
    }

    Ok(ServerTarget { host, port, secure })
}

/// `"<scheme>://<host>[:<port>]"`.
pub fn build_base_url(target: &ServerTarget) -> String {
    let scheme = if target.secure { "https" } else { "http" };
    match target.port {
        Some(port) => format!("{scheme}://{}:{port}", target.host),
        None => format!("{scheme}://{}", target.host),
    }
}

/// Rejects empty names, names longer than 255 characters, or names
/// containing a path separator. Encrypted filenames (base64 ciphertext)
/// bypass this check entirely.
pub fn validate_plain_filename(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::validation("empty_filename", "filename is empty"));
    }
    if name.chars().count() > 255 {
        return Err(Error::validation("filename_too_long", "filename exceeds 255 characters"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(Error::validation(
            "invalid_filename",
            "filename must not contain a path separator",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatOutcome {
    pub compatible: bool,
    pub message: Option<&'static str>,
}

fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Compares `major.minor` (patch is ignored). Differing major versions are
/// incompatible; a client with a newer minor is compatible but flagged; a
/// client that is equal or older is compatible with no message.
pub fn check_version(client_version: &str, server_version: &str) -> CompatOutcome {
    let (Some((c_major, c_minor)), Some((s_major, s_minor))) = (
        parse_major_minor(client_version),
        parse_major_minor(server_version),
    ) else {
        return CompatOutcome {
            compatible: false,
            message: Some("could not parse version string"),
        };
    };

    if c_major != s_major {
        return CompatOutcome {
            compatible: false,
            message: Some("major version mismatch"),
        };
    }
    if c_minor > s_minor {
        return CompatOutcome {
            compatible: true,
            message: Some("client is newer than server"),
        };
    }
    CompatOutcome {
        compatible: true,
        message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_to_https_and_strips_trailing_slash() {
        let target = parse_server_url("example.com/").unwrap();
        assert!(target.secure);
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, None);
    }

    #[test]
    fn parse_respects_explicit_http_and_port() {
        let target = parse_server_url("http://localhost:8080").unwrap();
        assert!(!target.secure);
        assert_eq!(target.host, "localhost");
        assert_eq!(target.port, Some(8080));
    }

    #[test]
    fn parse_rejects_empty_host() {
        assert!(parse_server_url("https:///").is_err());
    }

    #[test]
    fn roundtrips_through_build_base_url() {
        for raw in ["https://s.example", "http://localhost:9000"] {
            let target = parse_server_url(raw).unwrap();
            let rebuilt = build_base_url(&target);
            let reparsed = parse_server_url(&rebuilt).unwrap();
            assert_eq!(target, reparsed);
        }
    }

    #[test]
    fn filename_validation_rejects_separators_and_overlong_names() {
        assert!(validate_plain_filename("").is_err());
        assert!(validate_plain_filename("a/b").is_err());
        assert!(validate_plain_filename("a\\b").is_err());
        assert!(validate_plain_filename(&"x".repeat(256)).is_err());
        assert!(validate_plain_filename("hello.txt").is_ok());
    }

    #[test]
    fn version_compat_table() {
        assert!(check_version("1.2.3", "1.9.0").compatible);
        let newer_client = check_version("1.9.0", "1.2.3");
        assert!(newer_client.compatible);
        assert!(newer_client.message.is_some());
        assert!(!check_version("2.0.0", "1.9.0").compatible);
    }
}
