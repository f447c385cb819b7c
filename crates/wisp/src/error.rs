//! Public error taxonomy. Every error carries a machine-readable `code`, a
//! human message, optional `details`, and — for wrapped causes — the
//! original error via `#[source]`. Individual chunk transport failures are
//! retried internally up to the configured budget; everything else is
//! surfaced unchanged to the caller.

use std::fmt;

/// Error kind, used by callers to branch on failure category without
/// string-matching messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Precondition violated by the caller or a server-advertised cap.
    Validation,
    /// Could not reach the peer or server; transient or fatal.
    Network,
    /// Reached the server, but its response violated the wire contract.
    Protocol,
    /// Key generation, encryption, decryption, or tag verification failed.
    Crypto,
    /// A caller-supplied or internal cancel token fired.
    Abort,
    /// A composed timer expired.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Abort => "abort",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    pub details: Option<String>,
    source: Option<anyhow::Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn network(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, code, message)
    }

    pub fn protocol(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, code, message)
    }

    pub fn crypto(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Crypto, code, message)
    }

    pub fn abort(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Abort, code, message)
    }

    pub fn timeout(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, code, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<wisp_crypto::CryptoError> for Error {
    fn from(e: wisp_crypto::CryptoError) -> Self {
        Error::crypto("crypto_failure", e.to_string()).with_source(anyhow::anyhow!(e))
    }
}

impl From<wisp_p2p::P2pError> for Error {
    fn from(e: wisp_p2p::P2pError) -> Self {
        use wisp_p2p::P2pError::*;
        match &e {
            Cancelled => Error::abort("p2p_cancelled", e.to_string()),
            VersionMismatch { .. } | Network(_) | Busy | HandshakeTimeout | EndAckTimeout
            | Watchdog => Error::network("p2p_network", e.to_string()),
            RemoteError(_) | CountMismatch { .. } | IllegalTransition { .. } => {
                Error::protocol("p2p_protocol", e.to_string())
            }
        }
        .with_source(anyhow::anyhow!(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_code_and_message() {
        let err = Error::validation("empty_file", "file is empty");
        let rendered = err.to_string();
        assert!(rendered.contains("validation"));
        assert!(rendered.contains("empty_file"));
        assert!(rendered.contains("file is empty"));
    }

    #[test]
    fn details_are_appended() {
        let err = Error::protocol("bad_status", "unexpected status").with_details("status=502");
        assert!(err.to_string().contains("status=502"));
    }
}
