//! Classification key generation and handling.

use std::fmt;

/// Number of token characters kept when a token is written to the logs.
const TOKEN_LOG_PREFIX: usize = 4;

/// The kind of credential a request is classified by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Classified by client network address
    Ip,
    /// Classified by the `API_KEY` token
    Token,
}

impl KeyKind {
    /// Namespace prefix used in the counter store.
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyKind::Ip => "ip",
            KeyKind::Token => "token",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A key that identifies the client a request is counted against.
///
/// Tokens and IP addresses live in separate namespaces in the store,
/// so a token that happens to equal an address never shares its counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassificationKey {
    /// Whether the value is a token or an address
    pub kind: KeyKind,
    /// The raw token or address
    pub value: String,
}

impl ClassificationKey {
    /// Create a key classified by IP address.
    pub fn ip(addr: &str) -> Self {
        Self {
            kind: KeyKind::Ip,
            value: addr.to_string(),
        }
    }

    /// Create a key classified by token.
    pub fn token(token: &str) -> Self {
        Self {
            kind: KeyKind::Token,
            value: token.to_string(),
        }
    }

    /// Pick the key for a request.
    ///
    /// A non-empty token wins outright; the address is only used when no
    /// token was supplied. An empty address is still a valid key.
    pub fn classify(ip: &str, token: &str) -> Self {
        if token.is_empty() {
            Self::ip(ip)
        } else {
            Self::token(token)
        }
    }

    /// The key under which counters and block records are stored.
    pub fn store_key(&self) -> String {
        format!("{}:{}", self.kind.prefix(), self.value)
    }

    /// A representation that is safe to put in log output.
    pub fn log_value(&self) -> String {
        match self.kind {
            KeyKind::Ip => self.store_key(),
            KeyKind::Token => {
                let visible: String = self.value.chars().take(TOKEN_LOG_PREFIX).collect();
                format!("{}:{}***", self.kind.prefix(), visible)
            }
        }
    }
}

impl fmt::Display for ClassificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.log_value())
    }
}
