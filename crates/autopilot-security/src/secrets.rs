//! Static pre-shared secrets.
//!
//! The timer and the workflow engine authenticate with a fixed bearer
//! token. An endpoint whose secret is not configured refuses everything.

/// Outcome of checking a presented credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCheck {
    Ok,
    /// Nothing configured on our side. Surfaced as a server fault.
    NotConfigured,
    /// Missing or wrong credential. Deliberately carries no detail.
    Unauthorized,
}

/// A configured shared secret.
#[derive(Clone)]
pub struct SharedSecret {
    value: String,
}

impl SharedSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into().trim().to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.value.is_empty()
    }

    /// Compare a presented credential in constant time.
    pub fn check(&self, presented: Option<&str>) -> SecretCheck {
        if !self.is_configured() {
            return SecretCheck::NotConfigured;
        }
        match presented.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if constant_time_eq(p.as_bytes(), self.value.as_bytes()) => SecretCheck::Ok,
            _ => SecretCheck::Unauthorized,
        }
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// Pick the presented secret from an `Authorization` header value
/// (`Bearer <token>`) or, failing that, the `x-autopilot-secret` header.
pub fn presented_secret<'a>(authorization: Option<&'a str>, secret_header: Option<&'a str>) -> Option<&'a str> {
    let bearer = authorization.and_then(|v| {
        let v = v.trim();
        let (scheme, token) = v.split_once(' ')?;
        scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
    });
    bearer
        .filter(|t| !t.is_empty())
        .or_else(|| secret_header.map(str::trim).filter(|t| !t.is_empty()))
}

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
