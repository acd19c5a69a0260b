use axum::http::{HeaderValue, header::InvalidHeaderValue};
use std::fmt;

pub const SESSION_COOKIE_NAME: &str = "__session";
/// Five days, the longest window a session cookie is valid for.
pub const SESSION_TTL_SECONDS: u64 = 60 * 60 * 24 * 5;

/// A `Set-Cookie` value for the session cookie, rendered only at the response boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    value: String,
    max_age_seconds: u64,
    secure: bool,
}

impl SessionCookie {
    /// A cookie carrying a freshly minted session value.
    #[must_use]
    pub fn issue(value: impl Into<String>, secure: bool) -> Self {
        Self {
            value: value.into(),
            max_age_seconds: SESSION_TTL_SECONDS,
            secure,
        }
    }

    /// An empty, immediately expiring cookie that removes the session from the browser.
    #[must_use]
    pub const fn clear(secure: bool) -> Self {
        Self {
            value: String::new(),
            max_age_seconds: 0,
            secure,
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub const fn max_age_seconds(&self) -> u64 {
        self.max_age_seconds
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// # Errors
    /// Returns an error if the cookie value contains bytes not allowed in a header.
    pub fn to_header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&self.to_string())
    }
}

impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SESSION_COOKIE_NAME}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            self.value, self.max_age_seconds
        )?;
        if self.secure {
            f.write_str("; Secure")?;
        }
        Ok(())
    }
}
