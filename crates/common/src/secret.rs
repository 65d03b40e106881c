//! Secret wrapper for bearer and refresh tokens

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs, zeroed on drop
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Whether this secret holds exactly `candidate`.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl<T: Zeroize> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redacts_debug() {
        let secret = Secret::new(String::from("at_abc123"));
        let debug = format!("{:?}", secret);
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("at_abc123"));
    }

    #[test]
    fn test_secret_redacts_inside_containers() {
        let token: Option<Secret<String>> = Some(String::from("rt_xyz").into());
        let debug = format!("{:?}", token);
        assert_eq!(debug, "Some([REDACTED])");
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret = Secret::new(String::from("at_abc123"));
        assert_eq!(secret.expose(), "at_abc123");
        assert!(secret.matches("at_abc123"));
        assert!(!secret.matches("at_other"));
    }

    #[test]
    fn test_secret_equality_compares_inner() {
        let a = Secret::new(String::from("same"));
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Secret::new(String::from("different")));
    }
}
