//! Wrapper for credentials and token values that must never appear in
//! logs or debug output.

use std::fmt;

/// An opaque string that redacts itself in `Debug` and `Display`.
/// Callers that genuinely need the value go through [`Sealed::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct Sealed(String);

impl Sealed {
    pub fn new(value: impl Into<String>) -> Self {
        Sealed(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Sealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sealed(***)")
    }
}

impl fmt::Display for Sealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for Sealed {
    fn from(value: String) -> Self {
        Sealed(value)
    }
}

impl From<&str> for Sealed {
    fn from(value: &str) -> Self {
        Sealed(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let secret = Sealed::new("terminal:1234");
        assert_eq!(format!("{:?}", secret), "Sealed(***)");
        assert_eq!(format!("{}", secret), "***");
    }

    #[test]
    fn expose_returns_inner_value() {
        let secret = Sealed::new("api-key-value");
        assert_eq!(secret.expose(), "api-key-value");
    }
}
