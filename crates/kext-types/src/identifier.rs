use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// The identifier of a kext bundle, e.g. `com.example.driver.AppleWidget`.
///
/// Identifiers are opaque: any non-empty string without whitespace is
/// accepted, and two identifiers are equal exactly when their strings are.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BundleIdentifier(String);

impl BundleIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An error when validating a [`BundleIdentifier`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIdentifierError {
    #[error("bundle identifier is empty")]
    Empty,
    #[error("bundle identifier {0:?} contains whitespace")]
    Whitespace(String),
}

impl FromStr for BundleIdentifier {
    type Err = InvalidIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidIdentifierError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(InvalidIdentifierError::Whitespace(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for BundleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BundleIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for BundleIdentifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for BundleIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for BundleIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn accepts_reverse_dns_names() {
        for s in ["com.example.driver", "org.kext_tools.test-kext", "a"] {
            assert_eq!(BundleIdentifier::from_str(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert_eq!(
            BundleIdentifier::from_str(""),
            Err(InvalidIdentifierError::Empty)
        );
        assert!(matches!(
            BundleIdentifier::from_str("com.example. driver"),
            Err(InvalidIdentifierError::Whitespace(_))
        ));
    }
}
