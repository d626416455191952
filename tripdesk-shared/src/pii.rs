use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Passenger data that must not show up in logs.
///
/// `Debug` and `Display` only reveal the last few characters (enough to tell
/// two ticket numbers apart in a trace); serialization keeps the full value
/// because API responses and the database need it.
#[derive(Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(transparent)]
pub struct Redacted<T>(pub T);

const VISIBLE_TAIL: usize = 3;

impl<T: AsRef<str>> Redacted<T> {
    fn masked(&self) -> String {
        let value = self.0.as_ref();
        let count = value.chars().count();
        if count <= VISIBLE_TAIL {
            return "*".repeat(count);
        }
        let tail: String = value.chars().skip(count - VISIBLE_TAIL).collect();
        format!("{}{}", "*".repeat(count - VISIBLE_TAIL), tail)
    }
}

impl<T: AsRef<str>> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.masked())
    }
}

impl<T: AsRef<str>> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl<T: Serialize> Serialize for Redacted<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Redacted<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl From<String> for Redacted<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Redacted<String> {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
