use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Backend-assigned message identifier.
///
/// The backend emits either integers or strings. Both are kept as text;
/// ordering compares numerically when both sides are integers so that
/// `"10"` sorts after `"9"`. Integer ids sort before non-integer ids.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn as_integer(&self) -> Option<i128> {
        self.0.parse().ok()
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_integer(), other.as_integer()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Uint(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => Self(n.to_string()),
            RawId::Uint(n) => Self(n.to_string()),
            RawId::Text(s) => Self(s),
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MessageId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<u64> for MessageId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ids_order_numerically() {
        let nine = MessageId::from(9);
        let ten = MessageId::from(10);
        assert!(nine < ten);
    }

    #[test]
    fn text_ids_order_lexically() {
        let a = MessageId::from_raw("msg-a");
        let b = MessageId::from_raw("msg-b");
        assert!(a < b);
    }

    #[test]
    fn integers_sort_before_text() {
        let n = MessageId::from(999_999);
        let s = MessageId::from_raw("abc");
        assert!(n < s);
    }

    #[test]
    fn deserializes_from_number_or_string() {
        let from_int: MessageId = serde_json::from_str("42").unwrap();
        let from_str: MessageId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_int, from_str);
        assert_eq!(from_int.as_str(), "42");
    }

    #[test]
    fn serializes_as_string() {
        let id = MessageId::from(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"7\"");
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = MessageId::from_raw("64f0c2e9a1");
        assert_eq!(id.to_string(), "64f0c2e9a1");
    }
}
