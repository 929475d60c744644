//! Normalization of property values into the strings callers always see.

use std::fmt;

/// Typed value as produced by a native binding.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Boolean(bool),
    Absent,
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Integer(n) => write!(f, "{n}"),
            Scalar::Unsigned(n) => write!(f, "{n}"),
            Scalar::Boolean(true) => f.write_str("on"),
            Scalar::Boolean(false) => f.write_str("off"),
            Scalar::Absent => f.write_str("-"),
        }
    }
}

/// A property either wrapped in a binding object (with its source) or handed
/// over as a bare value.
#[derive(Debug, Clone, PartialEq)]
pub enum RawProperty {
    Wrapped {
        value: Scalar,
        source: Option<String>,
    },
    Plain(Scalar),
}

impl RawProperty {
    pub fn wrapped(value: Scalar, source: impl Into<String>) -> Self {
        RawProperty::Wrapped {
            value,
            source: Some(source.into()),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        RawProperty::Plain(Scalar::Text(value.into()))
    }
}

/// Reduce any property shape to its string value.
pub fn normalize(raw: &RawProperty) -> String {
    match raw {
        RawProperty::Wrapped { value, .. } => value.to_string(),
        RawProperty::Plain(value) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_values_are_dereferenced() {
        let raw = RawProperty::wrapped(Scalar::Unsigned(12), "local");
        assert_eq!(normalize(&raw), "12");
        let raw = RawProperty::wrapped(Scalar::Text("lz4".into()), "inherited from tank");
        assert_eq!(normalize(&raw), "lz4");
    }

    #[test]
    fn plain_values_are_stringified() {
        assert_eq!(normalize(&RawProperty::text("ONLINE")), "ONLINE");
        assert_eq!(normalize(&RawProperty::Plain(Scalar::Integer(-1))), "-1");
        assert_eq!(normalize(&RawProperty::Plain(Scalar::Boolean(true))), "on");
        assert_eq!(normalize(&RawProperty::Plain(Scalar::Absent)), "-");
    }
}
