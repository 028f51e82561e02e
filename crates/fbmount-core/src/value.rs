//! Conversion between file contents and typed remote values.
//!
//! Files in the mirror hold one of three scalar types. Reads render the
//! scalar as bytes; writes parse bytes back into a scalar, using the node's
//! previous value as a type hint so that strings stay strings and booleans
//! written as `0`/`1` stay booleans.

use serde_json::{Number, Value};
use std::fmt;

/// 2^53. Every integer of smaller magnitude is exact as an `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A primitive value stored at a leaf of the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Boolean(bool),
    String(String),
}

impl Scalar {
    /// Extracts a scalar from a JSON value.
    ///
    /// Returns `None` for `null`, objects and arrays.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Scalar::Boolean(*b)),
            Value::Number(n) => n.as_f64().map(Scalar::Number),
            Value::String(s) => Some(Scalar::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Converts this scalar into the JSON value sent to the remote store.
    ///
    /// Integral numbers within the exactly representable range are sent as
    /// JSON integers, so `5` is written as `5` and not `5.0`.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                Value::from(*n as i64)
            }
            Scalar::Number(n) => Number::from_f64(*n)
                .map_or_else(|| Value::String(n.to_string()), Value::Number),
            Scalar::Boolean(b) => Value::Bool(*b),
            Scalar::String(s) => Value::String(s.clone()),
        }
    }

    /// Short type name, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Number(_) => "number",
            Scalar::Boolean(_) => "boolean",
            Scalar::String(_) => "string",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Boolean(b) => write!(f, "{b}"),
            Scalar::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Converts bytes written to a file into the scalar to store remotely.
///
/// - A non-empty string previous value keeps the file a string.
/// - Otherwise the trimmed text is parsed as a finite `f64`; text that does
///   not parse is stored as the untrimmed string.
/// - A parsed number replaces a boolean previous value with `number != 0`.
pub fn value_from_bytes(bytes: &[u8], previous: Option<&Scalar>) -> Scalar {
    let text = String::from_utf8_lossy(bytes).into_owned();
    if let Some(Scalar::String(prev)) = previous
        && !prev.is_empty()
    {
        return Scalar::String(text);
    }

    // Trim so that `echo 1 > file` parses despite the trailing newline.
    let parsed = match text.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => return Scalar::String(text),
    };

    match previous {
        Some(Scalar::Boolean(_)) => Scalar::Boolean(parsed != 0.0),
        _ => Scalar::Number(parsed),
    }
}

/// Renders a scalar as the contents of its file.
///
/// Numbers use the shortest decimal form that parses back to the same value,
/// booleans render as `1`/`0`.
pub fn bytes_from_value(value: &Scalar) -> Vec<u8> {
    match value {
        Scalar::Number(n) => n.to_string().into_bytes(),
        Scalar::Boolean(true) => b"1".to_vec(),
        Scalar::Boolean(false) => b"0".to_vec(),
        Scalar::String(s) => s.as_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_number_rendering() {
        assert_eq!(bytes_from_value(&Scalar::Number(3.0)), b"3");
        assert_eq!(bytes_from_value(&Scalar::Number(5.0)), b"5");
        assert_eq!(bytes_from_value(&Scalar::Number(-1.5)), b"-1.5");
        assert_eq!(bytes_from_value(&Scalar::Number(0.1)), b"0.1");
    }

    #[test]
    fn test_boolean_rendering() {
        assert_eq!(bytes_from_value(&Scalar::Boolean(true)), b"1");
        assert_eq!(bytes_from_value(&Scalar::Boolean(false)), b"0");
    }

    #[test]
    fn test_string_previous_stays_string() {
        let prev = Scalar::String("hello".to_string());
        assert_eq!(
            value_from_bytes(b"42", Some(&prev)),
            Scalar::String("42".to_string())
        );
    }

    #[test]
    fn test_empty_string_previous_parses_numbers() {
        let prev = Scalar::String(String::new());
        assert_eq!(value_from_bytes(b"42\n", Some(&prev)), Scalar::Number(42.0));
    }

    #[test]
    fn test_unparseable_text_keeps_whitespace() {
        assert_eq!(
            value_from_bytes(b"hi there\n", None),
            Scalar::String("hi there\n".to_string())
        );
    }

    #[test]
    fn test_number_with_newline() {
        let prev = Scalar::Number(1.0);
        assert_eq!(value_from_bytes(b" 7.25\n", Some(&prev)), Scalar::Number(7.25));
    }

    #[test]
    fn test_boolean_previous() {
        let prev = Scalar::Boolean(false);
        assert_eq!(value_from_bytes(b"42\n", Some(&prev)), Scalar::Boolean(true));
        assert_eq!(value_from_bytes(b"0", Some(&prev)), Scalar::Boolean(false));
        assert_eq!(
            value_from_bytes(b"yes", Some(&prev)),
            Scalar::String("yes".to_string())
        );
    }

    #[test]
    fn test_non_finite_text_is_a_string() {
        assert_eq!(value_from_bytes(b"inf", None), Scalar::String("inf".to_string()));
        assert_eq!(value_from_bytes(b"NaN", None), Scalar::String("NaN".to_string()));
    }

    #[test]
    fn test_json_conversion() {
        assert_eq!(Scalar::from_json(&json!(3)), Some(Scalar::Number(3.0)));
        assert_eq!(Scalar::from_json(&json!(true)), Some(Scalar::Boolean(true)));
        assert_eq!(
            Scalar::from_json(&json!("hi")),
            Some(Scalar::String("hi".to_string()))
        );
        assert_eq!(Scalar::from_json(&json!(null)), None);
        assert_eq!(Scalar::from_json(&json!({"a": 1})), None);

        assert_eq!(Scalar::Number(2.5).to_json(), json!(2.5));
        assert_eq!(Scalar::Number(5.0).to_json(), json!(5));
        assert_eq!(Scalar::Number(-3.0).to_json(), json!(-3));
        assert_eq!(Scalar::Boolean(false).to_json(), json!(false));
        assert_eq!(Scalar::String("x".into()).to_json(), json!("x"));
    }

    proptest! {
        #[test]
        fn prop_number_round_trip(n in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            let v = Scalar::Number(n);
            prop_assert_eq!(value_from_bytes(&bytes_from_value(&v), Some(&v)), v);
        }

        #[test]
        fn prop_boolean_round_trip(b in any::<bool>()) {
            let v = Scalar::Boolean(b);
            prop_assert_eq!(value_from_bytes(&bytes_from_value(&v), Some(&v)), v);
        }

        #[test]
        fn prop_string_round_trip(s in ".*") {
            let v = Scalar::String(s);
            prop_assert_eq!(value_from_bytes(&bytes_from_value(&v), Some(&v)), v);
        }
    }
}
