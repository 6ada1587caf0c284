use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use crate::format::format_number;

/// Default `CONVFMT`/`OFMT`
pub const DEFAULT_NUMBER_FORMAT: &str = "%.6g";

/// AWK scalar value with dynamic typing and automatic coercion
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Uninitialized value - behaves as both "" and 0 until assigned
    #[default]
    Uninitialized,
    /// Numeric value
    Number(f64),
    /// String value
    String(String),
    /// Strnum: a string from input that looks numeric
    /// (compares numerically)
    NumericString(String, f64),
}

impl Value {
    /// Create a value for text that came from input (fields, records,
    /// getline, split, command-line assignments). Numeric-looking text
    /// becomes a strnum.
    #[inline]
    pub fn from_input(s: impl Into<String>) -> Self {
        let s = s.into();
        match looks_numeric(&s) {
            Some(num) => Value::NumericString(s, num),
            None => Value::String(s),
        }
    }

    /// Create a plain string value
    #[inline]
    pub fn from_string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Create a numeric value
    #[inline]
    pub fn from_number(n: f64) -> Self {
        Value::Number(n)
    }

    #[inline]
    pub fn from_bool(b: bool) -> Self {
        Value::Number(if b { 1.0 } else { 0.0 })
    }

    /// Check if this value is "true" in boolean context
    #[inline]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Uninitialized => false,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::NumericString(_, n) => *n != 0.0,
        }
    }

    /// Coerce to numeric value
    #[inline]
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Uninitialized => 0.0,
            Value::Number(n) => *n,
            Value::String(s) => parse_leading_number(s),
            Value::NumericString(_, n) => *n,
        }
    }

    /// Coerce to string value using the default conversion format
    #[inline]
    pub fn to_string_val(&self) -> String {
        self.to_string_with_format(DEFAULT_NUMBER_FORMAT)
    }

    /// Get string as Cow to avoid allocation when possible
    #[inline]
    pub fn as_str(&self, format: &str) -> Cow<'_, str> {
        match self {
            Value::Uninitialized => Cow::Borrowed(""),
            Value::Number(n) => Cow::Owned(format_number(*n, format)),
            Value::String(s) => Cow::Borrowed(s),
            Value::NumericString(s, _) => Cow::Borrowed(s),
        }
    }

    /// Coerce to string with specific format (for OFMT/CONVFMT)
    pub fn to_string_with_format(&self, format: &str) -> String {
        self.as_str(format).into_owned()
    }

    /// Check if this value is definitely numeric
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    /// Check if this value is a numeric string
    #[inline]
    pub fn is_numeric_string(&self) -> bool {
        matches!(self, Value::NumericString(_, _))
    }

    #[inline]
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Value::Uninitialized)
    }

    /// Check if this value should compare as a number
    #[inline]
    pub fn compares_as_number(&self) -> bool {
        matches!(
            self,
            Value::Number(_) | Value::NumericString(_, _) | Value::Uninitialized
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str(DEFAULT_NUMBER_FORMAT))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Compare two AWK values according to AWK comparison rules.
///
/// Numbers, strnums and uninitialized values compare numerically with each
/// other; any other pairing compares the string forms under `convfmt`.
#[inline]
pub fn compare_values(left: &Value, right: &Value, convfmt: &str) -> Ordering {
    if left.compares_as_number() && right.compares_as_number() {
        let l = left.to_number();
        let r = right.to_number();
        l.partial_cmp(&r).unwrap_or(Ordering::Equal)
    } else {
        left.as_str(convfmt).cmp(&right.as_str(convfmt))
    }
}

/// Parse the leading numeric portion of a string
/// "42abc" -> 42.0
/// "  3.14  " -> 3.14
/// "abc" -> 0.0
#[inline]
pub fn parse_leading_number(s: &str) -> f64 {
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() && is_blank(bytes[i]) {
        i += 1;
    }

    let start = i;
    let end = scan_number(bytes, i);
    if end == start {
        return 0.0;
    }

    let num_str = &s[start..end];
    if let Ok(n) = num_str.parse::<i64>() {
        return n as f64;
    }
    num_str.parse().unwrap_or(0.0)
}

/// Decide whether text looks numeric: optional surrounding blanks, an
/// optional sign, digits with at most one decimal point, an optional
/// exponent. Returns the value when it does.
#[inline]
pub fn looks_numeric(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && is_blank(bytes[i]) {
        i += 1;
    }
    let start = i;
    let end = scan_number(bytes, i);
    if end == start {
        return None;
    }
    let mut j = end;
    while j < bytes.len() && is_blank(bytes[j]) {
        j += 1;
    }
    if j != bytes.len() {
        return None;
    }
    s[start..end].parse().ok()
}

#[inline]
fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Scan `[+-]? digits [. digits] [eE [+-] digits]` from `i`, returning the
/// end of the longest valid prefix (== `i` when there is none)
fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    let start = i;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }

    let mut has_digits = false;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        has_digits = true;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            has_digits = true;
        }
    }
    if !has_digits {
        return start;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let exp_start = i;
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        if i < bytes.len() && bytes[i].is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        } else {
            // Invalid exponent, back up
            i = exp_start;
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized() {
        let v = Value::Uninitialized;
        assert_eq!(v.to_number(), 0.0);
        assert_eq!(v.to_string_val(), "");
        assert!(!v.is_truthy());
    }

    #[test]
    fn test_uninitialized_equals_zero_and_empty() {
        let v = Value::Uninitialized;
        assert_eq!(compare_values(&v, &Value::Number(0.0), "%.6g"), Ordering::Equal);
        assert_eq!(compare_values(&v, &Value::from(""), "%.6g"), Ordering::Equal);
    }

    #[test]
    fn test_number() {
        let v = Value::Number(42.0);
        assert_eq!(v.to_number(), 42.0);
        assert_eq!(v.to_string_val(), "42");
        assert!(v.is_truthy());

        let zero = Value::Number(0.0);
        assert!(!zero.is_truthy());
    }

    #[test]
    fn test_string() {
        let v = Value::from_string("hello");
        assert_eq!(v.to_number(), 0.0);
        assert_eq!(v.to_string_val(), "hello");
        assert!(v.is_truthy());

        let empty = Value::from_string("");
        assert!(!empty.is_truthy());

        // a string constant "0" is non-empty, hence true
        assert!(Value::from_string("0").is_truthy());
    }

    #[test]
    fn test_numeric_string() {
        let v = Value::from_input("42");
        assert!(v.is_numeric_string());
        assert_eq!(v.to_number(), 42.0);
        assert_eq!(v.to_string_val(), "42");

        // input " 0 " is a strnum with value zero, hence false
        assert!(!Value::from_input(" 0 ").is_truthy());
        assert!(!Value::from_input("abc").is_numeric_string());
    }

    #[test]
    fn test_looks_numeric_grammar() {
        assert_eq!(looks_numeric("  +1.5e3 "), Some(1500.0));
        assert_eq!(looks_numeric("-.5"), Some(-0.5));
        assert_eq!(looks_numeric("3."), Some(3.0));
        assert_eq!(looks_numeric("\t7\n"), Some(7.0));
        assert_eq!(looks_numeric("."), None);
        assert_eq!(looks_numeric(""), None);
        assert_eq!(looks_numeric("1e"), None);
        assert_eq!(looks_numeric("0x1A"), None);
        assert_eq!(looks_numeric("inf"), None);
        assert_eq!(looks_numeric("12abc"), None);
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(parse_leading_number("42abc"), 42.0);
        assert_eq!(parse_leading_number("  3.14  "), 3.14);
        assert_eq!(parse_leading_number("abc"), 0.0);
        assert_eq!(parse_leading_number("-5.5"), -5.5);
        assert_eq!(parse_leading_number("1e10"), 1e10);
        assert_eq!(parse_leading_number("2e+x"), 2.0);
    }

    #[test]
    fn test_comparison() {
        let n1 = Value::Number(10.0);
        let n2 = Value::Number(2.0);
        assert_eq!(compare_values(&n1, &n2, "%.6g"), Ordering::Greater);

        let s1 = Value::from_input("10");
        let s2 = Value::from_input("2");
        // Both strnums -> compare numerically
        assert_eq!(compare_values(&s1, &s2, "%.6g"), Ordering::Greater);

        let c1 = Value::from_string("10");
        let c2 = Value::from_string("2");
        // String constants -> compare lexically
        assert_eq!(compare_values(&c1, &c2, "%.6g"), Ordering::Less);

        let s3 = Value::from_string("abc");
        let s4 = Value::from_string("def");
        assert_eq!(compare_values(&s3, &s4, "%.6g"), Ordering::Less);
    }
}
