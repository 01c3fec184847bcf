//! Template values and conversions.

/// A value bound to a template key.
///
/// Values drive both condition evaluation (a slot is active when it holds a
/// non-null, non-`false`, non-empty value) and handler substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value. Booleans are activation signals: they toggle a slot
    /// but never count as a carried value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// A collection, spread by special handlers.
    List(Vec<Value>),
}

impl Value {
    /// True when the value activates a condition slot.
    ///
    /// `Null`, `Bool(false)` and the empty list are all equivalent to an
    /// unset slot; an empty list additionally lets an optional spread
    /// variable drop its segment instead of failing.
    #[must_use]
    pub fn activates(&self) -> bool {
        match self {
            Self::Null | Self::Bool(false) => false,
            Self::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Returns the numeric literal representation, if the value is numeric.
    #[must_use]
    pub fn as_number_literal(&self) -> Option<String> {
        match self {
            Self::Int(n) => Some(format!("{n}")),
            Self::Float(f) => Some(format!("{f}")),
            _ => None,
        }
    }

    /// Returns the text content, if the value is textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list items, if the value is a collection.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(String::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation() {
        assert!(Value::Int(0).activates());
        assert!(Value::Text(String::new()).activates());
        assert!(Value::from(vec![1_i64]).activates());
        assert!(!Value::Null.activates());
        assert!(!Value::Bool(false).activates());
        assert!(!Value::List(vec![]).activates());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(42_i32), Value::Int(42));
        assert_eq!(Value::from("x"), Value::Text(String::from("x")));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(
            Value::from(vec!["a", "b"]),
            Value::List(vec![
                Value::Text(String::from("a")),
                Value::Text(String::from("b")),
            ])
        );
    }

    #[test]
    fn test_number_literal() {
        assert_eq!(Value::Int(-3).as_number_literal().unwrap(), "-3");
        assert_eq!(Value::Float(2.5).as_number_literal().unwrap(), "2.5");
        assert!(Value::Text(String::from("3")).as_number_literal().is_none());
    }
}
