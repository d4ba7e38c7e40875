//! Literal values used as function arguments and expected results, and their
//! canonical text forms.
//!
//! | Value          | `to_repr`        | `to_literal`      | `to_plain_string` |
//! |----------------|------------------|-------------------|-------------------|
//! | `None`         | `None`           | `None`            | `null`            |
//! | `Bool(true)`   | `True`           | `True`            | `true`            |
//! | `Int(5)`       | `5`              | `5`               | `5`               |
//! | `Float(2.0)`   | `2.0`            | `2.0`             | `2`               |
//! | `Float(inf)`   | `inf`            | `float('inf')`    | `Infinity`        |
//! | `Float(1e21)`  | `1e+21`          | `1e+21`           | `1e+21`           |
//! | `Float(1e-7)`  | `1e-07`          | `1e-07`           | `1e-7`            |
//! | `Str("hi")`    | `'hi'`           | `'hi'`            | `hi`              |
//! | `List([1, 2])` | `[1, 2]`         | `[1, 2]`          | `1,2`             |

use std::fmt;

use serde::{Deserialize, Serialize};

/// A literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Python `None`, JSON `null`.
    None,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    Str(String),
    /// An ordered list.
    List(Vec<Value>),
}

impl Value {
    /// The text Python's `repr()` prints for this value.
    pub fn to_repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => str_repr(s),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(Value::to_repr).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }

    /// Python source text that evaluates to this value.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Float(f) if f.is_nan() => "float('nan')".to_string(),
            Value::Float(f) if f.is_infinite() && *f > 0.0 => "float('inf')".to_string(),
            Value::Float(f) if f.is_infinite() => "float('-inf')".to_string(),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(Value::to_literal).collect();
                format!("[{}]", items.join(", "))
            }
            other => other.to_repr(),
        }
    }

    /// The plain string form: strings verbatim, lower-case booleans, `null`,
    /// integral floats without a fraction, lists comma-joined.
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::None => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_plain(*f),
            Value::Str(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::None => String::new(),
                    other => other.to_plain_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_repr())
    }
}

fn float_repr(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    // `{:e}` gives the shortest round-tripping digits; Python switches to
    // exponent notation outside 1e-4 <= |x| < 1e16.
    let sci = format!("{x:e}");
    let Some((mantissa, exponent)) = sci.split_once('e') else {
        return sci;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return sci;
    };

    if x == 0.0 || (-4..16).contains(&exponent) {
        let positional = x.to_string();
        if positional.contains('.') {
            positional
        } else {
            format!("{positional}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

fn float_plain(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if x == 0.0 {
        "0".to_string()
    } else if (1e-7..1e21).contains(&x.abs()) {
        // Display never prints a trailing `.0`.
        x.to_string()
    } else {
        // Exponent form always carries a sign, e.g. `1e+21`, `1.5e-7`.
        let sci = format!("{x:e}");
        match sci.split_once('e') {
            Some((mantissa, exponent)) if exponent.starts_with('-') => {
                format!("{mantissa}e{exponent}")
            }
            Some((mantissa, exponent)) => format!("{mantissa}e+{exponent}"),
            None => sci,
        }
    }
}

fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let code = c as u32;
                let escaped = if code <= 0xff {
                    format!("\\x{code:02x}")
                } else if code <= 0xffff {
                    format!("\\u{code:04x}")
                } else {
                    format!("\\U{code:08x}")
                };
                out.push_str(&escaped);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}
