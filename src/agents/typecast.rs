//! 宽松类型转换：检索结果字符串 → 整数 / 浮点 / 布尔 / 列表 / 字符串

use std::fmt;

use serde::Serialize;

use crate::agents::retriever::{RetrievedValue, LIST_SEPARATOR};

const NOOP: &str = "NOOP";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Data {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Data>),
}

impl Data {
    /// `NOOP`（信息不存在）映射为 None
    pub fn from_retrieved(value: &RetrievedValue) -> Option<Data> {
        match value {
            RetrievedValue::Single(s) if s.trim() == NOOP => None,
            RetrievedValue::Single(s) => Some(loose_typecast(s)),
            RetrievedValue::List(items) => {
                Some(Data::List(items.iter().map(|i| loose_typecast(i)).collect()))
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Data::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Data]> {
        match self {
            Data::List(items) => Some(items),
            _ => None,
        }
    }

    /// check 的判定：零、空串、空列表与 false 为假
    pub fn is_truthy(&self) -> bool {
        match self {
            Data::Int(n) => *n != 0,
            Data::Float(x) => *x != 0.0,
            Data::Bool(b) => *b,
            Data::Str(s) => !s.is_empty(),
            Data::List(items) => !items.is_empty(),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Int(n) => write!(f, "{n}"),
            Data::Float(x) => write!(f, "{x}"),
            Data::Bool(b) => write!(f, "{b}"),
            Data::Str(s) => f.write_str(s),
            Data::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    digits.matches('.').count() == 1
        && digits.len() > 1
        && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

pub fn loose_typecast(value: &str) -> Data {
    let value = value.trim();
    if value.contains(LIST_SEPARATOR) {
        let items = match RetrievedValue::parse(value) {
            RetrievedValue::List(items) => items,
            RetrievedValue::Single(item) => vec![item],
        };
        return Data::List(items.iter().map(|i| loose_typecast(i)).collect());
    }
    if value.eq_ignore_ascii_case("true") {
        return Data::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return Data::Bool(false);
    }
    if is_integer(value) {
        if let Ok(n) = value.parse::<i64>() {
            return Data::Int(n);
        }
    }
    if is_decimal(value) {
        if let Ok(x) = value.parse::<f64>() {
            return Data::Float(x);
        }
    }
    Data::Str(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!loose_typecast("false").is_truthy());
        assert!(loose_typecast("True").is_truthy());
        assert!(!loose_typecast("0").is_truthy());
        assert!(loose_typecast("Buy milk").is_truthy());
        assert!(!Data::List(Vec::new()).is_truthy());
    }

    #[test]
    fn test_scalars() {
        assert_eq!(loose_typecast(" 42 "), Data::Int(42));
        assert_eq!(loose_typecast("-7"), Data::Int(-7));
        assert_eq!(loose_typecast("2.75"), Data::Float(2.75));
        assert_eq!(loose_typecast("True"), Data::Bool(true));
        assert_eq!(loose_typecast("false"), Data::Bool(false));
        assert_eq!(loose_typecast("1.2.3"), Data::Str("1.2.3".into()));
        assert_eq!(loose_typecast("$10"), Data::Str("$10".into()));
        assert_eq!(loose_typecast("."), Data::Str(".".into()));
    }

    #[test]
    fn test_list_recursive() {
        assert_eq!(
            loose_typecast("<SEP>1<SEP> two <SEP>3.5<SEP>"),
            Data::List(vec![Data::Int(1), Data::Str("two".into()), Data::Float(3.5)])
        );
    }

    #[test]
    fn test_noop_is_none() {
        assert_eq!(Data::from_retrieved(&RetrievedValue::Single("NOOP".into())), None);
        assert_eq!(
            Data::from_retrieved(&RetrievedValue::List(vec!["A".into(), "B".into()])),
            Some(Data::List(vec![Data::Str("A".into()), Data::Str("B".into())]))
        );
    }

    #[test]
    fn test_display_list() {
        let data = Data::List(vec![Data::Int(1), Data::Bool(true)]);
        assert_eq!(data.to_string(), "[1, true]");
    }
}
