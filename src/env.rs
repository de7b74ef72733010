//! Environment module for sqidem
//!
//! Variables supplied by the caller (for example `--var db.supports_x=true`)
//! are held in a tree of named values. `!if (path) {` blocks resolve a dotted
//! path against this tree, and property stacks fall back to it when empty.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

/// A value in the environment
#[derive(Debug, Clone, PartialEq)]
pub enum EnvValue {
    Null,
    Bool(bool),
    Str(String),
    Decimal(Decimal),
    Nested(Env),
}

impl EnvValue {
    /// Interpret a command-line token: `null`, `true`, `false`, a number, or text
    pub fn parse_token(token: &str) -> Self {
        match token {
            "null" => EnvValue::Null,
            "true" => EnvValue::Bool(true),
            "false" => EnvValue::Bool(false),
            _ => match Decimal::from_str(token) {
                Ok(d) => EnvValue::Decimal(d),
                Err(_) => EnvValue::Str(token.to_string()),
            },
        }
    }

    /// Truth value as used by conditional blocks
    pub fn is_true(&self) -> bool {
        match self {
            EnvValue::Bool(b) => *b,
            EnvValue::Str(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Null => f.write_str("null"),
            EnvValue::Bool(b) => write!(f, "{}", b),
            EnvValue::Str(s) => f.write_str(s),
            EnvValue::Decimal(d) => write!(f, "{}", d),
            EnvValue::Nested(_) => f.write_str("{...}"),
        }
    }
}

/// Named values, possibly nested
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Env {
    values: BTreeMap<String, EnvValue>,
}

impl Env {
    pub fn new() -> Self {
        Env::default()
    }

    pub fn get(&self, name: &str) -> Option<&EnvValue> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: &str, value: EnvValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Set a value under a dotted path, creating nested environments on the way
    ///
    /// A non-nested value sitting on the path is replaced by a nested one.
    pub fn set_path(&mut self, path: &str, value: EnvValue) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().unwrap_or_default();
        let mut env = self;
        for segment in segments {
            let slot = env
                .values
                .entry(segment.to_string())
                .or_insert_with(|| EnvValue::Nested(Env::new()));
            if !matches!(slot, EnvValue::Nested(_)) {
                *slot = EnvValue::Nested(Env::new());
            }
            let EnvValue::Nested(inner) = slot else {
                return;
            };
            env = inner;
        }
        env.insert(last, value);
    }

    /// Look up a dotted path; `None` if any segment is missing or not nested
    pub fn lookup(&self, path: &str) -> Option<&EnvValue> {
        let mut segments = path.split('.').peekable();
        let mut env = self;
        while let Some(segment) = segments.next() {
            let value = env.values.get(segment)?;
            if segments.peek().is_none() {
                return Some(value);
            }
            match value {
                EnvValue::Nested(inner) => env = inner,
                _ => return None,
            }
        }
        None
    }

    /// Resolve a condition path to a boolean
    ///
    /// `true` and `false` are literals. Otherwise the path is walked through
    /// nested environments and the final value must be boolean true or the
    /// string "true" (any case). A missing name, a null or a non-nested value
    /// before the last segment yields false.
    pub fn resolve(&self, path: &str) -> bool {
        match path.trim() {
            "true" => true,
            "false" => false,
            path => self.lookup(path).map_or(false, EnvValue::is_true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Env {
        let mut env = Env::new();
        env.set_path("calcite.approx", EnvValue::Bool(true));
        env.set_path("calcite.strict", EnvValue::Str("TRUE".to_string()));
        env.set_path("calcite.off", EnvValue::Bool(false));
        env.set_path("flag", EnvValue::Str("yes".to_string()));
        env.set_path("nothing", EnvValue::Null);
        env
    }

    #[test]
    fn test_literals() {
        let env = Env::new();
        assert!(env.resolve("true"));
        assert!(!env.resolve("false"));
    }

    #[test]
    fn test_nested_resolution() {
        let env = sample();
        assert!(env.resolve("calcite.approx"));
        assert!(env.resolve("calcite.strict"));
        assert!(!env.resolve("calcite.off"));
        assert!(!env.resolve("calcite.missing"));
        assert!(!env.resolve("flag"));
        assert!(!env.resolve("nothing"));
        assert!(!env.resolve("nothing.deeper"));
        // a non-nested value before the last segment
        assert!(!env.resolve("flag.deeper"));
        assert!(!env.resolve("calcite"));
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(EnvValue::parse_token("true"), EnvValue::Bool(true));
        assert_eq!(EnvValue::parse_token("null"), EnvValue::Null);
        assert_eq!(EnvValue::parse_token("42"), EnvValue::Decimal(Decimal::from(42)));
        assert_eq!(
            EnvValue::parse_token("abc"),
            EnvValue::Str("abc".to_string())
        );
    }

    #[test]
    fn test_set_path_replaces_leaf_with_nested() {
        let mut env = Env::new();
        env.set_path("a", EnvValue::Bool(true));
        env.set_path("a.b", EnvValue::Bool(true));
        assert!(env.resolve("a.b"));
        assert_eq!(env.lookup("a.b"), Some(&EnvValue::Bool(true)));
    }
}
