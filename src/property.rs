//! Script property values and their stacks
//!
//! `!set`, `!push` and `!pop` manipulate one stack of values per property
//! name. The property `outputformat` is reserved: its values are output format
//! names and are checked when the script is parsed.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::env::{Env, EnvValue};
use crate::error::{SqidemError, SqidemResult};
use crate::format::OutputFormat;

/// Name of the property selecting the output format
pub const OUTPUT_FORMAT: &str = "outputformat";

/// A typed property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(Decimal),
    Str(String),
    Format(OutputFormat),
}

impl PropertyValue {
    /// Parse the value token of a `!set` or `!push` directive
    ///
    /// # Arguments
    /// * `name` - Property name; `outputformat` only accepts format names
    /// * `token` - Value text as written in the script
    /// * `line` - Line number for error reporting
    pub fn parse(name: &str, token: &str, line: usize) -> SqidemResult<Self> {
        let token = token.trim();
        if name == OUTPUT_FORMAT {
            return OutputFormat::from_name(token)
                .map(PropertyValue::Format)
                .ok_or_else(|| SqidemError::InvalidPropertyValue {
                    line,
                    name: name.to_string(),
                    value: token.to_string(),
                });
        }

        match token {
            "null" => Ok(PropertyValue::Null),
            "true" => Ok(PropertyValue::Bool(true)),
            "false" => Ok(PropertyValue::Bool(false)),
            _ if integer_regex().is_match(token) => match Decimal::from_str(token) {
                Ok(number) => Ok(PropertyValue::Number(number)),
                // too many digits for a decimal; keep the literal text
                Err(_) => Ok(PropertyValue::Str(token.to_string())),
            },
            _ => Ok(PropertyValue::Str(unquote(token))),
        }
    }

    /// Convert a fallback value from the caller's environment
    pub fn from_env(name: &str, value: &EnvValue) -> Self {
        match value {
            EnvValue::Null | EnvValue::Nested(_) => PropertyValue::Null,
            EnvValue::Bool(b) => PropertyValue::Bool(*b),
            EnvValue::Decimal(d) => PropertyValue::Number(*d),
            EnvValue::Str(s) if name == OUTPUT_FORMAT => OutputFormat::from_name(s)
                .map(PropertyValue::Format)
                .unwrap_or_else(|| PropertyValue::Str(s.clone())),
            EnvValue::Str(s) => PropertyValue::Str(s.clone()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Number(n) => write!(f, "{}", n),
            PropertyValue::Str(s) => f.write_str(s),
            PropertyValue::Format(format) => write!(f, "{}", format),
        }
    }
}

fn integer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?[0-9]+$").expect("valid integer regex"))
}

fn unquote(token: &str) -> String {
    for quote in ['\'', '"'] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            return token[1..token.len() - 1].to_string();
        }
    }
    token.to_string()
}

/// One value stack per property name
#[derive(Debug, Clone, Default)]
pub struct PropertyStacks {
    stacks: HashMap<String, Vec<PropertyValue>>,
}

impl PropertyStacks {
    pub fn new() -> Self {
        PropertyStacks::default()
    }

    /// Replace the top value, or start the stack if empty
    pub fn set(&mut self, name: &str, value: PropertyValue) {
        let stack = self.stacks.entry(name.to_string()).or_default();
        match stack.last_mut() {
            Some(top) => *top = value,
            None => stack.push(value),
        }
    }

    /// Add a new top value
    pub fn push(&mut self, name: &str, value: PropertyValue) {
        self.stacks.entry(name.to_string()).or_default().push(value);
    }

    /// Remove the top value; `None` if the stack was empty
    pub fn pop(&mut self, name: &str) -> Option<PropertyValue> {
        self.stacks.get_mut(name).and_then(Vec::pop)
    }

    /// The top value, if the stack is not empty
    pub fn top(&self, name: &str) -> Option<&PropertyValue> {
        self.stacks.get(name).and_then(|stack| stack.last())
    }

    /// The effective value: the top of the stack, else the environment, else null
    pub fn current(&self, name: &str, env: &Env) -> PropertyValue {
        match self.top(name) {
            Some(value) => value.clone(),
            None => env
                .get(name)
                .map(|value| PropertyValue::from_env(name, value))
                .unwrap_or(PropertyValue::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert_eq!(PropertyValue::parse("foo", "null", 1).unwrap(), PropertyValue::Null);
        assert_eq!(
            PropertyValue::parse("foo", "true", 1).unwrap(),
            PropertyValue::Bool(true)
        );
        assert_eq!(
            PropertyValue::parse("foo", "-12", 1).unwrap(),
            PropertyValue::Number(Decimal::from(-12))
        );
        assert_eq!(
            PropertyValue::parse("foo", "'hello world'", 1).unwrap(),
            PropertyValue::Str("hello world".to_string())
        );
        assert_eq!(
            PropertyValue::parse("foo", "1.5", 1).unwrap(),
            PropertyValue::Str("1.5".to_string())
        );
    }

    #[test]
    fn test_integer_beyond_decimal_range_keeps_text() {
        let token = "123456789012345678901234567890123";
        assert_eq!(
            PropertyValue::parse("foo", token, 1).unwrap(),
            PropertyValue::Str(token.to_string())
        );
        assert_eq!(
            PropertyValue::parse("foo", token, 1).unwrap().to_string(),
            token
        );
    }

    #[test]
    fn test_output_format_is_checked() {
        assert_eq!(
            PropertyValue::parse(OUTPUT_FORMAT, "psql", 1).unwrap(),
            PropertyValue::Format(OutputFormat::Psql)
        );
        let err = PropertyValue::parse(OUTPUT_FORMAT, "excel", 4).unwrap_err();
        assert!(matches!(err, SqidemError::InvalidPropertyValue { line: 4, .. }));
    }

    #[test]
    fn test_stack_discipline() {
        let mut stacks = PropertyStacks::new();
        let env = Env::new();
        stacks.push("foo", PropertyValue::Bool(true));
        stacks.push("foo", PropertyValue::Bool(false));
        assert_eq!(stacks.pop("foo"), Some(PropertyValue::Bool(false)));
        assert_eq!(stacks.current("foo", &env), PropertyValue::Bool(true));
        stacks.set("foo", PropertyValue::Str("x".to_string()));
        assert_eq!(stacks.pop("foo"), Some(PropertyValue::Str("x".to_string())));
        assert_eq!(stacks.pop("foo"), None);
        assert_eq!(stacks.current("foo", &env), PropertyValue::Null);
    }

    #[test]
    fn test_env_fallback() {
        let mut env = Env::new();
        env.insert("foo", EnvValue::Bool(true));
        env.insert(OUTPUT_FORMAT, EnvValue::Str("mysql".to_string()));
        let stacks = PropertyStacks::new();
        assert_eq!(stacks.current("foo", &env), PropertyValue::Bool(true));
        assert_eq!(
            stacks.current(OUTPUT_FORMAT, &env),
            PropertyValue::Format(OutputFormat::Mysql)
        );
    }
}
