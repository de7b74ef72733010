//! Aggregate functions of the in-memory database

use std::fmt;

use crate::error::{SqidemError, SqidemResult};
use crate::memdb::table::Value;
use crate::result_set::JdbcType;

/// Supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// COUNT function - counts non-NULL values, or rows for `COUNT(*)`
    Count,
    /// SUM function - sums numeric values
    Sum,
    /// AVG function - average of numeric values as a double
    Avg,
    /// MIN function - smallest non-NULL value
    Min,
    /// MAX function - largest non-NULL value
    Max,
}

impl AggregateFunction {
    /// Convert a function name string to an AggregateFunction enum
    ///
    /// # Arguments
    /// * `name` - The function name (case-insensitive)
    ///
    /// # Returns
    /// * Some(AggregateFunction) if the name is a valid aggregate function, None otherwise
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "COUNT" => Some(AggregateFunction::Count),
            "SUM" => Some(AggregateFunction::Sum),
            "AVG" => Some(AggregateFunction::Avg),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    /// Result type given the type of the argument
    pub fn result_type(&self, argument: JdbcType) -> JdbcType {
        match self {
            AggregateFunction::Count => JdbcType::BigInt,
            AggregateFunction::Avg => JdbcType::Double,
            AggregateFunction::Sum if argument.is_numeric() && argument != JdbcType::Double => {
                JdbcType::BigInt
            }
            AggregateFunction::Sum => JdbcType::Double,
            AggregateFunction::Min | AggregateFunction::Max => argument,
        }
    }

    /// Execute the aggregate function on a column of values
    ///
    /// # Arguments
    /// * `values` - The column values to aggregate
    ///
    /// # Returns
    /// * The result of the aggregate function; NULL over no non-NULL input
    ///   except for COUNT
    pub fn execute(&self, values: &[Value]) -> SqidemResult<Value> {
        match self {
            AggregateFunction::Count => Ok(Value::Integer(
                values.iter().filter(|v| !v.is_null()).count() as i64,
            )),
            AggregateFunction::Sum => self.sum(values),
            AggregateFunction::Avg => self.avg(values),
            AggregateFunction::Min => self.extreme(values, std::cmp::Ordering::Less),
            AggregateFunction::Max => self.extreme(values, std::cmp::Ordering::Greater),
        }
    }

    fn sum(&self, values: &[Value]) -> SqidemResult<Value> {
        let mut int_sum: i64 = 0;
        let mut float_sum: f64 = 0.0;
        let mut is_float = false;
        let mut count = 0;

        for value in values {
            match value {
                Value::Null => continue,
                Value::Integer(i) if !is_float => {
                    int_sum = int_sum.checked_add(*i).ok_or_else(|| {
                        SqidemError::TypeError("Integer overflow in SUM".to_string())
                    })?;
                }
                Value::Integer(i) => float_sum += *i as f64,
                Value::Float(f) => {
                    if !is_float {
                        float_sum = int_sum as f64;
                        is_float = true;
                    }
                    float_sum += *f;
                }
                other => {
                    return Err(SqidemError::TypeError(format!(
                        "{} requires numeric values, got {}",
                        self.name(),
                        other.jdbc_type()
                    )))
                }
            }
            count += 1;
        }

        if count == 0 {
            Ok(Value::Null)
        } else if is_float {
            Ok(Value::Float(float_sum))
        } else {
            Ok(Value::Integer(int_sum))
        }
    }

    fn avg(&self, values: &[Value]) -> SqidemResult<Value> {
        let count = values.iter().filter(|v| !v.is_null()).count();
        match self.sum(values)? {
            Value::Integer(i) => Ok(Value::Float(i as f64 / count as f64)),
            Value::Float(f) => Ok(Value::Float(f / count as f64)),
            _ => Ok(Value::Null),
        }
    }

    fn extreme(&self, values: &[Value], wanted: std::cmp::Ordering) -> SqidemResult<Value> {
        let mut best: Option<&Value> = None;
        for value in values.iter().filter(|v| !v.is_null()) {
            best = match best {
                Some(current) if value.compare(current)? != Some(wanted) => Some(current),
                _ => Some(value),
            };
        }
        Ok(best.cloned().unwrap_or(Value::Null))
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> Vec<Value> {
        vec![
            Value::Integer(10),
            Value::Null,
            Value::Integer(20),
            Value::Integer(30),
        ]
    }

    #[test]
    fn test_from_name() {
        assert_eq!(AggregateFunction::from_name("count"), Some(AggregateFunction::Count));
        assert_eq!(AggregateFunction::from_name("Max"), Some(AggregateFunction::Max));
        assert_eq!(AggregateFunction::from_name("median"), None);
    }

    #[test]
    fn test_count_skips_nulls() {
        let result = AggregateFunction::Count.execute(&values()).unwrap();
        assert_eq!(result, Value::Integer(3));
    }

    #[test]
    fn test_sum_and_avg() {
        assert_eq!(
            AggregateFunction::Sum.execute(&values()).unwrap(),
            Value::Integer(60)
        );
        assert_eq!(
            AggregateFunction::Avg.execute(&values()).unwrap(),
            Value::Float(20.0)
        );
        let mixed = vec![Value::Integer(1), Value::Float(0.5)];
        assert_eq!(
            AggregateFunction::Sum.execute(&mixed).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn test_min_max() {
        assert_eq!(
            AggregateFunction::Min.execute(&values()).unwrap(),
            Value::Integer(10)
        );
        assert_eq!(
            AggregateFunction::Max.execute(&values()).unwrap(),
            Value::Integer(30)
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(AggregateFunction::Count.execute(&[]).unwrap(), Value::Integer(0));
        assert_eq!(AggregateFunction::Sum.execute(&[Value::Null]).unwrap(), Value::Null);
        assert_eq!(AggregateFunction::Max.execute(&[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_sum_rejects_strings() {
        let result = AggregateFunction::Sum.execute(&[Value::String("x".to_string())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_result_types() {
        assert_eq!(AggregateFunction::Count.result_type(JdbcType::Varchar), JdbcType::BigInt);
        assert_eq!(AggregateFunction::Sum.result_type(JdbcType::Integer), JdbcType::BigInt);
        assert_eq!(AggregateFunction::Sum.result_type(JdbcType::Double), JdbcType::Double);
        assert_eq!(AggregateFunction::Max.result_type(JdbcType::Varchar), JdbcType::Varchar);
    }
}
