//! Evaluation environment forwarded to aggregate functions.

use crate::value::Value;
use alloc::collections::BTreeMap;
use alloc::string::String;

/// Session-level state visible to aggregate expressions.
///
/// Accumulate nodes pass it through untouched.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    globals: BTreeMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a named global, returning the previous value.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.globals.insert(name.into(), value)
    }

    /// Returns a named global, or Null if it is not set.
    pub fn global(&self, name: &str) -> Value {
        self.globals.get(name).cloned().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globals() {
        let mut env = Environment::new();
        assert!(env.global("rate").is_null());
        env.set_global("rate", Value::Int64(2));
        assert_eq!(env.global("rate"), Value::Int64(2));
    }
}
