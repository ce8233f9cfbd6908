//! Bindings: positional references to values extracted from matched facts.

use crate::fact::{Fact, Tuple};
use crate::value::Value;
use alloc::string::String;

/// A named reference to a fact field.
///
/// The accumulate layer forwards bindings positionally and never looks inside
/// them; only aggregate functions resolve them. `offset` is the position of
/// the fact in the left tuple, `field` the position of the value in the fact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Binding {
    identifier: String,
    offset: usize,
    field: usize,
}

impl Binding {
    /// Creates a binding.
    pub fn new(identifier: impl Into<String>, offset: usize, field: usize) -> Self {
        Self {
            identifier: identifier.into(),
            offset,
            field,
        }
    }

    /// Creates a binding to a field of the fact currently being accumulated.
    pub fn field(identifier: impl Into<String>, field: usize) -> Self {
        Self::new(identifier, 0, field)
    }

    #[inline]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn field_index(&self) -> usize {
        self.field
    }

    /// Resolves the binding against a left tuple. Missing facts or fields read as Null.
    pub fn resolve(&self, tuple: &Tuple) -> Value {
        tuple
            .get(self.offset)
            .and_then(|fact| fact.get(self.field))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Resolves the binding against a single matched fact, ignoring `offset`.
    pub fn resolve_fact(&self, fact: &Fact) -> Value {
        fact.get(self.field).cloned().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec;

    #[test]
    fn test_resolve_tuple() {
        let tuple = Tuple::from_facts(vec![
            Arc::new(Fact::new(1, vec![Value::from("order")])),
            Arc::new(Fact::new(2, vec![Value::Int64(10), Value::Int64(20)])),
        ]);
        assert_eq!(Binding::new("$o", 0, 0).resolve(&tuple), Value::from("order"));
        assert_eq!(Binding::new("$p", 1, 1).resolve(&tuple), Value::Int64(20));
        assert_eq!(Binding::new("$missing", 4, 0).resolve(&tuple), Value::Null);
    }

    #[test]
    fn test_resolve_fact() {
        let fact = Fact::new(3, vec![Value::Int64(5)]);
        assert_eq!(Binding::field("$x", 0).resolve_fact(&fact), Value::Int64(5));
        assert_eq!(Binding::field("$y", 1).resolve_fact(&fact), Value::Null);
    }
}
