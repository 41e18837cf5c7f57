//! Parameter collection: every literal becomes a named parameter, numbered
//! in first-use order so identical plans always produce identical SQL text.

use crate::expr::Value;

///
/// SqlParameter
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}

///
/// ParameterSet
///

#[derive(Debug, Default)]
pub struct ParameterSet {
    params: Vec<SqlParameter>,
}

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value and return its parameter name.
    pub fn add(&mut self, value: impl Into<Value>) -> String {
        let name = format!("@p{}", self.params.len());
        self.params.push(SqlParameter {
            name: name.clone(),
            value: value.into(),
        });
        name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<SqlParameter> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_assigned_in_first_use_order() {
        let mut params = ParameterSet::new();

        assert_eq!(params.add(Value::Int(11)), "@p0");
        assert_eq!(params.add("abc"), "@p1");
        assert_eq!(params.add(Value::Bool(true)), "@p2");

        let collected = params.into_vec();
        assert_eq!(collected[1].value, Value::Text("abc".into()));
        assert_eq!(collected[2].name, "@p2");
    }
}
