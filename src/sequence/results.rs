//! Result bookkeeping and reconciliation
//!
//! A `ResultMap` records, in queue order, which physical reply slot each
//! logical entry reads from. A committed nested transaction is a single
//! slot whose EXEC array is re-expanded through the nested map.

use std::fmt;

use crate::utils::Value;

/// Logical key of a sequence entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Index(usize),
    Alias(String),
}

impl From<usize> for ResultKey {
    fn from(index: usize) -> Self {
        ResultKey::Index(index)
    }
}

impl From<&str> for ResultKey {
    fn from(alias: &str) -> Self {
        ResultKey::Alias(alias.to_string())
    }
}

impl From<String> for ResultKey {
    fn from(alias: String) -> Self {
        ResultKey::Alias(alias)
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKey::Index(i) => write!(f, "{}", i),
            ResultKey::Alias(a) => f.write_str(a),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Direct(usize),
    Nested(usize, ResultMap),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ResultMap {
    entries: Vec<(ResultKey, Slot)>,
}

impl ResultMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push_direct(&mut self, slot: usize) {
        let key = ResultKey::Index(self.entries.len());
        self.entries.push((key, Slot::Direct(slot)));
    }

    pub fn push_nested(&mut self, slot: usize, nested: ResultMap) {
        let key = ResultKey::Index(self.entries.len());
        self.entries.push((key, Slot::Nested(slot, nested)));
    }

    /// Rename the most recent entry; false when there is none
    pub fn rename_last(&mut self, alias: &str) -> bool {
        match self.entries.last_mut() {
            Some((key, _)) => {
                *key = ResultKey::from(alias);
                true
            }
            None => false,
        }
    }

    /// Assign raw slot values to logical keys. Missing slots read as `Nil`.
    pub fn reconcile(&self, raw: Vec<Value>) -> Results {
        let mut raw: Vec<Option<Value>> = raw.into_iter().map(Some).collect();
        let mut take = |slot: usize| raw.get_mut(slot).and_then(Option::take);

        let entries = self
            .entries
            .iter()
            .map(|(key, slot)| {
                let output = match slot {
                    Slot::Direct(idx) => Output::Value(take(*idx).unwrap_or(Value::Nil)),
                    Slot::Nested(idx, nested) => Output::Nested(match take(*idx) {
                        Some(Value::Array(items)) => nested.reconcile(items),
                        Some(error @ Value::Error(_)) => nested.fill(&error),
                        _ => nested.fill(&Value::Nil),
                    }),
                };
                (key.clone(), output)
            })
            .collect();

        Results { entries }
    }

    /// Every entry set to `value`, keeping the nested shape
    fn fill(&self, value: &Value) -> Results {
        let entries = self
            .entries
            .iter()
            .map(|(key, slot)| {
                let output = match slot {
                    Slot::Direct(_) => Output::Value(value.clone()),
                    Slot::Nested(_, nested) => Output::Nested(nested.fill(value)),
                };
                (key.clone(), output)
            })
            .collect();
        Results { entries }
    }
}

/// A reconciled entry: a reply, or the results of a committed nested
/// transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Value(Value),
    Nested(Results),
}

impl Output {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(v) => Some(v),
            Output::Nested(_) => None,
        }
    }

    pub fn as_nested(&self) -> Option<&Results> {
        match self {
            Output::Nested(r) => Some(r),
            Output::Value(_) => None,
        }
    }

    /// Collapse into a plain value; nested results become an array or map
    pub fn into_value(self) -> Value {
        match self {
            Output::Value(v) => v,
            Output::Nested(r) => r.into_value(),
        }
    }
}

/// Ordered results of an executed sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Results {
    entries: Vec<(ResultKey, Output)>,
}

impl Results {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: impl Into<ResultKey>) -> Option<&Output> {
        let key = key.into();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, output)| output)
    }

    /// Reply stored under `key`
    pub fn value(&self, key: impl Into<ResultKey>) -> Option<&Value> {
        self.get(key).and_then(Output::as_value)
    }

    /// Nested transaction results stored under `key`
    pub fn nested(&self, key: impl Into<ResultKey>) -> Option<&Results> {
        self.get(key).and_then(Output::as_nested)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResultKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResultKey, &Output)> {
        self.entries.iter().map(|(k, o)| (k, o))
    }

    /// True when no entry was aliased
    pub fn is_list(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(pos, (key, _))| *key == ResultKey::Index(pos))
    }

    /// Values in order, dropping keys
    pub fn into_values(self) -> Vec<Value> {
        self.entries
            .into_iter()
            .map(|(_, output)| output.into_value())
            .collect()
    }

    /// An array when no entry was aliased, otherwise a map keyed by
    /// index or alias
    pub fn into_value(self) -> Value {
        if self.is_list() {
            return Value::Array(self.into_values());
        }
        Value::Map(
            self.entries
                .into_iter()
                .map(|(key, output)| {
                    let key = match key {
                        ResultKey::Index(i) => Value::from(i),
                        ResultKey::Alias(a) => Value::from(a),
                    };
                    (key, output.into_value())
                })
                .collect(),
        )
    }
}

impl IntoIterator for Results {
    type Item = (ResultKey, Output);
    type IntoIter = std::vec::IntoIter<(ResultKey, Output)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
