use std::collections::BTreeMap;

use ethereum_types::U256;
use serde::{Deserialize, Serialize};

/// Name and geometry of one output column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnHeader {
    pub name: String,
    pub bytes_per_element: usize,
    pub length: usize,
}

impl ColumnHeader {
    pub fn new(module: &str, column: &str, bytes_per_element: usize, length: usize) -> Self {
        Self {
            name: column_name(module, column),
            bytes_per_element,
            length,
        }
    }
}

fn column_name(module: &str, column: &str) -> String {
    format!("{}.{}", module.to_lowercase(), column)
}

/// Columnar buffers modules commit their rows into.
///
/// Serialization of these buffers is left to the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    columns: BTreeMap<String, Vec<U256>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, module: &str, column: &str, value: U256) {
        self.columns
            .entry(column_name(module, column))
            .or_default()
            .push(value);
    }

    pub fn column(&self, module: &str, column: &str) -> Option<&[U256]> {
        self.columns
            .get(&column_name(module, column))
            .map(Vec::as_slice)
    }

    /// Number of rows committed by `module`, read off its first column.
    pub fn height(&self, module: &str) -> usize {
        let prefix = format!("{}.", module.to_lowercase());
        self.columns
            .iter()
            .find(|(name, _)| name.starts_with(&prefix))
            .map_or(0, |(_, values)| values.len())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_namespaced_by_module() {
        let mut trace = Trace::new();
        trace.push("ADD", "STAMP", U256::one());
        trace.push("ADD", "STAMP", U256::from(2));
        trace.push("WCP", "STAMP", U256::one());
        assert_eq!(trace.height("ADD"), 2);
        assert_eq!(trace.height("WCP"), 1);
        assert_eq!(trace.height("MOD"), 0);
        assert_eq!(
            trace.column("ADD", "STAMP"),
            Some(&[U256::one(), U256::from(2)][..])
        );
        assert_eq!(ColumnHeader::new("ADD", "CT", 1, 16).name, "add.CT");
    }
}
