//! Named counters for tracking storage events

use std::collections::HashMap;

pub struct Counter {
    values: HashMap<String, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn increment(&mut self, name: &str, value: usize) {
        *self.values.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn set(&mut self, name: &str, value: usize) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> usize {
        self.values.get(name).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, name: &str) {
        self.values.insert(name.to_string(), 0);
    }

    pub fn reset_all(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &usize)> {
        self.values.iter()
    }

    /// Name-sorted copy, for stable log output.
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut entries: Vec<(String, usize)> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_name_sorted() {
        let mut counter = Counter::new();
        counter.increment("swaps", 2);
        counter.increment("adds", 5);
        counter.increment("adds", 1);

        assert_eq!(
            counter.snapshot(),
            vec![("adds".to_string(), 6), ("swaps".to_string(), 2)]
        );
    }
}
