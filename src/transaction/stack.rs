//! Ordered stack of open transactions on one connection

/// Transaction ids in start order; the first is the root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStack {
    ids: Vec<String>,
}

impl TransactionStack {
    /// Empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a newly started transaction
    pub fn push(&mut self, id: impl Into<String>) {
        self.ids.push(id.into());
    }

    /// Remove and return the most recent transaction
    pub fn pop(&mut self) -> Option<String> {
        self.ids.pop()
    }

    /// Whether `id` is still open
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    /// Earliest still-open transaction
    pub fn root(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    /// Whether `id` is the root
    pub fn is_root(&self, id: &str) -> bool {
        self.root() == Some(id)
    }

    /// Savepoints above the root, most recent first
    pub fn children_lifo(&self) -> Vec<String> {
        self.ids.iter().skip(1).rev().cloned().collect()
    }

    /// Remove `id` and everything started after it.
    ///
    /// Returns how many entries were removed; zero when `id` is not open.
    pub fn truncate_from(&mut self, id: &str) -> usize {
        match self.ids.iter().position(|i| i == id) {
            Some(pos) => {
                let removed = self.ids.len() - pos;
                self.ids.truncate(pos);
                removed
            }
            None => 0,
        }
    }

    /// Number of open transactions
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing is open
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_first_pushed() {
        let mut stack = TransactionStack::new();
        assert_eq!(stack.root(), None);

        stack.push("a");
        stack.push("b");
        stack.push("c");
        assert_eq!(stack.root(), Some("a"));
        assert!(stack.is_root("a"));
        assert!(!stack.is_root("b"));
        assert_eq!(stack.children_lifo(), vec!["c", "b"]);
    }

    #[test]
    fn test_truncate_from_drops_later_entries() {
        let mut stack = TransactionStack::new();
        for id in ["a", "b", "c"] {
            stack.push(id);
        }

        assert_eq!(stack.truncate_from("b"), 2);
        assert_eq!(stack.len(), 1);
        assert!(!stack.contains("c"));
        assert_eq!(stack.truncate_from("zzz"), 0);
        assert_eq!(stack.pop(), Some("a".to_string()));
        assert!(stack.is_empty());
    }
}
