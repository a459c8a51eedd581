//! Explicit registration of instrumented methods

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

/// `(component, method)` pairs that [`super::OperationLogger::instrument`] traces
#[derive(Debug, Default)]
pub struct InstrumentationRegistry {
    entries: RwLock<BTreeSet<(String, String)>>,
}

impl InstrumentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let registry = Self::new();
        for (component, method) in pairs {
            registry.register(component, method);
        }
        registry
    }

    /// Returns false if the pair was already registered
    pub fn register(&self, component: &str, method: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((component.to_string(), method.to_string()))
    }

    pub fn register_all(&self, component: &str, methods: &[&str]) {
        for method in methods {
            self.register(component, method);
        }
    }

    pub fn unregister(&self, component: &str, method: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(component.to_string(), method.to_string()))
    }

    pub fn is_registered(&self, component: &str, method: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(c, m)| c == component && m == method)
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = InstrumentationRegistry::from_pairs([("FileData", "load_file")]);
        registry.register_all("Calculations", &["fit", "optimize"]);

        assert!(registry.is_registered("FileData", "load_file"));
        assert!(registry.is_registered("Calculations", "optimize"));
        assert!(!registry.is_registered("FileData", "fit"));
        assert!(!registry.register("FileData", "load_file"));
        assert_eq!(registry.len(), 3);

        assert!(registry.unregister("Calculations", "fit"));
        assert_eq!(
            registry.entries(),
            vec![
                ("Calculations".to_string(), "optimize".to_string()),
                ("FileData".to_string(), "load_file".to_string()),
            ]
        );
    }
}
