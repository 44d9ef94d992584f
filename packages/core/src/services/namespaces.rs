//! Namespace Registry
//!
//! Session-scoped prefix to URI table. The store fills it from the
//! `namespaces` table at login and drops it on logout or transaction rollback;
//! register/unregister update it in place after the row is written.

use crate::codec::SV_NAMESPACE;
use crate::db::StoreError;
use crate::models::path;
use std::collections::HashMap;

/// Prefixes every workspace knows and that can never be remapped
pub const BUILTIN_NAMESPACES: [(&str, &str); 6] = [
    ("", ""),
    ("jcr", "http://www.jcp.org/jcr/1.0"),
    ("nt", "http://www.jcp.org/jcr/nt/1.0"),
    ("mix", "http://www.jcp.org/jcr/mix/1.0"),
    ("xml", "http://www.w3.org/XML/1998/namespace"),
    ("sv", SV_NAMESPACE),
];

pub fn is_builtin_prefix(prefix: &str) -> bool {
    BUILTIN_NAMESPACES.iter().any(|(p, _)| *p == prefix)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRegistry {
    entries: HashMap<String, String>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry {
    /// Registry holding only the built-in prefixes
    pub fn new() -> Self {
        let entries = BUILTIN_NAMESPACES
            .iter()
            .map(|(p, u)| (p.to_string(), u.to_string()))
            .collect();
        Self { entries }
    }

    /// Built-ins plus stored mappings
    pub fn with_entries<I>(stored: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut registry = Self::new();
        for (prefix, uri) in stored {
            if !is_builtin_prefix(&prefix) {
                registry.entries.insert(prefix, uri);
            }
        }
        registry
    }

    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.entries.get(prefix).map(String::as_str)
    }

    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, u)| u.as_str() == uri)
            .map(|(p, _)| p.as_str())
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.entries.contains_key(prefix)
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.entries
    }

    /// Check that a mapping may be registered
    ///
    /// Built-in prefixes and URIs are immutable; a URI may only be bound to
    /// one prefix.
    pub fn check_register(&self, prefix: &str, uri: &str) -> Result<(), StoreError> {
        if is_builtin_prefix(prefix) {
            return Err(StoreError::namespace(format!(
                "built-in prefix '{}' cannot be changed",
                prefix
            )));
        }
        if prefix.to_ascii_lowercase().starts_with("xml") {
            return Err(StoreError::namespace(format!("reserved prefix '{}'", prefix)));
        }
        if !path::is_valid_name(prefix) || prefix.contains(':') {
            return Err(StoreError::namespace(format!("invalid prefix '{}'", prefix)));
        }
        if uri.is_empty() {
            return Err(StoreError::namespace("namespace URI must not be empty"));
        }
        if BUILTIN_NAMESPACES.iter().any(|(_, u)| *u == uri) {
            return Err(StoreError::namespace(format!(
                "built-in namespace '{}' cannot be remapped",
                uri
            )));
        }
        if let Some(existing) = self.prefix_for(uri) {
            if existing != prefix {
                return Err(StoreError::namespace(format!(
                    "namespace '{}' is already bound to prefix '{}'",
                    uri, existing
                )));
            }
        }
        Ok(())
    }

    /// Check that a prefix may be unregistered
    pub fn check_unregister(&self, prefix: &str) -> Result<(), StoreError> {
        if is_builtin_prefix(prefix) {
            return Err(StoreError::namespace(format!(
                "built-in prefix '{}' cannot be unregistered",
                prefix
            )));
        }
        if !self.contains(prefix) {
            return Err(StoreError::namespace(format!("unknown prefix '{}'", prefix)));
        }
        Ok(())
    }

    pub fn insert(&mut self, prefix: &str, uri: &str) {
        self.entries.insert(prefix.to_string(), uri.to_string());
    }

    pub fn remove(&mut self, prefix: &str) {
        self.entries.remove(prefix);
    }

    /// Fail with `StoreError::Namespace` if the name's prefix is unknown
    pub fn check_name(&self, name: &str) -> Result<(), StoreError> {
        let (prefix, _) = path::split_name(name);
        if self.contains(prefix) {
            Ok(())
        } else {
            Err(StoreError::namespace(format!(
                "unknown prefix '{}' in name '{}'",
                prefix, name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ErrorKind;

    #[test]
    fn test_builtins_are_present_and_immutable() {
        let registry = NamespaceRegistry::new();
        assert_eq!(registry.uri("jcr"), Some("http://www.jcp.org/jcr/1.0"));
        assert_eq!(registry.uri(""), Some(""));

        let err = registry.check_register("jcr", "urn:other").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Namespace);
        let err = registry.check_unregister("nt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Namespace);
    }

    #[test]
    fn test_register_and_unregister_checks() {
        let mut registry = NamespaceRegistry::with_entries(vec![(
            "app".to_string(),
            "urn:app".to_string(),
        )]);
        assert!(registry.check_register("blog", "urn:blog").is_ok());
        assert!(registry.check_register("other", "urn:app").is_err());
        assert!(registry.check_register("xmlfoo", "urn:x").is_err());
        assert!(registry.check_unregister("missing").is_err());

        registry.insert("blog", "urn:blog");
        assert!(registry.check_name("blog:post").is_ok());
        assert!(registry.check_name("unknown:post").is_err());
        assert!(registry.check_name("plain").is_ok());

        assert!(registry.check_unregister("blog").is_ok());
        registry.remove("blog");
        assert!(!registry.contains("blog"));
    }
}
