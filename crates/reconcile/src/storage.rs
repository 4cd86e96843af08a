//! Persistent per-resource data kept between runs
//!
//! Audited property values and the last time a resource was checked are
//! stored here, keyed by resource reference and attribute name.

use crate::resource::ResourceRef;
use crate::value::Value;
use std::collections::HashMap;

pub trait Storage {
    fn get(&self, resource: &ResourceRef, key: &str) -> Option<Value>;

    fn set(&mut self, resource: &ResourceRef, key: &str, value: Value);

    /// Persist pending writes
    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Storage that lives only as long as the process
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    data: HashMap<(String, String), Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, resource: &ResourceRef, key: &str) -> Option<Value> {
        self.data
            .get(&(resource.to_string(), key.to_string()))
            .cloned()
    }

    fn set(&mut self, resource: &ResourceRef, key: &str, value: Value) {
        self.data
            .insert((resource.to_string(), key.to_string()), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let mut storage = MemoryStorage::new();
        let file = ResourceRef::new("file", "/etc/hosts");
        assert!(storage.get(&file, "mode").is_none());
        storage.set(&file, "mode", Value::from("0644"));
        assert_eq!(storage.get(&file, "mode"), Some(Value::from("0644")));
        assert!(storage.get(&ResourceRef::new("file", "/etc/motd"), "mode").is_none());
        assert_eq!(storage.len(), 1);
        assert!(storage.flush().is_ok());
    }
}
