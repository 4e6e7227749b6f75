//! The opaque `services` handle passed to deferred
//! [`crate::signal::SignalFactory`] implementations, so a factory can depend
//! on shared state constructed earlier in the run. A minimal type-erased map
//! rather than a full dependency-injection container, since that is all the
//! factory contract needs.

use std::any::{Any, TypeId};
use std::collections::HashMap;

#[derive(Default)]
pub struct Services {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let mut services = Services::new();
        services.insert(42u32);
        services.insert("hello".to_string());
        assert_eq!(services.get::<u32>(), Some(&42));
        assert_eq!(services.get::<String>().map(String::as_str), Some("hello"));
        assert_eq!(services.get::<i64>(), None);
    }
}
