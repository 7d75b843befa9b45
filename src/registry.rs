//! Backend activation
//!
//! Maps a configured backend kind to the factory that builds it.

use crate::config::BackendSettings;
use crate::engine::Backend;
use crate::error::QueryError;
use crate::memory::MemoryBackend;
use crate::schema::Schema;
use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::rc::Rc;

pub type BackendFactory = Box<dyn Fn(&BackendSettings, Schema) -> Result<Rc<dyn Backend>>>;

#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the in-memory backend under `memory`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", Box::new(memory_backend));
        registry
    }

    /// Adds or replaces the factory for `kind`
    pub fn register(&mut self, kind: impl Into<String>, factory: BackendFactory) {
        let kind = kind.into();
        debug!("registering backend '{}'", kind);
        self.factories.insert(kind, factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn activate(&self, settings: &BackendSettings, schema: Schema) -> Result<Rc<dyn Backend>> {
        let factory = self.factories.get(&settings.kind).ok_or_else(|| {
            QueryError::argument(format!(
                "unknown backend '{}' (registered: {})",
                settings.kind,
                self.names().join(", ")
            ))
        })?;
        let backend = factory(settings, schema)?;
        info!("activated backend '{}'", backend.name());
        Ok(backend)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("factories", &self.names())
            .finish()
    }
}

fn memory_backend(settings: &BackendSettings, schema: Schema) -> Result<Rc<dyn Backend>> {
    let backend = match &settings.fixtures {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read fixtures: {:?}", path))?;
            MemoryBackend::from_json(schema, &json)
                .with_context(|| format!("Failed to load fixtures: {:?}", path))?
        }
        None => MemoryBackend::new(schema),
    };
    Ok(Rc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryExpr, TerminalOp};
    use crate::schema::{EntityDef, ValueType};

    fn schema() -> Schema {
        Schema::new().with_entity(EntityDef::new("Order").scalar("OrderId", ValueType::Int))
    }

    #[test]
    fn test_default_memory_backend() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["memory"]);
        let backend = registry.activate(&BackendSettings::default(), schema()).unwrap();
        assert_eq!(backend.name(), "memory");
        let count = backend
            .execute(&QueryExpr::source("Order").terminal(TerminalOp::Count))
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unknown_backend_lists_names() {
        let registry = BackendRegistry::with_defaults();
        let settings = BackendSettings {
            kind: "sql".to_string(),
            ..BackendSettings::default()
        };
        let Err(err) = registry.activate(&settings, schema()) else {
            panic!("expected an unknown-backend error");
        };
        let query_err = err.downcast_ref::<QueryError>().unwrap();
        assert!(query_err.is_argument());
        assert!(err.to_string().contains("registered: memory"));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = BackendRegistry::with_defaults();
        registry.register(
            "named",
            Box::new(|_: &BackendSettings, schema: Schema| -> Result<Rc<dyn Backend>> {
                Ok(Rc::new(MemoryBackend::new(schema).named("named")))
            }),
        );
        let settings = BackendSettings {
            kind: "named".to_string(),
            ..BackendSettings::default()
        };
        assert_eq!(registry.activate(&settings, schema()).unwrap().name(), "named");
        assert_eq!(registry.names(), vec!["memory", "named"]);
    }
}
