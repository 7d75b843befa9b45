//! In-memory reference backend
//!
//! Holds one table of records per entity type and evaluates composed
//! expressions directly. Used by the CLI demos and the test suites.

mod eval;

use crate::engine::{Backend, Outcome, ParameterCache};
use crate::error::{QueryError, QueryResult};
use crate::query::QueryExpr;
use crate::schema::{EntityType, Record, Schema};
use eval::Evaluator;
use log::{debug, info};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub struct MemoryBackend {
    name: String,
    schema: Schema,
    tables: HashMap<EntityType, Vec<Rc<Record>>>,
    parameters: ParameterCache,
}

impl MemoryBackend {
    pub fn new(schema: Schema) -> Self {
        Self {
            name: "memory".to_string(),
            schema,
            tables: HashMap::new(),
            parameters: ParameterCache::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds one record, converting its values to the declared member types
    pub fn insert(&mut self, entity: impl Into<EntityType>, record: Record) -> QueryResult<()> {
        let entity = entity.into();
        let record = self.schema.coerce_record(&entity, record)?;
        self.tables.entry(entity).or_default().push(Rc::new(record));
        Ok(())
    }

    pub fn with_rows(
        mut self,
        entity: impl Into<EntityType>,
        rows: impl IntoIterator<Item = Record>,
    ) -> QueryResult<Self> {
        let entity = entity.into();
        for record in rows {
            self.insert(entity.clone(), record)?;
        }
        Ok(self)
    }

    /// Loads fixtures from a JSON object mapping entity names to arrays of
    /// records, e.g. `{"Order": [{"OrderId": 1}]}`
    pub fn from_json(schema: Schema, json: &str) -> QueryResult<Self> {
        let tables: HashMap<String, Vec<Record>> = serde_json::from_str(json)
            .map_err(|e| QueryError::argument(format!("invalid fixture data: {}", e)))?;
        let mut backend = Self::new(schema);
        for (entity, rows) in tables {
            let count = rows.len();
            backend = backend.with_rows(entity.as_str(), rows)?;
            debug!("loaded {} {} record(s)", count, entity);
        }
        info!(
            "memory backend ready with {} table(s)",
            backend.tables.len()
        );
        Ok(backend)
    }

    pub fn rows_of(&self, entity: &EntityType) -> &[Rc<Record>] {
        self.tables.get(entity).map(Vec::as_slice).unwrap_or_default()
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sizes: Vec<(&str, usize)> = self
            .tables
            .iter()
            .map(|(entity, rows)| (entity.name(), rows.len()))
            .collect();
        sizes.sort();
        f.debug_struct("MemoryBackend")
            .field("name", &self.name)
            .field("tables", &sizes)
            .finish()
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn parameters(&self) -> &ParameterCache {
        &self.parameters
    }

    fn current_context(&self) -> &dyn Any {
        &self.tables
    }

    fn execute(&self, expr: &QueryExpr) -> QueryResult<Outcome> {
        debug!("executing {}", expr);
        Evaluator::new(self).run(expr)
    }
}
