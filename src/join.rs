//! Tables of the same entity type joined side by side.
//!
//! Entities are the union of the constituents' entities. A variable defined
//! by several constituents belongs to the first one; its value for an entity
//! comes from the first constituent defining it that holds the entity.
use tracing::debug;

use std::collections::HashSet;
use std::sync::Arc;

use crate::construct::{Variable, VariableEntity};
use crate::datatype::Value;
use crate::error::{Result, VartabError};
use crate::table::{
    NameHasher, SourceRef, TableRef, Timestamps, ValueSet, ValueTable, VariableValueSource, VectorSource,
    read_values,
};

pub struct JoinTable {
    name: String,
    entity_type: String,
    tables: Vec<TableRef>,
}

impl JoinTable {
    /// Joins at least two tables holding the same entity type, naming the
    /// join after its constituents.
    pub fn new(tables: Vec<TableRef>) -> Result<Arc<JoinTable>> {
        let name = tables.iter().map(|t| t.name()).collect::<Vec<_>>().join("-");
        Self::named(name, tables)
    }

    pub fn named(name: impl Into<String>, tables: Vec<TableRef>) -> Result<Arc<JoinTable>> {
        if tables.len() < 2 {
            return Err(VartabError::InvalidJoin(format!("a join needs at least 2 tables, got {}", tables.len())));
        }
        let entity_type = tables[0].entity_type().to_string();
        if let Some(other) = tables.iter().find(|t| t.entity_type() != entity_type) {
            return Err(VartabError::InvalidJoin(format!(
                "{} holds {} entities, {} holds {}",
                tables[0].qualified_name(),
                entity_type,
                other.qualified_name(),
                other.entity_type()
            )));
        }
        let name = name.into();
        debug!(join = %name, tables = tables.len(), "join created");
        Ok(Arc::new(JoinTable { name, entity_type, tables }))
    }

    pub fn tables(&self) -> &[TableRef] {
        &self.tables
    }

    fn holders(&self, entity: &VariableEntity) -> impl Iterator<Item = &TableRef> {
        self.tables.iter().filter(move |t| t.has_value_set(entity))
    }
}

impl ValueTable for JoinTable {
    fn name(&self) -> &str {
        &self.name
    }
    fn entity_type(&self) -> &str {
        &self.entity_type
    }
    fn variables(&self) -> Vec<Variable> {
        let mut seen: HashSet<String, NameHasher> = HashSet::default();
        self.tables
            .iter()
            .flat_map(|t| t.variables())
            .filter(|v| seen.insert(v.name().to_string()))
            .collect()
    }
    fn variable_value_source(&self, name: &str) -> Result<SourceRef> {
        let mut sources = Vec::new();
        for table in &self.tables {
            if let Ok(source) = table.variable_value_source(name) {
                sources.push((Arc::clone(table), source));
            }
        }
        let Some((_, first)) = sources.first() else {
            return Err(self.no_such_variable(name));
        };
        let variable = first.variable().clone();
        let vectorized = sources.iter().all(|(_, s)| s.vector_source().is_some());
        Ok(Arc::new(JoinVariableValueSource { variable, sources, vectorized }))
    }
    fn variable_entities(&self) -> Vec<VariableEntity> {
        let mut seen = HashSet::new();
        self.tables
            .iter()
            .flat_map(|t| t.variable_entities())
            .filter(|e| seen.insert(e.clone()))
            .collect()
    }
    fn has_value_set(&self, entity: &VariableEntity) -> bool {
        self.holders(entity).next().is_some()
    }
    fn value_set(self: Arc<Self>, entity: &VariableEntity) -> Result<ValueSet> {
        if !self.has_value_set(entity) {
            return Err(self.no_such_value_set(entity));
        }
        Ok(ValueSet::new(self, entity.clone()))
    }
    /// Earliest creation and latest update over all constituents.
    fn timestamps(&self) -> Timestamps {
        Timestamps::combine(self.tables.iter().map(|t| t.timestamps()))
    }
    fn value_set_timestamps(&self, entity: &VariableEntity) -> Result<Timestamps> {
        if !self.has_value_set(entity) {
            return Err(self.no_such_value_set(entity));
        }
        let parts = self.holders(entity).map(|t| t.value_set_timestamps(entity)).collect::<Result<Vec<_>>>()?;
        Ok(Timestamps::combine(parts))
    }
}

/// Reads a joined variable from the constituents defining it, in order.
struct JoinVariableValueSource {
    variable: Variable,
    sources: Vec<(TableRef, SourceRef)>,
    vectorized: bool,
}

impl VariableValueSource for JoinVariableValueSource {
    fn variable(&self) -> &Variable {
        &self.variable
    }
    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        let entity = value_set.entity();
        for (table, source) in &self.sources {
            if table.has_value_set(entity) {
                let inner = Arc::clone(table).value_set(entity)?;
                return source.value(&inner);
            }
        }
        Ok(self.variable.null_value())
    }
    fn vector_source(&self) -> Option<&dyn VectorSource> {
        if self.vectorized { Some(self) } else { None }
    }
}

impl VectorSource for JoinVariableValueSource {
    fn values(&self, entities: &[VariableEntity]) -> Result<Vec<Value>> {
        let mut values = vec![self.variable.null_value(); entities.len()];
        let mut pending: Vec<usize> = (0..entities.len()).collect();
        for (table, _) in &self.sources {
            if pending.is_empty() {
                break;
            }
            let (held, rest): (Vec<usize>, Vec<usize>) =
                pending.into_iter().partition(|i| table.has_value_set(&entities[*i]));
            let batch: Vec<VariableEntity> = held.iter().map(|i| entities[*i].clone()).collect();
            for (i, value) in held.into_iter().zip(read_values(table, self.variable.name(), &batch)?) {
                values[i] = value;
            }
            pending = rest;
        }
        Ok(values)
    }
}
