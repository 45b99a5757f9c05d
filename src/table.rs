//! Contracts shared by every kind of value table: stored tables, views and joins.
//!
//! A [`ValueTable`] is a rectangular collection of values with one row per
//! [`VariableEntity`] and one column per [`Variable`]. Values are read through a
//! [`VariableValueSource`], either one value set at a time or, when the source
//! offers a [`VectorSource`], for many entities at once.
use core::hash::BuildHasherDefault;
// used for dates and timestamps
use chrono::{DateTime, Utc};
// fast hashing for maps keyed by names
use seahash::SeaHasher;

use std::fmt;
use std::sync::Arc;

use crate::construct::{Variable, VariableEntity};
use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};

pub type NameHasher = BuildHasherDefault<SeaHasher>;

pub type TableRef = Arc<dyn ValueTable>;
pub type SourceRef = Arc<dyn VariableValueSource>;

// ------------- Timestamps -------------
/// Creation and last update instants of a table or value set. Either may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamps {
    created: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
}

impl Timestamps {
    pub fn new(created: Option<DateTime<Utc>>, last_update: Option<DateTime<Utc>>) -> Self {
        Self { created, last_update }
    }
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }
    /// Creation time as a datetime value, null when unknown.
    pub fn created_value(&self) -> Value {
        self.created.map(Value::datetime).unwrap_or_else(|| ValueType::DateTime.null_value())
    }
    pub fn last_update_value(&self) -> Value {
        self.last_update.map(Value::datetime).unwrap_or_else(|| ValueType::DateTime.null_value())
    }
    /// Earliest creation and latest update over all parts; unknown parts are ignored.
    pub fn combine<I: IntoIterator<Item = Timestamps>>(parts: I) -> Timestamps {
        parts.into_iter().fold(Timestamps::default(), |acc, t| Timestamps {
            created: match (acc.created, t.created) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            last_update: match (acc.last_update, t.last_update) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
        })
    }
}

// ------------- ValueSet -------------
/// The row of a single entity within a table. A value set taken from a view
/// wraps the value set of the table underneath.
#[derive(Clone)]
pub struct ValueSet {
    table: TableRef,
    entity: VariableEntity,
    wrapped: Option<Box<ValueSet>>,
}

impl ValueSet {
    pub fn new(table: TableRef, entity: VariableEntity) -> Self {
        Self { table, entity, wrapped: None }
    }
    /// Presents `inner` as belonging to `table`.
    pub fn wrap(table: TableRef, inner: ValueSet) -> Self {
        Self { table, entity: inner.entity.clone(), wrapped: Some(Box::new(inner)) }
    }
    pub fn table(&self) -> &TableRef {
        &self.table
    }
    pub fn entity(&self) -> &VariableEntity {
        &self.entity
    }
    pub fn wrapped(&self) -> Option<&ValueSet> {
        self.wrapped.as_deref()
    }
    /// The innermost value set, the one actually holding stored values.
    pub fn innermost(&self) -> &ValueSet {
        match &self.wrapped {
            Some(inner) => inner.innermost(),
            None => self,
        }
    }
    pub fn value(&self, variable: &str) -> Result<Value> {
        self.table.value(variable, self)
    }
    pub fn timestamps(&self) -> Result<Timestamps> {
        self.table.value_set_timestamps(&self.entity)
    }
}

impl fmt::Debug for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ValueSet({} in {})", self.entity, self.table.qualified_name())
    }
}

// ------------- Sources -------------
/// Bulk value retrieval. The returned values line up with `entities`.
pub trait VectorSource: Send + Sync {
    fn values(&self, entities: &[VariableEntity]) -> Result<Vec<Value>>;
}

/// Produces the value of one variable for any value set of its table.
pub trait VariableValueSource: Send + Sync {
    fn variable(&self) -> &Variable;
    fn value(&self, value_set: &ValueSet) -> Result<Value>;
    fn vector_source(&self) -> Option<&dyn VectorSource> {
        None
    }
    fn value_type(&self) -> ValueType {
        self.variable().value_type()
    }
}

// ------------- ValueTable -------------
pub trait ValueTable: Send + Sync {
    fn name(&self) -> &str;
    /// Name of the owning datasource, if the table is registered in one.
    fn datasource_name(&self) -> Option<&str> {
        None
    }
    fn entity_type(&self) -> &str;
    /// Variables in declaration order.
    fn variables(&self) -> Vec<Variable>;
    fn variable_value_source(&self, name: &str) -> Result<SourceRef>;
    fn variable_entities(&self) -> Vec<VariableEntity>;
    fn has_value_set(&self, entity: &VariableEntity) -> bool;
    fn value_set(self: Arc<Self>, entity: &VariableEntity) -> Result<ValueSet>;
    fn timestamps(&self) -> Timestamps;
    fn value_set_timestamps(&self, entity: &VariableEntity) -> Result<Timestamps> {
        if !self.has_value_set(entity) {
            return Err(self.no_such_value_set(entity));
        }
        Ok(self.timestamps())
    }
    fn is_view(&self) -> bool {
        false
    }

    fn has_variable(&self, name: &str) -> bool {
        self.variable_value_source(name).is_ok()
    }
    fn variable(&self, name: &str) -> Result<Variable> {
        Ok(self.variable_value_source(name)?.variable().clone())
    }
    fn value(&self, variable: &str, value_set: &ValueSet) -> Result<Value> {
        self.variable_value_source(variable)?.value(value_set)
    }
    /// `datasource.table`, or just the table name when unregistered.
    fn qualified_name(&self) -> String {
        match self.datasource_name() {
            Some(ds) => format!("{}.{}", ds, self.name()),
            None => self.name().to_string(),
        }
    }
    fn no_such_variable(&self, name: &str) -> VartabError {
        VartabError::NoSuchVariable { name: name.to_string(), owner: self.qualified_name() }
    }
    fn no_such_value_set(&self, entity: &VariableEntity) -> VartabError {
        VartabError::NoSuchValueSet { entity: entity.to_string(), table: self.qualified_name() }
    }
}

/// Reads the values of `variable` for all `entities`, through the vector source
/// when the table offers one and one value set at a time otherwise.
pub fn read_values(table: &TableRef, variable: &str, entities: &[VariableEntity]) -> Result<Vec<Value>> {
    let source = table.variable_value_source(variable)?;
    if let Some(vector) = source.vector_source() {
        return vector.values(entities);
    }
    entities
        .iter()
        .map(|entity| {
            let value_set = Arc::clone(table).value_set(entity)?;
            source.value(&value_set)
        })
        .collect()
}

/// Fails with `NoSuchValueSet` on the first entity `table` has no value set for.
pub fn ensure_value_sets(table: &dyn ValueTable, entities: &[VariableEntity]) -> Result<()> {
    match entities.iter().find(|entity| !table.has_value_set(entity)) {
        Some(entity) => Err(table.no_such_value_set(entity)),
        None => Ok(()),
    }
}

// ------------- Datasource -------------
/// A named collection of value tables.
pub trait Datasource: Send + Sync {
    fn name(&self) -> &str;
    fn value_table_names(&self) -> Vec<String>;
    fn has_value_table(&self, name: &str) -> bool {
        self.value_table(name).is_ok()
    }
    fn value_table(&self, name: &str) -> Result<TableRef>;
    fn value_tables(&self) -> Vec<TableRef> {
        self.value_table_names().iter().filter_map(|n| self.value_table(n).ok()).collect()
    }
    /// Opens a writer on `table`, creating the table when it does not exist.
    fn create_writer(&self, table: &str, entity_type: &str) -> Result<Box<dyn ValueTableWriter>>;
    fn timestamps(&self) -> Timestamps {
        Timestamps::combine(self.value_tables().iter().map(|t| t.timestamps()))
    }
    /// Releases whatever the datasource holds. Called on context shutdown.
    fn dispose(&self) {}
}

// ------------- Writers -------------
pub trait ValueTableWriter {
    fn write_variable(&mut self, variable: &Variable) -> Result<()>;
    fn value_set_writer(&mut self, entity: &VariableEntity) -> Result<Box<dyn ValueSetWriter + '_>>;
}

/// Writes the values of a single entity.
pub trait ValueSetWriter {
    fn write_value(&mut self, variable: &Variable, value: Value) -> Result<()>;
}
