//! In-memory datasource and value table.
//!
//! Rows are kept positionally, with a bidirectional entity/position index so
//! that bulk reads can gather values by position.
// bidirectional entity <-> position lookups
use bimap::BiMap;
use chrono::Utc;
use tracing::{debug, trace};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::construct::{Variable, VariableEntity};
use crate::datatype::Value;
use crate::error::{Result, VartabError};
use crate::table::{
    Datasource, NameHasher, SourceRef, TableRef, Timestamps, ValueSet, ValueSetWriter, ValueTable,
    ValueTableWriter, VariableValueSource, VectorSource,
};

// ------------- TableState -------------
#[derive(Default)]
struct TableState {
    variables: Vec<Variable>,
    index: BiMap<VariableEntity, usize>,
    rows: Vec<HashMap<String, Value, NameHasher>>,
    row_timestamps: Vec<Timestamps>,
    timestamps: Timestamps,
}

impl TableState {
    fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name() == name)
    }
    fn position_or_insert(&mut self, entity: &VariableEntity) -> usize {
        if let Some(position) = self.index.get_by_left(entity) {
            return *position;
        }
        let position = self.rows.len();
        self.index.insert(entity.clone(), position);
        self.rows.push(HashMap::default());
        let now = Some(Utc::now());
        self.row_timestamps.push(Timestamps::new(now, now));
        position
    }
    fn touch(&mut self, position: Option<usize>) {
        let now = Utc::now();
        self.timestamps = Timestamps::new(self.timestamps.created().or(Some(now)), Some(now));
        if let Some(p) = position {
            let row = self.row_timestamps[p];
            self.row_timestamps[p] = Timestamps::new(row.created().or(Some(now)), Some(now));
        }
    }
}

// ------------- StaticValueTable -------------
/// A value table holding its values in memory.
pub struct StaticValueTable {
    name: String,
    datasource: Option<String>,
    entity_type: String,
    state: Arc<RwLock<TableState>>,
}

impl StaticValueTable {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Arc<Self> {
        Self::create(name.into(), entity_type.into(), None)
    }
    fn create(name: String, entity_type: String, datasource: Option<String>) -> Arc<Self> {
        let now = Some(Utc::now());
        let state = TableState { timestamps: Timestamps::new(now, now), ..TableState::default() };
        Arc::new(Self { name, datasource, entity_type, state: Arc::new(RwLock::new(state)) })
    }
    pub fn writer(&self) -> StaticTableWriter {
        StaticTableWriter {
            table: self.name.clone(),
            entity_type: self.entity_type.clone(),
            state: Arc::clone(&self.state),
        }
    }
    /// Overrides the table timestamps, as when importing a table whose history is known.
    pub fn set_timestamps(&self, timestamps: Timestamps) -> Result<()> {
        self.state.write()?.timestamps = timestamps;
        Ok(())
    }
    pub fn set_value_set_timestamps(&self, entity: &VariableEntity, timestamps: Timestamps) -> Result<()> {
        let mut state = self.state.write()?;
        let position = *state.index.get_by_left(entity).ok_or_else(|| self.no_such_value_set(entity))?;
        state.row_timestamps[position] = timestamps;
        Ok(())
    }
}

impl ValueTable for StaticValueTable {
    fn name(&self) -> &str {
        &self.name
    }
    fn datasource_name(&self) -> Option<&str> {
        self.datasource.as_deref()
    }
    fn entity_type(&self) -> &str {
        &self.entity_type
    }
    fn variables(&self) -> Vec<Variable> {
        self.state.read().map(|s| s.variables.clone()).unwrap_or_default()
    }
    fn variable_value_source(&self, name: &str) -> Result<SourceRef> {
        let state = self.state.read()?;
        let variable = state.variable(name).ok_or_else(|| self.no_such_variable(name))?;
        Ok(Arc::new(StaticValueSource {
            table: self.qualified_name(),
            variable: variable.clone(),
            state: Arc::clone(&self.state),
        }))
    }
    fn variable_entities(&self) -> Vec<VariableEntity> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        (0..state.rows.len()).filter_map(|p| state.index.get_by_right(&p).cloned()).collect()
    }
    fn has_value_set(&self, entity: &VariableEntity) -> bool {
        self.state.read().map(|s| s.index.contains_left(entity)).unwrap_or(false)
    }
    fn value_set(self: Arc<Self>, entity: &VariableEntity) -> Result<ValueSet> {
        if !self.has_value_set(entity) {
            return Err(self.no_such_value_set(entity));
        }
        Ok(ValueSet::new(self, entity.clone()))
    }
    fn timestamps(&self) -> Timestamps {
        self.state.read().map(|s| s.timestamps).unwrap_or_default()
    }
    fn value_set_timestamps(&self, entity: &VariableEntity) -> Result<Timestamps> {
        let state = self.state.read()?;
        let position = state.index.get_by_left(entity).ok_or_else(|| self.no_such_value_set(entity))?;
        Ok(state.row_timestamps[*position])
    }
}

// ------------- StaticValueSource -------------
struct StaticValueSource {
    table: String,
    variable: Variable,
    state: Arc<RwLock<TableState>>,
}

impl StaticValueSource {
    fn read(&self, state: &TableState, entity: &VariableEntity) -> Result<Value> {
        let position = state.index.get_by_left(entity).ok_or_else(|| VartabError::NoSuchValueSet {
            entity: entity.to_string(),
            table: self.table.clone(),
        })?;
        Ok(state.rows[*position]
            .get(self.variable.name())
            .cloned()
            .unwrap_or_else(|| self.variable.null_value()))
    }
}

impl VariableValueSource for StaticValueSource {
    fn variable(&self) -> &Variable {
        &self.variable
    }
    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        let state = self.state.read()?;
        self.read(&state, value_set.innermost().entity())
    }
    fn vector_source(&self) -> Option<&dyn VectorSource> {
        Some(self)
    }
}

impl VectorSource for StaticValueSource {
    fn values(&self, entities: &[VariableEntity]) -> Result<Vec<Value>> {
        let state = self.state.read()?;
        trace!("reading {} values of {} from {}", entities.len(), self.variable.name(), self.table);
        entities.iter().map(|e| self.read(&state, e)).collect()
    }
}

// ------------- Writers -------------
pub struct StaticTableWriter {
    table: String,
    entity_type: String,
    state: Arc<RwLock<TableState>>,
}

impl StaticTableWriter {
    fn check_entity_type(&self, entity_type: &str) -> Result<()> {
        if entity_type != self.entity_type {
            return Err(VartabError::InvalidArgument(format!(
                "table {} holds {} entities, not {}",
                self.table, self.entity_type, entity_type
            )));
        }
        Ok(())
    }
}

impl ValueTableWriter for StaticTableWriter {
    /// Adds the variable, replacing any variable of the same name.
    fn write_variable(&mut self, variable: &Variable) -> Result<()> {
        self.check_entity_type(variable.entity_type())?;
        let mut state = self.state.write()?;
        match state.variables.iter().position(|v| v.name() == variable.name()) {
            Some(i) => state.variables[i] = variable.clone(),
            None => state.variables.push(variable.clone()),
        }
        state.touch(None);
        debug!("wrote variable {} to {}", variable, self.table);
        Ok(())
    }
    fn value_set_writer(&mut self, entity: &VariableEntity) -> Result<Box<dyn ValueSetWriter + '_>> {
        self.check_entity_type(entity.entity_type())?;
        let position = {
            let mut state = self.state.write()?;
            let position = state.position_or_insert(entity);
            state.touch(Some(position));
            position
        };
        Ok(Box::new(StaticValueSetWriter { table: &self.table, state: &self.state, position }))
    }
}

struct StaticValueSetWriter<'w> {
    table: &'w str,
    state: &'w Arc<RwLock<TableState>>,
    position: usize,
}

impl ValueSetWriter for StaticValueSetWriter<'_> {
    fn write_value(&mut self, variable: &Variable, value: Value) -> Result<()> {
        let mut state = self.state.write()?;
        let declared = state.variable(variable.name()).cloned().ok_or_else(|| VartabError::NoSuchVariable {
            name: variable.name().to_string(),
            owner: self.table.to_string(),
        })?;
        let value = if value.is_null() {
            declared.null_value()
        } else {
            let converted = declared.value_type().convert(&value)?;
            if declared.is_repeatable() { converted.as_sequence() } else { converted }
        };
        state.rows[self.position].insert(declared.name().to_string(), value);
        state.touch(Some(self.position));
        Ok(())
    }
}

// ------------- StaticDatasource -------------
enum Entry {
    Static(Arc<StaticValueTable>),
    Foreign(TableRef),
}

impl Entry {
    fn table(&self) -> TableRef {
        match self {
            Entry::Static(t) => Arc::clone(t) as TableRef,
            Entry::Foreign(t) => Arc::clone(t),
        }
    }
}

/// A datasource holding in-memory tables. Other tables, such as views, may be
/// registered alongside so that scripts can reach them by qualified name.
pub struct StaticDatasource {
    name: String,
    tables: RwLock<Vec<(String, Entry)>>,
}

impl StaticDatasource {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into(), tables: RwLock::new(Vec::new()) })
    }
    pub fn add_table(&self, table: TableRef) -> Result<()> {
        let mut tables = self.tables.write()?;
        if tables.iter().any(|(n, _)| n == table.name()) {
            return Err(VartabError::InvalidArgument(format!(
                "table {} already exists in {}",
                table.name(),
                self.name
            )));
        }
        tables.push((table.name().to_string(), Entry::Foreign(table)));
        Ok(())
    }
    /// The in-memory table of that name, created when missing.
    pub fn static_table(&self, name: &str, entity_type: &str) -> Result<Arc<StaticValueTable>> {
        let mut tables = self.tables.write()?;
        match tables.iter().find(|(n, _)| n == name) {
            Some((_, Entry::Static(t))) => Ok(Arc::clone(t)),
            Some((_, Entry::Foreign(_))) => Err(VartabError::InvalidArgument(format!(
                "table {} of {} is not writable",
                name, self.name
            ))),
            None => {
                let table = StaticValueTable::create(name.to_string(), entity_type.to_string(), Some(self.name.clone()));
                tables.push((name.to_string(), Entry::Static(Arc::clone(&table))));
                debug!("created table {}.{}", self.name, name);
                Ok(table)
            }
        }
    }
}

impl Datasource for StaticDatasource {
    fn name(&self) -> &str {
        &self.name
    }
    fn value_table_names(&self) -> Vec<String> {
        self.tables.read().map(|t| t.iter().map(|(n, _)| n.clone()).collect()).unwrap_or_default()
    }
    fn value_table(&self, name: &str) -> Result<TableRef> {
        self.tables
            .read()?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.table())
            .ok_or_else(|| VartabError::NoSuchValueTable { name: name.to_string(), owner: self.name.clone() })
    }
    fn create_writer(&self, table: &str, entity_type: &str) -> Result<Box<dyn ValueTableWriter>> {
        Ok(Box::new(self.static_table(table, entity_type)?.writer()))
    }
    fn dispose(&self) {
        if let Ok(mut tables) = self.tables.write() {
            tables.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::ValueType;

    fn weights() -> (Arc<StaticDatasource>, Variable) {
        let ds = StaticDatasource::new("ds");
        let weight = Variable::builder("weight", ValueType::Decimal, "Participant").build().expect("variable");
        let mut writer = ds.create_writer("T", "Participant").expect("writer");
        writer.write_variable(&weight).expect("variable written");
        for (id, w) in [("p1", "80"), ("p2", "65.5")] {
            let mut vs = writer.value_set_writer(&VariableEntity::new("Participant", id)).expect("value set");
            vs.write_value(&weight, ValueType::Decimal.parse(w).expect("decimal")).expect("value written");
        }
        (ds, weight)
    }

    #[test]
    fn written_values_are_read_back() {
        let (ds, _) = weights();
        let table = ds.value_table("T").expect("table");
        assert_eq!(table.qualified_name(), "ds.T");
        let vs = Arc::clone(&table).value_set(&VariableEntity::new("Participant", "p2")).expect("value set");
        assert_eq!(vs.value("weight").expect("value").render().as_deref(), Some("65.5"));
        assert_eq!(table.variable_entities().len(), 2);
    }

    #[test]
    fn vector_reads_follow_entity_order() {
        let (ds, _) = weights();
        let table = ds.value_table("T").expect("table");
        let source = table.variable_value_source("weight").expect("source");
        let entities = vec![VariableEntity::new("Participant", "p2"), VariableEntity::new("Participant", "p1")];
        let values = source.vector_source().expect("vector").values(&entities).expect("values");
        assert_eq!(values[0].render().as_deref(), Some("65.5"));
        assert_eq!(values[1].render().as_deref(), Some("80"));
    }

    #[test]
    fn unknown_entity_has_no_value_set() {
        let (ds, _) = weights();
        let table = ds.value_table("T").expect("table");
        let missing = VariableEntity::new("Participant", "nobody");
        assert!(!table.has_value_set(&missing));
        assert!(matches!(table.value_set(&missing), Err(VartabError::NoSuchValueSet { .. })));
    }

    #[test]
    fn values_are_converted_to_the_declared_type() {
        let (ds, weight) = weights();
        let mut writer = ds.create_writer("T", "Participant").expect("writer");
        let mut vs = writer.value_set_writer(&VariableEntity::new("Participant", "p3")).expect("value set");
        vs.write_value(&weight, Value::integer(70)).expect("converted");
        assert!(vs.write_value(&weight, Value::text("heavy")).is_err());
        let table = ds.value_table("T").expect("table");
        let value = table.value("weight", &Arc::clone(&table).value_set(&VariableEntity::new("Participant", "p3")).expect("vs"));
        assert_eq!(value.expect("value").value_type(), ValueType::Decimal);
    }

    #[test]
    fn writers_reject_foreign_entity_types() {
        let (ds, _) = weights();
        let mut writer = ds.create_writer("T", "Participant").expect("writer");
        assert!(writer.value_set_writer(&VariableEntity::new("Instrument", "i1")).is_err());
    }
}
