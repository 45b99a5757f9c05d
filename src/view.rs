//! Views: a table seen through select, where and list clauses.
//!
//! A view owns no data. Its entities are those of the wrapped table that the
//! where clause admits, its variables are the selected variables of the
//! wrapped table followed by the derived variables of the list clause.
use tracing::{debug, warn};

use std::sync::{Arc, Weak};

use crate::clause::{AllClause, ListClause, SelectClause, WhereClause};
use crate::construct::{Variable, VariableEntity};
use crate::context::Context;
use crate::datatype::Value;
use crate::error::{Result, VartabError};
use crate::script::ScriptValueSource;
use crate::table::{
    SourceRef, TableRef, Timestamps, ValueSet, ValueTable, VariableValueSource, VectorSource, ensure_value_sets,
    read_values,
};

// ------------- ViewBuilder -------------
pub struct ViewBuilder {
    name: String,
    from: TableRef,
    select: Box<dyn SelectClause>,
    where_clause: Box<dyn WhereClause>,
    list: ListClause,
}

impl ViewBuilder {
    pub fn select(mut self, clause: impl SelectClause + 'static) -> Self {
        self.select = Box::new(clause);
        self
    }
    pub fn where_clause(mut self, clause: impl WhereClause + 'static) -> Self {
        self.where_clause = Box::new(clause);
        self
    }
    pub fn list(mut self, clause: ListClause) -> Self {
        self.list = clause;
        self
    }

    /// Builds the view and compiles its derived variables. A script that does
    /// not compile fails the build.
    pub fn build(self, context: &Arc<Context>) -> Result<Arc<View>> {
        let entity_type = self.from.entity_type().to_string();
        if let Some(stranger) = self.list.variables().iter().find(|v| v.entity_type() != entity_type) {
            return Err(VartabError::InvalidArgument(format!(
                "variable {} describes {} entities, view {} holds {}",
                stranger.name(),
                stranger.entity_type(),
                self.name,
                entity_type
            )));
        }
        let mut failure = None;
        let view = Arc::new_cyclic(|this: &Weak<View>| {
            let owner: Weak<dyn ValueTable> = this.clone();
            let mut derived = Vec::with_capacity(self.list.variables().len());
            for variable in self.list.variables() {
                match ScriptValueSource::new(variable.clone(), owner.clone(), Arc::clone(context)) {
                    Ok(source) => derived.push(Arc::new(source)),
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                }
            }
            View {
                name: self.name,
                from: self.from,
                select: self.select,
                where_clause: self.where_clause,
                derived,
                context: Arc::clone(context),
                this: this.clone(),
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        for source in &view.derived {
            source.initialise()?;
        }
        debug!(view = %view.name, from = %view.from.qualified_name(), derived = view.derived.len(), "view built");
        Ok(view)
    }
}

// ------------- View -------------
pub struct View {
    name: String,
    from: TableRef,
    select: Box<dyn SelectClause>,
    where_clause: Box<dyn WhereClause>,
    derived: Vec<Arc<ScriptValueSource>>,
    context: Arc<Context>,
    this: Weak<View>,
}

impl View {
    /// A view of every variable and entity of `from`, until clauses say otherwise.
    pub fn builder(name: impl Into<String>, from: TableRef) -> ViewBuilder {
        ViewBuilder {
            name: name.into(),
            from,
            select: Box::new(AllClause),
            where_clause: Box::new(AllClause),
            list: ListClause::new(),
        }
    }

    pub fn from(&self) -> &TableRef {
        &self.from
    }

    pub fn derived_variables(&self) -> Vec<Variable> {
        self.derived.iter().map(|s| s.variable().clone()).collect()
    }

    fn derived_source(&self, name: &str) -> Option<&Arc<ScriptValueSource>> {
        self.derived.iter().find(|s| s.variable().name() == name)
    }

    fn selected(&self, name: &str) -> Option<Variable> {
        self.from.variable(name).ok().filter(|v| self.select.selects(v))
    }

    fn admits(&self, entity: &VariableEntity) -> Result<bool> {
        self.where_clause.admits(&self.from, entity)
    }

    fn admitted(&self, entity: &VariableEntity) -> bool {
        match self.admits(entity) {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(view = %self.name, %entity, error = %e, "where clause failed, entity left out");
                false
            }
        }
    }

    fn as_table(&self) -> Result<TableRef> {
        self.this
            .upgrade()
            .map(|view| view as TableRef)
            .ok_or_else(|| VartabError::Evaluation(format!("view {} is being dropped", self.name)))
    }

    /// Checks every derived variable for circular dependencies and unknown
    /// references.
    pub fn validate_scripts(&self) -> Result<()> {
        for source in &self.derived {
            source.validate_script()?;
        }
        Ok(())
    }

    /// Values of `variable` for `entities`, read in batches of the configured
    /// size through vector sources when every dependency offers one.
    pub fn values(&self, variable: &str, entities: &[VariableEntity]) -> Result<Vec<Value>> {
        let table = self.as_table()?;
        let source = self.variable_value_source(variable)?;
        if source.vector_source().is_none() {
            debug!(view = %self.name, variable, "no vector source, evaluating value set by value set");
        }
        let batch_size = self.context.settings().vector_batch_size.max(1);
        let mut values = Vec::with_capacity(entities.len());
        for batch in entities.chunks(batch_size) {
            values.extend(read_values(&table, variable, batch)?);
        }
        Ok(values)
    }
}

impl ValueTable for View {
    fn name(&self) -> &str {
        &self.name
    }
    fn entity_type(&self) -> &str {
        self.from.entity_type()
    }
    fn variables(&self) -> Vec<Variable> {
        let mut variables: Vec<Variable> =
            self.from.variables().into_iter().filter(|v| self.select.selects(v)).collect();
        for source in &self.derived {
            if !variables.iter().any(|v| v.name() == source.variable().name()) {
                variables.push(source.variable().clone());
            }
        }
        variables
    }
    fn variable_value_source(&self, name: &str) -> Result<SourceRef> {
        if self.selected(name).is_some() {
            let inner = self.from.variable_value_source(name)?;
            return Ok(Arc::new(ViewVariableValueSource { inner, view: self.this.clone() }));
        }
        match self.derived_source(name) {
            Some(source) => Ok(Arc::clone(source) as SourceRef),
            None => Err(self.no_such_variable(name)),
        }
    }
    fn variable_entities(&self) -> Vec<VariableEntity> {
        self.from.variable_entities().into_iter().filter(|e| self.admitted(e)).collect()
    }
    fn has_value_set(&self, entity: &VariableEntity) -> bool {
        self.from.has_value_set(entity) && self.admitted(entity)
    }
    fn value_set(self: Arc<Self>, entity: &VariableEntity) -> Result<ValueSet> {
        if !self.from.has_value_set(entity) || !self.admits(entity)? {
            return Err(self.no_such_value_set(entity));
        }
        let inner = Arc::clone(&self.from).value_set(entity)?;
        Ok(ValueSet::wrap(self, inner))
    }
    fn timestamps(&self) -> Timestamps {
        self.from.timestamps()
    }
    fn value_set_timestamps(&self, entity: &VariableEntity) -> Result<Timestamps> {
        if !self.has_value_set(entity) {
            return Err(self.no_such_value_set(entity));
        }
        self.from.value_set_timestamps(entity)
    }
    fn is_view(&self) -> bool {
        true
    }
}

/// A variable of the wrapped table, read through the wrapped value set.
struct ViewVariableValueSource {
    inner: SourceRef,
    view: Weak<View>,
}

impl VariableValueSource for ViewVariableValueSource {
    fn variable(&self) -> &Variable {
        self.inner.variable()
    }
    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        self.inner.value(value_set.wrapped().unwrap_or(value_set))
    }
    fn vector_source(&self) -> Option<&dyn VectorSource> {
        self.inner.vector_source().map(|_| self as &dyn VectorSource)
    }
}

impl VectorSource for ViewVariableValueSource {
    fn values(&self, entities: &[VariableEntity]) -> Result<Vec<Value>> {
        let view = self.view.upgrade().ok_or_else(|| {
            VartabError::Evaluation(format!("the view of variable {} no longer exists", self.variable().name()))
        })?;
        ensure_value_sets(view.as_ref(), entities)?;
        match self.inner.vector_source() {
            Some(vector) => vector.values(entities),
            None => Err(VartabError::Evaluation(format!("variable {} has no vector source", self.variable().name()))),
        }
    }
}
