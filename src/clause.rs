//! Select, where and list clauses of a view.
//!
//! Clauses are pure predicates: a view asks them again on every access, so a
//! clause whose answer depends on data sees the data as it is now.
use tracing::debug;

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use crate::construct::{Variable, VariableEntity};
use crate::context::Context;
use crate::error::{Result, VartabError};
use crate::script::{self, ScriptValue, parser::Program};
use crate::table::TableRef;

/// Decides which variables of the wrapped table a view exposes.
pub trait SelectClause: Send + Sync {
    fn selects(&self, variable: &Variable) -> bool;
}

/// Decides which entities of the wrapped table a view exposes.
pub trait WhereClause: Send + Sync {
    fn admits(&self, table: &TableRef, entity: &VariableEntity) -> Result<bool>;
}

// ------------- AllClause -------------
/// Selects every variable and admits every entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllClause;

impl SelectClause for AllClause {
    fn selects(&self, _variable: &Variable) -> bool {
        true
    }
}

impl WhereClause for AllClause {
    fn admits(&self, _table: &TableRef, _entity: &VariableEntity) -> Result<bool> {
        Ok(true)
    }
}

// ------------- Select clauses -------------
/// Selects variables by name.
#[derive(Debug, Clone, Default)]
pub struct NameSelectClause {
    names: BTreeSet<String>,
}

impl NameSelectClause {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }
}

impl SelectClause for NameSelectClause {
    fn selects(&self, variable: &Variable) -> bool {
        self.names.contains(variable.name())
    }
}

type VariablePredicate = Box<dyn Fn(&Variable) -> bool + Send + Sync>;

/// Selects variables on their metadata, for instance all variables of an
/// occurrence group or all variables carrying some attribute.
pub struct PredicateSelectClause {
    predicate: VariablePredicate,
}

impl PredicateSelectClause {
    pub fn new(predicate: impl Fn(&Variable) -> bool + Send + Sync + 'static) -> Self {
        Self { predicate: Box::new(predicate) }
    }
}

impl SelectClause for PredicateSelectClause {
    fn selects(&self, variable: &Variable) -> bool {
        (self.predicate)(variable)
    }
}

// ------------- Where clauses -------------
type EntityPredicate = Box<dyn Fn(&VariableEntity) -> bool + Send + Sync>;

enum Admission {
    Listed(BTreeSet<VariableEntity>),
    Predicate(EntityPredicate),
}

/// Admits a fixed list of entities, or those satisfying a predicate.
pub struct StaticWhereClause {
    admission: Admission,
}

impl StaticWhereClause {
    pub fn entities<I: IntoIterator<Item = VariableEntity>>(entities: I) -> Self {
        Self { admission: Admission::Listed(entities.into_iter().collect()) }
    }
    pub fn predicate(predicate: impl Fn(&VariableEntity) -> bool + Send + Sync + 'static) -> Self {
        Self { admission: Admission::Predicate(Box::new(predicate)) }
    }
}

impl WhereClause for StaticWhereClause {
    fn admits(&self, _table: &TableRef, entity: &VariableEntity) -> Result<bool> {
        Ok(match &self.admission {
            Admission::Listed(entities) => entities.contains(entity),
            Admission::Predicate(predicate) => predicate(entity),
        })
    }
}

/// Admits an entity when a script, run against its value set in the wrapped
/// table, yields boolean `true`. Any other result, null included, rejects it.
pub struct ScriptWhereClause {
    name: String,
    script: String,
    context: Arc<Context>,
    program: OnceLock<Arc<Program>>,
}

impl ScriptWhereClause {
    pub fn new(name: impl Into<String>, script: impl Into<String>, context: &Arc<Context>) -> Self {
        Self { name: name.into(), script: script.into(), context: Arc::clone(context), program: OnceLock::new() }
    }
    /// Compiles the script now rather than at first use.
    pub fn initialise(&self) -> Result<()> {
        self.program().map(|_| ())
    }
    fn program(&self) -> Result<&Arc<Program>> {
        if let Some(program) = self.program.get() {
            return Ok(program);
        }
        let compiled = self.context.compile(&self.name, &self.script)?;
        Ok(self.program.get_or_init(|| compiled))
    }
}

impl WhereClause for ScriptWhereClause {
    fn admits(&self, table: &TableRef, entity: &VariableEntity) -> Result<bool> {
        let value_set = Arc::clone(table).value_set(entity)?;
        let result = script::evaluate(&self.context, self.program()?, &value_set)?;
        let admitted = match &result {
            ScriptValue::Value(v, _) => v.as_bool() == Some(true) && !v.is_sequence(),
            _ => false,
        };
        debug!(clause = %self.name, %entity, admitted, "where clause evaluated");
        Ok(admitted)
    }
}

// ------------- ListClause -------------
/// The derived variables a view adds to the selected ones.
#[derive(Debug, Clone, Default)]
pub struct ListClause {
    variables: Vec<Variable>,
}

impl ListClause {
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds a derived variable; it must carry a script.
    pub fn add(mut self, variable: Variable) -> Result<Self> {
        if !variable.is_derived() {
            return Err(VartabError::InvalidArgument(format!(
                "variable {} has no script and cannot be listed",
                variable.name()
            )));
        }
        if self.variables.iter().any(|v| v.name() == variable.name()) {
            return Err(VartabError::InvalidArgument(format!("variable {} is listed twice", variable.name())));
        }
        self.variables.push(variable);
        Ok(self)
    }
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
