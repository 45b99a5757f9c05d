//! The formula engine behind derived variables.
//!
//! A derived variable carries its formula as the `script` attribute. The
//! [`ScriptValueSource`] compiles it once, then runs it against a value set
//! (scalar mode) or against precomputed columns for a whole batch of entities
//! (vector mode). Lookups in a script:
//!
//! * `$('name')` reads a variable of the owning table; `$('table:name')` and
//!   `$('datasource.table:name')` read another table, for the entity with the
//!   same identifier.
//! * `$this('name')` reads a derived variable of the same view.
//! * `$var('name')` returns the variable itself, for metadata methods.
use tracing::{debug, trace};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock, Weak};

use crate::construct::{Variable, VariableEntity};
use crate::context::Context;
use crate::datatype::Value;
use crate::error::{Result, VartabError};
use crate::table::{
    TableRef, ValueSet, ValueTable, VariableValueSource, VectorSource, ensure_value_sets, read_values,
};

pub mod dependency;
mod eval;
pub mod parser;
mod value;

pub use eval::{Resolver, run};
pub use value::{Env, ScriptValue};

use dependency::{Dependency, DependencyGraph, LookupKind, Node};
use parser::Program;

/// The table a lookup points at: `owner` unless the reference is qualified.
fn resolve_table(context: &Context, owner: &TableRef, table: Option<&str>) -> Result<TableRef> {
    match table {
        None => Ok(Arc::clone(owner)),
        Some(reference) => context.table(reference, owner.datasource_name()),
    }
}

fn resolve_variable(context: &Context, owner: &TableRef, name: &str) -> Result<Variable> {
    let dependency = Dependency::new(LookupKind::Variable, name);
    resolve_table(context, owner, dependency.table())?.variable(dependency.variable())
}

/// `$this` only reaches derived variables of the owning table.
fn check_this(dependency: &Dependency, variable: &Variable) -> Result<()> {
    if dependency.kind() == LookupKind::This && (dependency.table().is_some() || !variable.is_derived()) {
        return Err(VartabError::Evaluation(format!(
            "$this('{}') must name a derived variable of the same view",
            dependency.name()
        )));
    }
    Ok(())
}

/// Values of `variable` in another table, for the entities with the same
/// identifiers. Entities the table does not hold read as null.
fn foreign_values(table: &TableRef, variable: &Variable, entities: &[VariableEntity]) -> Result<Vec<Value>> {
    let mapped: Vec<VariableEntity> =
        entities.iter().map(|e| VariableEntity::new(table.entity_type(), e.identifier())).collect();
    let present: Vec<bool> = mapped.iter().map(|e| table.has_value_set(e)).collect();
    let held: Vec<VariableEntity> =
        mapped.iter().zip(&present).filter(|(_, p)| **p).map(|(e, _)| e.clone()).collect();
    let mut found = read_values(table, variable.name(), &held)?.into_iter();
    Ok(present
        .iter()
        .map(|p| match p {
            true => found.next().unwrap_or_else(|| variable.null_value()),
            false => variable.null_value(),
        })
        .collect())
}

// ------------- Scalar lookups -------------
struct RowResolver<'a> {
    context: &'a Context,
    value_set: &'a ValueSet,
}

impl Resolver for RowResolver<'_> {
    fn value(&self, kind: LookupKind, name: &str) -> Result<ScriptValue> {
        let dependency = Dependency::new(kind, name);
        let owner = self.value_set.table();
        let table = resolve_table(self.context, owner, dependency.table())?;
        let variable = table.variable(dependency.variable())?;
        check_this(&dependency, &variable)?;
        let value = match dependency.table() {
            None => self.value_set.value(variable.name())?,
            Some(_) => foreign_values(&table, &variable, std::slice::from_ref(self.value_set.entity()))?
                .pop()
                .unwrap_or_else(|| variable.null_value()),
        };
        Ok(ScriptValue::with_unit(value, variable.unit()))
    }
    fn variable(&self, name: &str) -> Result<Variable> {
        resolve_variable(self.context, self.value_set.table(), name)
    }
}

/// Runs `program` against one value set.
pub fn evaluate(context: &Context, program: &Program, value_set: &ValueSet) -> Result<ScriptValue> {
    run(program, &RowResolver { context, value_set }, &Env::new())
}

// ------------- Vector lookups -------------
type Columns = BTreeMap<Dependency, (Option<String>, Vec<Value>)>;

/// Answers lookups from precomputed columns. A lookup the static scan did not
/// see, such as one with a computed name, falls back to the value set.
struct ColumnResolver<'a> {
    context: &'a Context,
    owner: &'a TableRef,
    columns: &'a Columns,
    row: usize,
    entity: &'a VariableEntity,
}

impl Resolver for ColumnResolver<'_> {
    fn value(&self, kind: LookupKind, name: &str) -> Result<ScriptValue> {
        match self.columns.get(&Dependency::new(kind, name)) {
            Some((unit, values)) => {
                let value = values.get(self.row).cloned().ok_or_else(|| {
                    VartabError::Evaluation(format!("column {} is shorter than the batch", name))
                })?;
                Ok(ScriptValue::with_unit(value, unit.as_deref()))
            }
            None => {
                trace!(name, "lookup outside the precomputed columns");
                let value_set = Arc::clone(self.owner).value_set(self.entity)?;
                RowResolver { context: self.context, value_set: &value_set }.value(kind, name)
            }
        }
    }
    fn variable(&self, name: &str) -> Result<Variable> {
        resolve_variable(self.context, self.owner, name)
    }
}

// ------------- ScriptValueSource -------------
/// Computes the values of a derived variable of a view.
pub struct ScriptValueSource {
    variable: Variable,
    script: String,
    owner: Weak<dyn ValueTable>,
    context: Arc<Context>,
    program: OnceLock<Arc<Program>>,
    vectorized: OnceLock<bool>,
}

impl ScriptValueSource {
    pub fn new(variable: Variable, owner: Weak<dyn ValueTable>, context: Arc<Context>) -> Result<Self> {
        let script = variable.script().ok_or_else(|| {
            VartabError::InvalidArgument(format!("variable {} has no script", variable.name()))
        })?;
        Ok(Self { variable, script, owner, context, program: OnceLock::new(), vectorized: OnceLock::new() })
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// Compiles the script. Calling it again is a no-op.
    pub fn initialise(&self) -> Result<()> {
        self.program().map(|_| ())
    }

    fn program(&self) -> Result<&Arc<Program>> {
        if let Some(program) = self.program.get() {
            return Ok(program);
        }
        let compiled = self.context.compile(self.variable.name(), &self.script)?;
        Ok(self.program.get_or_init(|| compiled))
    }

    fn owner(&self) -> Result<TableRef> {
        self.owner.upgrade().ok_or_else(|| {
            VartabError::Evaluation(format!("the table of variable {} no longer exists", self.variable.name()))
        })
    }

    pub fn dependencies(&self) -> BTreeSet<Dependency> {
        dependency::extract(&self.script)
    }

    /// Follows value dependencies from this variable through every derived
    /// variable they reach, in any table.
    fn dependency_graph(&self, owner: &TableRef) -> Result<(DependencyGraph, Node)> {
        let start = Node::new(owner.qualified_name(), self.variable.name());
        let mut graph = DependencyGraph::new();
        let mut seen = BTreeSet::from([start.clone()]);
        let mut pending = vec![(Arc::clone(owner), self.variable.clone())];
        while let Some((table, variable)) = pending.pop() {
            let Some(script) = variable.script() else {
                continue;
            };
            let from = Node::new(table.qualified_name(), variable.name());
            for dependency in dependency::extract(&script).into_iter().filter(|d| d.reads_value()) {
                let target_table = resolve_table(&self.context, &table, dependency.table())?;
                let target = target_table.variable(dependency.variable())?;
                let to = Node::new(target_table.qualified_name(), target.name());
                graph.add(from.clone(), to.clone());
                if seen.insert(to) {
                    pending.push((target_table, target));
                }
            }
        }
        Ok((graph, start))
    }

    /// Fails when the script reaches itself through value lookups, or looks
    /// up a variable that does not exist.
    pub fn validate_script(&self) -> Result<()> {
        let owner = self.owner()?;
        let (graph, start) = self.dependency_graph(&owner)?;
        graph.check(&start)
    }

    fn vectorizable(&self) -> bool {
        *self.vectorized.get_or_init(|| match self.check_vectorizable() {
            Ok(vectorizable) => vectorizable,
            Err(e) => {
                debug!(variable = self.variable.name(), error = %e, "vector evaluation disabled");
                false
            }
        })
    }

    // validation first: the recursion into dependent sources below then terminates
    fn check_vectorizable(&self) -> Result<bool> {
        let owner = self.owner()?;
        self.validate_script()?;
        for dependency in self.dependencies().iter().filter(|d| d.reads_value()) {
            let table = resolve_table(&self.context, &owner, dependency.table())?;
            let source = table.variable_value_source(dependency.variable())?;
            if source.vector_source().is_none() {
                debug!(variable = self.variable.name(), dependency = dependency.name(), "dependency has no vector source");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn coerce(&self, result: ScriptValue) -> Result<Value> {
        result.into_value(self.variable.value_type(), self.variable.is_repeatable()).map_err(|e| match e {
            VartabError::TypeMismatch(m) => {
                VartabError::TypeMismatch(format!("{} (result of variable {})", m, self.variable.name()))
            }
            other => other,
        })
    }
}

impl VariableValueSource for ScriptValueSource {
    fn variable(&self) -> &Variable {
        &self.variable
    }
    fn value(&self, value_set: &ValueSet) -> Result<Value> {
        let result = evaluate(&self.context, self.program()?, value_set)?;
        self.coerce(result)
    }
    fn vector_source(&self) -> Option<&dyn VectorSource> {
        if self.vectorizable() { Some(self) } else { None }
    }
}

impl VectorSource for ScriptValueSource {
    fn values(&self, entities: &[VariableEntity]) -> Result<Vec<Value>> {
        let owner = self.owner()?;
        ensure_value_sets(owner.as_ref(), entities)?;
        let program = self.program()?;
        let mut columns = Columns::new();
        for dependency in self.dependencies().into_iter().filter(|d| d.reads_value()) {
            let table = resolve_table(&self.context, &owner, dependency.table())?;
            let variable = table.variable(dependency.variable())?;
            check_this(&dependency, &variable)?;
            let values = match dependency.table() {
                None => read_values(&table, variable.name(), entities)?,
                Some(_) => foreign_values(&table, &variable, entities)?,
            };
            columns.insert(dependency, (variable.unit().map(str::to_string), values));
        }
        trace!(variable = self.variable.name(), entities = entities.len(), columns = columns.len(), "vector evaluation");
        let env = Env::new();
        entities
            .iter()
            .enumerate()
            .map(|(row, entity)| {
                let resolver = ColumnResolver { context: &self.context, owner: &owner, columns: &columns, row, entity };
                self.coerce(run(program, &resolver, &env)?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::ValueType;
    use crate::memory::{StaticDatasource, StaticValueTable};
    use crate::table::{ValueSetWriter, ValueTableWriter};

    fn context_with_tables() -> (Arc<Context>, Arc<StaticValueTable>) {
        let context = Arc::new(Context::default());
        let datasource = StaticDatasource::new("study");
        let baseline = datasource.static_table("baseline", "Participant").expect("table");
        let followup = datasource.static_table("followup", "Participant").expect("table");
        let weight = Variable::builder("weight", ValueType::Integer, "Participant").unit("kg").build().expect("variable");
        let mut writer = baseline.writer();
        writer.write_variable(&weight).expect("written");
        writer.value_set_writer(&VariableEntity::new("Participant", "1")).expect("row").write_value(&weight, Value::integer(80)).expect("written");
        writer.value_set_writer(&VariableEntity::new("Participant", "2")).expect("row").write_value(&weight, Value::integer(60)).expect("written");
        let mut writer = followup.writer();
        writer.write_variable(&weight).expect("written");
        writer.value_set_writer(&VariableEntity::new("Participant", "1")).expect("row").write_value(&weight, Value::integer(78)).expect("written");
        context.add_datasource(datasource).expect("registered");
        (context, baseline)
    }

    #[test]
    fn scripts_read_their_own_and_qualified_tables() {
        let (context, baseline) = context_with_tables();
        let owner: TableRef = baseline;
        let value_set = Arc::clone(&owner).value_set(&VariableEntity::new("Participant", "1")).expect("value set");
        let program = context.compile("loss", "$('weight') - $('followup:weight')").expect("compiles");
        let result = evaluate(&context, &program, &value_set).expect("evaluates");
        assert_eq!(result.value(), Some(&Value::integer(2)));
        assert_eq!(result.unit(), Some("kg"));
        let missing = Arc::clone(&owner).value_set(&VariableEntity::new("Participant", "2")).expect("value set");
        let result = evaluate(&context, &program, &missing).expect("evaluates");
        assert!(result.is_null());
    }

    #[test]
    fn metadata_lookups() {
        let (context, baseline) = context_with_tables();
        let owner: TableRef = baseline;
        let value_set = Arc::clone(&owner).value_set(&VariableEntity::new("Participant", "1")).expect("value set");
        let program = context.compile("unit", "$var('study.followup:weight').unit()").expect("compiles");
        let result = evaluate(&context, &program, &value_set).expect("evaluates");
        assert_eq!(result.value().and_then(|v| v.render()).as_deref(), Some("kg"));
    }

    #[test]
    fn this_requires_a_derived_variable() {
        let (context, baseline) = context_with_tables();
        let owner: TableRef = baseline;
        let value_set = Arc::clone(&owner).value_set(&VariableEntity::new("Participant", "1")).expect("value set");
        let program = context.compile("this", "$this('weight')").expect("compiles");
        assert!(matches!(evaluate(&context, &program, &value_set), Err(VartabError::Evaluation(_))));
    }

    #[test]
    fn sources_need_a_script() {
        let (context, baseline) = context_with_tables();
        let owner: TableRef = baseline;
        let plain = owner.variable("weight").expect("variable");
        let weak: Weak<dyn ValueTable> = Arc::downgrade(&owner);
        assert!(ScriptValueSource::new(plain, weak, context).is_err());
    }
}
