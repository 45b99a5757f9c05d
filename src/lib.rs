//! Vartab – a data virtualization layer over tables of typed variables.
//!
//! Data lives in *value tables*: for a given entity type (a participant, a
//! household, ...) a table holds *variables* and, per entity, a *value set*
//! with one typed value per variable. Everything else is built by composing
//! tables without copying their data:
//! * A [`view::View`] shows a table through a select clause (which variables),
//!   a where clause (which entities) and a list clause (derived variables).
//! * A [`join::JoinTable`] puts tables of the same entity type side by side.
//! * Derived variables are computed by formula scripts, see [`script`].
//!
//! ## Modules
//! * [`datatype`] – Value types, values and sequences with their canonical text form.
//! * [`construct`] – Entities, variables, categories and attributes.
//! * [`table`] – The table, value set and value source traits every table implements.
//! * [`memory`] – In-memory tables and datasources.
//! * [`view`], [`join`], [`clause`] – Composition of tables.
//! * [`script`] – The formula language: parser, dependency analysis and evaluation.
//! * [`methods`] – The method library available to scripts.
//! * [`audit`] – Audit logs and the incremental where clause built on them.
//! * [`stats`] – Summary statistics and the outlier where clause.
//! * [`context`] – Settings, datasource registry and shared caches.
//! * [`persist`] – JSON encoding of variables and values.
//!
//! ## Formula scripts
//! A script reads variables of the value set being evaluated with `$('name')`
//! and variables of other tables with `$('table:name')` or
//! `$('datasource.table:name')`. Values carry their type and unit, and
//! methods are chained on them:
//! ```text
//! $('weight').toUnit('lb').round(1)
//! $('answers').any('A', 'B').not()
//! ```
//! Circular references are detected before evaluation. When every variable a
//! script reads can be read in bulk, the script is evaluated a batch of
//! entities at a time.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use vartab::clause::ListClause;
//! use vartab::construct::{Variable, VariableEntity};
//! use vartab::context::Context;
//! use vartab::datatype::{Value, ValueType};
//! use vartab::memory::StaticValueTable;
//! use vartab::table::{TableRef, ValueSetWriter, ValueTable, ValueTableWriter};
//! use vartab::view::View;
//!
//! let table = StaticValueTable::new("baseline", "Participant");
//! let weight = Variable::builder("weight", ValueType::Integer, "Participant").unit("kg").build().unwrap();
//! let mut writer = table.writer();
//! writer.write_variable(&weight).unwrap();
//! let entity = VariableEntity::new("Participant", "1");
//! writer.value_set_writer(&entity).unwrap().write_value(&weight, Value::integer(80)).unwrap();
//!
//! let heavier = Variable::builder("heavier", ValueType::Integer, "Participant")
//!     .scripted()
//!     .script("$('weight') + 10")
//!     .build()
//!     .unwrap();
//! let context = Arc::new(Context::default());
//! let view = View::builder("view", table as TableRef)
//!     .list(ListClause::new().add(heavier).unwrap())
//!     .build(&context)
//!     .unwrap();
//! let value_set = Arc::clone(&view).value_set(&entity).unwrap();
//! assert_eq!(value_set.value("heavier").unwrap(), Value::integer(90));
//! ```
//!
//! ## Configuration
//! [`context::Settings`] are read from an optional `vartab` configuration file
//! and from `VARTAB_*` environment variables, see [`context::Settings::load`].

pub mod audit;
pub mod clause;
pub mod construct;
pub mod context;
pub mod datatype;
pub mod error;
pub mod join;
pub mod memory;
pub mod methods;
pub mod persist;
pub mod script;
pub mod stats;
pub mod table;
pub mod view;

pub use error::{Result, VartabError};
