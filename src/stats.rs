//! Summary statistics of numeric variables, and the outlier where clause that
//! uses them.
use chrono::{DateTime, Utc};
use tracing::debug;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::clause::WhereClause;
use crate::construct::VariableEntity;
use crate::context::Context;
use crate::datatype::Value;
use crate::error::{Result, VartabError};
use crate::table::{NameHasher, TableRef, read_values};

/// Count, mean and population standard deviation of the non-null values of
/// a variable. Sequence elements count individually.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    count: usize,
    mean: f64,
    std_dev: f64,
}

impl Statistics {
    pub fn of(values: &[Value]) -> Statistics {
        let numbers: Vec<f64> = values
            .iter()
            .flat_map(|v| match v.elements() {
                Some(elements) => elements.iter().filter_map(Value::as_f64).collect(),
                None => v.as_f64().into_iter().collect::<Vec<_>>(),
            })
            .collect();
        let count = numbers.len();
        if count == 0 {
            return Statistics { count, mean: 0.0, std_dev: 0.0 };
        }
        let mean = numbers.iter().sum::<f64>() / count as f64;
        let variance = numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count as f64;
        Statistics { count, mean, std_dev: variance.sqrt() }
    }
    pub fn count(&self) -> usize {
        self.count
    }
    pub fn mean(&self) -> f64 {
        self.mean
    }
    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }
}

// ------------- StatisticsCache -------------
/// Statistics per `table:variable`, kept until the table's last update changes.
#[derive(Default)]
pub struct StatisticsCache {
    entries: RwLock<HashMap<String, (Option<DateTime<Utc>>, Statistics), NameHasher>>,
}

impl StatisticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the statistics of `variable` over every entity of `table`.
    pub fn compute(table: &TableRef, variable: &str) -> Result<Statistics> {
        let value_type = table.variable(variable)?.value_type();
        if !value_type.is_numeric() {
            return Err(VartabError::TypeMismatch(format!(
                "statistics need a numeric variable, {} is {}",
                variable, value_type
            )));
        }
        let values = read_values(table, variable, &table.variable_entities())?;
        Ok(Statistics::of(&values))
    }

    pub fn statistics(&self, table: &TableRef, variable: &str) -> Result<Statistics> {
        let key = format!("{}:{}", table.qualified_name(), variable);
        let version = table.timestamps().last_update();
        if let Some((cached, statistics)) = self.entries.read()?.get(&key) {
            if *cached == version {
                return Ok(*statistics);
            }
            debug!(%key, "statistics invalidated");
        }
        let statistics = Self::compute(table, variable)?;
        self.entries.write()?.insert(key, (version, statistics));
        Ok(statistics)
    }

    pub fn clear(&self) -> Result<()> {
        self.entries.write()?.clear();
        Ok(())
    }
}

// ------------- OutlierWhereClause -------------
/// Admits entities whose value of a numeric variable lies within `k`
/// standard deviations of its mean. Nulls are admitted, and so is everything
/// while the variable has fewer values than the configured minimum.
pub struct OutlierWhereClause {
    variable: String,
    k: f64,
    context: Arc<Context>,
}

impl OutlierWhereClause {
    pub fn new(variable: impl Into<String>, k: f64, context: &Arc<Context>) -> Result<Self> {
        if !(k.is_finite() && k > 0.0) {
            return Err(VartabError::InvalidArgument(format!("outlier bound must be positive, got {}", k)));
        }
        Ok(Self { variable: variable.into(), k, context: Arc::clone(context) })
    }

    fn statistics(&self, table: &TableRef) -> Result<Statistics> {
        if self.context.settings().statistics_enabled {
            self.context.statistics().statistics(table, &self.variable)
        } else {
            StatisticsCache::compute(table, &self.variable)
        }
    }
}

impl WhereClause for OutlierWhereClause {
    fn admits(&self, table: &TableRef, entity: &VariableEntity) -> Result<bool> {
        let statistics = self.statistics(table)?;
        if statistics.count < self.context.settings().outlier_min_values {
            return Ok(true);
        }
        let value = Arc::clone(table).value_set(entity)?.value(&self.variable)?;
        let Some(x) = value.as_f64() else {
            return Ok(true);
        };
        Ok((x - statistics.mean).abs() <= self.k * statistics.std_dev)
    }
}
