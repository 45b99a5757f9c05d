//! The engine context: everything views and scripts need to resolve names,
//! passed explicitly instead of living in process-wide state.
// used for reading settings from defaults, files and the environment
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::{debug, info};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::audit::{AuditLogProvider, COPY_EVENT, IncrementalWhereClause};
use crate::datatype::ValueTypeRegistry;
use crate::error::{Result, VartabError};
use crate::script::parser::{self, Program};
use crate::stats::StatisticsCache;
use crate::table::{Datasource, NameHasher, TableRef};

// ------------- Settings -------------
/// Tunables of the engine. Loaded from built-in defaults, then an optional
/// settings file, then `VARTAB_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Entities per batch when reading a column through vector sources.
    pub vector_batch_size: usize,
    /// Event type of the audit events recording copies between tables.
    pub copy_event_type: String,
    /// Share compiled scripts between sources with the same script text.
    pub script_cache_enabled: bool,
    /// Keep computed statistics until the table changes.
    pub statistics_enabled: bool,
    /// Below this many values, outlier clauses admit everything.
    pub outlier_min_values: usize,
    pub default_locale: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vector_batch_size: 1000,
            copy_event_type: COPY_EVENT.to_string(),
            script_cache_enabled: true,
            statistics_enabled: true,
            outlier_min_values: 3,
            default_locale: String::from("en"),
        }
    }
}

impl Settings {
    fn builder() -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = Settings::default();
        Ok(Config::builder()
            .set_default("vector_batch_size", defaults.vector_batch_size as i64)?
            .set_default("copy_event_type", defaults.copy_event_type)?
            .set_default("script_cache_enabled", defaults.script_cache_enabled)?
            .set_default("statistics_enabled", defaults.statistics_enabled)?
            .set_default("outlier_min_values", defaults.outlier_min_values as i64)?
            .set_default("default_locale", defaults.default_locale)?)
    }

    fn finish(builder: config::builder::ConfigBuilder<config::builder::DefaultState>) -> Result<Settings> {
        let settings: Settings = builder
            .add_source(Environment::with_prefix("VARTAB").try_parsing(true))
            .build()?
            .try_deserialize()?;
        if settings.vector_batch_size == 0 {
            return Err(VartabError::Config(String::from("vector_batch_size must be positive")));
        }
        Ok(settings)
    }

    /// Defaults overridden by the environment.
    pub fn load() -> Result<Settings> {
        Self::finish(Self::builder()?)
    }

    /// Defaults overridden by the file at `path` (any format `config` knows,
    /// by extension), then by the environment. A missing file is not an error.
    pub fn from_file(path: &str) -> Result<Settings> {
        let settings = Self::finish(Self::builder()?.add_source(File::with_name(path).required(false)))?;
        info!(path, ?settings, "settings loaded");
        Ok(settings)
    }
}

// ------------- Context -------------
pub struct Context {
    settings: Settings,
    registry: ValueTypeRegistry,
    datasources: RwLock<Vec<Arc<dyn Datasource>>>,
    // keyed by script name and source text
    scripts: RwLock<HashMap<(String, String), Arc<Program>, NameHasher>>,
    audit: RwLock<Option<Arc<dyn AuditLogProvider>>>,
    statistics: StatisticsCache,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Context {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: ValueTypeRegistry::default(),
            datasources: RwLock::new(Vec::new()),
            scripts: RwLock::new(HashMap::default()),
            audit: RwLock::new(None),
            statistics: StatisticsCache::new(),
        }
    }
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn registry(&self) -> &ValueTypeRegistry {
        &self.registry
    }
    pub fn statistics(&self) -> &StatisticsCache {
        &self.statistics
    }

    /// Registers a datasource, replacing one of the same name.
    pub fn add_datasource(&self, datasource: Arc<dyn Datasource>) -> Result<()> {
        let mut datasources = self.datasources.write()?;
        datasources.retain(|d| d.name() != datasource.name());
        debug!(datasource = datasource.name(), "datasource registered");
        datasources.push(datasource);
        Ok(())
    }
    pub fn remove_datasource(&self, name: &str) -> Result<()> {
        let mut datasources = self.datasources.write()?;
        if let Some(position) = datasources.iter().position(|d| d.name() == name) {
            datasources.remove(position).dispose();
        }
        Ok(())
    }
    pub fn datasource(&self, name: &str) -> Result<Arc<dyn Datasource>> {
        self.datasources
            .read()?
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| VartabError::NoSuchDatasource(name.to_string()))
    }
    pub fn datasource_names(&self) -> Vec<String> {
        self.datasources
            .read()
            .map(|d| d.iter().map(|d| d.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Resolves `datasource.table`, or a bare table name in
    /// `default_datasource`. Without a default, a bare name is looked up in
    /// every datasource in registration order.
    pub fn table(&self, reference: &str, default_datasource: Option<&str>) -> Result<TableRef> {
        if let Some((datasource, table)) = reference.split_once('.') {
            return self.datasource(datasource)?.value_table(table);
        }
        if let Some(datasource) = default_datasource {
            return self.datasource(datasource)?.value_table(reference);
        }
        self.datasources
            .read()?
            .iter()
            .find_map(|d| d.value_table(reference).ok())
            .ok_or_else(|| VartabError::NoSuchValueTable {
                name: reference.to_string(),
                owner: String::from("any datasource"),
            })
    }

    /// Compiles a script, sharing the program between compilations of the same
    /// script name and text.
    pub fn compile(&self, name: &str, source: &str) -> Result<Arc<Program>> {
        if !self.settings.script_cache_enabled {
            return parser::compile(name, source).map(Arc::new);
        }
        let key = (name.to_string(), source.to_string());
        if let Some(program) = self.scripts.read()?.get(&key) {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(parser::compile(name, source)?);
        debug!(script = name, "script compiled");
        let mut scripts = self.scripts.write()?;
        Ok(Arc::clone(scripts.entry(key).or_insert(program)))
    }

    pub fn set_audit_log_provider(&self, provider: Arc<dyn AuditLogProvider>) -> Result<()> {
        *self.audit.write()? = Some(provider);
        Ok(())
    }
    pub fn audit_log_provider(&self) -> Option<Arc<dyn AuditLogProvider>> {
        self.audit.read().ok().and_then(|a| a.clone())
    }

    /// An incremental where clause over the registered audit log provider,
    /// using the configured copy event type.
    pub fn incremental_where_clause(
        &self,
        source: (&str, &str),
        destination: (&str, &str),
    ) -> Result<IncrementalWhereClause> {
        let provider = self
            .audit_log_provider()
            .ok_or_else(|| VartabError::Config(String::from("no audit log provider registered")))?;
        Ok(IncrementalWhereClause::new(source, destination, provider).with_event_type(&self.settings.copy_event_type))
    }

    /// Disposes every datasource and forgets all cached state.
    pub fn shutdown(&self) -> Result<()> {
        let datasources = std::mem::take(&mut *self.datasources.write()?);
        for datasource in &datasources {
            datasource.dispose();
        }
        self.scripts.write()?.clear();
        self.statistics.clear()?;
        *self.audit.write()? = None;
        info!(datasources = datasources.len(), "context shut down");
        Ok(())
    }
}
