use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing_subscriber::EnvFilter;
use vartab::audit::{AuditEvent, AuditLogProvider, MemoryAuditLogProvider};
use vartab::clause::{ListClause, StaticWhereClause};
use vartab::construct::{Variable, VariableEntity};
use vartab::context::{Context, Settings};
use vartab::datatype::{Value, ValueType};
use vartab::error::VartabError;
use vartab::memory::StaticDatasource;
use vartab::stats::OutlierWhereClause;
use vartab::table::{TableRef, ValueSetWriter, ValueTable, ValueTableWriter};
use vartab::view::View;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

fn participant(id: &str) -> VariableEntity {
    VariableEntity::new("Participant", id)
}

// a destination table "dst.T" with one height per participant
fn setup(settings: Settings, heights: &[(&str, i64)]) -> (Arc<Context>, TableRef) {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
    let context = Arc::new(Context::new(settings));
    let datasource = StaticDatasource::new("dst");
    let table = datasource.static_table("T", "Participant").unwrap();
    let height = Variable::builder("height", ValueType::Integer, "Participant").unit("cm").build().unwrap();
    let mut writer = table.writer();
    writer.write_variable(&height).unwrap();
    for (id, h) in heights {
        writer.value_set_writer(&participant(id)).unwrap().write_value(&height, Value::integer(*h)).unwrap();
    }
    context.add_datasource(datasource).unwrap();
    (context, table as TableRef)
}

#[test]
fn incremental_views_keep_stable_entities() {
    let settings = Settings { copy_event_type: String::from("IMPORT"), ..Default::default() };
    let (context, table) = setup(settings, &[("p1", 170), ("p2", 180), ("p3", 175), ("p4", 160)]);
    assert!(context.incremental_where_clause(("src", "T"), ("dst", "T")).is_err());

    let provider = Arc::new(MemoryAuditLogProvider::new());
    // p1 copied after its last change, p2 changed again since, p3 copied at the
    // very moment it changed, p4 only carries events of another type
    for (id, changed, copied) in [("p1", 1, 2), ("p2", 3, 2), ("p3", 4, 4)] {
        provider.record(&participant(id), AuditEvent::new("IMPORT", at(changed), "src", "T")).unwrap();
        provider.record(&participant(id), AuditEvent::new("IMPORT", at(copied), "dst", "T")).unwrap();
    }
    provider.record(&participant("p4"), AuditEvent::new("COPY", at(5), "dst", "T")).unwrap();
    let dynamic: Arc<dyn AuditLogProvider> = provider.clone();
    context.set_audit_log_provider(dynamic).unwrap();

    let clause = context.incremental_where_clause(("src", "T"), ("dst", "T")).unwrap();
    let view = View::builder("stable", table).where_clause(clause).build(&context).unwrap();
    assert_eq!(view.variable_entities(), vec![participant("p1")]);
    assert!(!view.has_value_set(&participant("p2")));
}

#[test]
fn bulk_reads_respect_the_where_clause() {
    let (context, table) = setup(Settings::default(), &[("in", 170), ("out", 180)]);
    let double = Variable::builder("double", ValueType::Integer, "Participant")
        .scripted()
        .script("$('height') * 2")
        .build()
        .unwrap();
    let view = View::builder("V", table)
        .where_clause(StaticWhereClause::entities([participant("in")]))
        .list(ListClause::new().add(double).unwrap())
        .build(&context)
        .unwrap();
    assert_eq!(view.values("double", &[participant("in")]).unwrap(), vec![Value::integer(340)]);
    for variable in ["height", "double"] {
        let error = view.values(variable, &[participant("in"), participant("out")]).unwrap_err();
        assert!(matches!(error, VartabError::NoSuchValueSet { ref entity, .. } if entity.contains("out")), "{error}");
    }
}

#[test]
fn outliers_are_left_out() {
    let heights = [("a", 170), ("b", 171), ("c", 169), ("d", 170), ("e", 172), ("f", 168), ("g", 250)];
    let (context, table) = setup(Settings::default(), &heights);
    let clause = OutlierWhereClause::new("height", 2.0, &context).unwrap();
    let view = View::builder("typical", Arc::clone(&table)).where_clause(clause).build(&context).unwrap();
    let kept = view.variable_entities();
    assert_eq!(kept.len(), 6);
    assert!(!kept.contains(&participant("g")));
    let statistics = context.statistics().statistics(&table, "height").unwrap();
    assert_eq!(statistics.count(), 7);
}

#[test]
fn few_values_admit_everything() {
    let settings = Settings { outlier_min_values: 10, statistics_enabled: false, ..Default::default() };
    let (context, table) = setup(settings, &[("a", 170), ("b", 171), ("g", 250)]);
    let clause = OutlierWhereClause::new("height", 1.0, &context).unwrap();
    let view = View::builder("typical", table).where_clause(clause).build(&context).unwrap();
    assert_eq!(view.variable_entities().len(), 3);
}

#[test]
fn shutdown_forgets_datasources() {
    let (context, _) = setup(Settings::default(), &[("a", 170)]);
    assert_eq!(context.datasource_names(), vec!["dst"]);
    assert!(context.table("dst.T", None).is_ok());
    context.shutdown().unwrap();
    assert!(context.datasource_names().is_empty());
    assert!(context.table("dst.T", None).is_err());
}
