//! Construction, deployment and introspection.

mod common;

use common::*;
use nsql_interpreter::{
    ColumnDef, ErrorKind, ExecutableKind, Modifier, NamespaceSchema, CONFIG_FILE_NAME,
};
use std::collections::BTreeMap;

// ============================================================================
// Bootstrap
// ============================================================================

#[test]
fn test_empty_database_is_bootstrapped() {
    let db = FakeDb::new();
    let interpreter = build(&db);

    let queries = db.queries();
    assert!(queries[0].contains("information_schema.schemata"));
    assert!(queries.contains(&"CREATE SCHEMA nsql_engine;".to_string()));
    assert!(queries
        .iter()
        .any(|q| q.starts_with("CREATE TABLE nsql_engine.user_roles")));

    {
        let catalog = db.catalog();
        assert!(catalog.initialized);
        assert!(catalog.namespaces.contains(&("main".into(), "SYSTEM".into())));
        assert!(catalog.namespaces.contains(&("info".into(), "SYSTEM".into())));
        assert_eq!(catalog.role_privileges.len(), 2);
    }

    assert_eq!(
        interpreter.namespaces(),
        vec![
            ("info".to_string(), NamespaceKind::System),
            ("main".to_string(), NamespaceKind::System),
        ]
    );

    // default grants are live right after bootstrap
    let (_, result) = call(&interpreter, &ctx("anyone"), &db, "main", "notice", &[json!("up")]).unwrap();
    assert_eq!(result.logs, vec!["up"]);
}

#[test]
fn test_initialized_database_is_not_bootstrapped_again() {
    let db = FakeDb::bootstrapped();
    build(&db);

    assert!(!db.queries().iter().any(|q| q.starts_with("CREATE")));
}

#[test]
fn test_bootstrap_check_must_return_one_row() {
    let db = FakeDb::new();
    db.catalog().bootstrap_rows = Some(vec![]);
    let err = ThreadSafeInterpreter::builder().build(&db).unwrap_err();
    assert!(matches!(err, Error::Initialization { .. }));
    assert!(err.to_string().contains("could not determine"));

    let db = FakeDb::new();
    db.catalog().bootstrap_rows = Some(vec![vec![Value::boolean(true)], vec![Value::boolean(true)]]);
    let err = ThreadSafeInterpreter::builder().build(&db).unwrap_err();
    assert!(matches!(err, Error::Initialization { ref reason } if reason.contains("2")));
}

#[test]
fn test_corrupt_persisted_action_aborts_construction() {
    let db = FakeDb::bootstrapped();
    db.catalog()
        .actions
        .push(("main".into(), "broken".into(), "{not json".into()));

    let err = ThreadSafeInterpreter::builder().build(&db).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn test_persisted_action_with_bad_body_aborts_construction() {
    let db = FakeDb::bootstrapped();
    db.add_action("main", &ActionDef::new("bad", "SELECT (1"));

    let err = ThreadSafeInterpreter::builder().build(&db).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(err.to_string().contains("main.bad"));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_selects_default_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "default_namespace = \"App\"\n").unwrap();
    let config = InterpreterConfig::load(&path).unwrap();
    assert_eq!(config.default_namespace, "app");

    let db = FakeDb::new();
    let interpreter = ThreadSafeInterpreter::builder()
        .config(config)
        .registry(std::sync::Arc::new(ExtensionRegistry::new()))
        .build(&db)
        .unwrap();

    assert!(db.catalog().namespaces.contains(&("app".into(), "SYSTEM".into())));
    let (_, result) = call(&interpreter, &ctx("alice"), &db, "", "notice", &[json!("hi")]).unwrap();
    assert_eq!(result.logs, vec!["hi"]);

    let rows = execute(&interpreter, &ctx("alice"), &db, "SELECT app.upper('x');", &params(&[])).unwrap();
    assert_eq!(host_values(&rows[0]), vec![json!("X")]);
}

#[test]
fn test_invalid_config_is_rejected_at_build() {
    let db = FakeDb::new();
    let config = InterpreterConfig {
        default_namespace: "same".into(),
        info_namespace: "same".into(),
        ..InterpreterConfig::default()
    };

    let err = ThreadSafeInterpreter::builder()
        .config(config)
        .build(&db)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(db.queries().is_empty());
}

// ============================================================================
// Deploy / undeploy
// ============================================================================

fn ledger() -> TableDef {
    TableDef::new(
        "Ledger",
        vec![
            ColumnDef::new("ID", DataType::INT8).primary_key(),
            ColumnDef::new("memo", DataType::TEXT),
        ],
    )
}

#[test]
fn test_deploy_namespace_and_introspect() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);
    let schema = NamespaceSchema::user()
        .with_table(ledger())
        .with_action(ActionDef::new("Count", "SELECT 1 AS n;").with_modifier(Modifier::View));

    interpreter
        .deploy_namespace(&ctx("root"), &db, "Books", schema)
        .unwrap();

    assert!(interpreter
        .namespaces()
        .contains(&("books".to_string(), NamespaceKind::User)));

    let tables = interpreter.tables("BOOKS").unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "ledger");
    assert_eq!(tables[0].columns[0].name, "id");

    let actions = interpreter.actions("books").unwrap();
    let count = actions.iter().find(|a| a.name == "count").unwrap();
    assert_eq!(count.kind, ExecutableKind::Action);
    // built-in functions are not callables
    assert!(!actions.iter().any(|a| a.name == "upper"));
    assert!(actions.iter().any(|a| a.name == "notice"));
}

#[test]
fn test_deploy_rejections() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let err = interpreter
        .deploy_namespace(&ctx("root"), &db, "MAIN", NamespaceSchema::user())
        .unwrap_err();
    assert!(matches!(err, Error::NamespaceExists { ref namespace } if namespace == "main"));

    let err = interpreter
        .deploy_namespace(&ctx("root"), &db.read_only(), "other", NamespaceSchema::user())
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnly { .. }));

    let err = interpreter
        .deploy_namespace(&ctx("root"), &db, "bad name", NamespaceSchema::user())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let schema = NamespaceSchema::user()
        .with_action(ActionDef::new("twice", "SELECT 1;"))
        .with_action(ActionDef::new("TWICE", "SELECT 2;"));
    let err = interpreter
        .deploy_namespace(&ctx("root"), &db, "dupes", schema)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!interpreter
        .namespaces()
        .iter()
        .any(|(name, _)| name == "dupes"));
}

#[test]
fn test_undeploy_namespace() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);
    interpreter
        .deploy_namespace(&ctx("root"), &db, "scratch", NamespaceSchema::user())
        .unwrap();

    interpreter
        .undeploy_namespace(&ctx("root"), &db, "Scratch")
        .unwrap();
    let err = interpreter.tables("scratch").unwrap_err();
    assert!(matches!(err, Error::NamespaceNotFound { .. }));

    let err = interpreter
        .undeploy_namespace(&ctx("root"), &db, "scratch")
        .unwrap_err();
    assert!(matches!(err, Error::NamespaceNotFound { .. }));
}

#[test]
fn test_system_namespaces_cannot_be_undeployed() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let err = interpreter
        .undeploy_namespace(&ctx("root"), &db, "main")
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));
    assert!(interpreter.tables("main").is_ok());
}

#[test]
fn test_management_requires_access_mode() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let err = interpreter
        .use_extension(&ctx("root"), &db.without_access_mode(), "x", "y", &BTreeMap::new())
        .unwrap_err();
    assert_eq!(err, Error::AccessModeUnavailable);
}
