//! Extension loading, lifecycle and reentrancy.

mod common;

use common::*;
use nsql_interpreter::{
    App, CallContext, Extension, ExecutableKind, Instance, Method, Modifier, NamespaceSchema,
    Precompile, Row,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Test extension
// ============================================================================

#[derive(Default)]
struct Counters {
    initialized: AtomicUsize,
    started: AtomicUsize,
    used: AtomicUsize,
    unused: AtomicUsize,
    /// `initialized` as seen by each start hook
    seen_at_start: Mutex<Vec<usize>>,
    start_logs: Mutex<Vec<String>>,
}

struct MathInstance(Arc<Counters>);

impl Instance for MathInstance {
    fn on_start(&self, app: &App<'_>) -> Result<()> {
        self.0.started.fetch_add(1, Ordering::SeqCst);
        self.0
            .seen_at_start
            .lock()
            .push(self.0.initialized.load(Ordering::SeqCst));

        let result = app.engine.call(
            &EngineContext::new("node"),
            app.db,
            "main",
            "notice",
            &[json!("started")],
            &mut |_| Ok(()),
        )?;
        self.0.start_logs.lock().extend(result.logs);
        Ok(())
    }

    fn on_use(&self, ctx: &CallContext<'_>) -> Result<()> {
        self.0.used.fetch_add(1, Ordering::SeqCst);
        ctx.log(format!("using {}", ctx.alias()));
        Ok(())
    }

    fn on_unuse(&self, _ctx: &CallContext<'_>) -> Result<()> {
        self.0.unused.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn math_extension(counters: Arc<Counters>) -> impl Extension {
    move |_alias: &str, config: &BTreeMap<String, Value>, _db: &dyn Database| -> Result<Precompile> {
        counters.initialized.fetch_add(1, Ordering::SeqCst);
        let greeting = config
            .get("greeting")
            .cloned()
            .unwrap_or_else(|| Value::text("hello"));

        Ok(Precompile::new(Arc::new(MathInstance(Arc::clone(&counters))))
            .with_method(
                Method::new("add", |_, args, sink| {
                    let a = args[0].as_int8().unwrap_or_default();
                    let b = args[1].as_int8().unwrap_or_default();
                    sink(Row::single("sum", Value::int8(a + b)))
                })
                .with_modifiers([Modifier::View])
                .with_parameters([DataType::INT8, DataType::INT8])
                .with_returns(["sum"]),
            )
            .with_method(
                Method::new("hello", move |_, _, sink| sink(Row::single("greeting", greeting.clone())))
                    .with_modifiers([Modifier::View]),
            )
            .with_method(
                Method::new("internal", |ctx, _, _| {
                    ctx.log("inner");
                    Ok(())
                })
                .with_modifiers([Modifier::System]),
            )
            .with_method(Method::new("relay", |ctx, _, sink| {
                ctx.log("before");
                let nested = ctx.engine().call(
                    ctx.engine_ctx(),
                    ctx.db(),
                    ctx.alias(),
                    "internal",
                    &[],
                    &mut |_| Ok(()),
                )?;
                ctx.log("after");
                sink(Row::single("nested_logs", Value::int8(nested.logs.len() as i64)))
            }))
            .with_method(
                Method::new("doomed", |ctx, _, _| {
                    ctx.log("doomed");
                    Err(Error::invalid_input("doomed always fails"))
                })
                .with_modifiers([Modifier::System]),
            )
            .with_method(Method::new("shrug", |ctx, _, _| {
                ctx.log("before");
                let nested = ctx.engine().call(
                    ctx.engine_ctx(),
                    ctx.db(),
                    ctx.alias(),
                    "doomed",
                    &[],
                    &mut |_| Ok(()),
                );
                if nested.is_ok() {
                    return Err(Error::internal("doomed succeeded"));
                }
                ctx.log("after");
                Ok(())
            }))
            .with_method(
                Method::new("bad_shape", |_, _, sink| sink(Row::single("a", Value::int8(1))))
                    .with_modifiers([Modifier::View])
                    .with_returns(["a", "b"]),
            )
            .with_method(
                Method::new("upper", |_, _, sink| sink(Row::single("upper", Value::text("method"))))
                    .with_modifiers([Modifier::View]),
            ))
    }
}

fn registry_with_math() -> (Arc<ExtensionRegistry>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let registry = Arc::new(ExtensionRegistry::new());
    registry
        .register("math", math_extension(Arc::clone(&counters)))
        .unwrap();
    (registry, counters)
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_unknown_persisted_extension_is_fatal() {
    let db = FakeDb::bootstrapped();
    db.add_extension("missing", "m", json!({}));

    let err = ThreadSafeInterpreter::builder()
        .registry(Arc::new(ExtensionRegistry::new()))
        .build(&db)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownExtension { ref name } if name == "missing"));
    assert!(!err.kind().is_deterministic());
}

#[test]
fn test_persisted_extension_is_loaded_and_started() {
    let db = FakeDb::bootstrapped();
    db.add_extension("math", "calc", json!({"greeting": "hey"}));
    let (registry, counters) = registry_with_math();

    let interpreter = build_with(&db, registry);
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    assert_eq!(*counters.start_logs.lock(), vec!["started".to_string()]);
    // construction does not deploy, so use hooks do not run
    assert_eq!(counters.used.load(Ordering::SeqCst), 0);

    let (rows, _) = call(&interpreter, &ctx("alice"), &db, "calc", "add", &[json!(2), json!(3)]).unwrap();
    assert_eq!(host_values(&rows[0]), vec![json!(5)]);

    let (rows, _) = call(&interpreter, &ctx("alice"), &db, "calc", "hello", &[]).unwrap();
    assert_eq!(host_values(&rows[0]), vec![json!("hey")]);

    assert!(interpreter
        .namespaces()
        .contains(&("calc".to_string(), NamespaceKind::Extension)));
}

#[test]
fn test_start_hooks_run_after_every_instance_exists() {
    let db = FakeDb::bootstrapped();
    db.add_extension("math", "calc_a", json!({}));
    db.add_extension("math", "calc_b", json!({}));
    let (registry, counters) = registry_with_math();

    build_with(&db, registry);
    assert_eq!(counters.started.load(Ordering::SeqCst), 2);
    assert_eq!(*counters.seen_at_start.lock(), vec![2, 2]);
}

#[test]
fn test_persisted_actions_and_tables_win_over_methods() {
    let db = FakeDb::bootstrapped();
    db.add_namespace("calc", "EXTENSION");
    db.add_action(
        "calc",
        &ActionDef::new("add", "SELECT 'persisted' AS v;")
            .with_parameter("a", DataType::INT8)
            .with_parameter("b", DataType::INT8)
            .with_modifier(Modifier::View),
    );
    let ledger = TableDef::new(
        "ledger",
        vec![nsql_interpreter::ColumnDef::new("id", DataType::INT8).primary_key()],
    );
    db.add_table("calc", &ledger);
    db.add_extension("math", "calc", json!({}));
    let (registry, _) = registry_with_math();

    let interpreter = build_with(&db, registry);

    let (rows, _) = call(&interpreter, &ctx("alice"), &db, "calc", "add", &[json!(1), json!(2)]).unwrap();
    assert_eq!(host_values(&rows[0]), vec![json!("persisted")]);

    // a method still shadows the built-in of the same name
    let actions = interpreter.actions("calc").unwrap();
    let upper = actions.iter().find(|a| a.name == "upper").unwrap();
    assert_eq!(upper.kind, ExecutableKind::Precompile);
    let add = actions.iter().find(|a| a.name == "add").unwrap();
    assert_eq!(add.kind, ExecutableKind::Action);

    assert_eq!(interpreter.tables("calc").unwrap(), vec![ledger]);
}

#[test]
fn test_failing_start_aborts_construction() {
    struct Refuses;
    impl Instance for Refuses {
        fn on_start(&self, _app: &App<'_>) -> Result<()> {
            Err(Error::internal("not today"))
        }
    }

    let registry = Arc::new(ExtensionRegistry::new());
    registry
        .register(
            "grumpy",
            |_: &str, _: &BTreeMap<String, Value>, _: &dyn Database| -> Result<Precompile> {
                Ok(Precompile::new(Arc::new(Refuses)))
            },
        )
        .unwrap();
    let db = FakeDb::bootstrapped();
    db.add_extension("grumpy", "g", json!({}));

    let err = ThreadSafeInterpreter::builder()
        .registry(registry)
        .build(&db)
        .unwrap_err();
    assert_eq!(err, Error::internal("not today"));
}

// ============================================================================
// Methods
// ============================================================================

#[test]
fn test_recursive_call_under_exclusive_lock() {
    let db = FakeDb::bootstrapped();
    db.add_extension("math", "calc", json!({}));
    let (registry, _) = registry_with_math();
    let interpreter = build_with(&db, registry);

    // read-write handle: the outer call holds the exclusive lock
    let (rows, result) = call(&interpreter, &ctx("alice"), &db, "calc", "relay", &[]).unwrap();

    assert_eq!(result.logs, vec!["before", "inner", "after"]);
    assert_eq!(host_values(&rows[0]), vec![json!(1)]);
}

#[test]
fn test_failed_nested_call_leaves_no_logs() {
    let db = FakeDb::bootstrapped();
    db.add_extension("math", "calc", json!({}));
    let (registry, _) = registry_with_math();
    let interpreter = build_with(&db, registry);

    let (_, result) = call(&interpreter, &ctx("alice"), &db, "calc", "shrug", &[]).unwrap();

    assert_eq!(result.logs, vec!["before", "after"]);
}

#[test]
fn test_method_modifiers_and_shapes() {
    let db = FakeDb::bootstrapped();
    db.add_extension("math", "calc", json!({}));
    let (registry, _) = registry_with_math();
    let interpreter = build_with(&db, registry);
    let reader = db.read_only();

    call(&interpreter, &ctx("alice"), &reader, "calc", "add", &[json!(1), json!(1)]).unwrap();

    let err = call(&interpreter, &ctx("alice"), &reader, "calc", "relay", &[]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::ReadOnly { .. }));

    let err = call(&interpreter, &ctx("alice"), &db, "calc", "internal", &[]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::PermissionDenied { .. }));

    let err = call(&interpreter, &ctx("alice"), &db, "calc", "add", &[json!("1"), json!(1)]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::InvalidArguments { .. }));

    let err = call(&interpreter, &ctx("alice"), &db, "calc", "bad_shape", &[]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::Internal { .. }));
}

#[test]
fn test_methods_usable_in_expressions() {
    let db = FakeDb::bootstrapped();
    db.add_extension("math", "calc", json!({}));
    let (registry, _) = registry_with_math();
    let interpreter = build_with(&db, registry);

    let rows = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "SELECT calc.add($x, 10) AS total;",
        &params(&[("x", json!(5))]),
    )
    .unwrap();
    assert_eq!(rows[0].column_names, vec!["total"]);
    assert_eq!(host_values(&rows[0]), vec![json!(15)]);
}

// ============================================================================
// Deploy / undeploy
// ============================================================================

#[test]
fn test_use_and_undeploy_extension() {
    let db = FakeDb::bootstrapped();
    let (registry, counters) = registry_with_math();
    let interpreter = build_with(&db, registry);
    let mut config = BTreeMap::new();
    config.insert("greeting".to_string(), Value::text("yo"));

    interpreter
        .use_extension(&ctx("root"), &db, "MATH", "Calc", &config)
        .unwrap();
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    assert_eq!(counters.used.load(Ordering::SeqCst), 1);

    let (rows, _) = call(&interpreter, &ctx("alice"), &db, "calc", "hello", &[]).unwrap();
    assert_eq!(host_values(&rows[0]), vec![json!("yo")]);

    let err = interpreter
        .use_extension(&ctx("root"), &db, "math", "calc", &config)
        .unwrap_err();
    assert!(matches!(err, Error::NamespaceExists { .. }));
    assert_eq!(counters.used.load(Ordering::SeqCst), 1);

    interpreter
        .undeploy_namespace(&ctx("root"), &db, "calc")
        .unwrap();
    assert_eq!(counters.unused.load(Ordering::SeqCst), 1);

    let err = call(&interpreter, &ctx("alice"), &db, "calc", "hello", &[]).unwrap_err();
    assert!(matches!(err, Error::NamespaceNotFound { .. }));
}

#[test]
fn test_use_extension_rejections() {
    let db = FakeDb::bootstrapped();
    let (registry, _) = registry_with_math();
    let interpreter = build_with(&db, registry);

    let err = interpreter
        .use_extension(&ctx("root"), &db, "unknown", "u", &BTreeMap::new())
        .unwrap_err();
    assert_eq!(err.kind(), nsql_interpreter::ErrorKind::InvalidInput);

    let err = interpreter
        .use_extension(&ctx("root"), &db.read_only(), "math", "calc", &BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnly { .. }));

    let err = interpreter
        .use_extension(&ctx("root"), &db, "math", "main", &BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, Error::NamespaceExists { .. }));
}

#[test]
fn test_deploy_hooks_do_not_run_for_plain_namespaces() {
    let db = FakeDb::bootstrapped();
    let (registry, counters) = registry_with_math();
    let interpreter = build_with(&db, registry);

    interpreter
        .deploy_namespace(&ctx("root"), &db, "app", NamespaceSchema::user())
        .unwrap();
    interpreter
        .undeploy_namespace(&ctx("root"), &db, "app")
        .unwrap();
    assert_eq!(counters.used.load(Ordering::SeqCst), 0);
    assert_eq!(counters.unused.load(Ordering::SeqCst), 0);
}
