//! Statement execution through the top-level handle.

mod common;

use common::*;
use nsql_interpreter::{ErrorKind, RawValue};

// ============================================================================
// Expression selects
// ============================================================================

#[test]
fn test_select_parameter_plus_one() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let rows = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "SELECT $x + 1",
        &params(&[("x", json!(5))]),
    )
    .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values, vec![RawValue::Int8(6)]);
    assert_eq!(rows[0].column_types, vec![DataType::INT8]);
}

#[test]
fn test_parameter_names_are_normalized() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let rows = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "SELECT $name AS who, $Count * 2 AS twice;",
        &params(&[("$NAME", json!("bob")), ("count", json!(21))]),
    )
    .unwrap();

    assert_eq!(rows[0].column_names, vec!["who", "twice"]);
    assert_eq!(host_values(&rows[0]), vec![json!("bob"), json!(42)]);
}

#[test]
fn test_context_variables() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);
    let ctx = EngineContext::new("carol").with_height(7).with_tx_id("tx-9");

    let rows = execute(
        &interpreter,
        &ctx,
        &db,
        "SELECT @caller, @height, @txid;",
        &params(&[]),
    )
    .unwrap();

    assert_eq!(
        host_values(&rows[0]),
        vec![json!("carol"), json!(7), json!("tx-9")]
    );
}

#[test]
fn test_statements_run_in_order_with_assignments() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let rows = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "$a := 2; SELECT $a; $a := $a * 10; SELECT $a;",
        &params(&[]),
    )
    .unwrap();

    let values: Vec<_> = rows.iter().map(|r| r.values[0].clone()).collect();
    assert_eq!(values, vec![RawValue::Int8(2), RawValue::Int8(20)]);
}

#[test]
fn test_identical_input_yields_identical_rows() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);
    let input = params(&[("a", json!(3)), ("b", json!("x")), ("c", json!(true))]);
    let text = "SELECT $a, $b; SELECT $c, upper($b); SELECT $a * $a;";

    let first = execute(&interpreter, &ctx("alice"), &db, text, &input).unwrap();
    for _ in 0..5 {
        let again = execute(&interpreter, &ctx("alice"), &db, text, &input).unwrap();
        assert_eq!(again, first);
    }
}

// ============================================================================
// Built-ins
// ============================================================================

#[test]
fn test_scalar_builtin_round_trips_through_database() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);
    db.clear_queries();

    let rows = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "SELECT UPPER($s) AS shout;",
        &params(&[("s", json!("hi"))]),
    )
    .unwrap();

    assert_eq!(host_values(&rows[0]), vec![json!("HI")]);
    assert_eq!(db.queries(), vec!["SELECT upper($1);".to_string()]);
}

#[test]
fn test_builtin_argument_types_are_checked() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);
    db.clear_queries();

    let err = execute(&interpreter, &ctx("alice"), &db, "SELECT upper(1);", &params(&[])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(db.queries().is_empty());
}

#[test]
fn test_notice_in_expression_is_null() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let rows = execute(&interpreter, &ctx("alice"), &db, "SELECT notice('x');", &params(&[])).unwrap();
    assert_eq!(rows[0].values, vec![RawValue::Null]);
}

// ============================================================================
// Pass-through SQL
// ============================================================================

#[test]
fn test_query_passes_through_with_positional_params() {
    let db = FakeDb::bootstrapped();
    db.respond(
        "FROM users",
        QueryResult {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec![Value::int8(1), Value::text("ann")],
                vec![Value::int8(2), Value::text("ben")],
            ],
        },
    );
    let interpreter = build(&db);
    db.clear_queries();

    let rows = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "SELECT id, name FROM users WHERE id > $min AND owner = @caller;",
        &params(&[("min", json!(0))]),
    )
    .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].column_names, vec!["id", "name"]);
    assert_eq!(host_values(&rows[1]), vec![json!(2), json!("ben")]);
    assert_eq!(
        db.queries(),
        vec!["SELECT id, name FROM users WHERE id > $1 AND owner = $2".to_string()]
    );
}

#[test]
fn test_writes_fail_on_read_only_handle() {
    let db = FakeDb::bootstrapped();
    db.assign_role("owner_user", "owner");
    let interpreter = build(&db);

    let err = execute(
        &interpreter,
        &ctx("owner_user"),
        &db.read_only(),
        "INSERT INTO t VALUES (1);",
        &params(&[]),
    )
    .unwrap_err();
    assert!(matches!(err, Error::ReadOnly { .. }));
}

#[test]
fn test_top_level_writes_need_privileges() {
    let db = FakeDb::bootstrapped();
    db.assign_role("root", "owner");
    let interpreter = build(&db);

    let err = execute(&interpreter, &ctx("alice"), &db, "INSERT INTO t VALUES (1);", &params(&[]))
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));

    execute(&interpreter, &ctx("root"), &db, "INSERT INTO t VALUES (1);", &params(&[])).unwrap();
    assert!(db.queries().contains(&"INSERT INTO t VALUES (1)".to_string()));
}

#[test]
fn test_select_into_is_a_write() {
    let db = FakeDb::bootstrapped();
    db.assign_role("root", "owner");
    let interpreter = build(&db);
    let text = "SELECT * INTO t2 FROM t;";

    let err = execute(&interpreter, &ctx("root"), &db.read_only(), text, &params(&[])).unwrap_err();
    assert!(matches!(err, Error::ReadOnly { .. }));

    // the default role may select but not create
    let err = execute(&interpreter, &ctx("alice"), &db, text, &params(&[])).unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { ref reason } if reason.contains("create")));

    db.clear_queries();
    execute(&interpreter, &ctx("root"), &db, text, &params(&[])).unwrap();
    assert_eq!(db.queries(), vec!["SELECT * INTO t2 FROM t".to_string()]);
}

#[test]
fn test_duplicate_result_columns_are_suffixed() {
    let db = FakeDb::bootstrapped();
    db.respond(
        "JOIN b",
        QueryResult {
            columns: vec!["id".into(), "id".into()],
            rows: vec![vec![Value::int8(1), Value::int8(2)]],
        },
    );
    let interpreter = build(&db);

    let rows = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "SELECT a.id, b.id FROM a JOIN b ON a.x = b.x;",
        &params(&[]),
    )
    .unwrap();

    assert_eq!(rows[0].column_names, vec!["id", "id_1"]);
    assert_eq!(host_values(&rows[0]), vec![json!(1), json!(2)]);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_bad_parameter_name_fails_before_any_statement() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);
    db.clear_queries();

    let mut seen = 0;
    let err = interpreter
        .execute(
            &ctx("alice"),
            &db,
            "SELECT upper('a'); SELECT 1;",
            &params(&[("bad name", json!(1))]),
            &mut |_| {
                seen += 1;
                Ok(())
            },
        )
        .unwrap_err();

    assert!(matches!(err, Error::InvalidVariable { .. }));
    assert_eq!(seen, 0);
    assert!(db.queries().is_empty());
}

#[test]
fn test_unsupported_host_value_rejected() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let err = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "SELECT $f;",
        &params(&[("f", json!(1.5))]),
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnsupportedHostValue { .. }));
}

#[test]
fn test_parse_errors_and_empty_text() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let err = execute(&interpreter, &ctx("alice"), &db, "SELECT (1", &params(&[])).unwrap_err();
    assert!(matches!(err, Error::Parse(_)));

    let err = execute(&interpreter, &ctx("alice"), &db, "-- nothing here", &params(&[])).unwrap_err();
    assert!(matches!(err, Error::NoStatements { .. }));
}

#[test]
fn test_first_failure_aborts_the_batch() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let mut rows = Vec::new();
    let err = interpreter
        .execute(
            &ctx("alice"),
            &db,
            "SELECT 1; SELECT $missing; SELECT 3;",
            &params(&[]),
            &mut |row| {
                rows.push(row);
                Ok(())
            },
        )
        .unwrap_err();

    assert!(matches!(err, Error::UnknownVariable { .. }));
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_integer_overflow_is_reported() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let err = execute(
        &interpreter,
        &ctx("alice"),
        &db,
        "SELECT $x * 2;",
        &params(&[("x", json!(i64::MAX))]),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Overflow { .. }));
}

#[test]
fn test_cancelled_context_stops_execution() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);
    let ctx = ctx("alice");
    ctx.cancel.cancel();

    let err = execute(&interpreter, &ctx, &db, "SELECT 1;", &params(&[])).unwrap_err();
    assert_eq!(err, Error::Cancelled);
    assert!(!err.kind().is_deterministic());
}

#[test]
fn test_missing_access_mode_is_rejected() {
    let db = FakeDb::bootstrapped();
    let interpreter = build(&db);

    let err = execute(
        &interpreter,
        &ctx("alice"),
        &db.without_access_mode(),
        "SELECT 1;",
        &params(&[]),
    )
    .unwrap_err();
    assert_eq!(err, Error::AccessModeUnavailable);
}
