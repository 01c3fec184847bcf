//! Comprehensive template engine integration tests.
//!
//! Covers the end-to-end scenarios and the engine invariants with
//! realistic templates.

use sqlweave_core::{
    BindingRole, Blueprint, Builder, RenderError, SchemaSignature, Value,
};

// ===================================================================
// Helper functions
// ===================================================================

fn compile(template: &str) -> Blueprint {
    Blueprint::compile(template)
        .unwrap_or_else(|e| panic!("Failed to compile: {template}\nError: {e}"))
}

fn render(builder: &Builder<'_>) -> sqlweave_core::Rendered {
    builder
        .render()
        .unwrap_or_else(|e| panic!("Failed to render: {e}"))
}

/// Checks that every `(` has a matching `)` in the output.
fn assert_balanced(sql: &str) {
    let mut depth = 0_i64;
    for c in sql.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        assert!(depth >= 0, "unbalanced parens in: {sql}");
    }
    assert_eq!(depth, 0, "unbalanced parens in: {sql}");
}

// ===================================================================
// 1. End-to-end scenarios
// ===================================================================

#[test]
fn optional_variable_prunes_its_segment() {
    let bp = compile("SELECT * FROM Users WHERE IsActive = 1 AND Name = ?@Name");

    let builder = bp.builder();
    assert_eq!(
        render(&builder).sql,
        "SELECT * FROM Users WHERE IsActive = 1"
    );

    let mut builder = bp.builder();
    builder.bind("Name", "Alice").unwrap();
    let out = render(&builder);
    assert_eq!(
        out.sql,
        "SELECT * FROM Users WHERE IsActive = 1 AND Name = @Name"
    );
    assert_eq!(out.bindings.len(), 1);
    assert_eq!(out.bindings[0].name, "Name");
    assert_eq!(out.bindings[0].value, Value::Text(String::from("Alice")));
}

#[test]
fn update_set_list_drops_optional_assignment() {
    let bp = compile("UPDATE Users SET Email = @Email, Phone = ?@Phone WHERE ID = @ID");

    let builder = bp.builder();
    let out = render(&builder);
    assert_eq!(out.sql, "UPDATE Users SET Email = @Email WHERE ID = @ID");
    // Unbound ordinary variables pass through with their names recorded.
    let names: Vec<_> = out.bindings.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["Email", "ID"]);
    assert!(out.bindings.iter().all(|b| b.value == Value::Null));

    let mut builder = bp.builder();
    builder.bind("Phone", "555-1234").unwrap();
    assert_eq!(
        render(&builder).sql,
        "UPDATE Users SET Email = @Email, Phone = @Phone WHERE ID = @ID"
    );
}

#[test]
fn spread_handler_expands_collection() {
    let bp = compile("SELECT * FROM Tasks WHERE CategoryID IN (?@Cats_X)");

    let mut builder = bp.builder();
    builder.bind("Cats", vec![10_i64, 20, 30]).unwrap();
    let out = render(&builder);
    assert_eq!(
        out.sql,
        "SELECT * FROM Tasks WHERE CategoryID IN (@Cats_1, @Cats_2, @Cats_3)"
    );
    let plan: Vec<_> = out
        .bindings
        .iter()
        .map(|b| (b.name.as_str(), b.value.clone()))
        .collect();
    assert_eq!(
        plan,
        vec![
            ("Cats_1", Value::Int(10)),
            ("Cats_2", Value::Int(20)),
            ("Cats_3", Value::Int(30)),
        ]
    );
    assert!(out
        .bindings
        .iter()
        .all(|b| b.role == BindingRole::Expanded('X')));
}

#[test]
fn spread_handler_absence_drops_the_predicate() {
    let bp = compile("SELECT * FROM Tasks WHERE CategoryID IN (?@Cats_X)");
    let builder = bp.builder();
    assert_eq!(render(&builder).sql, "SELECT * FROM Tasks");
}

#[test]
fn offset_fetch_shares_one_segment() {
    let bp = compile(
        "SELECT Name FROM Products ORDER BY ID OFFSET ?@Skip_N ROWS FETCH NEXT @Take_N ROWS ONLY",
    );

    let mut builder = bp.builder();
    builder.bind("Skip", 10_i64).unwrap();
    builder.bind("Take", 20_i64).unwrap();
    assert_eq!(
        render(&builder).sql,
        "SELECT Name FROM Products ORDER BY ID OFFSET 10 ROWS FETCH NEXT 20 ROWS ONLY"
    );

    let builder = bp.builder();
    assert_eq!(render(&builder).sql, "SELECT Name FROM Products ORDER BY ID");
}

#[test]
fn context_join_merges_range_conditions() {
    let bp = compile("SELECT * FROM Events WHERE Date > ?@MinDate &AND Date < ?@MaxDate");

    let mut builder = bp.builder();
    builder.bind("MinDate", "2024-01-01").unwrap();
    assert_eq!(render(&builder).sql, "SELECT * FROM Events");

    builder.bind("MaxDate", "2024-12-31").unwrap();
    assert_eq!(
        render(&builder).sql,
        "SELECT * FROM Events WHERE Date > @MinDate AND Date < @MaxDate"
    );
}

#[test]
fn dynamic_projection_shares_keys_across_union_all() {
    let bp = compile("?SELECT ID, Name FROM Users UNION ALL ?SELECT ID, Name FROM ArchivedUsers");

    let mut builder = bp.builder();
    builder.mark("Name").unwrap();
    assert_eq!(
        render(&builder).sql,
        "SELECT Name FROM Users UNION ALL SELECT Name FROM ArchivedUsers"
    );

    builder.mark("ID").unwrap();
    assert_eq!(
        render(&builder).sql,
        "SELECT ID, Name FROM Users UNION ALL SELECT ID, Name FROM ArchivedUsers"
    );
}

// ===================================================================
// 2. Inheritance and footprints
// ===================================================================

#[test]
fn pruned_parent_suppresses_descendant_bindings() {
    let bp = compile("SELECT * FROM T /*WithSub*/ WHERE b IN (SELECT x FROM U WHERE c = @C)");

    let builder = bp.builder();
    let out = render(&builder);
    assert_eq!(out.sql, "SELECT * FROM T");
    assert!(out.bindings.is_empty());

    let mut builder = bp.builder();
    builder.mark("WithSub").unwrap();
    let out = render(&builder);
    assert_eq!(
        out.sql,
        "SELECT * FROM T WHERE b IN (SELECT x FROM U WHERE c = @C)"
    );
    assert_eq!(out.bindings.len(), 1);
    assert_eq!(out.bindings[0].name, "C");
}

#[test]
fn optional_inside_subquery_stays_inside() {
    let bp = compile("SELECT * FROM T WHERE a IN (SELECT id FROM U WHERE b = ?@B) AND c = 1");

    let builder = bp.builder();
    assert_eq!(
        render(&builder).sql,
        "SELECT * FROM T WHERE a IN (SELECT id FROM U) AND c = 1"
    );

    let mut builder = bp.builder();
    builder.bind("B", 9_i64).unwrap();
    assert_eq!(
        render(&builder).sql,
        "SELECT * FROM T WHERE a IN (SELECT id FROM U WHERE b = @B) AND c = 1"
    );
}

#[test]
fn optional_inside_functional_paren_grows_to_the_predicate() {
    let bp = compile("SELECT * FROM T WHERE LOWER(?@N) = 'x' AND y = 1");

    let builder = bp.builder();
    assert_eq!(render(&builder).sql, "SELECT * FROM T WHERE y = 1");

    let mut builder = bp.builder();
    builder.bind("N", "q").unwrap();
    let out = render(&builder);
    assert_eq!(out.sql, "SELECT * FROM T WHERE LOWER(@N) = 'x' AND y = 1");
    assert_eq!(out.bindings.len(), 1);
}

// ===================================================================
// 3. Validity under arbitrary state
// ===================================================================

#[test]
fn output_stays_well_formed_across_states() {
    let bp = compile(
        "SELECT * FROM T WHERE (a = 1 OR b = ?@B) AND c IN (?@C_X) \
         /*HasOrder*/ ORDER BY e OFFSET ?@Skip_N ROWS",
    );

    // Everything unset: every conditional clause collapses.
    let builder = bp.builder();
    let out = render(&builder);
    assert_eq!(out.sql, "SELECT * FROM T");
    assert_balanced(&out.sql);

    // Only the grouped predicate: growth keeps the group atomic.
    let mut builder = bp.builder();
    builder.bind("B", 1_i64).unwrap();
    let out = render(&builder);
    assert_eq!(out.sql, "SELECT * FROM T WHERE (a = 1 OR b = @B)");
    assert_balanced(&out.sql);

    // Spread, ordering and paging active.
    let mut builder = bp.builder();
    builder.bind("C", vec![1_i64, 2]).unwrap();
    builder.mark("HasOrder").unwrap();
    builder.bind("Skip", 5_i64).unwrap();
    let out = render(&builder);
    assert_eq!(
        out.sql,
        "SELECT * FROM T WHERE c IN (@C_1, @C_2) ORDER BY e OFFSET 5 ROWS"
    );
    assert_balanced(&out.sql);
}

#[test]
fn render_is_deterministic_and_order_insensitive() {
    let bp = compile("SELECT * FROM T WHERE a = ?@A AND b = ?@B AND c = ?@C");

    let mut first = bp.builder();
    first.bind("A", 1_i64).unwrap();
    first.bind("C", 3_i64).unwrap();

    let mut second = bp.builder();
    second.bind("C", 3_i64).unwrap();
    second.bind("A", 1_i64).unwrap();

    let a = render(&first);
    let b = render(&second);
    assert_eq!(a, b);
    // And the same builder renders identically twice.
    assert_eq!(render(&first), a);
}

#[test]
fn blueprints_render_concurrently() {
    let bp = compile("SELECT * FROM T WHERE a = ?@A AND b = 1");
    std::thread::scope(|scope| {
        for i in 0..4 {
            let bp = &bp;
            scope.spawn(move || {
                let mut builder = bp.builder();
                builder.bind("A", i as i64).unwrap();
                assert_eq!(
                    builder.render().unwrap().sql,
                    "SELECT * FROM T WHERE a = @A AND b = 1"
                );
            });
        }
    });
}

// ===================================================================
// 4. Handler failure modes
// ===================================================================

#[test]
fn handler_rejects_wrong_type() {
    let bp = compile("SELECT * FROM T WHERE a IN (?@Cats_X)");
    let mut builder = bp.builder();
    builder.bind("Cats", 5_i64).unwrap();
    assert!(matches!(
        builder.render(),
        Err(RenderError::HandlerType { letter: 'X', .. })
    ));
}

#[test]
fn required_spread_rejects_empty_collection() {
    let bp = compile("SELECT * FROM T WHERE a IN (@Cats_X)");
    let mut builder = bp.builder();
    builder.bind("Cats", Vec::<i64>::new()).unwrap();
    assert!(matches!(
        builder.render(),
        Err(RenderError::EmptyExpansion { .. })
    ));
}

#[test]
fn optional_spread_with_empty_collection_is_absent() {
    let bp = compile("SELECT * FROM T WHERE a IN (?@Cats_X)");
    let mut builder = bp.builder();
    builder.bind("Cats", Vec::<i64>::new()).unwrap();
    assert_eq!(render(&builder).sql, "SELECT * FROM T");
}

#[test]
fn missing_required_handler_value_fails_the_render() {
    let bp = compile("SELECT * FROM T ORDER BY a OFFSET @Skip_N ROWS");
    let err = bp.builder().render().unwrap_err();
    assert!(matches!(
        err,
        RenderError::MissingHandlerValue { name } if name == "Skip"
    ));
    // The builder stays usable after a failed render.
    let mut builder = bp.builder();
    builder.bind("Skip", 4_i64).unwrap();
    assert_eq!(
        render(&builder).sql,
        "SELECT * FROM T ORDER BY a OFFSET 4 ROWS"
    );
}

// ===================================================================
// 5. Binding plans and the mapper contract
// ===================================================================

#[test]
fn binding_order_follows_the_output() {
    let bp = compile("SELECT * FROM T WHERE a IN (?@L_X) AND b = @B");
    let mut builder = bp.builder();
    builder.bind("L", vec![7_i64, 8]).unwrap();
    builder.bind("B", 9_i64).unwrap();
    let out = render(&builder);
    let names: Vec<_> = out.bindings.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["L_1", "L_2", "B"]);
    assert_eq!(out.bindings[2].role, BindingRole::Parameter);
}

#[test]
fn schema_signature_tracks_rendered_shape() {
    let bp = compile("SELECT * FROM T WHERE a = ?@A AND b = 1");

    let mut with_a = bp.builder();
    with_a.bind("A", 1_i64).unwrap();
    let one = render(&with_a);
    let two = render(&with_a);
    assert_eq!(
        SchemaSignature::compute(&one.sql, &one.bindings),
        SchemaSignature::compute(&two.sql, &two.bindings)
    );

    let without = render(&bp.builder());
    assert_ne!(
        SchemaSignature::compute(&one.sql, &one.bindings),
        SchemaSignature::compute(&without.sql, &without.bindings)
    );
}
