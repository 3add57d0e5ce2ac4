//! Translation of a [`QuerySpec`] into Postgres clauses.
//!
//! Every field is compared through its JSON form so that stored documents and
//! typed user columns share one set of predicates, and behave like the
//! in-memory evaluation: equality against an array matches any element,
//! ordering comparisons only hold between numbers or between strings.

use sqlx::Postgres;
use sqlx::QueryBuilder;

use crate::domain::resource::query::Comparison;
use crate::domain::resource::query::Constraint;
use crate::domain::resource::query::Direction;
use crate::domain::resource::query::FieldPath;
use crate::domain::resource::query::FilterValue;
use crate::domain::resource::query::QuerySpec;

/// Shape of the table a spec is translated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Table {
    /// `users`: typed columns, no JSON body
    Users,
    /// Resource tables: typed envelope columns plus a JSONB `data` body
    Documents,
}

/// A JSON value a predicate is applied to.
#[derive(Clone, Copy)]
enum Operand<'a> {
    Field(Table, &'a FieldPath),
    /// Current row of a `jsonb_array_elements(...) AS element(value)` scan
    Element,
}

fn iso_timestamp(column: &str) -> String {
    format!(
        "to_char({} AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')",
        column
    )
}

/// Push the JSONB expression for a field.
fn push_field(builder: &mut QueryBuilder<'_, Postgres>, table: Table, field: &FieldPath) {
    let column = match (table, field.segments()) {
        (Table::Users, [name]) => match name.as_str() {
            "id" => Some("to_jsonb(id::text)".to_string()),
            "username" => Some("to_jsonb(username)".to_string()),
            "email" => Some("to_jsonb(email)".to_string()),
            "name" => Some("to_jsonb(name)".to_string()),
            "role" => Some("to_jsonb(role)".to_string()),
            "active" => Some("to_jsonb(active)".to_string()),
            "passwordChangedAt" => Some(format!(
                "to_jsonb({})",
                iso_timestamp("password_changed_at")
            )),
            "createdAt" => Some(format!("to_jsonb({})", iso_timestamp("created_at"))),
            _ => Some("NULL::jsonb".to_string()),
        },
        (Table::Users, _) => Some("NULL::jsonb".to_string()),
        (Table::Documents, [name]) => match name.as_str() {
            "id" => Some("to_jsonb(id::text)".to_string()),
            "user" => Some("to_jsonb(owner_id::text)".to_string()),
            "slug" => Some("to_jsonb(slug)".to_string()),
            "createdAt" => Some(format!("to_jsonb({})", iso_timestamp("created_at"))),
            "updatedAt" => Some(format!("to_jsonb({})", iso_timestamp("updated_at"))),
            "__v" => Some("to_jsonb(version)".to_string()),
            _ => None,
        },
        (Table::Documents, _) => None,
    };

    match column {
        Some(column) => {
            builder.push("(");
            builder.push(column);
            builder.push(")");
        }
        None => {
            builder.push("(data #> ");
            builder.push_bind(field.segments().to_vec());
            builder.push("::text[])");
        }
    }
}

fn push_operand(builder: &mut QueryBuilder<'_, Postgres>, operand: Operand<'_>) {
    match operand {
        Operand::Field(table, field) => push_field(builder, table, field),
        Operand::Element => {
            builder.push("element.value");
        }
    }
}

fn push_type_is(builder: &mut QueryBuilder<'_, Postgres>, operand: Operand<'_>, json_type: &str) {
    builder.push("jsonb_typeof(");
    push_operand(builder, operand);
    builder.push(format!(") = '{}'", json_type));
}

fn push_text_of(builder: &mut QueryBuilder<'_, Postgres>, operand: Operand<'_>) {
    builder.push("(");
    push_operand(builder, operand);
    builder.push(" #>> '{}')");
}

/// Equality of one scalar JSON value against the constraint value.
fn push_scalar_equals(
    builder: &mut QueryBuilder<'_, Postgres>,
    operand: Operand<'_>,
    constraint: &Constraint,
) {
    builder.push("CASE WHEN ");
    match constraint.value {
        FilterValue::Number(expected) => {
            push_type_is(builder, operand, "number");
            builder.push(" THEN ");
            push_text_of(builder, operand);
            builder.push("::float8 = ");
            builder.push_bind(expected);
            builder.push(" WHEN ");
        }
        FilterValue::Bool(expected) => {
            push_type_is(builder, operand, "boolean");
            builder.push(" THEN ");
            push_text_of(builder, operand);
            builder.push("::boolean = ");
            builder.push_bind(expected);
            builder.push(" WHEN ");
        }
        FilterValue::Text(_) => {}
    }
    push_type_is(builder, operand, "string");
    builder.push(" THEN ");
    push_text_of(builder, operand);
    builder.push(" = ");
    builder.push_bind(constraint.raw.clone());
    builder.push(" ELSE FALSE END");
}

fn push_constraint(builder: &mut QueryBuilder<'_, Postgres>, table: Table, constraint: &Constraint) {
    let field = Operand::Field(table, &constraint.field);

    match (constraint.comparison, &constraint.value) {
        (Comparison::Eq, _) => {
            builder.push("((");
            push_scalar_equals(builder, field, constraint);
            builder.push(") OR EXISTS (SELECT 1 FROM jsonb_array_elements(CASE WHEN ");
            push_type_is(builder, field, "array");
            builder.push(" THEN ");
            push_operand(builder, field);
            builder.push(" ELSE '[]'::jsonb END) AS element(value) WHERE ");
            push_scalar_equals(builder, Operand::Element, constraint);
            builder.push("))");
        }
        (comparison, FilterValue::Number(expected)) => {
            builder.push("(CASE WHEN ");
            push_type_is(builder, field, "number");
            builder.push(" THEN ");
            push_text_of(builder, field);
            builder.push(format!("::float8 {} ", comparison.as_sql()));
            builder.push_bind(*expected);
            builder.push(" ELSE FALSE END)");
        }
        (comparison, FilterValue::Text(_)) => {
            builder.push("(CASE WHEN ");
            push_type_is(builder, field, "string");
            builder.push(" THEN ");
            push_text_of(builder, field);
            builder.push(format!(" COLLATE \"C\" {} ", comparison.as_sql()));
            builder.push_bind(constraint.raw.clone());
            builder.push(" ELSE FALSE END)");
        }
        (_, FilterValue::Bool(_)) => {
            builder.push("FALSE");
        }
    }
}

fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_search(builder: &mut QueryBuilder<'_, Postgres>, table: Table, term: &str) {
    let pattern = like_pattern(term);

    match table {
        Table::Users => {
            builder.push("(username ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR email ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR COALESCE(name, '') ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR role ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
        Table::Documents => {
            builder.push("(COALESCE(slug, '') ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(
                " OR EXISTS (SELECT 1 FROM jsonb_each(data) AS field(key, value) WHERE \
                 CASE jsonb_typeof(field.value) WHEN 'string' THEN (field.value #>> '{}') ILIKE ",
            );
            builder.push_bind(pattern.clone());
            builder.push(
                " WHEN 'array' THEN EXISTS (SELECT 1 FROM jsonb_array_elements(field.value) \
                 AS element(value) WHERE jsonb_typeof(element.value) = 'string' \
                 AND (element.value #>> '{}') ILIKE ",
            );
            builder.push_bind(pattern);
            builder.push(") ELSE FALSE END))");
        }
    }
}

/// Append `WHERE`, `ORDER BY`, `LIMIT` and `OFFSET` for a spec.
///
/// Projection is not translated; callers apply it to rendered rows.
pub(super) fn push_query_clauses(
    builder: &mut QueryBuilder<'_, Postgres>,
    table: Table,
    spec: &QuerySpec,
) {
    builder.push(" WHERE TRUE");
    for constraint in &spec.filter {
        builder.push(" AND ");
        push_constraint(builder, table, constraint);
    }
    if let Some(term) = &spec.search {
        builder.push(" AND ");
        push_search(builder, table, term);
    }

    builder.push(" ORDER BY ");
    for key in &spec.sort {
        push_field(builder, table, &key.field);
        match key.direction {
            Direction::Ascending => builder.push(" ASC NULLS FIRST, "),
            Direction::Descending => builder.push(" DESC NULLS LAST, "),
        };
    }
    builder.push("id ASC");

    let limit = i64::from(spec.pagination.limit);
    let offset = i64::try_from(spec.pagination.skip()).unwrap_or(i64::MAX);
    builder.push(" LIMIT ");
    builder.push_bind(limit);
    builder.push(" OFFSET ");
    builder.push_bind(offset);
}
