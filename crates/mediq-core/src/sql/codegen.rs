//! Plan-to-SQL lowering.
//!
//! Each step renders as one CTE producing `(T{n}, Sid{n})` key pairs, each
//! restricted to the key set of the step before it. Chain groups open a
//! fresh key space for the traversal target; the group-closing step at
//! level 0 re-intersects whatever key set was live before the group.
//!
//! The final statement fetches one row more than the page size; the extra
//! row is the more-results signal and never leaves the server.

use crate::{
    compile::{
        CompileError,
        context::CompileContext,
        plan::{QueryPlan, SortPhase, SortState, StepKind, TableStep},
        table::SearchTable,
    },
    error::InternalError,
    expr::{Expression, Field, MultiaryOp, SortOrder, StringMatch, Value},
};
use std::fmt::Write as _;

use super::params::{ParameterSet, SqlParameter};

///
/// SqlOutput
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SqlOutput {
    pub sql: String,
    pub parameters: Vec<SqlParameter>,
}

const RESULT_COLUMNS: &str = "r.ResourceTypeId, r.ResourceSurrogateId, r.Id, r.IsDeleted, r.RawResource";

pub(crate) fn emit(plan: &QueryPlan, ctx: &CompileContext<'_>) -> Result<SqlOutput, CompileError> {
    let mut params = ParameterSet::new();
    // One extra row signals that more results exist.
    let page = params.add(Value::Int(i64::from(ctx.options.page_size) + 1));

    if plan.yields_no_rows {
        let sql = format!(
            "SELECT {RESULT_COLUMNS}\nFROM dbo.Resource r\nWHERE 0 = 1"
        );
        return Ok(SqlOutput {
            sql,
            parameters: params.into_vec(),
        });
    }

    let mut ctes: Vec<String> = Vec::with_capacity(plan.steps.len());
    let mut prev_level = 0u8;
    let mut carry: Option<usize> = None;
    let mut match_cte: Option<usize> = None;
    let mut include_ctes: Vec<usize> = Vec::new();

    for (idx, step) in plan.steps.iter().enumerate() {
        let n = idx + 1;
        let fresh = step.chain_level > prev_level;
        let prev = if idx == 0 || fresh { None } else { Some(idx) };
        if fresh {
            carry = (idx > 0).then_some(idx);
        }
        let closing = step.kind == StepKind::Chain && step.chain_level == 0;
        let rejoin = if closing { carry.take() } else { None };

        if step.is_include_kind() && match_cte.is_none() {
            match_cte = Some(idx);
        }

        let body = match step.kind {
            StepKind::Normal | StepKind::All | StepKind::HoistedDenormalized => {
                render_filter(step, n, prev, &mut params)?
            }
            StepKind::Concatenation => render_concatenation(step, n, prev, &mut params)?,
            StepKind::Chain => render_chain(step, n, prev, rejoin, &mut params)?,
            StepKind::NotExists => render_not_exists(step, n, prev, &mut params)?,
            StepKind::Include => {
                let src = source_for_include(step, idx, match_cte)?;
                include_ctes.push(n);
                render_include(step, n, src, &mut params)?
            }
            StepKind::IncludeLimit => {
                let body = render_include_limit(n, &include_ctes, &mut params, ctx)?;
                include_ctes.clear();
                include_ctes.push(n);
                body
            }
            StepKind::IncludeUnionAll => {
                render_include_union(n, match_cte, &include_ctes)?
            }
            StepKind::Sort | StepKind::SortWithFilter => {
                let sort = plan.sort.as_ref().ok_or_else(|| {
                    InternalError::codegen_invariant("sort step without sort state")
                })?;
                render_sort(step, sort, n, prev, &mut params)?
            }
            StepKind::Top => {
                let sort = plan.sort.as_ref().ok_or_else(|| {
                    InternalError::codegen_invariant("top step without sort state")
                })?;
                render_top(sort, n, prev, &page)?
            }
        };

        ctes.push(format!("cte{n} AS (\n{body}\n)"));
        prev_level = step.chain_level;
    }

    let mut sql = String::new();
    if !ctes.is_empty() {
        let _ = write!(sql, ";WITH {}\n", ctes.join(",\n"));
    }

    let last = ctes.len();
    let sorted_by_value = last > 0
        && plan
            .steps
            .last()
            .is_some_and(|s| s.kind == StepKind::Top)
        && plan
            .sort
            .as_ref()
            .is_some_and(|s| s.phase != Some(SortPhase::MissingValues));

    if sorted_by_value {
        let _ = write!(sql, "SELECT DISTINCT TOP ({page}) {RESULT_COLUMNS}, c.SortValue\n");
    } else {
        let _ = write!(sql, "SELECT DISTINCT TOP ({page}) {RESULT_COLUMNS}\n");
    }
    sql.push_str("FROM dbo.Resource r\n");
    if last > 0 {
        let _ = write!(sql, "JOIN cte{last} c ON c.Sid{last} = r.ResourceSurrogateId\n");
    }
    sql.push_str("WHERE r.IsHistory = 0");
    for predicate in &plan.resource_predicates {
        let rendered = render_expr(predicate, "r.", &mut params)?;
        let _ = write!(sql, "\n  AND {rendered}");
    }

    let direction = final_direction(plan);
    if sorted_by_value {
        let _ = write!(
            sql,
            "\nORDER BY c.SortValue {direction}, r.ResourceSurrogateId {direction}"
        );
    } else {
        let _ = write!(sql, "\nORDER BY r.ResourceSurrogateId {direction}");
    }

    Ok(SqlOutput {
        sql,
        parameters: params.into_vec(),
    })
}

/// Direction of the final surrogate ordering. Only a `_lastUpdated` sort
/// reverses it; value sorts carry their direction on the sort columns.
fn final_direction(plan: &QueryPlan) -> &'static str {
    match &plan.sort {
        Some(sort) if sort.order == SortOrder::Descending => "DESC",
        _ => "ASC",
    }
}

fn restrict_line(out: &mut String, column: &str, cte: usize) {
    let _ = write!(out, "\n    AND {column} IN (SELECT Sid{cte} FROM cte{cte})");
}

fn render_filter(
    step: &TableStep,
    n: usize,
    prev: Option<usize>,
    params: &mut ParameterSet,
) -> Result<String, CompileError> {
    let mut out = String::new();
    let _ = write!(
        out,
        "  SELECT ResourceTypeId AS T{n}, ResourceSurrogateId AS Sid{n}\n  FROM {}",
        step.table.name()
    );

    let mut first = true;
    let mut and = |out: &mut String, clause: String| {
        if first {
            let _ = write!(out, "\n  WHERE {clause}");
            first = false;
        } else {
            let _ = write!(out, "\n    AND {clause}");
        }
    };

    if step.table == SearchTable::Resource {
        and(&mut out, "IsHistory = 0".to_string());
    }
    if let Some(param) = &step.param {
        let p = params.add(Value::Int(i64::from(param.id.0)));
        and(&mut out, format!("SearchParamId = {p}"));
    }
    if let Some(predicate) = &step.predicate {
        and(&mut out, render_expr(predicate, "", params)?);
    }
    if let Some(pushed) = &step.pushed_down {
        and(&mut out, render_expr(pushed, "", params)?);
    }
    if let Some(prev) = prev {
        if first {
            out.push_str("\n  WHERE 1 = 1");
        }
        restrict_line(&mut out, "ResourceSurrogateId", prev);
    }

    Ok(out)
}

/// A union-of-branches step: one SELECT per branch over the same table.
fn render_concatenation(
    step: &TableStep,
    n: usize,
    prev: Option<usize>,
    params: &mut ParameterSet,
) -> Result<String, CompileError> {
    let Some(Expression::UnionAll { children }) = &step.predicate else {
        return Err(InternalError::codegen_invariant(
            "concatenation step without a union predicate",
        )
        .into());
    };

    let param_clause = match &step.param {
        Some(param) => {
            let p = params.add(Value::Int(i64::from(param.id.0)));
            Some(format!("SearchParamId = {p}"))
        }
        None => None,
    };

    let mut branches = Vec::with_capacity(children.len());
    for branch in children {
        let mut out = String::new();
        let _ = write!(
            out,
            "  SELECT ResourceTypeId AS T{n}, ResourceSurrogateId AS Sid{n}\n  FROM {}",
            step.table.name()
        );
        match &param_clause {
            Some(clause) => {
                let _ = write!(out, "\n  WHERE {clause}");
            }
            None => out.push_str("\n  WHERE 1 = 1"),
        }
        let rendered = render_expr(branch, "", params)?;
        let _ = write!(out, "\n    AND {rendered}");
        if let Some(pushed) = &step.pushed_down {
            let rendered = render_expr(pushed, "", params)?;
            let _ = write!(out, "\n    AND {rendered}");
        }
        if let Some(prev) = prev {
            restrict_line(&mut out, "ResourceSurrogateId", prev);
        }
        branches.push(out);
    }

    Ok(branches.join("\n  UNION ALL\n"))
}

fn render_chain(
    step: &TableStep,
    n: usize,
    prev: Option<usize>,
    rejoin: Option<usize>,
    params: &mut ParameterSet,
) -> Result<String, CompileError> {
    let spec = step
        .chain
        .as_ref()
        .ok_or_else(|| InternalError::codegen_invariant("chain step without a chain spec"))?;

    // Forward chains filter the referenced rows and return the referrers;
    // reverse chains filter the referrers and return the referenced rows.
    let (out_alias, restricted_alias) = if spec.reversed {
        ("r", "ref")
    } else {
        ("ref", "r")
    };

    let mut out = String::new();
    let _ = write!(
        out,
        "  SELECT {out_alias}.ResourceTypeId AS T{n}, {out_alias}.ResourceSurrogateId AS Sid{n}\n"
    );
    out.push_str("  FROM dbo.ReferenceSearchParam ref\n");
    out.push_str(
        "  JOIN dbo.Resource r ON r.ResourceTypeId = ref.ReferenceResourceTypeId AND r.Id = ref.ReferenceResourceId",
    );

    let p = params.add(Value::Int(i64::from(spec.param.id.0)));
    let _ = write!(out, "\n  WHERE ref.SearchParamId = {p}");
    out.push_str("\n    AND r.IsHistory = 0");

    if let Some(restriction) = type_restriction("ref.ReferenceResourceTypeId", &spec.target_types, params) {
        let _ = write!(out, "\n    AND {restriction}");
    }
    if let Some(restriction) = type_restriction("ref.ResourceTypeId", &spec.source_types, params) {
        let _ = write!(out, "\n    AND {restriction}");
    }
    if let Some(pushed) = &step.pushed_down {
        let rendered = render_expr(pushed, &format!("{out_alias}."), params)?;
        let _ = write!(out, "\n    AND {rendered}");
    }
    if let Some(prev) = prev {
        restrict_line(&mut out, &format!("{restricted_alias}.ResourceSurrogateId"), prev);
    }
    if let Some(rejoin) = rejoin {
        restrict_line(&mut out, &format!("{out_alias}.ResourceSurrogateId"), rejoin);
    }

    Ok(out)
}

fn type_restriction(
    column: &str,
    types: &[crate::schema::ResourceTypeId],
    params: &mut ParameterSet,
) -> Option<String> {
    match types {
        [] => None,
        [single] => {
            let p = params.add(Value::TypeId(*single));
            Some(format!("{column} = {p}"))
        }
        many => {
            let names: Vec<String> = many.iter().map(|t| params.add(Value::TypeId(*t))).collect();
            Some(format!("{column} IN ({})", names.join(", ")))
        }
    }
}

fn render_not_exists(
    step: &TableStep,
    n: usize,
    prev: Option<usize>,
    params: &mut ParameterSet,
) -> Result<String, CompileError> {
    let prev = prev.ok_or_else(|| {
        InternalError::codegen_invariant("subtraction step without a candidate set")
    })?;

    let mut out = String::new();
    let _ = write!(
        out,
        "  SELECT T{prev} AS T{n}, Sid{prev} AS Sid{n}\n  FROM cte{prev}\n  WHERE Sid{prev} NOT IN (\n    SELECT ResourceSurrogateId FROM {}",
        step.table.name()
    );

    let mut clauses = Vec::new();
    if let Some(param) = &step.param {
        let p = params.add(Value::Int(i64::from(param.id.0)));
        clauses.push(format!("SearchParamId = {p}"));
    }
    if let Some(predicate) = &step.predicate {
        clauses.push(render_expr(predicate, "", params)?);
    }
    if !clauses.is_empty() {
        let _ = write!(out, " WHERE {}", clauses.join(" AND "));
    }
    out.push_str("\n  )");

    Ok(out)
}

fn source_for_include(
    step: &TableStep,
    idx: usize,
    match_cte: Option<usize>,
) -> Result<usize, CompileError> {
    let iterate = step.include.as_ref().is_some_and(|spec| spec.iterate);
    let src = if iterate { Some(idx) } else { match_cte };
    src.filter(|s| *s > 0).ok_or_else(|| {
        InternalError::codegen_invariant("include step without a match set").into()
    })
}

fn render_include(
    step: &TableStep,
    n: usize,
    src: usize,
    params: &mut ParameterSet,
) -> Result<String, CompileError> {
    let spec = step
        .include
        .as_ref()
        .ok_or_else(|| InternalError::codegen_invariant("include step without a spec"))?;

    // `_include` returns referenced rows; `_revinclude` returns referrers.
    let (out_alias, restricted_alias) = if spec.reversed {
        ("ref", "r")
    } else {
        ("r", "ref")
    };

    let mut out = String::new();
    let _ = write!(
        out,
        "  SELECT {out_alias}.ResourceTypeId AS T{n}, {out_alias}.ResourceSurrogateId AS Sid{n}\n"
    );
    out.push_str("  FROM dbo.ReferenceSearchParam ref\n");
    out.push_str(
        "  JOIN dbo.Resource r ON r.ResourceTypeId = ref.ReferenceResourceTypeId AND r.Id = ref.ReferenceResourceId",
    );

    let p = params.add(Value::Int(i64::from(spec.param.id.0)));
    let _ = write!(out, "\n  WHERE ref.SearchParamId = {p}");
    out.push_str("\n    AND r.IsHistory = 0");
    if let Some(restriction) = type_restriction("ref.ReferenceResourceTypeId", &spec.target_types, params) {
        let _ = write!(out, "\n    AND {restriction}");
    }
    restrict_line(&mut out, &format!("{restricted_alias}.ResourceSurrogateId"), src);

    Ok(out)
}

fn render_include_limit(
    n: usize,
    include_ctes: &[usize],
    params: &mut ParameterSet,
    ctx: &CompileContext<'_>,
) -> Result<String, CompileError> {
    let limit = ctx.options.include_count_limit.ok_or_else(|| {
        InternalError::codegen_invariant("include limit step without a configured limit")
    })?;
    if include_ctes.is_empty() {
        return Err(InternalError::codegen_invariant("include limit with no include steps").into());
    }

    let p = params.add(Value::Int(i64::from(limit)));
    let branches: Vec<String> = include_ctes
        .iter()
        .map(|c| format!("    SELECT T{c} AS T{n}, Sid{c} AS Sid{n} FROM cte{c}"))
        .collect();

    Ok(format!(
        "  SELECT DISTINCT TOP ({p}) T{n}, Sid{n}\n  FROM (\n{}\n  ) AS included",
        branches.join("\n    UNION ALL\n")
    ))
}

fn render_include_union(
    n: usize,
    match_cte: Option<usize>,
    include_ctes: &[usize],
) -> Result<String, CompileError> {
    let m = match_cte.filter(|m| *m > 0).ok_or_else(|| {
        InternalError::codegen_invariant("include union without a match set")
    })?;

    let mut branches = vec![format!("  SELECT T{m} AS T{n}, Sid{m} AS Sid{n} FROM cte{m}")];
    for c in include_ctes {
        branches.push(format!("  SELECT T{c} AS T{n}, Sid{c} AS Sid{n} FROM cte{c}"));
    }

    Ok(branches.join("\n  UNION ALL\n"))
}

fn render_sort(
    step: &TableStep,
    sort: &SortState,
    n: usize,
    prev: Option<usize>,
    params: &mut ParameterSet,
) -> Result<String, CompileError> {
    let column = sort_column(step.table)?;

    if sort.phase == Some(SortPhase::MissingValues) {
        let prev = prev.ok_or_else(|| {
            InternalError::codegen_invariant("missing-value sort without a candidate set")
        })?;
        let param = step.param.as_ref().ok_or_else(|| {
            InternalError::codegen_invariant("sort step without a parameter")
        })?;
        let p = params.add(Value::Int(i64::from(param.id.0)));

        let mut out = format!(
            "  SELECT T{prev} AS T{n}, Sid{prev} AS Sid{n}\n  FROM cte{prev}\n  WHERE Sid{prev} NOT IN (\n    SELECT ResourceSurrogateId FROM {} WHERE SearchParamId = {p}\n  )",
            step.table.name()
        );
        if let Some(resume) = sort.resume_surrogate {
            let r = params.add(resume);
            let _ = write!(out, "\n    AND Sid{prev} > {r}");
        }
        return Ok(out);
    }

    let param = step
        .param
        .as_ref()
        .ok_or_else(|| InternalError::codegen_invariant("sort step without a parameter"))?;
    let p = params.add(Value::Int(i64::from(param.id.0)));

    let mut out = format!(
        "  SELECT ResourceTypeId AS T{n}, ResourceSurrogateId AS Sid{n}, {column} AS SortValue\n  FROM {}\n  WHERE SearchParamId = {p}",
        step.table.name()
    );
    if let Some(pushed) = &step.pushed_down {
        let rendered = render_expr(pushed, "", params)?;
        let _ = write!(out, "\n    AND {rendered}");
    }
    if let Some(prev) = prev {
        restrict_line(&mut out, "ResourceSurrogateId", prev);
    }
    if let Some(value) = &sort.resume_value {
        let v = params.add(value.clone());
        let cmp = if sort.order.is_descending() { "<" } else { ">" };
        let keyset = match sort.resume_surrogate {
            Some(resume) => {
                let s = params.add(resume);
                format!(
                    "({column} {cmp} {v} OR ({column} = {v} AND ResourceSurrogateId {cmp} {s}))"
                )
            }
            None => format!("{column} {cmp} {v}"),
        };
        let _ = write!(out, "\n    AND {keyset}");
    }

    Ok(out)
}

fn render_top(
    sort: &SortState,
    n: usize,
    prev: Option<usize>,
    page: &str,
) -> Result<String, CompileError> {
    let prev = prev
        .ok_or_else(|| InternalError::codegen_invariant("top step without a sorted input"))?;
    let direction = if sort.order.is_descending() { "DESC" } else { "ASC" };

    if sort.phase == Some(SortPhase::MissingValues) {
        return Ok(format!(
            "  SELECT TOP ({page}) T{prev} AS T{n}, Sid{prev} AS Sid{n}\n  FROM cte{prev}\n  ORDER BY Sid{prev} {direction}"
        ));
    }

    Ok(format!(
        "  SELECT TOP ({page}) T{prev} AS T{n}, Sid{prev} AS Sid{n}, SortValue\n  FROM cte{prev}\n  ORDER BY SortValue {direction}, Sid{prev} {direction}"
    ))
}

/// Physical column a table sorts on.
fn sort_column(table: SearchTable) -> Result<&'static str, CompileError> {
    match table {
        SearchTable::Date => Ok("StartDateTime"),
        SearchTable::String => Ok("Text"),
        SearchTable::Number | SearchTable::Quantity => Ok("LowValue"),
        SearchTable::Token => Ok("Code"),
        SearchTable::Uri => Ok("Uri"),
        other => Err(InternalError::codegen_invariant(format!(
            "table {} does not support sorting",
            other.name()
        ))
        .into()),
    }
}

pub(crate) fn render_expr(
    expr: &Expression,
    prefix: &str,
    params: &mut ParameterSet,
) -> Result<String, CompileError> {
    match expr {
        Expression::Binary {
            field,
            op,
            value,
            component,
        } => {
            let col = column(*field, *component)?;
            let p = params.add(value.clone());
            Ok(format!("{prefix}{col} {} {p}", op.sql()))
        }

        Expression::In { field, values } => {
            let col = column(*field, None)?;
            let names: Vec<String> = values.iter().map(|v| params.add(v.clone())).collect();
            Ok(format!("{prefix}{col} IN ({})", names.join(", ")))
        }

        Expression::StringOp {
            op,
            field,
            value,
            ignore_case,
            component,
        } => {
            let col = column(*field, *component)?;
            // Case folding happens on both sides: the column is wrapped and
            // the literal is lowered before parameterization.
            let (col, value) = if *ignore_case {
                (format!("LOWER({prefix}{col})"), value.to_lowercase())
            } else {
                (format!("{prefix}{col}"), value.clone())
            };
            match op {
                StringMatch::Equals => {
                    let p = params.add(Value::Text(value));
                    Ok(format!("{col} = {p}"))
                }
                StringMatch::StartsWith => {
                    let p = params.add(Value::Text(format!("{}%", escape_like(&value))));
                    Ok(format!("{col} LIKE {p}"))
                }
                StringMatch::EndsWith => {
                    let p = params.add(Value::Text(format!("%{}", escape_like(&value))));
                    Ok(format!("{col} LIKE {p}"))
                }
                StringMatch::Contains => {
                    let p = params.add(Value::Text(format!("%{}%", escape_like(&value))));
                    Ok(format!("{col} LIKE {p}"))
                }
            }
        }

        Expression::MissingField { field } => {
            let col = column(*field, None)?;
            Ok(format!("{prefix}{col} IS NULL"))
        }

        Expression::Multiary { op, children } => {
            let joiner = match op {
                MultiaryOp::And => " AND ",
                MultiaryOp::Or => " OR ",
            };
            let parts: Result<Vec<String>, CompileError> = children
                .iter()
                .map(|c| render_expr(c, prefix, params))
                .collect();
            Ok(format!("({})", parts?.join(joiner)))
        }

        // A union surviving inside a nested predicate degrades to a
        // disjunction; only a concatenation step renders true branches.
        Expression::UnionAll { children } => {
            let parts: Result<Vec<String>, CompileError> = children
                .iter()
                .map(|c| render_expr(c, prefix, params))
                .collect();
            Ok(format!("({})", parts?.join(" OR ")))
        }

        Expression::Not(inner) => {
            let rendered = render_expr(inner, prefix, params)?;
            Ok(format!("NOT ({rendered})"))
        }

        Expression::TrustedIdList { ids } => {
            // Pre-resolved server-side ids; rendered as literals.
            let list: Vec<String> = ids.iter().map(|id| id.get().to_string()).collect();
            Ok(format!("{prefix}ResourceSurrogateId IN ({})", list.join(", ")))
        }

        Expression::Compartment { kind, id } => {
            let k = params.add(kind.as_str());
            let i = params.add(id.as_str());
            Ok(format!(
                "({prefix}CompartmentTypeId = {k} AND {prefix}ReferenceResourceId = {i})"
            ))
        }

        other => Err(InternalError::codegen_invariant(format!(
            "{} node reached the code generator",
            other.kind_name()
        ))
        .into()),
    }
}

/// Physical column name, with the 1-based composite component suffix.
fn column(field: Field, component: Option<usize>) -> Result<String, CompileError> {
    let base = match field {
        Field::ResourceTypeId => "ResourceTypeId",
        Field::ResourceSurrogateId => "ResourceSurrogateId",
        Field::ResourceId => "Id",
        Field::IsHistory => "IsHistory",
        Field::IsDeleted => "IsDeleted",
        Field::TokenSystem => "SystemId",
        Field::TokenCode => "Code",
        Field::Text => "Text",
        Field::TextOverflow => "TextOverflow",
        Field::DateStart => "StartDateTime",
        Field::DateEnd => "EndDateTime",
        Field::DateIsLongerThanADay => "IsLongerThanADay",
        Field::NumberLow | Field::QuantityLow => "LowValue",
        Field::NumberHigh | Field::QuantityHigh => "HighValue",
        Field::QuantitySystem => "SystemId",
        Field::QuantityCode => "QuantityCodeId",
        Field::ReferenceResourceTypeId => "ReferenceResourceTypeId",
        Field::ReferenceResourceId => "ReferenceResourceId",
        Field::Uri => "Uri",
        Field::LastUpdated | Field::Number | Field::QuantityValue => {
            return Err(InternalError::codegen_invariant(format!(
                "logical field {field:?} reached the code generator"
            ))
            .into());
        }
    };

    Ok(match component {
        Some(i) => format!("{base}{}", i + 1),
        None => base.to_string(),
    })
}

/// Escape LIKE metacharacters; `[x]` neutralizes `%`, `_` and `[`.
fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' | '_' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}
