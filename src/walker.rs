//! Translation of [`Expr`] trees into [`SqlExpr`] trees.
//!
//! A [`Walker`] works on its own copy of the query's [`Scope`]. Member chains
//! that cross a relation add projections and join conditions to that copy;
//! the caller folds the resulting scope into a new query state.

use crate::error::{QueryError, Result};
use crate::expr::{Aggregate, BinaryOp, Expr, Method, TableRef, UnaryOp};
use crate::literal::{escape_like, format_list, format_literal, quote, Value};
use crate::schema::{CargoModel, FieldType, Relation, TableRegistry, TypeClass};
use crate::sql::{
    ColumnRef, Connective, SqlBinaryOp, SqlExpr, SqlRef, SqlUnaryOp, TableProjection,
};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Prefix of generated table aliases: `T1`, `T2`, ...
pub const ALIAS_PREFIX: &str = "T";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Eq,
    Holds,
}

/// A `join_on` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    pub left: ColumnRef,
    pub right: ColumnRef,
    pub kind: JoinKind,
    /// Relation that introduced this join implicitly
    pub via: Option<String>,
}

impl fmt::Display for JoinCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            JoinKind::Eq => write!(f, "{}={}", self.left, self.right),
            JoinKind::Holds => write!(f, "{} HOLDS {}", self.left, self.right),
        }
    }
}

/// Tables and joins visible to a query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub tables: Vec<TableProjection>,
    pub joins: Vec<JoinCondition>,
}

impl Scope {
    pub fn projection(&self, alias: &str) -> Option<&TableProjection> {
        self.tables.iter().find(|t| t.alias == alias)
    }

    /// First free generated alias
    pub fn next_alias(&self) -> String {
        let mut n = self.tables.len() + 1;
        loop {
            let alias = format!("{}{}", ALIAS_PREFIX, n);
            if self.projection(&alias).is_none() {
                return alias;
            }
            n += 1;
        }
    }

    /// Add a projection; the alias must be unused.
    pub fn add_table(&mut self, type_id: TypeId, table: &str, alias: String) -> Result<()> {
        if self.projection(&alias).is_some() {
            return Err(QueryError::InvalidQuery(format!(
                "alias {} is already used in this query",
                alias
            )));
        }
        self.tables.push(TableProjection {
            type_id,
            table: table.to_string(),
            alias,
        });
        Ok(())
    }
}

/// Clause being translated; decides whether aggregates are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Where,
    JoinOn,
    Select,
    GroupBy,
    Having,
    OrderBy,
}

impl Clause {
    fn allows_aggregates(&self) -> bool {
        matches!(self, Clause::Select | Clause::Having | Clause::OrderBy)
    }
}

/// A translated node and its declared type; `None` is the type of `NULL`.
pub type Typed = (SqlRef, Option<FieldType>);

fn node(expr: SqlExpr, ty: Option<FieldType>) -> Result<Typed> {
    Ok((Arc::new(expr), ty))
}

fn unsupported(expr: &Expr, reason: &str) -> QueryError {
    QueryError::UnsupportedExpression(format!("{} ({})", expr, reason))
}

fn mismatch(expr: &Expr, reason: String) -> QueryError {
    QueryError::TypeMismatch(format!("{}: {}", expr, reason))
}

fn type_name(ty: &Option<FieldType>) -> String {
    ty.as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "NULL".to_string())
}

pub struct Walker<'a> {
    registry: &'a TableRegistry,
    scope: Scope,
    clause: Clause,
}

impl<'a> Walker<'a> {
    pub fn new(registry: &'a TableRegistry, scope: Scope, clause: Clause) -> Self {
        Self {
            registry,
            scope,
            clause,
        }
    }

    /// The scope including any joins introduced while walking
    pub fn into_scope(self) -> Scope {
        self.scope
    }

    /// Translate a `where`/`having` predicate; it must be boolean.
    pub fn translate_predicate(&mut self, expr: &Expr) -> Result<SqlRef> {
        let (sql, ty) = self.translate(expr)?;
        match ty {
            Some(FieldType::Boolean) => Ok(sql),
            other => Err(mismatch(
                expr,
                format!("predicate must be Boolean, found {}", type_name(&other)),
            )),
        }
    }

    /// Translate an explicit join condition: one or more column equalities
    /// (or list memberships) joined with `&&`.
    pub fn translate_join(&mut self, expr: &Expr) -> Result<Vec<JoinCondition>> {
        match expr {
            Expr::Binary(l, BinaryOp::And, r) => {
                let mut conditions = self.translate_join(l)?;
                conditions.extend(self.translate_join(r)?);
                Ok(conditions)
            }
            Expr::Binary(l, BinaryOp::Eq, r) => {
                let left = self.join_column(l, expr)?;
                let right = self.join_column(r, expr)?;
                if !left.field_type.is_comparable_with(&right.field_type) {
                    return Err(mismatch(
                        expr,
                        format!("cannot join {} on {}", left.field_type, right.field_type),
                    ));
                }
                Ok(vec![JoinCondition {
                    left,
                    right,
                    kind: JoinKind::Eq,
                    via: None,
                }])
            }
            Expr::Call {
                method: Method::Contains,
                target: Some(target),
                args,
            } if args.len() == 1 => {
                let list = self.join_column(target, expr)?;
                let item = self.join_column(&args[0], expr)?;
                let holds = list
                    .field_type
                    .item_type()
                    .is_some_and(|t| t.is_comparable_with(&item.field_type));
                if !holds {
                    return Err(mismatch(
                        expr,
                        format!("{} does not hold {}", list.field_type, item.field_type),
                    ));
                }
                Ok(vec![JoinCondition {
                    left: list,
                    right: item,
                    kind: JoinKind::Holds,
                    via: None,
                }])
            }
            _ => Err(unsupported(
                expr,
                "join conditions must compare two columns",
            )),
        }
    }

    fn join_column(&mut self, side: &Expr, whole: &Expr) -> Result<ColumnRef> {
        match &*self.translate(side)?.0 {
            SqlExpr::Column(column) => Ok(column.clone()),
            _ => Err(unsupported(whole, "join conditions must compare two columns")),
        }
    }

    /// Translate any expression.
    pub fn translate(&mut self, expr: &Expr) -> Result<Typed> {
        match expr {
            Expr::Member { table, path } => {
                let column = self.resolve_member(table, path, expr)?;
                let ty = column.field_type.clone();
                node(SqlExpr::Column(column), Some(ty))
            }
            Expr::Field(name) => {
                let column = self.resolve_unqualified(name)?;
                let ty = column.field_type.clone();
                node(SqlExpr::Column(column), Some(ty))
            }
            Expr::Constant(value) => self.constant(value, None, expr),
            Expr::Binary(l, op, r) => self.translate_binary(l, *op, r, expr),
            Expr::Unary(op, operand) => self.translate_unary(*op, operand, expr),
            Expr::Call {
                method,
                target,
                args,
            } => self.translate_call(method, target.as_deref(), args, expr),
            Expr::Conditional { .. } => Err(unsupported(
                expr,
                "conditional expressions have no translation",
            )),
        }
    }

    /// Translate an operand, typing constants against `hint`.
    fn operand(&mut self, expr: &Expr, hint: Option<&FieldType>) -> Result<Typed> {
        match expr {
            Expr::Constant(value) => self.constant(value, hint, expr),
            _ => self.translate(expr),
        }
    }

    fn constant(&self, value: &Value, hint: Option<&FieldType>, expr: &Expr) -> Result<Typed> {
        if let Some(declared) = hint {
            if !value.fits(declared) {
                return Err(mismatch(
                    expr,
                    format!("{} cannot be compared with {}", value, declared),
                ));
            }
        }
        let text = format_literal(value, hint)?;
        let ty = match (value, hint) {
            (Value::Null, _) => None,
            (_, Some(declared)) => Some(declared.clone()),
            (value, None) => value.natural_type(),
        };
        node(SqlExpr::Literal(text), ty)
    }

    fn translate_binary(&mut self, l: &Expr, op: BinaryOp, r: &Expr, expr: &Expr) -> Result<Typed> {
        for side in [l, r] {
            if let Expr::Constant(value @ Value::List(_)) = side {
                return Err(mismatch(
                    expr,
                    format!("list {} used with {}; use is_in or not_in", value, op),
                ));
            }
        }
        if op.is_comparison() && !matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            if let Some(side) = [l, r]
                .into_iter()
                .find(|side| matches!(side, Expr::Constant(Value::Null)))
            {
                return Err(mismatch(
                    side,
                    format!("NULL has no order; {} is never true", expr),
                ));
            }
        }
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let null_side = match (l, r) {
                (Expr::Constant(Value::Null), Expr::Constant(Value::Null)) => {
                    return Err(unsupported(expr, "comparison of NULL with NULL"))
                }
                (other, Expr::Constant(Value::Null)) | (Expr::Constant(Value::Null), other) => {
                    Some(other)
                }
                _ => None,
            };
            if let Some(other) = null_side {
                let (operand, _) = self.translate(other)?;
                let test = if op == BinaryOp::Eq {
                    SqlUnaryOp::IsNull
                } else {
                    SqlUnaryOp::IsNotNull
                };
                return node(SqlExpr::Unary(test, operand), Some(FieldType::Boolean));
            }
        }

        // Constants take the declared type of the opposite side.
        let ((lhs, lty), (rhs, rty)) = if matches!(l, Expr::Constant(_)) {
            let right = self.translate(r)?;
            let left = self.operand(l, right.1.as_ref())?;
            (left, right)
        } else {
            let left = self.translate(l)?;
            let right = self.operand(r, left.1.as_ref())?;
            (left, right)
        };

        match op {
            BinaryOp::And | BinaryOp::Or => {
                for (side, ty) in [(l, &lty), (r, &rty)] {
                    if *ty != Some(FieldType::Boolean) {
                        return Err(mismatch(
                            side,
                            format!("operand of {} must be Boolean, found {}", op, type_name(ty)),
                        ));
                    }
                }
                let connective = if op == BinaryOp::And {
                    Connective::And
                } else {
                    Connective::Or
                };
                let mut terms = Vec::new();
                for side in [lhs, rhs] {
                    if let SqlExpr::Conjunction(c, inner) = &*side {
                        if *c == connective {
                            terms.extend(inner.iter().cloned());
                            continue;
                        }
                    }
                    terms.push(side);
                }
                node(SqlExpr::Conjunction(connective, terms), Some(FieldType::Boolean))
            }
            _ if op.is_arithmetic() => {
                let result = match (&lty, &rty) {
                    (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => {
                        if *a == FieldType::Float || *b == FieldType::Float || op == BinaryOp::Div
                        {
                            FieldType::Float
                        } else {
                            FieldType::Integer
                        }
                    }
                    _ => {
                        return Err(mismatch(
                            expr,
                            format!(
                                "arithmetic on {} and {}",
                                type_name(&lty),
                                type_name(&rty)
                            ),
                        ))
                    }
                };
                node(
                    SqlExpr::Binary(lhs, arithmetic_op(op), rhs),
                    Some(result),
                )
            }
            _ => {
                if let (Some(a), Some(b)) = (&lty, &rty) {
                    if !a.is_comparable_with(b) {
                        return Err(mismatch(expr, format!("cannot compare {} with {}", a, b)));
                    }
                    if a.class() == TypeClass::List && !matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                        return Err(mismatch(expr, "list fields cannot be ordered".to_string()));
                    }
                }
                node(
                    SqlExpr::Binary(lhs, comparison_op(op), rhs),
                    Some(FieldType::Boolean),
                )
            }
        }
    }

    fn translate_unary(&mut self, op: UnaryOp, operand: &Expr, expr: &Expr) -> Result<Typed> {
        let (inner, ty) = self.translate(operand)?;
        match op {
            UnaryOp::Not => {
                if ty != Some(FieldType::Boolean) {
                    return Err(mismatch(
                        expr,
                        format!("NOT applied to {}", type_name(&ty)),
                    ));
                }
                node(SqlExpr::Unary(SqlUnaryOp::Not, inner), ty)
            }
            UnaryOp::Neg => {
                if !ty.as_ref().is_some_and(FieldType::is_numeric) {
                    return Err(mismatch(
                        expr,
                        format!("negation of {}", type_name(&ty)),
                    ));
                }
                node(SqlExpr::Unary(SqlUnaryOp::Neg, inner), ty)
            }
        }
    }

    fn translate_call(
        &mut self,
        method: &Method,
        target: Option<&Expr>,
        args: &[Expr],
        expr: &Expr,
    ) -> Result<Typed> {
        if let Method::Aggregate(aggregate) = method {
            return self.translate_aggregate(*aggregate, target, args, expr);
        }
        if let Method::Other(_) = method {
            return Err(unsupported(expr, "no translation rule for this method"));
        }
        let Some(target) = target else {
            return Err(unsupported(expr, "method requires a receiver"));
        };

        match method {
            Method::StartsWith | Method::EndsWith | Method::Contains | Method::Like => {
                let [arg] = args else {
                    return Err(unsupported(expr, "expected exactly one argument"));
                };
                let (subject, ty) = self.translate(target)?;
                if let (Method::Contains, Some(FieldType::List(item))) = (method, &ty) {
                    let (needle, _) = self.operand(arg, Some(item.as_ref()))?;
                    return node(
                        SqlExpr::Binary(subject, SqlBinaryOp::Holds, needle),
                        Some(FieldType::Boolean),
                    );
                }
                if !ty.as_ref().is_some_and(FieldType::is_text) {
                    return Err(mismatch(
                        expr,
                        format!("pattern match on {}", type_name(&ty)),
                    ));
                }
                let text = match arg {
                    Expr::Constant(Value::Text(text)) => text,
                    _ => {
                        return Err(unsupported(
                            expr,
                            "pattern argument must be a text constant",
                        ))
                    }
                };
                let pattern = match method {
                    Method::StartsWith => format!("{}%", escape_like(text)),
                    Method::EndsWith => format!("%{}", escape_like(text)),
                    Method::Contains => format!("%{}%", escape_like(text)),
                    _ => text.clone(),
                };
                let pattern = Arc::new(SqlExpr::Literal(quote(&pattern)));
                node(
                    SqlExpr::Binary(subject, SqlBinaryOp::Like, pattern),
                    Some(FieldType::Boolean),
                )
            }
            Method::In | Method::NotIn => {
                let [arg] = args else {
                    return Err(unsupported(expr, "expected exactly one argument"));
                };
                let Expr::Constant(Value::List(items)) = arg else {
                    return Err(unsupported(expr, "set membership needs a constant collection"));
                };
                let (subject, ty) = self.translate(target)?;
                if let Some(declared) = &ty {
                    if declared.class() == TypeClass::List {
                        return Err(mismatch(expr, "IN on a list field".to_string()));
                    }
                    if let Some(bad) = items.iter().find(|item| !item.fits(declared)) {
                        return Err(mismatch(
                            expr,
                            format!("{} cannot be compared with {}", bad, declared),
                        ));
                    }
                }
                let list = format_list(items, ty.as_ref())
                    .map_err(|e| match e {
                        QueryError::EmptyInClause(_) => QueryError::EmptyInClause(expr.to_string()),
                        other => other,
                    })?;
                let op = if *method == Method::In {
                    SqlBinaryOp::In
                } else {
                    SqlBinaryOp::NotIn
                };
                node(
                    SqlExpr::Binary(subject, op, Arc::new(SqlExpr::Literal(list))),
                    Some(FieldType::Boolean),
                )
            }
            Method::Upper | Method::Lower | Method::Trim | Method::Length => {
                if !args.is_empty() {
                    return Err(unsupported(expr, "expected no arguments"));
                }
                let (subject, ty) = self.translate(target)?;
                if !ty.as_ref().is_some_and(FieldType::is_text) {
                    return Err(mismatch(
                        expr,
                        format!("{} of {}", method, type_name(&ty)),
                    ));
                }
                let (name, result) = match method {
                    Method::Upper => ("UPPER", FieldType::String),
                    Method::Lower => ("LOWER", FieldType::String),
                    Method::Trim => ("TRIM", FieldType::String),
                    _ => ("CHAR_LENGTH", FieldType::Integer),
                };
                node(
                    SqlExpr::Function {
                        name,
                        distinct: false,
                        args: vec![subject],
                    },
                    Some(result),
                )
            }
            Method::Year | Method::Month | Method::Day => {
                if !args.is_empty() {
                    return Err(unsupported(expr, "expected no arguments"));
                }
                let (subject, ty) = self.translate(target)?;
                if ty.as_ref().map(FieldType::class) != Some(TypeClass::Temporal) {
                    return Err(mismatch(
                        expr,
                        format!("{} of {}", method, type_name(&ty)),
                    ));
                }
                let name = match method {
                    Method::Year => "YEAR",
                    Method::Month => "MONTH",
                    _ => "DAY",
                };
                node(
                    SqlExpr::Function {
                        name,
                        distinct: false,
                        args: vec![subject],
                    },
                    Some(FieldType::Integer),
                )
            }
            Method::Aggregate(_) | Method::Other(_) => {
                Err(unsupported(expr, "no translation rule for this method"))
            }
        }
    }

    fn translate_aggregate(
        &mut self,
        aggregate: Aggregate,
        target: Option<&Expr>,
        args: &[Expr],
        expr: &Expr,
    ) -> Result<Typed> {
        if !self.clause.allows_aggregates() {
            return Err(unsupported(
                expr,
                "aggregates are only allowed in fields, having and order_by",
            ));
        }
        if !args.is_empty() {
            return Err(unsupported(expr, "aggregates take no arguments"));
        }
        let function = |args: Vec<SqlRef>| SqlExpr::Function {
            name: aggregate.sql_name(),
            distinct: aggregate == Aggregate::CountDistinct,
            args,
        };

        let Some(target) = target else {
            return match aggregate {
                Aggregate::Count => node(
                    function(vec![Arc::new(SqlExpr::Literal("*".to_string()))]),
                    Some(FieldType::Integer),
                ),
                _ => Err(unsupported(expr, "aggregate requires a column")),
            };
        };
        let (subject, ty) = self.translate(target)?;
        if subject.has_aggregate() {
            return Err(unsupported(expr, "nested aggregates"));
        }
        let result = match aggregate {
            Aggregate::Count | Aggregate::CountDistinct => FieldType::Integer,
            Aggregate::Sum | Aggregate::Avg => match &ty {
                Some(declared) if declared.is_numeric() => {
                    if aggregate == Aggregate::Avg {
                        FieldType::Float
                    } else {
                        declared.clone()
                    }
                }
                _ => {
                    return Err(mismatch(
                        expr,
                        format!("{} of {}", aggregate.sql_name(), type_name(&ty)),
                    ))
                }
            },
            Aggregate::Min | Aggregate::Max => match &ty {
                Some(declared) if declared.class() != TypeClass::List => declared.clone(),
                _ => {
                    return Err(mismatch(
                        expr,
                        format!("{} of {}", aggregate.sql_name(), type_name(&ty)),
                    ))
                }
            },
        };
        node(function(vec![subject]), Some(result))
    }

    fn resolve_member(&mut self, table: &TableRef, path: &[String], expr: &Expr) -> Result<ColumnRef> {
        let Some((last, relations)) = path.split_last() else {
            return Err(unsupported(expr, "empty member path"));
        };

        let mut alias = match table {
            TableRef::Type { type_id, .. } => {
                let matches: Vec<&TableProjection> = self
                    .scope
                    .tables
                    .iter()
                    .filter(|t| t.type_id == *type_id)
                    .collect();
                match matches.as_slice() {
                    [] => {
                        self.registry.model_by_id(type_id).map_err(|_| {
                            QueryError::UnknownTable(format!("{} in {}", table, expr))
                        })?;
                        return Err(QueryError::InvalidQuery(format!(
                            "{} is not part of this query: {}",
                            table, expr
                        )));
                    }
                    [only] => only.alias.clone(),
                    many => {
                        let aliases: Vec<&str> = many.iter().map(|t| t.alias.as_str()).collect();
                        return Err(QueryError::AmbiguousReference(format!(
                            "{} could refer to {}",
                            expr,
                            aliases.join(", ")
                        )));
                    }
                }
            }
            TableRef::Alias(alias) => {
                if self.scope.projection(alias).is_none() {
                    return Err(QueryError::InvalidQuery(format!(
                        "no table aliased {}: {}",
                        alias, expr
                    )));
                }
                alias.clone()
            }
        };

        for segment in relations {
            let relation = {
                let model = self.model_of(&alias)?;
                match model.relation(segment) {
                    Some(relation) => relation.clone(),
                    None if model.field(segment).is_some() => {
                        return Err(unsupported(
                            expr,
                            &format!("{}.{} is a field, not a relation", model.name, segment),
                        ))
                    }
                    None => {
                        return Err(QueryError::UnknownField(format!(
                            "{}.{} in {}",
                            model.name, segment, expr
                        )))
                    }
                }
            };
            alias = self.join_relation(&alias, &relation)?;
        }

        let model = self.model_of(&alias)?;
        match model.field(last) {
            Some(field) => Ok(ColumnRef {
                alias,
                field: field.name.clone(),
                field_type: field.field_type.clone(),
            }),
            None if model.relation(last).is_some() => Err(unsupported(
                expr,
                &format!("relation {}.{} used as a value", model.name, last),
            )),
            None => Err(QueryError::UnknownField(format!(
                "{}.{} in {}",
                model.name, last, expr
            ))),
        }
    }

    fn resolve_unqualified(&self, name: &str) -> Result<ColumnRef> {
        let mut found = Vec::new();
        for projection in &self.scope.tables {
            let model = self.registry.model_by_id(&projection.type_id)?;
            if let Some(field) = model.field(name) {
                found.push(ColumnRef {
                    alias: projection.alias.clone(),
                    field: field.name.clone(),
                    field_type: field.field_type.clone(),
                });
            }
        }
        match found.len() {
            0 => Err(QueryError::UnknownField(name.to_string())),
            1 => Ok(found.remove(0)),
            _ => {
                let candidates: Vec<String> = found.iter().map(ToString::to_string).collect();
                Err(QueryError::AmbiguousReference(format!(
                    "{} could be {}",
                    name,
                    candidates.join(" or ")
                )))
            }
        }
    }

    fn model_of(&self, alias: &str) -> Result<&'a CargoModel> {
        let registry: &'a TableRegistry = self.registry;
        let projection = self
            .scope
            .projection(alias)
            .ok_or_else(|| QueryError::InvalidQuery(format!("no table aliased {}", alias)))?;
        registry.model_by_id(&projection.type_id)
    }

    /// Alias of the projection reached from `source` through `relation`,
    /// joining it in on first use.
    fn join_relation(&mut self, source: &str, relation: &Relation) -> Result<String> {
        let existing = self.scope.joins.iter().find(|j| {
            j.via.as_deref() == Some(relation.name.as_str()) && j.left.alias == source
        });
        if let Some(join) = existing {
            return Ok(join.right.alias.clone());
        }

        let source_model = self.model_of(source)?;
        let target_model = self.registry.model_by_id(&relation.target)?;
        let local = source_model.field(&relation.local_field).ok_or_else(|| {
            QueryError::UnknownField(format!("{}.{}", source_model.name, relation.local_field))
        })?;
        let foreign = target_model.field(&relation.foreign_field).ok_or_else(|| {
            QueryError::UnknownField(format!("{}.{}", target_model.name, relation.foreign_field))
        })?;

        let alias = self.scope.next_alias();
        trace!(
            "joining {} as {} through {}.{}",
            target_model.name,
            alias,
            source,
            relation.name
        );
        let condition = JoinCondition {
            left: ColumnRef {
                alias: source.to_string(),
                field: local.name.clone(),
                field_type: local.field_type.clone(),
            },
            right: ColumnRef {
                alias: alias.clone(),
                field: foreign.name.clone(),
                field_type: foreign.field_type.clone(),
            },
            kind: JoinKind::Eq,
            via: Some(relation.name.clone()),
        };
        self.scope
            .add_table(relation.target, &target_model.name, alias.clone())?;
        self.scope.joins.push(condition);
        Ok(alias)
    }
}

fn arithmetic_op(op: BinaryOp) -> SqlBinaryOp {
    match op {
        BinaryOp::Add => SqlBinaryOp::Add,
        BinaryOp::Sub => SqlBinaryOp::Sub,
        BinaryOp::Mul => SqlBinaryOp::Mul,
        _ => SqlBinaryOp::Div,
    }
}

fn comparison_op(op: BinaryOp) -> SqlBinaryOp {
    match op {
        BinaryOp::Eq => SqlBinaryOp::Eq,
        BinaryOp::Ne => SqlBinaryOp::Ne,
        BinaryOp::Lt => SqlBinaryOp::Lt,
        BinaryOp::Le => SqlBinaryOp::Le,
        BinaryOp::Gt => SqlBinaryOp::Gt,
        _ => SqlBinaryOp::Ge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{column, cond, count_all, field, field_of, lit};

    struct Pages;
    struct Categories;
    struct Revisions;
    struct Unregistered;

    fn registry() -> TableRegistry {
        let mut builder = TableRegistry::builder();
        builder
            .register::<Pages>(
                "Pages",
                vec![
                    ("id", FieldType::Integer, false),
                    ("title", FieldType::String, false),
                    ("length", FieldType::Integer, false),
                    ("rating", FieldType::Float, true),
                    ("is_redirect", FieldType::Boolean, false),
                    ("touched", FieldType::Datetime, true),
                    ("tags", FieldType::List(Box::new(FieldType::String)), true),
                ],
            )
            .unwrap()
            .register::<Categories>(
                "Categories",
                vec![
                    ("page_id", FieldType::Integer, false),
                    ("name", FieldType::String, false),
                ],
            )
            .unwrap()
            .register::<Revisions>(
                "Revisions",
                vec![
                    ("page_id", FieldType::Integer, false),
                    ("title", FieldType::String, false),
                ],
            )
            .unwrap();
        builder.relation::<Pages, Categories>("categories", "id", "page_id");
        builder.build().unwrap()
    }

    fn scope_with(registry: &TableRegistry, tables: &[(TypeId, &str)]) -> Scope {
        let mut scope = Scope::default();
        for (type_id, alias) in tables {
            let model = registry.model_by_id(type_id).unwrap();
            scope
                .add_table(*type_id, &model.name, alias.to_string())
                .unwrap();
        }
        scope
    }

    fn pages_scope(registry: &TableRegistry) -> Scope {
        scope_with(registry, &[(TypeId::of::<Pages>(), "T1")])
    }

    fn render(expr: &Expr) -> Result<String> {
        let registry = registry();
        let mut walker = Walker::new(&registry, pages_scope(&registry), Clause::Where);
        walker.translate_predicate(expr).map(|sql| sql.to_string())
    }

    #[test]
    fn test_comparison_with_constant() {
        assert_eq!(
            render(&field::<Pages>("length").gt(100)).unwrap(),
            "T1.length > 100"
        );
        assert_eq!(
            render(&lit(100).lt(field::<Pages>("length"))).unwrap(),
            "100 < T1.length"
        );
    }

    #[test]
    fn test_null_comparisons_rewrite() {
        assert_eq!(
            render(&field::<Pages>("rating").eq(Value::Null)).unwrap(),
            "T1.rating IS NULL"
        );
        assert_eq!(
            render(&lit(Value::Null).ne(field::<Pages>("rating"))).unwrap(),
            "T1.rating IS NOT NULL"
        );
        assert_eq!(
            render(&field::<Pages>("touched").is_null()).unwrap(),
            "T1.touched IS NULL"
        );
        let none: Option<i64> = None;
        assert_eq!(
            render(&field::<Pages>("rating").eq(none)).unwrap(),
            "T1.rating IS NULL"
        );
    }

    #[test]
    fn test_ordering_against_null_is_rejected() {
        assert!(matches!(
            render(&field::<Pages>("rating").lt(Value::Null)),
            Err(QueryError::TypeMismatch(_))
        ));
        assert!(matches!(
            render(&lit(Value::Null).ge(field::<Pages>("length"))),
            Err(QueryError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_list_constant_outside_in() {
        assert!(matches!(
            render(&field::<Pages>("length").eq(vec![1, 2])),
            Err(QueryError::TypeMismatch(_))
        ));
        assert!(matches!(
            render(&lit(vec![1, 2]).ne(field::<Pages>("length"))),
            Err(QueryError::TypeMismatch(_))
        ));
        assert!(matches!(
            render(&(field::<Pages>("length") + vec![1]).gt(0)),
            Err(QueryError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_double_negation_stays_readable() {
        assert_eq!(
            render(&field::<Pages>("length").gt(-lit(-5))).unwrap(),
            "T1.length > -(-5)"
        );
        assert_eq!(
            render(&(-(-field::<Pages>("length"))).gt(0)).unwrap(),
            "-(-T1.length) > 0"
        );
    }

    #[test]
    fn test_boolean_composition_is_parenthesized() {
        let expr = field::<Pages>("length")
            .gt(10)
            .and(field::<Pages>("title").eq("A"))
            .or(!field::<Pages>("is_redirect"));
        assert_eq!(
            render(&expr).unwrap(),
            "((T1.length > 10) AND (T1.title = 'A')) OR (NOT T1.is_redirect)"
        );
    }

    #[test]
    fn test_conjunction_flattens() {
        let expr = field::<Pages>("length")
            .gt(1)
            .and(field::<Pages>("length").lt(9))
            .and(field::<Pages>("is_redirect"));
        assert_eq!(
            render(&expr).unwrap(),
            "(T1.length > 1) AND (T1.length < 9) AND T1.is_redirect"
        );
    }

    #[test]
    fn test_arithmetic() {
        let expr = (field::<Pages>("length") * 2 + 1).ge(field::<Pages>("rating"));
        assert_eq!(render(&expr).unwrap(), "((T1.length * 2) + 1) >= T1.rating");
    }

    #[test]
    fn test_string_methods_escape_wildcards() {
        assert_eq!(
            render(&field::<Pages>("title").starts_with("Foo")).unwrap(),
            "T1.title LIKE 'Foo%'"
        );
        assert_eq!(
            render(&field::<Pages>("title").ends_with("50%")).unwrap(),
            r"T1.title LIKE '%50\\%'"
        );
        assert_eq!(
            render(&field::<Pages>("title").contains("O'Neil")).unwrap(),
            "T1.title LIKE '%O''Neil%'"
        );
        assert_eq!(
            render(&field::<Pages>("title").like("A_%")).unwrap(),
            "T1.title LIKE 'A_%'"
        );
    }

    #[test]
    fn test_contains_on_list_field_uses_holds() {
        assert_eq!(
            render(&field::<Pages>("tags").contains("rust")).unwrap(),
            "T1.tags HOLDS 'rust'"
        );
    }

    #[test]
    fn test_in_list() {
        assert_eq!(
            render(&field::<Pages>("id").is_in(vec![1, 2, 3])).unwrap(),
            "T1.id IN (1,2,3)"
        );
        assert_eq!(
            render(&field::<Pages>("title").not_in(vec!["a'b"])).unwrap(),
            "T1.title NOT IN ('a''b')"
        );
    }

    #[test]
    fn test_empty_in_list() {
        let empty: Vec<i64> = Vec::new();
        assert!(matches!(
            render(&field::<Pages>("id").is_in(empty)),
            Err(QueryError::EmptyInClause(_))
        ));
    }

    #[test]
    fn test_scalar_functions() {
        assert_eq!(
            render(&field::<Pages>("title").upper().eq("FOO")).unwrap(),
            "UPPER(T1.title) = 'FOO'"
        );
        assert_eq!(
            render(&field::<Pages>("touched").year().ge(2020)).unwrap(),
            "YEAR(T1.touched) >= 2020"
        );
        assert_eq!(
            render(&field::<Pages>("title").length().lt(5)).unwrap(),
            "CHAR_LENGTH(T1.title) < 5"
        );
    }

    #[test]
    fn test_date_constant_against_datetime_field() {
        let since = chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            render(&field::<Pages>("touched").gt(since)).unwrap(),
            "T1.touched > '2024-01-31 00:00:00'"
        );
    }

    #[test]
    fn test_type_mismatches() {
        assert!(matches!(
            render(&field::<Pages>("length").eq("long")),
            Err(QueryError::TypeMismatch(_))
        ));
        assert!(matches!(
            render(&field::<Pages>("length").eq(field::<Pages>("title"))),
            Err(QueryError::TypeMismatch(_))
        ));
        assert!(matches!(
            render(&field::<Pages>("length").starts_with("1")),
            Err(QueryError::TypeMismatch(_))
        ));
        assert!(matches!(
            render(&field::<Pages>("length")),
            Err(QueryError::TypeMismatch(_))
        ));
        assert!(matches!(
            render(&(field::<Pages>("title") + 1).gt(2)),
            Err(QueryError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_unsupported_shapes() {
        let err = render(&cond(field::<Pages>("is_redirect"), true, false)).unwrap_err();
        match err {
            QueryError::UnsupportedExpression(fragment) => {
                assert!(fragment.contains("Pages.is_redirect ? true : false"))
            }
            other => panic!("Expected UnsupportedExpression, got {:?}", other),
        }
        assert!(matches!(
            render(&field::<Pages>("title").call("to_slug", vec![]).eq("x")),
            Err(QueryError::UnsupportedExpression(_))
        ));
        assert!(matches!(
            render(&field::<Pages>("title").starts_with(field::<Pages>("title"))),
            Err(QueryError::UnsupportedExpression(_))
        ));
        assert!(matches!(
            render(&lit(Value::Null).eq(Value::Null)),
            Err(QueryError::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_aggregates_rejected_in_where() {
        assert!(matches!(
            render(&count_all().gt(1)),
            Err(QueryError::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_aggregates_in_select() {
        let registry = registry();
        let mut walker = Walker::new(&registry, pages_scope(&registry), Clause::Select);
        let (sql, ty) = walker.translate(&count_all()).unwrap();
        assert_eq!(sql.to_string(), "COUNT(*)");
        assert_eq!(ty, Some(FieldType::Integer));

        let (sql, ty) = walker.translate(&field::<Pages>("length").avg()).unwrap();
        assert_eq!(sql.to_string(), "AVG(T1.length)");
        assert_eq!(ty, Some(FieldType::Float));

        let (sql, _) = walker
            .translate(&field::<Pages>("title").count_distinct())
            .unwrap();
        assert_eq!(sql.to_string(), "COUNT(DISTINCT T1.title)");

        assert!(matches!(
            walker.translate(&field::<Pages>("title").sum()),
            Err(QueryError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_implicit_join_through_relation() {
        let registry = registry();
        let mut walker = Walker::new(&registry, pages_scope(&registry), Clause::Where);
        let sql = walker
            .translate_predicate(&field::<Pages>("categories.name").eq("Foo"))
            .unwrap();
        assert_eq!(sql.to_string(), "T2.name = 'Foo'");

        // a second use of the same relation reuses the projection
        let sql = walker
            .translate_predicate(&field::<Pages>("categories").then("page_id").gt(0))
            .unwrap();
        assert_eq!(sql.to_string(), "T2.page_id > 0");

        let scope = walker.into_scope();
        assert_eq!(scope.tables.len(), 2);
        assert_eq!(scope.tables[1].to_string(), "Categories=T2");
        assert_eq!(scope.joins.len(), 1);
        assert_eq!(scope.joins[0].to_string(), "T1.id=T2.page_id");
    }

    #[test]
    fn test_member_errors() {
        assert!(matches!(
            render(&field::<Pages>("nope").eq(1)),
            Err(QueryError::UnknownField(_))
        ));
        assert!(matches!(
            render(&field::<Pages>("title.name").eq(1)),
            Err(QueryError::UnsupportedExpression(_))
        ));
        assert!(matches!(
            render(&field::<Pages>("categories").eq(1)),
            Err(QueryError::UnsupportedExpression(_))
        ));
        assert!(matches!(
            render(&field::<Categories>("name").eq("x")),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            render(&field::<Unregistered>("name").eq("x")),
            Err(QueryError::UnknownTable(_))
        ));
        assert!(matches!(
            render(&field_of("T9", "name").eq("x")),
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_ambiguous_unqualified_field() {
        let registry = registry();
        let scope = scope_with(
            &registry,
            &[
                (TypeId::of::<Pages>(), "T1"),
                (TypeId::of::<Revisions>(), "T2"),
            ],
        );
        let mut walker = Walker::new(&registry, scope, Clause::Where);
        assert!(matches!(
            walker.translate(&column("title")),
            Err(QueryError::AmbiguousReference(_))
        ));
        let (sql, _) = walker.translate(&column("length")).unwrap();
        assert_eq!(sql.to_string(), "T1.length");
        assert!(matches!(
            walker.translate(&column("missing")),
            Err(QueryError::UnknownField(_))
        ));
    }

    #[test]
    fn test_ambiguous_self_join() {
        let registry = registry();
        let scope = scope_with(
            &registry,
            &[(TypeId::of::<Pages>(), "T1"), (TypeId::of::<Pages>(), "P2")],
        );
        let mut walker = Walker::new(&registry, scope, Clause::Where);
        assert!(matches!(
            walker.translate(&field::<Pages>("title")),
            Err(QueryError::AmbiguousReference(_))
        ));
        let (sql, _) = walker.translate(&field_of("P2", "title")).unwrap();
        assert_eq!(sql.to_string(), "P2.title");
    }

    #[test]
    fn test_translate_join() {
        let registry = registry();
        let scope = scope_with(
            &registry,
            &[
                (TypeId::of::<Pages>(), "T1"),
                (TypeId::of::<Categories>(), "T2"),
            ],
        );
        let mut walker = Walker::new(&registry, scope, Clause::JoinOn);
        let joins = walker
            .translate_join(&field::<Pages>("id").eq(field::<Categories>("page_id")))
            .unwrap();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].to_string(), "T1.id=T2.page_id");

        let holds = walker
            .translate_join(&field::<Pages>("tags").contains(field::<Categories>("name")))
            .unwrap();
        assert_eq!(holds[0].to_string(), "T1.tags HOLDS T2.name");

        assert!(matches!(
            walker.translate_join(&field::<Pages>("id").gt(field::<Categories>("page_id"))),
            Err(QueryError::UnsupportedExpression(_))
        ));
        assert!(matches!(
            walker.translate_join(&field::<Pages>("title").eq(field::<Categories>("page_id"))),
            Err(QueryError::TypeMismatch(_))
        ));
    }
}
