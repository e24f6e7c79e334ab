use crate::assembler::{assemble, CargoParams};
use crate::config::ProviderConfig;
use crate::error::{QueryError, Result};
use crate::expr::Expr;
use crate::schema::TableRegistry;
use crate::sql::{Connective, SortDirection, SqlExpr, SqlRef, TableProjection};
use crate::walker::{Clause, JoinCondition, Scope, Walker, ALIAS_PREFIX};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// A projected expression with its optional output alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub expr: SqlRef,
    pub alias: Option<String>,
}

/// Accumulated, already translated clauses of a query.
///
/// Every `with_*` method returns a new state; parts that did not change are
/// shared with the original through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryState {
    scope: Arc<Scope>,
    where_clause: Option<SqlRef>,
    fields: Arc<Vec<Projection>>,
    group_by: Arc<Vec<SqlRef>>,
    having: Option<SqlRef>,
    order_by: Arc<Vec<SqlRef>>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
}

impl QueryState {
    pub fn new(root: TableProjection) -> Self {
        Self {
            scope: Arc::new(Scope {
                tables: vec![root],
                joins: Vec::new(),
            }),
            where_clause: None,
            fields: Arc::new(Vec::new()),
            group_by: Arc::new(Vec::new()),
            having: None,
            order_by: Arc::new(Vec::new()),
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn tables(&self) -> &[TableProjection] {
        &self.scope.tables
    }

    pub fn joins(&self) -> &[JoinCondition] {
        &self.scope.joins
    }

    pub fn where_clause(&self) -> Option<&SqlRef> {
        self.where_clause.as_ref()
    }

    pub fn fields(&self) -> &[Projection] {
        &self.fields
    }

    pub fn group_by(&self) -> &[SqlRef] {
        &self.group_by
    }

    pub fn having(&self) -> Option<&SqlRef> {
        self.having.as_ref()
    }

    pub fn order_by(&self) -> &[SqlRef] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn with_scope(&self, scope: Scope) -> Self {
        let mut next = self.clone();
        if *next.scope != scope {
            next.scope = Arc::new(scope);
        }
        next
    }

    pub fn with_where(&self, predicate: SqlRef) -> Self {
        let mut next = self.clone();
        next.where_clause = Some(predicate);
        next
    }

    pub fn with_fields(&self, fields: Vec<Projection>) -> Self {
        let mut next = self.clone();
        next.fields = Arc::new(fields);
        next
    }

    pub fn with_group_by(&self, group_by: Vec<SqlRef>) -> Self {
        let mut next = self.clone();
        next.group_by = Arc::new(group_by);
        next
    }

    pub fn with_having(&self, predicate: SqlRef) -> Self {
        let mut next = self.clone();
        next.having = Some(predicate);
        next
    }

    pub fn with_order(&self, term: SqlRef) -> Self {
        let mut order_by = (*self.order_by).clone();
        order_by.push(term);
        let mut next = self.clone();
        next.order_by = Arc::new(order_by);
        next
    }

    pub fn with_limit(&self, limit: u64) -> Self {
        let mut next = self.clone();
        next.limit = Some(limit);
        next
    }

    pub fn with_offset(&self, offset: u64) -> Self {
        let mut next = self.clone();
        next.offset = Some(offset);
        next
    }

    pub fn with_distinct(&self, distinct: bool) -> Self {
        let mut next = self.clone();
        next.distinct = distinct;
        next
    }
}

/// Join two predicates, flattening an existing conjunction of the same kind.
fn combine(connective: Connective, existing: Option<&SqlRef>, predicate: SqlRef) -> SqlRef {
    match existing {
        None => predicate,
        Some(existing) => {
            let mut terms = match &**existing {
                SqlExpr::Conjunction(c, inner) if *c == connective => inner.clone(),
                _ => vec![existing.clone()],
            };
            terms.push(predicate);
            Arc::new(SqlExpr::Conjunction(connective, terms))
        }
    }
}

/// Caller supplied aliases end up verbatim in clause text.
fn check_identifier(alias: &str) -> Result<()> {
    let mut chars = alias.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidQuery(format!(
            "{:?} is not a valid alias",
            alias
        )))
    }
}

/// Query over the Cargo table registered for `T`.
///
/// Operators translate their arguments immediately and return a new query;
/// the receiver is left untouched, so a base query can be extended in
/// several directions.
///
/// ```rust
/// use cargo_query::prelude::*;
///
/// struct Pages;
///
/// let mut schema = TableRegistry::builder();
/// schema.register::<Pages>(
///     "Pages",
///     vec![("title", FieldType::String, false), ("length", FieldType::Integer, false)],
/// )?;
/// let registry = schema.build()?;
///
/// let params = CargoQuery::<Pages>::new(&registry)?
///     .filter(field::<Pages>("title").starts_with("Foo"))?
///     .order_desc(field::<Pages>("length"))?
///     .take(10)
///     .build(&ProviderConfig::default())?;
///
/// assert_eq!(params.get("where"), Some("T1.title LIKE 'Foo%'"));
/// assert_eq!(params.get("order_by"), Some("T1.length DESC"));
/// # Ok::<(), cargo_query::QueryError>(())
/// ```
pub struct CargoQuery<'r, T> {
    registry: &'r TableRegistry,
    state: QueryState,
    _root: PhantomData<fn() -> T>,
}

impl<T> Clone for CargoQuery<'_, T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry,
            state: self.state.clone(),
            _root: PhantomData,
        }
    }
}

impl<T> fmt::Debug for CargoQuery<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CargoQuery")
            .field("root", &std::any::type_name::<T>())
            .field("state", &self.state)
            .finish()
    }
}

impl<'r, T: 'static> CargoQuery<'r, T> {
    /// Start a query rooted at the table registered for `T`
    pub fn new(registry: &'r TableRegistry) -> Result<Self> {
        let model = registry.model::<T>()?;
        let root = TableProjection {
            type_id: model.type_id,
            table: model.name.clone(),
            alias: format!("{}1", ALIAS_PREFIX),
        };
        Ok(Self {
            registry,
            state: QueryState::new(root),
            _root: PhantomData,
        })
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn registry(&self) -> &'r TableRegistry {
        self.registry
    }

    pub(crate) fn with_state(&self, state: QueryState) -> Self {
        Self {
            registry: self.registry,
            state,
            _root: PhantomData,
        }
    }

    fn walker(&self, clause: Clause) -> Walker<'r> {
        Walker::new(self.registry, self.state.scope().clone(), clause)
    }

    /// Add a WHERE predicate, ANDed with any existing one
    pub fn filter(&self, predicate: Expr) -> Result<Self> {
        let mut walker = self.walker(Clause::Where);
        let sql = walker.translate_predicate(&predicate)?;
        let combined = combine(Connective::And, self.state.where_clause(), sql);
        let state = self
            .state
            .with_scope(walker.into_scope())
            .with_where(combined);
        Ok(self.with_state(state))
    }

    /// Add a WHERE predicate, ORed with any existing one
    pub fn or_filter(&self, predicate: Expr) -> Result<Self> {
        let mut walker = self.walker(Clause::Where);
        let sql = walker.translate_predicate(&predicate)?;
        let combined = combine(Connective::Or, self.state.where_clause(), sql);
        let state = self
            .state
            .with_scope(walker.into_scope())
            .with_where(combined);
        Ok(self.with_state(state))
    }

    /// Select specific expressions, replacing the projection
    pub fn select(&self, fields: Vec<Expr>) -> Result<Self> {
        self.project(fields.into_iter().map(|f| (f, None)).collect(), true)
    }

    /// Select expressions under output aliases, replacing the projection
    pub fn select_as(&self, fields: Vec<(Expr, &str)>) -> Result<Self> {
        self.project(
            fields.into_iter().map(|(f, a)| (f, Some(a))).collect(),
            true,
        )
    }

    /// Add one expression to the projection
    pub fn add_field(&self, field: Expr, alias: Option<&str>) -> Result<Self> {
        self.project(vec![(field, alias)], false)
    }

    fn project(&self, fields: Vec<(Expr, Option<&str>)>, replace: bool) -> Result<Self> {
        let mut projected = if replace {
            Vec::with_capacity(fields.len())
        } else {
            self.state.fields().to_vec()
        };
        let mut walker = self.walker(Clause::Select);
        for (field, alias) in fields {
            let (expr, _) = walker.translate(&field)?;
            if let Some(alias) = alias {
                check_identifier(alias)?;
                if projected.iter().any(|p| p.alias.as_deref() == Some(alias)) {
                    return Err(QueryError::InvalidQuery(format!(
                        "output alias {} used twice",
                        alias
                    )));
                }
            }
            projected.push(Projection {
                expr,
                alias: alias.map(str::to_string),
            });
        }
        let state = self
            .state
            .with_scope(walker.into_scope())
            .with_fields(projected);
        Ok(self.with_state(state))
    }

    /// Join the table registered for `U` under the next generated alias
    pub fn join<U: 'static>(&self, on: Expr) -> Result<Self> {
        let alias = self.state.scope().next_alias();
        self.join_as::<U>(&alias, on)
    }

    /// Join the table registered for `U` under an explicit alias.
    /// Reference its fields with [`field_of`](crate::expr::field_of).
    pub fn join_as<U: 'static>(&self, alias: &str, on: Expr) -> Result<Self> {
        check_identifier(alias)?;
        let model = self.registry.model::<U>()?;
        let mut scope = self.state.scope().clone();
        scope.add_table(model.type_id, &model.name, alias.to_string())?;

        let mut walker = Walker::new(self.registry, scope, Clause::JoinOn);
        let conditions = walker.translate_join(&on)?;
        if !conditions
            .iter()
            .any(|c| c.left.alias == alias || c.right.alias == alias)
        {
            return Err(QueryError::InvalidQuery(format!(
                "join condition {} does not reference {}",
                on, alias
            )));
        }
        trace!("joined {} as {}", model.name, alias);

        let mut scope = walker.into_scope();
        scope.joins.extend(conditions);
        Ok(self.with_state(self.state.with_scope(scope)))
    }

    /// Group by expressions, replacing any previous grouping
    pub fn group_by(&self, exprs: Vec<Expr>) -> Result<Self> {
        let mut walker = self.walker(Clause::GroupBy);
        let mut group_by = Vec::with_capacity(exprs.len());
        for expr in &exprs {
            group_by.push(walker.translate(expr)?.0);
        }
        let state = self
            .state
            .with_scope(walker.into_scope())
            .with_group_by(group_by);
        Ok(self.with_state(state))
    }

    /// Add a HAVING predicate, ANDed with any existing one
    pub fn having(&self, predicate: Expr) -> Result<Self> {
        let mut walker = self.walker(Clause::Having);
        let sql = walker.translate_predicate(&predicate)?;
        let combined = combine(Connective::And, self.state.having(), sql);
        let state = self
            .state
            .with_scope(walker.into_scope())
            .with_having(combined);
        Ok(self.with_state(state))
    }

    /// Add an ORDER BY term after the existing ones
    pub fn order_by(&self, expr: Expr, direction: SortDirection) -> Result<Self> {
        let mut walker = self.walker(Clause::OrderBy);
        let (term, _) = walker.translate(&expr)?;
        let ordering = Arc::new(SqlExpr::Ordering(term, direction));
        let state = self
            .state
            .with_scope(walker.into_scope())
            .with_order(ordering);
        Ok(self.with_state(state))
    }

    /// Add ascending ORDER BY
    pub fn order_asc(&self, expr: Expr) -> Result<Self> {
        self.order_by(expr, SortDirection::Asc)
    }

    /// Add descending ORDER BY
    pub fn order_desc(&self, expr: Expr) -> Result<Self> {
        self.order_by(expr, SortDirection::Desc)
    }

    /// Set LIMIT; checked against the provider maximum on `build`
    pub fn take(&self, limit: u64) -> Self {
        self.with_state(self.state.with_limit(limit))
    }

    /// Set OFFSET; requires a limit by the time the query is built
    pub fn skip(&self, offset: u64) -> Self {
        self.with_state(self.state.with_offset(offset))
    }

    /// Use DISTINCT
    pub fn distinct(&self) -> Self {
        self.with_state(self.state.with_distinct(true))
    }

    /// Assemble the request parameters
    pub fn build(&self, config: &ProviderConfig) -> Result<CargoParams> {
        assemble(&self.state, self.registry, config)
    }

    /// Split the query into pages of `page_size` rows.
    ///
    /// Paging starts at the current offset. A limit already set on the query
    /// caps the total number of rows covered.
    pub fn pages(&self, page_size: u64) -> Paginator<'r, T> {
        let start = self.state.offset().unwrap_or(0);
        Paginator {
            query: self.clone(),
            page_size: page_size.max(1),
            next_offset: start,
            end: self.state.limit().map(|limit| start.saturating_add(limit)),
        }
    }
}

/// Iterator over successive pages of a query
#[derive(Debug, Clone)]
pub struct Paginator<'r, T> {
    query: CargoQuery<'r, T>,
    page_size: u64,
    next_offset: u64,
    end: Option<u64>,
}

impl<'r, T> Paginator<'r, T> {
    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}

impl<'r, T: 'static> Iterator for Paginator<'r, T> {
    type Item = CargoQuery<'r, T>;

    fn next(&mut self) -> Option<Self::Item> {
        let size = match self.end {
            Some(end) if self.next_offset >= end => return None,
            Some(end) => self.page_size.min(end - self.next_offset),
            None => self.page_size,
        };
        let state = self
            .query
            .state
            .with_limit(size)
            .with_offset(self.next_offset);
        self.next_offset = self.next_offset.saturating_add(size);
        Some(self.query.with_state(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{count_all, field, field_of};
    use crate::schema::FieldType;

    struct Pages;
    struct Categories;

    fn registry() -> TableRegistry {
        let mut builder = TableRegistry::builder();
        builder
            .register::<Pages>(
                "Pages",
                vec![
                    ("id", FieldType::Integer, false),
                    ("title", FieldType::String, false),
                    ("length", FieldType::Integer, false),
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
            .unwrap();
        builder.relation::<Pages, Categories>("categories", "id", "page_id");
        builder.build().unwrap()
    }

    #[test]
    fn test_new_roots_at_t1() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry).unwrap();
        assert_eq!(query.state().tables().len(), 1);
        assert_eq!(query.state().tables()[0].to_string(), "Pages=T1");
    }

    #[test]
    fn test_unknown_root() {
        struct Nope;
        let registry = registry();
        assert!(matches!(
            CargoQuery::<Nope>::new(&registry),
            Err(QueryError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_operators_leave_receiver_untouched() {
        let registry = registry();
        let base = CargoQuery::<Pages>::new(&registry).unwrap();
        let filtered = base.filter(field::<Pages>("length").gt(10)).unwrap();
        let joined = base
            .filter(field::<Pages>("categories.name").eq("Foo"))
            .unwrap();

        assert!(base.state().where_clause().is_none());
        assert_eq!(base.state().tables().len(), 1);
        assert_eq!(filtered.state().tables().len(), 1);
        assert_eq!(joined.state().tables().len(), 2);
    }

    #[test]
    fn test_unchanged_parts_are_shared() {
        let registry = registry();
        let base = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .order_asc(field::<Pages>("title"))
            .unwrap();
        let filtered = base.filter(field::<Pages>("length").gt(10)).unwrap();
        assert!(Arc::ptr_eq(&base.state().scope, &filtered.state().scope));
        assert!(Arc::ptr_eq(
            &base.state().order_by,
            &filtered.state().order_by
        ));
    }

    #[test]
    fn test_filters_are_anded() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .filter(field::<Pages>("length").gt(10))
            .unwrap()
            .filter(field::<Pages>("length").lt(20))
            .unwrap()
            .filter(field::<Pages>("title").ne("x"))
            .unwrap();
        assert_eq!(
            query.state().where_clause().unwrap().to_string(),
            "(T1.length > 10) AND (T1.length < 20) AND (T1.title != 'x')"
        );
    }

    #[test]
    fn test_or_filter() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .filter(field::<Pages>("length").gt(10))
            .unwrap()
            .filter(field::<Pages>("length").lt(20))
            .unwrap()
            .or_filter(field::<Pages>("title").eq("x"))
            .unwrap();
        assert_eq!(
            query.state().where_clause().unwrap().to_string(),
            "((T1.length > 10) AND (T1.length < 20)) OR (T1.title = 'x')"
        );
    }

    #[test]
    fn test_select_aliases() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .select_as(vec![(field::<Pages>("title"), "name"), (count_all(), "n")])
            .unwrap();
        assert_eq!(query.state().fields().len(), 2);
        assert_eq!(query.state().fields()[1].alias.as_deref(), Some("n"));

        assert!(matches!(
            query.add_field(field::<Pages>("id"), Some("n")),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            query.add_field(field::<Pages>("id"), Some("x y")),
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_explicit_join() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .join::<Categories>(field::<Pages>("id").eq(field::<Categories>("page_id")))
            .unwrap();
        assert_eq!(query.state().tables()[1].to_string(), "Categories=T2");
        assert_eq!(query.state().joins()[0].to_string(), "T1.id=T2.page_id");
    }

    #[test]
    fn test_join_as_self_join() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .join_as::<Pages>("P2", field_of("T1", "title").eq(field_of("P2", "title")))
            .unwrap()
            .filter(field_of("P2", "length").gt(field_of("T1", "length")))
            .unwrap();
        assert_eq!(query.state().joins()[0].to_string(), "T1.title=P2.title");
        assert!(matches!(
            query.filter(field::<Pages>("length").gt(1)),
            Err(QueryError::AmbiguousReference(_))
        ));
    }

    #[test]
    fn test_join_errors() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry).unwrap();
        assert!(matches!(
            query.join_as::<Categories>("T1", field::<Pages>("id").eq(1)),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            query.join::<Categories>(field::<Pages>("id").eq(field::<Pages>("length"))),
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            query.join::<Categories>(field::<Pages>("id").eq(5)),
            Err(QueryError::UnsupportedExpression(_))
        ));
    }

    #[test]
    fn test_having_requires_boolean() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .group_by(vec![field::<Pages>("title")])
            .unwrap();
        assert!(matches!(
            query.having(count_all()),
            Err(QueryError::TypeMismatch(_))
        ));
        let query = query.having(count_all().gt(1)).unwrap();
        assert_eq!(query.state().having().unwrap().to_string(), "COUNT(*) > 1");
    }

    #[test]
    fn test_paginator_respects_existing_window() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .take(250)
            .skip(100);
        let windows: Vec<(Option<u64>, Option<u64>)> = query
            .pages(100)
            .map(|page| (page.state().limit(), page.state().offset()))
            .collect();
        assert_eq!(
            windows,
            vec![
                (Some(100), Some(100)),
                (Some(100), Some(200)),
                (Some(50), Some(300)),
            ]
        );
    }

    #[test]
    fn test_paginator_unbounded() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry).unwrap();
        let offsets: Vec<Option<u64>> = query
            .pages(500)
            .take(3)
            .map(|page| page.state().offset())
            .collect();
        assert_eq!(offsets, vec![Some(0), Some(500), Some(1000)]);
    }
}
