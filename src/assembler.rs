//! Assembly of a translated [`QueryState`] into Cargo request parameters.

use crate::builder::QueryState;
use crate::config::{AliasResolution, ProviderConfig};
use crate::error::{QueryError, Result};
use crate::schema::TableRegistry;
use crate::sql::{ColumnRef, Printer, SqlExpr, SqlRef};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use tracing::debug;

/// Unreserved characters (RFC 3986) stay as they are.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Ordered `cargoquery` parameters.
///
/// Names come from the fixed vocabulary `tables`, `fields`, `where`,
/// `join_on`, `group_by`, `having`, `order_by`, `limit`, `offset`, always in
/// that order; empty clauses are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CargoParams {
    params: Vec<(&'static str, String)>,
}

impl CargoParams {
    fn push(&mut self, name: &'static str, value: String) {
        if !value.is_empty() {
            self.params.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.params.iter().map(|(n, v)| (*n, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// `tables=...&fields=...` with every value percent-encoded
    pub fn to_query_string(&self) -> String {
        self.params
            .iter()
            .map(|(name, value)| format!("{}={}", name, utf8_percent_encode(value, QUERY_VALUE)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for CargoParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

impl Serialize for CargoParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (name, value) in &self.params {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Build the request parameters for a query state.
pub fn assemble(
    state: &QueryState,
    registry: &TableRegistry,
    config: &ProviderConfig,
) -> Result<CargoParams> {
    check_window(state, config)?;
    check_columns(state, registry)?;

    let aliases: Vec<(SqlRef, String)> = match config.alias_resolution {
        AliasResolution::Qualified => Vec::new(),
        AliasResolution::OutputAlias => state
            .fields()
            .iter()
            .filter_map(|p| p.alias.as_ref().map(|a| (p.expr.clone(), a.clone())))
            .collect(),
    };

    let mut params = CargoParams::default();
    params.push("tables", join(state.tables()));
    params.push("fields", fields(state, registry)?);
    if let Some(predicate) = state.where_clause() {
        params.push("where", predicate.to_string());
    }
    params.push("join_on", join(state.joins()));
    params.push(
        "group_by",
        state
            .group_by()
            .iter()
            .map(|expr| Printer::new(expr, &aliases).to_string())
            .collect::<Vec<_>>()
            .join(","),
    );
    if let Some(predicate) = state.having() {
        params.push("having", Printer::new(predicate, &aliases).to_string());
    }
    params.push("order_by", join(state.order_by()));
    if let Some(limit) = state.limit() {
        params.push("limit", limit.to_string());
    }
    if let Some(offset) = state.offset() {
        params.push("offset", offset.to_string());
    }

    debug!("assembled cargoquery: {}", params.to_query_string());
    Ok(params)
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn check_window(state: &QueryState, config: &ProviderConfig) -> Result<()> {
    match (state.limit(), state.offset()) {
        (Some(requested), _) if requested > config.max_limit => Err(QueryError::LimitExceeded {
            requested,
            max: config.max_limit,
        }),
        (None, Some(offset)) => Err(QueryError::InvalidQuery(format!(
            "offset {} without a limit",
            offset
        ))),
        _ => Ok(()),
    }
}

/// Every column must name a projection of this query and a field its model declares.
fn check_columns(state: &QueryState, registry: &TableRegistry) -> Result<()> {
    let mut trees: Vec<&SqlExpr> = Vec::new();
    trees.extend(state.where_clause().map(|e| &**e));
    trees.extend(state.fields().iter().map(|p| &*p.expr));
    trees.extend(state.group_by().iter().map(|e| &**e));
    trees.extend(state.having().map(|e| &**e));
    trees.extend(state.order_by().iter().map(|e| &**e));

    let mut columns: Vec<&ColumnRef> = trees.into_iter().flat_map(SqlExpr::columns).collect();
    for condition in state.joins() {
        columns.push(&condition.left);
        columns.push(&condition.right);
    }

    for column in columns {
        let projection = state.scope().projection(&column.alias).ok_or_else(|| {
            QueryError::InvalidQuery(format!("{} refers to no table of this query", column))
        })?;
        let model = registry.model_by_id(&projection.type_id)?;
        if model.field(&column.field).is_none() {
            return Err(QueryError::UnknownField(format!(
                "{}.{}",
                model.name, column.field
            )));
        }
    }
    Ok(())
}

fn fields(state: &QueryState, registry: &TableRegistry) -> Result<String> {
    let mut rendered: Vec<String> = if state.fields().is_empty() {
        let root = state
            .tables()
            .first()
            .ok_or_else(|| QueryError::InvalidQuery("query has no tables".to_string()))?;
        let model = registry.model_by_id(&root.type_id)?;
        model
            .fields
            .iter()
            .map(|f| format!("{}.{} AS {}", root.alias, f.name, f.name))
            .collect()
    } else {
        state
            .fields()
            .iter()
            .map(|p| match &p.alias {
                Some(alias) => format!("{} AS {}", p.expr, alias),
                None => p.expr.to_string(),
            })
            .collect()
    };
    if state.is_distinct() {
        if let Some(first) = rendered.first_mut() {
            first.insert_str(0, "DISTINCT ");
        }
    }
    Ok(rendered.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CargoQuery;
    use crate::expr::{count_all, field};
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
    fn test_default_fields_and_omitted_clauses() {
        let registry = registry();
        let params = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .build(&ProviderConfig::default())
            .unwrap();
        let names: Vec<&str> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["tables", "fields"]);
        assert_eq!(params.get("tables"), Some("Pages=T1"));
        assert_eq!(params.get("fields"), Some("T1.id AS id,T1.title AS title"));
        assert_eq!(params.get("where"), None);
    }

    #[test]
    fn test_distinct_prefixes_first_field() {
        let registry = registry();
        let params = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .select(vec![field::<Pages>("title"), field::<Pages>("id")])
            .unwrap()
            .distinct()
            .build(&ProviderConfig::default())
            .unwrap();
        assert_eq!(params.get("fields"), Some("DISTINCT T1.title,T1.id"));
    }

    #[test]
    fn test_limit_bounds() {
        let registry = registry();
        let config = ProviderConfig::default().with_max_limit(100);
        let query = CargoQuery::<Pages>::new(&registry).unwrap();

        let params = query.take(100).build(&config).unwrap();
        assert_eq!(params.get("limit"), Some("100"));

        assert!(matches!(
            query.take(101).build(&config),
            Err(QueryError::LimitExceeded {
                requested: 101,
                max: 100
            })
        ));
        assert!(matches!(
            query.skip(10).build(&config),
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_alias_resolution() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .select_as(vec![(field::<Pages>("categories.name"), "category"), (count_all(), "n")])
            .unwrap()
            .group_by(vec![field::<Pages>("categories.name")])
            .unwrap()
            .having(count_all().gt(5))
            .unwrap();

        let qualified = query.build(&ProviderConfig::default()).unwrap();
        assert_eq!(qualified.get("group_by"), Some("T2.name"));
        assert_eq!(qualified.get("having"), Some("COUNT(*) > 5"));
        assert_eq!(qualified.get("join_on"), Some("T1.id=T2.page_id"));

        let config =
            ProviderConfig::default().with_alias_resolution(AliasResolution::OutputAlias);
        let aliased = query.build(&config).unwrap();
        assert_eq!(aliased.get("group_by"), Some("category"));
        assert_eq!(aliased.get("having"), Some("n > 5"));
        assert_eq!(aliased.get("fields"), Some("T2.name AS category,COUNT(*) AS n"));
    }

    #[test]
    fn test_query_string_and_json() {
        let registry = registry();
        let params = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .filter(field::<Pages>("title").eq("a&b c"))
            .unwrap()
            .take(5)
            .build(&ProviderConfig::default())
            .unwrap();
        assert_eq!(
            params.to_query_string(),
            "tables=Pages%3DT1&fields=T1.id%20AS%20id%2CT1.title%20AS%20title\
             &where=T1.title%20%3D%20%27a%26b%20c%27&limit=5"
        );

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.starts_with(r#"{"tables":"Pages=T1","fields":"#));
        assert!(json.ends_with(r#""limit":"5"}"#));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let registry = registry();
        let query = CargoQuery::<Pages>::new(&registry)
            .unwrap()
            .filter(field::<Pages>("categories.name").eq("x"))
            .unwrap()
            .order_desc(field::<Pages>("id"))
            .unwrap();
        let config = ProviderConfig::default();
        assert_eq!(query.build(&config).unwrap(), query.build(&config).unwrap());
    }
}
