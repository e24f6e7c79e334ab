//! cargo-query - typed queries for the MediaWiki Cargo extension
//!
//! cargo-query compiles composable, strongly typed query expressions into the
//! parameters of Cargo's `cargoquery` API: `tables`, `fields`, `where`,
//! `join_on`, `group_by`, `having`, `order_by`, `limit` and `offset`.
//!
//! # Architecture
//!
//! - **Schema Registry**: Rust types are mapped to Cargo tables once, at startup
//! - **Expression DSL**: Predicates and projections are built as [`Expr`] trees
//! - **Translation**: Each query operator translates its arguments immediately,
//!   resolving fields, joins and aliases against the registry
//! - **Assembly**: The accumulated state is rendered into [`CargoParams`]
//! - **Backend Boundary**: Sending requests is left to a [`CargoBackend`]
//!
//! # Example
//!
//! ```rust
//! use cargo_query::prelude::*;
//!
//! struct Pages;
//! struct Categories;
//!
//! let mut schema = TableRegistry::builder();
//! schema
//!     .register::<Pages>(
//!         "Pages",
//!         vec![
//!             ("id", FieldType::Integer, false),
//!             ("title", FieldType::String, false),
//!         ],
//!     )?
//!     .register::<Categories>(
//!         "Categories",
//!         vec![
//!             ("page_id", FieldType::Integer, false),
//!             ("name", FieldType::String, false),
//!         ],
//!     )?;
//! schema.relation::<Pages, Categories>("categories", "id", "page_id");
//! let registry = schema.build()?;
//!
//! let params = CargoQuery::<Pages>::new(&registry)?
//!     .filter(field::<Pages>("title").starts_with("Foo"))?
//!     .filter(field::<Pages>("categories.name").eq("Software"))?
//!     .order_asc(field::<Pages>("title"))?
//!     .take(50)
//!     .build(&ProviderConfig::default())?;
//!
//! assert_eq!(params.get("tables"), Some("Pages=T1,Categories=T2"));
//! assert_eq!(
//!     params.get("where"),
//!     Some("(T1.title LIKE 'Foo%') AND (T2.name = 'Software')")
//! );
//! assert_eq!(params.get("join_on"), Some("T1.id=T2.page_id"));
//! # Ok::<(), cargo_query::QueryError>(())
//! ```
//!
//! # Safety of generated text
//!
//! Constants never reach clause text unescaped: strings are quoted with
//! embedded quotes and backslashes doubled, `LIKE` patterns built by
//! `starts_with`/`ends_with`/`contains` have their wildcards escaped, and
//! caller supplied aliases must be plain identifiers.

pub mod assembler;
pub mod backend;
pub mod builder;
pub mod config;
pub mod error;
pub mod expr;
pub mod literal;
pub mod schema;
pub mod sql;
pub mod walker;

pub use assembler::{assemble, CargoParams};
pub use backend::{rows_from_response, CargoBackend, CargoRow, FromRow, QueryResult};
pub use builder::{CargoQuery, Paginator, Projection, QueryState};
pub use config::{AliasResolution, ProviderConfig};
pub use error::{QueryError, Result};
pub use expr::{Expr, IntoExpr};
pub use literal::Value;
pub use schema::{CargoModel, CargoTable, FieldType, RegistryBuilder, TableRegistry};
pub use sql::SortDirection;

/// Prelude for common imports
pub mod prelude {
    pub use crate::assembler::CargoParams;
    pub use crate::backend::{CargoBackend, CargoRow, FromRow, QueryResult};
    pub use crate::builder::CargoQuery;
    pub use crate::config::{AliasResolution, ProviderConfig};
    pub use crate::error::{QueryError, Result};
    pub use crate::expr::{column, cond, count_all, field, field_of, lit, Expr, IntoExpr};
    pub use crate::literal::Value;
    pub use crate::schema::{CargoTable, FieldType, TableRegistry};
    pub use crate::sql::SortDirection;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _registry = TableRegistry::builder();
        let _field_type = FieldType::String;
        let _direction = SortDirection::Asc;
        let _config = ProviderConfig::default();
        let _params = CargoParams::default();
    }
}
