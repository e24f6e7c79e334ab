//! Query expressions as written by callers.
//!
//! An [`Expr`] is an untyped tree over member accesses, constants, operators
//! and method calls. It says nothing about SQL; the walker decides what each
//! node becomes and rejects what it cannot translate.
//!
//! ```rust
//! use cargo_query::expr::{field, lit};
//!
//! struct Pages;
//!
//! let predicate = field::<Pages>("title")
//!     .starts_with("Foo")
//!     .and(field::<Pages>("length").gt(lit(100)));
//! assert_eq!(
//!     predicate.to_string(),
//!     "(Pages.title.starts_with(\"Foo\") && (Pages.length > 100))"
//! );
//! ```

use crate::literal::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use std::any::{type_name, TypeId};
use std::fmt;
use std::ops;

/// Root of a member-access chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef {
    /// The projection of a registered type
    Type {
        type_id: TypeId,
        type_name: &'static str,
    },
    /// A projection introduced with an explicit alias
    Alias(String),
}

impl TableRef {
    pub fn of<T: 'static>() -> Self {
        TableRef::Type {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRef::Type { type_name, .. } => {
                let short = type_name.rsplit("::").next().unwrap_or(type_name);
                write!(f, "{}", short)
            }
            TableRef::Alias(alias) => write!(f, "{}", alias),
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Aggregate::Count | Aggregate::CountDistinct => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }
}

/// Methods a call node may name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    StartsWith,
    EndsWith,
    Contains,
    Like,
    In,
    NotIn,
    Upper,
    Lower,
    Trim,
    Length,
    Year,
    Month,
    Day,
    Aggregate(Aggregate),
    /// Any other instance method; never translatable
    Other(String),
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::StartsWith => "starts_with",
            Method::EndsWith => "ends_with",
            Method::Contains => "contains",
            Method::Like => "like",
            Method::In => "is_in",
            Method::NotIn => "not_in",
            Method::Upper => "upper",
            Method::Lower => "lower",
            Method::Trim => "trim",
            Method::Length => "length",
            Method::Year => "year",
            Method::Month => "month",
            Method::Day => "day",
            Method::Aggregate(Aggregate::Count) => "count",
            Method::Aggregate(Aggregate::CountDistinct) => "count_distinct",
            Method::Aggregate(Aggregate::Sum) => "sum",
            Method::Aggregate(Aggregate::Avg) => "avg",
            Method::Aggregate(Aggregate::Min) => "min",
            Method::Aggregate(Aggregate::Max) => "max",
            Method::Other(name) => name,
        };
        write!(f, "{}", name)
    }
}

/// A query expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `Root.segment.segment...`; all but the last segment must be relations
    Member { table: TableRef, path: Vec<String> },
    /// A field name not bound to any table
    Field(String),
    Constant(Value),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    /// `target.method(args)`, or a free function when `target` is `None`
    Call {
        method: Method,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        when_true: Box<Expr>,
        when_false: Box<Expr>,
    },
}

/// Conversion into an expression; constants become [`Expr::Constant`].
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for Value {
    fn into_expr(self) -> Expr {
        Expr::Constant(self)
    }
}

macro_rules! constant_into_expr {
    ($($t:ty),*) => {
        $(impl IntoExpr for $t {
            fn into_expr(self) -> Expr {
                Expr::Constant(Value::from(self))
            }
        })*
    };
}

constant_into_expr!(
    bool, i8, i16, i32, i64, u8, u16, u32, f32, f64, &str, String, &String, NaiveDate,
    NaiveDateTime, serde_json::Value
);

impl<Tz: TimeZone> IntoExpr for DateTime<Tz> {
    fn into_expr(self) -> Expr {
        Expr::Constant(Value::from(self))
    }
}

impl<T: Into<Value>> IntoExpr for Option<T> {
    fn into_expr(self) -> Expr {
        Expr::Constant(Value::from(self))
    }
}

impl<T: Into<Value>> IntoExpr for Vec<T> {
    fn into_expr(self) -> Expr {
        Expr::Constant(Value::from(self))
    }
}

/// Member access on the projection of `T`. Dots navigate relations:
/// `field::<Pages>("categories.name")`.
pub fn field<T: 'static>(path: &str) -> Expr {
    Expr::Member {
        table: TableRef::of::<T>(),
        path: split_path(path),
    }
}

/// Member access on an explicitly aliased projection
pub fn field_of(alias: &str, path: &str) -> Expr {
    Expr::Member {
        table: TableRef::Alias(alias.to_string()),
        path: split_path(path),
    }
}

/// A field resolved against every table in the query
pub fn column(name: &str) -> Expr {
    Expr::Field(name.to_string())
}

pub fn lit(value: impl IntoExpr) -> Expr {
    value.into_expr()
}

/// `COUNT(*)`
pub fn count_all() -> Expr {
    Expr::Call {
        method: Method::Aggregate(Aggregate::Count),
        target: None,
        args: Vec::new(),
    }
}

/// `test ? when_true : when_false`
pub fn cond(test: impl IntoExpr, when_true: impl IntoExpr, when_false: impl IntoExpr) -> Expr {
    Expr::Conditional {
        test: Box::new(test.into_expr()),
        when_true: Box::new(when_true.into_expr()),
        when_false: Box::new(when_false.into_expr()),
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

impl Expr {
    fn binary(self, op: BinaryOp, rhs: impl IntoExpr) -> Expr {
        Expr::Binary(Box::new(self), op, Box::new(rhs.into_expr()))
    }

    fn method(self, method: Method, args: Vec<Expr>) -> Expr {
        Expr::Call {
            method,
            target: Some(Box::new(self)),
            args,
        }
    }

    /// Navigate one more member, e.g. across a relation
    pub fn then(self, segment: &str) -> Expr {
        match self {
            Expr::Member { table, mut path } => {
                path.extend(split_path(segment));
                Expr::Member { table, path }
            }
            other => other.method(Method::Other(format!("then[{}]", segment)), Vec::new()),
        }
    }

    pub fn eq(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn and(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    pub fn is_null(self) -> Expr {
        self.eq(Value::Null)
    }

    pub fn is_not_null(self) -> Expr {
        self.ne(Value::Null)
    }

    pub fn starts_with(self, prefix: impl IntoExpr) -> Expr {
        self.method(Method::StartsWith, vec![prefix.into_expr()])
    }

    pub fn ends_with(self, suffix: impl IntoExpr) -> Expr {
        self.method(Method::EndsWith, vec![suffix.into_expr()])
    }

    /// Substring match on text fields, membership on list fields
    pub fn contains(self, needle: impl IntoExpr) -> Expr {
        self.method(Method::Contains, vec![needle.into_expr()])
    }

    /// Raw `LIKE` pattern; wildcards are kept
    pub fn like(self, pattern: impl IntoExpr) -> Expr {
        self.method(Method::Like, vec![pattern.into_expr()])
    }

    pub fn is_in(self, values: impl IntoExpr) -> Expr {
        self.method(Method::In, vec![values.into_expr()])
    }

    pub fn not_in(self, values: impl IntoExpr) -> Expr {
        self.method(Method::NotIn, vec![values.into_expr()])
    }

    pub fn upper(self) -> Expr {
        self.method(Method::Upper, Vec::new())
    }

    pub fn lower(self) -> Expr {
        self.method(Method::Lower, Vec::new())
    }

    pub fn trim(self) -> Expr {
        self.method(Method::Trim, Vec::new())
    }

    pub fn length(self) -> Expr {
        self.method(Method::Length, Vec::new())
    }

    pub fn year(self) -> Expr {
        self.method(Method::Year, Vec::new())
    }

    pub fn month(self) -> Expr {
        self.method(Method::Month, Vec::new())
    }

    pub fn day(self) -> Expr {
        self.method(Method::Day, Vec::new())
    }

    pub fn count(self) -> Expr {
        self.method(Method::Aggregate(Aggregate::Count), Vec::new())
    }

    pub fn count_distinct(self) -> Expr {
        self.method(Method::Aggregate(Aggregate::CountDistinct), Vec::new())
    }

    pub fn sum(self) -> Expr {
        self.method(Method::Aggregate(Aggregate::Sum), Vec::new())
    }

    pub fn avg(self) -> Expr {
        self.method(Method::Aggregate(Aggregate::Avg), Vec::new())
    }

    pub fn min(self) -> Expr {
        self.method(Method::Aggregate(Aggregate::Min), Vec::new())
    }

    pub fn max(self) -> Expr {
        self.method(Method::Aggregate(Aggregate::Max), Vec::new())
    }

    /// Call an arbitrary method. Translation rejects it.
    pub fn call(self, name: &str, args: Vec<Expr>) -> Expr {
        self.method(Method::Other(name.to_string()), args)
    }
}

impl<R: IntoExpr> ops::Add<R> for Expr {
    type Output = Expr;

    fn add(self, rhs: R) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }
}

impl<R: IntoExpr> ops::Sub<R> for Expr {
    type Output = Expr;

    fn sub(self, rhs: R) -> Expr {
        self.binary(BinaryOp::Sub, rhs)
    }
}

impl<R: IntoExpr> ops::Mul<R> for Expr {
    type Output = Expr;

    fn mul(self, rhs: R) -> Expr {
        self.binary(BinaryOp::Mul, rhs)
    }
}

impl<R: IntoExpr> ops::Div<R> for Expr {
    type Output = Expr;

    fn div(self, rhs: R) -> Expr {
        self.binary(BinaryOp::Div, rhs)
    }
}

impl<R: IntoExpr> ops::BitAnd<R> for Expr {
    type Output = Expr;

    fn bitand(self, rhs: R) -> Expr {
        self.and(rhs)
    }
}

impl<R: IntoExpr> ops::BitOr<R> for Expr {
    type Output = Expr;

    fn bitor(self, rhs: R) -> Expr {
        self.or(rhs)
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary(UnaryOp::Not, Box::new(self))
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Member { table, path } => write!(f, "{}.{}", table, path.join(".")),
            Expr::Field(name) => write!(f, "{}", name),
            Expr::Constant(value) => write!(f, "{}", value),
            Expr::Binary(l, op, r) => write!(f, "({} {} {})", l, op, r),
            Expr::Unary(UnaryOp::Not, operand) => write!(f, "!{}", operand),
            Expr::Unary(UnaryOp::Neg, operand) => write!(f, "-{}", operand),
            Expr::Call {
                method,
                target,
                args,
            } => {
                if let Some(target) = target {
                    write!(f, "{}.", target)?;
                }
                write!(f, "{}(", method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Conditional {
                test,
                when_true,
                when_false,
            } => write!(f, "({} ? {} : {})", test, when_true, when_false),
        }
    }
}
