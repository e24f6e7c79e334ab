//! Intermediate SQL tree produced by the walker and rendered by the assembler.

use crate::schema::FieldType;
use std::any::TypeId;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

pub type SqlRef = Arc<SqlExpr>;

/// One FROM-item: a registered table under a query-unique alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProjection {
    pub type_id: TypeId,
    pub table: String,
    pub alias: String,
}

impl Display for TableProjection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.table, self.alias)
    }
}

/// A field of a projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub alias: String,
    pub field: String,
    pub field_type: FieldType,
}

impl Display for ColumnRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Like,
    In,
    NotIn,
    /// Membership in a Cargo list field
    Holds,
}

impl Display for SqlBinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let op = match self {
            SqlBinaryOp::Eq => "=",
            SqlBinaryOp::Ne => "!=",
            SqlBinaryOp::Lt => "<",
            SqlBinaryOp::Le => "<=",
            SqlBinaryOp::Gt => ">",
            SqlBinaryOp::Ge => ">=",
            SqlBinaryOp::Add => "+",
            SqlBinaryOp::Sub => "-",
            SqlBinaryOp::Mul => "*",
            SqlBinaryOp::Div => "/",
            SqlBinaryOp::Like => "LIKE",
            SqlBinaryOp::In => "IN",
            SqlBinaryOp::NotIn => "NOT IN",
            SqlBinaryOp::Holds => "HOLDS",
        };
        write!(f, "{}", op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlUnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// Logical connectives for conjunction nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Display for Connective {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Connective::And => write!(f, "AND"),
            Connective::Or => write!(f, "OR"),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl Display for SortDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Translated expression. Children are shared, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlExpr {
    Table(TableProjection),
    Column(ColumnRef),
    Binary(SqlRef, SqlBinaryOp, SqlRef),
    Unary(SqlUnaryOp, SqlRef),
    /// Already escaped literal text
    Literal(String),
    Function {
        name: &'static str,
        distinct: bool,
        args: Vec<SqlRef>,
    },
    /// `a AND b AND c` / `a OR b OR c`
    Conjunction(Connective, Vec<SqlRef>),
    Ordering(SqlRef, SortDirection),
}

impl SqlExpr {
    pub fn column(alias: &str, field: &str, field_type: FieldType) -> SqlRef {
        Arc::new(SqlExpr::Column(ColumnRef {
            alias: alias.to_string(),
            field: field.to_string(),
            field_type,
        }))
    }

    /// Nodes that need parentheses when nested inside another operator
    fn is_composite(&self) -> bool {
        matches!(
            self,
            SqlExpr::Binary(..)
                | SqlExpr::Conjunction(..)
                | SqlExpr::Unary(SqlUnaryOp::Not | SqlUnaryOp::IsNull | SqlUnaryOp::IsNotNull, _)
        )
    }

    /// Every column reference in the tree, in render order.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            SqlExpr::Column(column) => out.push(column),
            SqlExpr::Table(_) | SqlExpr::Literal(_) => {}
            SqlExpr::Binary(l, _, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            SqlExpr::Unary(_, operand) | SqlExpr::Ordering(operand, _) => {
                operand.collect_columns(out)
            }
            SqlExpr::Function { args, .. } | SqlExpr::Conjunction(_, args) => {
                for arg in args {
                    arg.collect_columns(out);
                }
            }
        }
    }

    /// Whether the tree contains an aggregate call
    pub fn has_aggregate(&self) -> bool {
        match self {
            SqlExpr::Function { name, args, .. } => {
                matches!(*name, "COUNT" | "SUM" | "AVG" | "MIN" | "MAX")
                    || args.iter().any(|a| a.has_aggregate())
            }
            SqlExpr::Binary(l, _, r) => l.has_aggregate() || r.has_aggregate(),
            SqlExpr::Unary(_, operand) | SqlExpr::Ordering(operand, _) => operand.has_aggregate(),
            SqlExpr::Conjunction(_, terms) => terms.iter().any(|t| t.has_aggregate()),
            SqlExpr::Table(_) | SqlExpr::Column(_) | SqlExpr::Literal(_) => false,
        }
    }
}

/// Output aliases substituted for matching subtrees while printing
pub type AliasMap<'a> = &'a [(SqlRef, String)];

/// Renders a tree, optionally replacing projected expressions by their alias.
pub struct Printer<'a> {
    tree: &'a SqlExpr,
    aliases: AliasMap<'a>,
}

impl<'a> Printer<'a> {
    pub fn new(tree: &'a SqlExpr, aliases: AliasMap<'a>) -> Self {
        Self { tree, aliases }
    }

    fn write(&self, expr: &SqlExpr, out: &mut Formatter<'_>) -> fmt::Result {
        if let Some((_, alias)) = self.aliases.iter().find(|(e, _)| **e == *expr) {
            return write!(out, "{}", alias);
        }
        match expr {
            SqlExpr::Table(table) => write!(out, "{}", table),
            SqlExpr::Column(column) => write!(out, "{}", column),
            SqlExpr::Literal(text) => write!(out, "{}", text),
            SqlExpr::Binary(l, op, r) => {
                self.write_operand(l, out)?;
                write!(out, " {} ", op)?;
                self.write_operand(r, out)
            }
            SqlExpr::Unary(op, operand) => match op {
                SqlUnaryOp::Not => {
                    write!(out, "NOT ")?;
                    self.write_operand(operand, out)
                }
                SqlUnaryOp::Neg => {
                    write!(out, "-")?;
                    // `--` would start a comment
                    let signed = match &**operand {
                        SqlExpr::Unary(SqlUnaryOp::Neg, _) => true,
                        SqlExpr::Literal(text) => text.starts_with('-'),
                        _ => false,
                    };
                    if signed {
                        write!(out, "(")?;
                        self.write(operand, out)?;
                        write!(out, ")")
                    } else {
                        self.write_operand(operand, out)
                    }
                }
                SqlUnaryOp::IsNull => {
                    self.write_operand(operand, out)?;
                    write!(out, " IS NULL")
                }
                SqlUnaryOp::IsNotNull => {
                    self.write_operand(operand, out)?;
                    write!(out, " IS NOT NULL")
                }
            },
            SqlExpr::Function {
                name,
                distinct,
                args,
            } => {
                write!(out, "{}(", name)?;
                if *distinct {
                    write!(out, "DISTINCT ")?;
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(out, ",")?;
                    }
                    self.write(arg, out)?;
                }
                write!(out, ")")
            }
            SqlExpr::Conjunction(connective, terms) => {
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(out, " {} ", connective)?;
                    }
                    self.write_operand(term, out)?;
                }
                Ok(())
            }
            SqlExpr::Ordering(term, direction) => {
                self.write_operand(term, out)?;
                write!(out, " {}", direction)
            }
        }
    }

    fn write_operand(&self, operand: &SqlExpr, out: &mut Formatter<'_>) -> fmt::Result {
        let aliased = self.aliases.iter().any(|(e, _)| **e == *operand);
        if operand.is_composite() && !aliased {
            write!(out, "(")?;
            self.write(operand, out)?;
            write!(out, ")")
        } else {
            self.write(operand, out)
        }
    }
}

impl Display for Printer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.write(self.tree, f)
    }
}

impl Display for SqlExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Printer::new(self, &[]).fmt(f)
    }
}
