//! Table reference extraction for SQL

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectName, Query, SelectItem, SetExpr,
    Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::{dialect_from_str, Dialect};
use sqlparser::parser::Parser;
use std::collections::HashSet;

use super::error::LineageError;
use super::tables::TableReference;

pub const DEFAULT_DIALECT: &str = "duckdb";

/// Given SQL text, return the tables it references.
///
/// Implementations report references in a stable order without duplicates
/// (identity is `full_name`) and must be callable from several threads.
pub trait TableReferenceExtractor: Send + Sync {
    fn extract(&self, sql: &str) -> Result<Vec<TableReference>, LineageError>;
}

/// Extractor backed by the `sqlparser` AST
#[derive(Debug, Clone)]
pub struct SqlParserExtractor {
    dialect_name: String,
}

impl SqlParserExtractor {
    /// Create an extractor for a dialect name understood by
    /// `sqlparser::dialect::dialect_from_str` (`duckdb`, `postgres`, `generic`, ...)
    pub fn new(dialect_name: &str) -> Result<Self, LineageError> {
        if dialect_from_str(dialect_name).is_none() {
            return Err(LineageError::UnknownDialect(dialect_name.to_string()));
        }
        Ok(Self {
            dialect_name: dialect_name.to_string(),
        })
    }

    pub fn dialect_name(&self) -> &str {
        &self.dialect_name
    }

    pub(crate) fn dialect(&self) -> Result<Box<dyn Dialect>, LineageError> {
        dialect_from_str(&self.dialect_name)
            .ok_or_else(|| LineageError::UnknownDialect(self.dialect_name.clone()))
    }
}

impl Default for SqlParserExtractor {
    fn default() -> Self {
        Self {
            dialect_name: DEFAULT_DIALECT.to_string(),
        }
    }
}

impl TableReferenceExtractor for SqlParserExtractor {
    fn extract(&self, sql: &str) -> Result<Vec<TableReference>, LineageError> {
        let dialect = self.dialect()?;
        let statements =
            Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| LineageError::sql_parse(sql, e))?;
        Ok(get_table_references(&statements))
    }
}

/// Extract table references from parsed statements, in first-appearance order
pub fn get_table_references(statements: &[Statement]) -> Vec<TableReference> {
    let mut collector = ReferenceCollector::default();

    for statement in statements {
        if let Statement::Query(query) = statement {
            collector.visit_query(query);
        }
    }

    collector.finish()
}

#[derive(Default)]
struct ReferenceCollector {
    seen: HashSet<String>,
    tables: Vec<TableReference>,
    cte_names: HashSet<String>,
}

impl ReferenceCollector {
    fn visit_query(&mut self, query: &Query) {
        // CTE names are aliases, not tables; remember them so they can be dropped
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.clone());
                self.visit_query(&cte.query);
            }
        }

        self.visit_set_expr(&query.body);
    }

    fn visit_set_expr(&mut self, expr: &SetExpr) {
        match expr {
            SetExpr::Select(select) => {
                for table_with_joins in &select.from {
                    self.visit_table_with_joins(table_with_joins);
                }

                if let Some(selection) = &select.selection {
                    self.visit_expr(selection);
                }

                for item in &select.projection {
                    match item {
                        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                            self.visit_expr(expr)
                        }
                        _ => {}
                    }
                }

                if let Some(having) = &select.having {
                    self.visit_expr(having);
                }
            }
            SetExpr::Query(subquery) => self.visit_query(subquery),
            SetExpr::SetOperation { left, right, .. } => {
                // UNION, INTERSECT, EXCEPT
                self.visit_set_expr(left);
                self.visit_set_expr(right);
            }
            _ => {}
        }
    }

    fn visit_table_with_joins(&mut self, table_with_joins: &TableWithJoins) {
        self.visit_relation(&table_with_joins.relation);
        for join in &table_with_joins.joins {
            self.visit_relation(&join.relation);
        }
    }

    fn visit_relation(&mut self, relation: &TableFactor) {
        match relation {
            TableFactor::Table { name, .. } => self.push(name),
            TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
            TableFactor::TableFunction { expr, .. } => self.visit_expr(expr),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.visit_table_with_joins(table_with_joins),
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Subquery(subquery) => self.visit_query(subquery),
            Expr::InSubquery { expr, subquery, .. } => {
                self.visit_expr(expr);
                self.visit_query(subquery);
            }
            Expr::Exists { subquery, .. } => self.visit_query(subquery),
            Expr::BinaryOp { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
                self.visit_expr(expr)
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.visit_expr(expr);
                self.visit_expr(low);
                self.visit_expr(high);
            }
            Expr::InList { expr, list, .. } => {
                self.visit_expr(expr);
                for item in list {
                    self.visit_expr(item);
                }
            }
            Expr::Function(func) => match &func.args {
                FunctionArguments::Subquery(subquery) => self.visit_query(subquery),
                FunctionArguments::List(list) => {
                    for arg in &list.args {
                        match arg {
                            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
                            | FunctionArg::Named {
                                arg: FunctionArgExpr::Expr(expr),
                                ..
                            } => self.visit_expr(expr),
                            _ => {}
                        }
                    }
                }
                FunctionArguments::None => {}
            },
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
                ..
            } => {
                if let Some(operand) = operand {
                    self.visit_expr(operand);
                }
                for condition in conditions {
                    self.visit_expr(condition);
                }
                for result in results {
                    self.visit_expr(result);
                }
                if let Some(else_result) = else_result {
                    self.visit_expr(else_result);
                }
            }
            _ => {}
        }
    }

    fn push(&mut self, name: &ObjectName) {
        let reference = TableReference::from_parts(name.0.iter().map(|ident| ident.value.as_str()));
        if self.seen.insert(reference.full_name.clone()) {
            self.tables.push(reference);
        }
    }

    fn finish(self) -> Vec<TableReference> {
        let cte_names = self.cte_names;
        self.tables
            .into_iter()
            .filter(|table| !cte_names.contains(&table.full_name))
            .collect()
    }
}
