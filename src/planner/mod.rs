use std::sync::Arc;

use sqlparser::ast::{
    self, BinaryOperator, Expr, FunctionArg, FunctionArgExpr, JoinConstraint, JoinOperator,
    SelectItem, SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::catalog::ColumnType;
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::executor::agg::HashAgg;
use crate::executor::command::{Command, CommandOperator};
use crate::executor::ddl::{DdlStatement, PhysicalDdl};
use crate::executor::dml::{PhysicalDelete, PhysicalInsert, PhysicalUpdate};
use crate::executor::filter::Filter;
use crate::executor::join::{JoinType, NestedLoopJoin};
use crate::executor::query::PhysicalQuery;
use crate::executor::scan::{location_scan_over_table, IndexScan, TableScan};
use crate::executor::sort::{Sort, SortMethod};
use crate::executor::PhysicalOperator;
use crate::storage::tuple::{Row, TableColumn, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
}

#[derive(Debug, Clone)]
pub enum Operand {
    Column(TableColumn),
    Const(Value),
}

/// A single comparison, the only predicate shape scans understand.
#[derive(Debug, Clone)]
pub struct Condition {
    pub left: Operand,
    pub sign: CompareOp,
    pub right: Operand,
}

impl Condition {
    pub fn columns(&self) -> Vec<&TableColumn> {
        let mut columns = Vec::new();
        for operand in [&self.left, &self.right].iter() {
            if let Operand::Column(column) = operand {
                columns.push(column);
            }
        }
        columns
    }
}

#[derive(Debug, Clone)]
pub struct InsertOperator {
    pub table_name: String,
    pub columns: Vec<TableColumn>,
    pub values: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct UpdateOperator {
    pub table_name: String,
    pub columns: Vec<TableColumn>,
    pub values: Vec<Value>,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone)]
pub struct DeleteOperator {
    pub table_name: String,
    pub condition: Option<Condition>,
}

pub struct Plan {
    pub root: Box<dyn PhysicalOperator + Send>,
    /// Commands (CHECKPOINT, SHOW) run outside a transaction.
    pub is_command: bool,
}

impl Plan {
    fn query(root: Box<dyn PhysicalOperator + Send>) -> Self {
        Self {
            root,
            is_command: false,
        }
    }

    fn command(root: Box<dyn PhysicalOperator + Send>) -> Self {
        Self {
            root,
            is_command: true,
        }
    }
}

/// Parses one SQL statement and translates it, rule-based, into a
/// physical operator tree.
pub fn plan_query(db: &Arc<Database>, sql: &str) -> DbResult<Plan> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    // CHECKPOINT is not SQL; dispatch it before the parser sees it
    if trimmed.eq_ignore_ascii_case("checkpoint") {
        return Ok(Plan::command(Box::new(CommandOperator::new(
            Arc::clone(db),
            Command::Checkpoint,
        ))));
    }

    let statements = Parser::parse_sql(&GenericDialect {}, trimmed)
        .map_err(|e| DbError::LogicalPlan(format!("syntax error: {}", e)))?;
    if statements.len() != 1 {
        return Err(DbError::LogicalPlan(
            "expected exactly one statement".to_string(),
        ));
    }

    match &statements[0] {
        Statement::Query(query) => plan_select(db, query),
        Statement::Insert {
            table_name,
            columns,
            source,
            ..
        } => plan_insert(db, table_name, columns, source),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => plan_update(db, table, assignments, selection),
        Statement::Delete {
            table_name: delete_table,
            selection,
            ..
        } => plan_delete(db, delete_table, selection),
        Statement::CreateTable { name, columns, .. } => plan_create_table(db, name, columns),
        Statement::CreateIndex {
            name,
            table_name,
            columns,
            ..
        } => plan_create_index(db, name, table_name, columns),
        Statement::ShowVariable { variable } => {
            let name = variable
                .first()
                .map(|v| v.value.clone())
                .unwrap_or_default();
            Ok(Plan::command(Box::new(CommandOperator::new(
                Arc::clone(db),
                Command::Show(name),
            ))))
        }
        other => Err(DbError::LogicalPlan(format!(
            "unsupported statement: {}",
            other
        ))),
    }
}

fn table_factor_name(factor: &TableFactor) -> DbResult<String> {
    match factor {
        TableFactor::Table { name, .. } => Ok(name.to_string()),
        other => Err(DbError::LogicalPlan(format!(
            "unsupported table expression: {}",
            other
        ))),
    }
}

/// `t1.id` or a bare `id` qualified against the tables in scope.
fn idents_to_column(db: &Database, tables: &[String], idents: &[ast::Ident]) -> DbResult<TableColumn> {
    match idents {
        [table, column] => Ok(TableColumn::new(&table.value, &column.value)),
        [column] => {
            for table in tables {
                if let Ok(form) = db.catalog().table(table) {
                    if form.column_index(&column.value).is_some() {
                        return Ok(TableColumn::new(table, &column.value));
                    }
                }
            }
            Err(DbError::LogicalPlan(format!(
                "cannot resolve column {}",
                column.value
            )))
        }
        _ => Err(DbError::LogicalPlan("bad column reference".to_string())),
    }
}

fn expr_to_value(expr: &Expr) -> DbResult<Value> {
    match expr {
        Expr::Value(ast::Value::Number(text, _)) => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| DbError::LogicalPlan(format!("not an integer: {}", text))),
        Expr::Value(ast::Value::SingleQuotedString(text)) => Ok(Value::Text(text.clone())),
        Expr::Value(ast::Value::Null) => Ok(Value::Null),
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => match expr_to_value(expr)? {
            Value::Int(v) => Ok(Value::Int(-v)),
            other => Err(DbError::LogicalPlan(format!("cannot negate {}", other))),
        },
        other => Err(DbError::LogicalPlan(format!(
            "unsupported literal: {}",
            other
        ))),
    }
}

fn expr_to_operand(db: &Database, tables: &[String], expr: &Expr) -> DbResult<Operand> {
    match expr {
        Expr::CompoundIdentifier(idents) => {
            Ok(Operand::Column(idents_to_column(db, tables, idents)?))
        }
        Expr::Identifier(ident) => Ok(Operand::Column(idents_to_column(
            db,
            tables,
            std::slice::from_ref(ident),
        )?)),
        other => Ok(Operand::Const(expr_to_value(other)?)),
    }
}

fn expr_to_condition(db: &Database, tables: &[String], expr: &Expr) -> DbResult<Condition> {
    match expr {
        Expr::Nested(inner) => expr_to_condition(db, tables, inner),
        Expr::BinaryOp { left, op, right } => {
            let sign = match op {
                BinaryOperator::Eq => CompareOp::Eq,
                BinaryOperator::NotEq => CompareOp::NotEq,
                BinaryOperator::Lt => CompareOp::Lt,
                BinaryOperator::Gt => CompareOp::Gt,
                other => {
                    return Err(DbError::LogicalPlan(format!(
                        "unsupported comparison: {}",
                        other
                    )))
                }
            };
            Ok(Condition {
                left: expr_to_operand(db, tables, left)?,
                sign,
                right: expr_to_operand(db, tables, right)?,
            })
        }
        other => Err(DbError::LogicalPlan(format!(
            "unsupported predicate: {}",
            other
        ))),
    }
}

/// The single scan choice the planner makes: when the predicate compares
/// the leading column of some index with a constant, the index serves the
/// scan. It is covered when the projection needs nothing but indexed
/// columns.
fn plan_scan(
    db: &Arc<Database>,
    table: &str,
    condition: Option<Condition>,
    target_columns: &[TableColumn],
) -> DbResult<Box<dyn PhysicalOperator + Send>> {
    if let Some(condition) = &condition {
        if matches!(
            condition.sign,
            CompareOp::Eq | CompareOp::Lt | CompareOp::Gt
        ) {
            let columns = condition.columns();
            let constants = matches!(condition.left, Operand::Const(_))
                || matches!(condition.right, Operand::Const(_));
            if columns.len() == 1 && constants {
                let column = columns[0];
                for index in db.catalog().indexes_of_table(table) {
                    if index.columns.first().map(String::as_str)
                        != Some(column.column_name.as_str())
                    {
                        continue;
                    }
                    let indexed: Vec<TableColumn> = index
                        .columns
                        .iter()
                        .map(|c| TableColumn::new(table, c))
                        .collect();
                    let covered = !target_columns.is_empty()
                        && target_columns.iter().all(|c| indexed.contains(c));
                    let scan = if covered {
                        IndexScan::new_covered(
                            Arc::clone(db),
                            &index.index_name,
                            condition.clone(),
                        )
                    } else {
                        IndexScan::new(Arc::clone(db), &index.index_name, condition.clone())
                    };
                    return Ok(Box::new(scan));
                }
            }
        }
    }
    Ok(Box::new(TableScan::new(Arc::clone(db), table, condition)))
}

fn expand_projection(
    db: &Database,
    tables: &[String],
    projection: &[SelectItem],
) -> DbResult<Vec<TableColumn>> {
    let mut columns = Vec::new();
    for item in projection {
        match item {
            SelectItem::Wildcard(_) => {
                for table in tables {
                    for column in &db.catalog().table(table)?.columns {
                        columns.push(TableColumn::new(table, column));
                    }
                }
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let table = name.to_string();
                for column in &db.catalog().table(&table)?.columns {
                    columns.push(TableColumn::new(&table, column));
                }
            }
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(idents)) => {
                columns.push(idents_to_column(db, tables, idents)?);
            }
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                columns.push(idents_to_column(db, tables, std::slice::from_ref(ident))?);
            }
            other => {
                return Err(DbError::LogicalPlan(format!(
                    "unsupported select item: {}",
                    other
                )))
            }
        }
    }
    Ok(columns)
}

/// Finds the single aggregate call in the projection, if any, returning
/// the function name and its argument column.
fn find_aggregate(
    db: &Database,
    tables: &[String],
    projection: &[SelectItem],
    group_by: &TableColumn,
) -> DbResult<Option<(String, TableColumn)>> {
    for item in projection {
        if let SelectItem::UnnamedExpr(Expr::Function(function)) = item {
            let name = function.name.to_string().to_lowercase();
            let column = match function.args.first() {
                Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))) => {
                    match expr_to_operand(db, tables, expr)? {
                        Operand::Column(column) => column,
                        Operand::Const(_) => {
                            return Err(DbError::LogicalPlan(
                                "aggregate argument must be a column".to_string(),
                            ))
                        }
                    }
                }
                Some(FunctionArg::Unnamed(FunctionArgExpr::Wildcard)) => group_by.clone(),
                _ => {
                    return Err(DbError::LogicalPlan(
                        "aggregate needs exactly one argument".to_string(),
                    ))
                }
            };
            return Ok(Some((name, column)));
        }
    }
    Ok(None)
}

fn plan_select(db: &Arc<Database>, query: &ast::Query) -> DbResult<Plan> {
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        other => {
            return Err(DbError::LogicalPlan(format!(
                "unsupported query shape: {}",
                other
            )))
        }
    };

    if select.from.len() != 1 {
        return Err(DbError::LogicalPlan(
            "exactly one FROM item is supported".to_string(),
        ));
    }
    let from = &select.from[0];
    let left_table = table_factor_name(&from.relation)?;
    let mut tables = vec![left_table.clone()];

    let mut child: Box<dyn PhysicalOperator + Send>;
    if from.joins.is_empty() {
        let condition = match &select.selection {
            None => None,
            Some(expr) => Some(expr_to_condition(db, &tables, expr)?),
        };
        // covered-index detection only cares about plain column items;
        // aggregate projections read through the table anyway
        let mut targets_hint = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(Expr::CompoundIdentifier(idents)) => {
                    targets_hint.push(idents_to_column(db, &tables, idents)?);
                }
                SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                    targets_hint.push(idents_to_column(
                        db,
                        &tables,
                        std::slice::from_ref(ident),
                    )?);
                }
                _ => {
                    targets_hint.clear();
                    break;
                }
            }
        }
        child = plan_scan(db, &left_table, condition, &targets_hint)?;
    } else {
        if from.joins.len() != 1 {
            return Err(DbError::LogicalPlan(
                "at most one join is supported".to_string(),
            ));
        }
        let join = &from.joins[0];
        let right_table = table_factor_name(&join.relation)?;
        tables.push(right_table.clone());

        let (join_type, constraint) = match &join.join_operator {
            JoinOperator::Inner(constraint) => (JoinType::Inner, Some(constraint)),
            JoinOperator::LeftOuter(constraint) => (JoinType::Left, Some(constraint)),
            JoinOperator::RightOuter(constraint) => (JoinType::Right, Some(constraint)),
            JoinOperator::FullOuter(constraint) => (JoinType::Full, Some(constraint)),
            JoinOperator::CrossJoin => (JoinType::Cross, None),
            other => {
                return Err(DbError::LogicalPlan(format!(
                    "unsupported join: {:?}",
                    other
                )))
            }
        };
        let join_condition = match constraint {
            Some(JoinConstraint::On(expr)) => Some(expr_to_condition(db, &tables, expr)?),
            Some(JoinConstraint::None) | None => None,
            Some(other) => {
                return Err(DbError::LogicalPlan(format!(
                    "unsupported join constraint: {:?}",
                    other
                )))
            }
        };

        child = Box::new(NestedLoopJoin::new(
            join_type,
            &left_table,
            &right_table,
            join_condition,
            Box::new(TableScan::new(Arc::clone(db), &left_table, None)),
            Box::new(TableScan::new(Arc::clone(db), &right_table, None)),
        ));

        // a WHERE alongside a join filters the joined rows
        if let Some(expr) = &select.selection {
            let condition = expr_to_condition(db, &tables, expr)?;
            child = Box::new(Filter::new(condition, child));
        }
    }

    // GROUP BY with one aggregate
    let target_columns;
    if let Some(group_expr) = select.group_by.first() {
        if select.group_by.len() != 1 {
            return Err(DbError::LogicalPlan(
                "only one GROUP BY column is supported".to_string(),
            ));
        }
        let group_column = match expr_to_operand(db, &tables, group_expr)? {
            Operand::Column(column) => column,
            Operand::Const(_) => {
                return Err(DbError::LogicalPlan(
                    "GROUP BY needs a column".to_string(),
                ))
            }
        };
        let (function_name, aggregate_column) =
            find_aggregate(db, &tables, &select.projection, &group_column)?.ok_or_else(
                || DbError::LogicalPlan("GROUP BY requires an aggregate".to_string()),
            )?;
        child = Box::new(HashAgg::new(
            Arc::clone(db),
            group_column.clone(),
            &function_name,
            aggregate_column.clone(),
            child,
        ));
        target_columns = vec![group_column, aggregate_column];
    } else {
        if find_aggregate(db, &tables, &select.projection, &TableColumn::bare(""))?.is_some() {
            return Err(DbError::LogicalPlan(
                "aggregates require GROUP BY".to_string(),
            ));
        }
        target_columns = expand_projection(db, &tables, &select.projection)?;
        if target_columns.is_empty() {
            return Err(DbError::LogicalPlan("empty select list".to_string()));
        }
    }

    // ORDER BY
    if let Some(order) = query.order_by.first() {
        if query.order_by.len() != 1 {
            return Err(DbError::LogicalPlan(
                "only one ORDER BY column is supported".to_string(),
            ));
        }
        let sort_column = match expr_to_operand(db, &tables, &order.expr)? {
            Operand::Column(column) => column,
            Operand::Const(_) => {
                return Err(DbError::LogicalPlan("ORDER BY needs a column".to_string()))
            }
        };
        let method = if db.config().sort_external {
            SortMethod::External
        } else {
            SortMethod::Internal
        };
        child = Box::new(Sort::new(
            Arc::clone(db),
            sort_column,
            order.asc.unwrap_or(true),
            method,
            child,
        ));
    }

    Ok(Plan::query(Box::new(PhysicalQuery::new(
        target_columns,
        child,
    ))))
}

fn plan_insert(
    db: &Arc<Database>,
    table_name: &ast::ObjectName,
    columns: &[ast::Ident],
    source: &ast::Query,
) -> DbResult<Plan> {
    let table = table_name.to_string();
    let statement_columns: Vec<TableColumn> = if columns.is_empty() {
        db.catalog()
            .table(&table)?
            .columns
            .iter()
            .map(|c| TableColumn::new(&table, c))
            .collect()
    } else {
        columns
            .iter()
            .map(|c| TableColumn::new(&table, &c.value))
            .collect()
    };

    let rows = match source.body.as_ref() {
        SetExpr::Values(values) => {
            let mut rows = Vec::with_capacity(values.rows.len());
            for value_row in &values.rows {
                rows.push(
                    value_row
                        .iter()
                        .map(expr_to_value)
                        .collect::<DbResult<Row>>()?,
                );
            }
            rows
        }
        other => {
            return Err(DbError::LogicalPlan(format!(
                "INSERT only accepts VALUES, got {}",
                other
            )))
        }
    };

    let logical = InsertOperator {
        table_name: table,
        columns: statement_columns,
        values: rows,
    };
    Ok(Plan::query(Box::new(PhysicalInsert::new(
        Arc::clone(db),
        logical,
    ))))
}

fn plan_update(
    db: &Arc<Database>,
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> DbResult<Plan> {
    let table_name = table_factor_name(&table.relation)?;
    let tables = vec![table_name.clone()];

    let mut columns = Vec::new();
    let mut values = Vec::new();
    for assignment in assignments {
        columns.push(idents_to_column(db, &tables, &assignment.id)?);
        values.push(expr_to_value(&assignment.value)?);
    }

    let condition = match selection {
        None => None,
        Some(expr) => Some(expr_to_condition(db, &tables, expr)?),
    };

    let logical = UpdateOperator {
        table_name: table_name.clone(),
        columns,
        values,
        condition: condition.clone(),
    };
    let child = location_scan_over_table(Arc::clone(db), &table_name, condition);
    Ok(Plan::query(Box::new(PhysicalUpdate::new(
        Arc::clone(db),
        logical,
        child,
    ))))
}

fn plan_delete(
    db: &Arc<Database>,
    from: &ast::TableFactor,
    selection: &Option<Expr>,
) -> DbResult<Plan> {
    let table_name = table_factor_name(from)?;
    let tables = vec![table_name.clone()];

    let condition = match selection {
        None => None,
        Some(expr) => Some(expr_to_condition(db, &tables, expr)?),
    };

    let logical = DeleteOperator {
        table_name: table_name.clone(),
        condition: condition.clone(),
    };
    let child = location_scan_over_table(Arc::clone(db), &table_name, condition);
    Ok(Plan::query(Box::new(PhysicalDelete::new(
        Arc::clone(db),
        logical,
        child,
    ))))
}

fn plan_create_table(
    db: &Arc<Database>,
    name: &ast::ObjectName,
    columns: &[ast::ColumnDef],
) -> DbResult<Plan> {
    let mut column_defs = Vec::new();
    for column in columns {
        let column_type = match &column.data_type {
            ast::DataType::Int(_) | ast::DataType::Integer(_) => ColumnType::Int,
            ast::DataType::Text | ast::DataType::Varchar(_) => ColumnType::Text,
            other => {
                return Err(DbError::LogicalPlan(format!(
                    "not supported this type {}",
                    other
                )))
            }
        };
        column_defs.push((column.name.value.clone(), column_type));
    }
    Ok(Plan::query(Box::new(PhysicalDdl::new(
        Arc::clone(db),
        DdlStatement::CreateTable {
            table_name: name.to_string(),
            columns: column_defs,
        },
    ))))
}

fn plan_create_index(
    db: &Arc<Database>,
    name: &ast::ObjectName,
    table_name: &ast::ObjectName,
    columns: &[ast::OrderByExpr],
) -> DbResult<Plan> {
    let mut column_names = Vec::new();
    for column in columns {
        match &column.expr {
            Expr::Identifier(ident) => column_names.push(ident.value.clone()),
            Expr::CompoundIdentifier(idents) => {
                let ident = idents.last().ok_or_else(|| {
                    DbError::LogicalPlan("bad index column".to_string())
                })?;
                column_names.push(ident.value.clone());
            }
            other => {
                return Err(DbError::LogicalPlan(format!(
                    "unsupported index column: {}",
                    other
                )))
            }
        }
    }
    Ok(Plan::query(Box::new(PhysicalDdl::new(
        Arc::clone(db),
        DdlStatement::CreateIndex {
            index_name: name.to_string(),
            table_name: table_name.to_string(),
            columns: column_names,
        },
    ))))
}
