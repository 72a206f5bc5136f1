//! Structured SQL statement builders
//!
//! Translates WHERE descriptions, value sets and row lists into
//! parameterized SQL. Statements are assembled with backtick identifiers and
//! converted to the target [`Dialect`] as the last step. Every operand is a
//! bound parameter; nothing supplied by the caller is interpolated into the
//! SQL text except identifiers, which are always quoted.
//!
//! Conditions in a [`Where`] are joined with `AND`. `OR` composition is not
//! supported.

use super::dialect::{backtick_identifier, Dialect};
use super::error::{DatabaseError, Result};
use super::value::{DatabaseValue, Param, ParamKey, ParamType, Params};
use std::collections::HashSet;
use std::str::FromStr;

/// SQL comparison operators taking a single operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to (=)
    Eq,
    /// Not equal to (!=)
    NotEq,
    /// Not equal to (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// NULL-safe equality (<=>)
    NullSafeEq,
    /// IS
    Is,
    /// IS NOT
    IsNot,
    /// LIKE pattern matching
    Like,
    /// NOT LIKE pattern matching
    NotLike,
}

impl Operator {
    fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::NullSafeEq => "<=>",
            Operator::Is => "IS",
            Operator::IsNot => "IS NOT",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
        }
    }
}

impl FromStr for Operator {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_lowercase().as_str() {
            "=" => Ok(Operator::Eq),
            "!=" => Ok(Operator::NotEq),
            "<>" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "<=>" => Ok(Operator::NullSafeEq),
            "is" => Ok(Operator::Is),
            "is not" => Ok(Operator::IsNot),
            "like" => Ok(Operator::Like),
            "not like" => Ok(Operator::NotLike),
            _ => Err(DatabaseError::UnknownOperator(s.to_string())),
        }
    }
}

/// Condition on one column
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `col = value`
    Eq(DatabaseValue),
    /// `col OP value`
    Compare(Operator, DatabaseValue),
    /// `col BETWEEN lo AND hi`
    Between(DatabaseValue, DatabaseValue),
    /// `col NOT BETWEEN lo AND hi`
    NotBetween(DatabaseValue, DatabaseValue),
    /// `col IN (...)`
    In(Vec<DatabaseValue>),
    /// `col NOT IN (...)`
    NotIn(Vec<DatabaseValue>),
}

impl Condition {
    /// Build a condition from operator text and its operands.
    ///
    /// Single-value operators take exactly one operand, `between` and
    /// `not between` exactly two, `in` and `not in` any number.
    pub fn parse(operator: &str, mut operands: Vec<DatabaseValue>) -> Result<Self> {
        let normalized = operator
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        match normalized.as_str() {
            "between" | "not between" => {
                if operands.len() != 2 {
                    return Err(DatabaseError::invalid_params(format!(
                        "{} needs exactly 2 operands, got {}",
                        normalized,
                        operands.len()
                    )));
                }
                let hi = operands.pop().unwrap_or(DatabaseValue::Null);
                let lo = operands.pop().unwrap_or(DatabaseValue::Null);
                Ok(if normalized == "between" {
                    Condition::Between(lo, hi)
                } else {
                    Condition::NotBetween(lo, hi)
                })
            }
            "in" => Ok(Condition::In(operands)),
            "not in" => Ok(Condition::NotIn(operands)),
            _ => {
                let op: Operator = operator.parse()?;
                if operands.len() != 1 {
                    return Err(DatabaseError::invalid_params(format!(
                        "{} needs exactly 1 operand, got {}",
                        op.as_sql(),
                        operands.len()
                    )));
                }
                let value = operands.pop().unwrap_or(DatabaseValue::Null);
                Ok(match op {
                    Operator::Eq => Condition::Eq(value),
                    op => Condition::Compare(op, value),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WhereEntry {
    column: String,
    condition: Condition,
    param_type: ParamType,
}

/// WHERE description: column conditions joined with `AND`, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    entries: Vec<WhereEntry>,
}

impl Where {
    /// Create an empty description (matches every row)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition on `column`
    #[must_use]
    pub fn condition(mut self, column: impl Into<String>, condition: Condition) -> Self {
        self.entries.push(WhereEntry {
            column: column.into(),
            condition,
            param_type: ParamType::Str,
        });
        self
    }

    /// Add a `column = value` condition
    #[must_use]
    pub fn eq(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.condition(column, Condition::Eq(value.into()))
    }

    /// Add a `column OP value` condition
    #[must_use]
    pub fn compare(
        self,
        column: impl Into<String>,
        op: Operator,
        value: impl Into<DatabaseValue>,
    ) -> Self {
        self.condition(column, Condition::Compare(op, value.into()))
    }

    /// Add a `column LIKE pattern` condition
    #[must_use]
    pub fn like(self, column: impl Into<String>, pattern: &str) -> Self {
        self.compare(column, Operator::Like, pattern)
    }

    /// Add a `column IS NULL` condition
    #[must_use]
    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.compare(column, Operator::Is, DatabaseValue::Null)
    }

    /// Add a `column IS NOT NULL` condition
    #[must_use]
    pub fn is_not_null(self, column: impl Into<String>) -> Self {
        self.compare(column, Operator::IsNot, DatabaseValue::Null)
    }

    /// Add a `column BETWEEN lo AND hi` condition
    #[must_use]
    pub fn between(
        self,
        column: impl Into<String>,
        lo: impl Into<DatabaseValue>,
        hi: impl Into<DatabaseValue>,
    ) -> Self {
        self.condition(column, Condition::Between(lo.into(), hi.into()))
    }

    /// Add a `column NOT BETWEEN lo AND hi` condition
    #[must_use]
    pub fn not_between(
        self,
        column: impl Into<String>,
        lo: impl Into<DatabaseValue>,
        hi: impl Into<DatabaseValue>,
    ) -> Self {
        self.condition(column, Condition::NotBetween(lo.into(), hi.into()))
    }

    /// Add a `column IN (...)` condition
    #[must_use]
    pub fn is_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.condition(
            column,
            Condition::In(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Add a `column NOT IN (...)` condition
    #[must_use]
    pub fn not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.condition(
            column,
            Condition::NotIn(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Add a condition spelled as operator text, e.g. `("not between", [1, 9])`
    pub fn operator<I, V>(self, column: impl Into<String>, operator: &str, operands: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let condition = Condition::parse(operator, operands.into_iter().map(Into::into).collect())?;
        Ok(self.condition(column, condition))
    }

    /// Bind the operands of the most recently added condition with `param_type`
    #[must_use]
    pub fn with_type(mut self, param_type: ParamType) -> Self {
        if let Some(last) = self.entries.last_mut() {
            last.param_type = param_type;
        }
        self
    }

    /// Whether no condition was added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of conditions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Columns referenced, in insertion order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.column.as_str())
    }
}

/// Ordered column/value set for INSERT rows and UPDATE assignments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    entries: Vec<(String, Param)>,
}

impl Values {
    /// Create an empty value set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `column` to `value`, replacing an earlier value for the same column
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Param>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
        self
    }

    /// Column names in insertion order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    /// Whether no column is set
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of columns set
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn iter(&self) -> impl Iterator<Item = &(String, Param)> {
        self.entries.iter()
    }
}

impl<K: Into<String>, P: Into<Param>> FromIterator<(K, P)> for Values {
    fn from_iter<I: IntoIterator<Item = (K, P)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Values::new(), |values, (k, v)| values.set(k, v))
    }
}

/// SQL text plus the parameters it references
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Params,
}

/// A WHERE clause (including the `WHERE` keyword) or nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Params,
}

impl Fragment {
    /// Whether the fragment emits no SQL
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Hands out placeholder names that are unique within one statement
#[derive(Debug, Default)]
pub struct PlaceholderNames {
    taken: HashSet<String>,
}

impl PlaceholderNames {
    /// Create an allocator with no names taken
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a placeholder name derived from `base`.
    ///
    /// Characters that cannot appear in a placeholder become `_`; a clash
    /// with an earlier claim gets a numeric suffix.
    pub fn claim(&mut self, base: &str) -> String {
        let mut sanitized: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
            sanitized.insert(0, '_');
        }

        if self.taken.insert(sanitized.clone()) {
            return sanitized;
        }

        let mut n = 2usize;
        loop {
            let candidate = format!("{}_{}", sanitized, n);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Build the WHERE clause for `filter` in `dialect`.
///
/// An empty description yields an empty fragment without the `WHERE`
/// keyword. `IN` / `NOT IN` with no operands is an error.
pub fn build_where(filter: &Where, dialect: &dyn Dialect) -> Result<Fragment> {
    let mut names = PlaceholderNames::new();
    let fragment = where_fragment(filter, &mut names)?;
    Ok(Fragment {
        sql: dialect.convert_identifiers(&fragment.sql),
        params: fragment.params,
    })
}

fn where_fragment(filter: &Where, names: &mut PlaceholderNames) -> Result<Fragment> {
    let mut parts = Vec::with_capacity(filter.len());
    let mut params = Params::new();

    for entry in &filter.entries {
        let column = backtick_identifier(&entry.column);
        let mut bind = |base: &str, value: &DatabaseValue| -> String {
            let name = names.claim(base);
            params.insert(
                ParamKey::Name(name.clone()),
                Param::Typed(value.clone(), entry.param_type),
            );
            format!(":{}", name)
        };

        let part = match &entry.condition {
            Condition::Eq(value) => format!("{} = {}", column, bind(&entry.column, value)),
            Condition::Compare(op @ (Operator::Is | Operator::IsNot), DatabaseValue::Null) => {
                format!("{} {} NULL", column, op.as_sql())
            }
            Condition::Compare(op, value) => {
                format!("{} {} {}", column, op.as_sql(), bind(&entry.column, value))
            }
            Condition::Between(lo, hi) | Condition::NotBetween(lo, hi) => {
                let keyword = if matches!(entry.condition, Condition::Between(..)) {
                    "BETWEEN"
                } else {
                    "NOT BETWEEN"
                };
                let from = bind(&format!("{}_FROM", entry.column), lo);
                let to = bind(&format!("{}_TO", entry.column), hi);
                format!("{} {} {} AND {}", column, keyword, from, to)
            }
            Condition::In(values) | Condition::NotIn(values) => {
                if values.is_empty() {
                    return Err(DatabaseError::EmptyInList(entry.column.clone()));
                }
                let keyword = if matches!(entry.condition, Condition::In(_)) {
                    "IN"
                } else {
                    "NOT IN"
                };
                let placeholders: Vec<String> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| bind(&format!("{}{}", entry.column, i), v))
                    .collect();
                format!("{} {} ({})", column, keyword, placeholders.join(", "))
            }
        };
        parts.push(part);
    }

    if parts.is_empty() {
        return Ok(Fragment::default());
    }

    Ok(Fragment {
        sql: format!("WHERE {}", parts.join(" AND ")),
        params,
    })
}

fn append_where(sql: &mut String, fragment: &Fragment) {
    if !fragment.is_empty() {
        sql.push(' ');
        sql.push_str(&fragment.sql);
    }
}

fn reject_lists(values: &Values) -> Result<()> {
    match values.iter().find(|(_, p)| matches!(p, Param::List(..))) {
        Some((column, _)) => Err(DatabaseError::invalid_params(format!(
            "column `{}` cannot take a list value",
            column
        ))),
        None => Ok(()),
    }
}

/// Column in a SELECT list, optionally aliased
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    name: String,
    alias: Option<String>,
}

impl SelectColumn {
    /// Plain column
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    /// Column selected under another name
    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }
}

/// SELECT query builder
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<SelectColumn>,
    filter: Where,
}

impl SelectBuilder {
    /// Create a new SELECT query builder
    ///
    /// # Example
    ///
    /// ```
    /// use dbapi::core::query_builder::{SelectBuilder, Where};
    /// use dbapi::DatabaseType;
    ///
    /// let stmt = SelectBuilder::new("Users")
    ///     .columns(&["Id", "Name"])
    ///     .filter(Where::new().eq("Active", 1))
    ///     .build(DatabaseType::Mysql.dialect())
    ///     .unwrap();
    /// assert_eq!(stmt.sql, "SELECT `Id`, `Name` FROM `Users` WHERE `Active` = :Active");
    /// ```
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filter: Where::new(),
        }
    }

    /// Select specific columns
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns
            .extend(columns.iter().map(|c| SelectColumn::new(*c)));
        self
    }

    /// Select `column AS alias`
    #[must_use]
    pub fn column_as(mut self, column: &str, alias: &str) -> Self {
        self.columns.push(SelectColumn::aliased(column, alias));
        self
    }

    /// Restrict rows with a WHERE description
    #[must_use]
    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = filter;
        self
    }

    /// Build the statement for `dialect`
    pub fn build(&self, dialect: &dyn Dialect) -> Result<Statement> {
        let fields = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| match &c.alias {
                    Some(alias) => format!(
                        "{} AS {}",
                        backtick_identifier(&c.name),
                        backtick_identifier(alias)
                    ),
                    None => backtick_identifier(&c.name),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        let fragment = where_fragment(&self.filter, &mut PlaceholderNames::new())?;
        let mut sql = format!(
            "SELECT {} FROM {}",
            fields,
            backtick_identifier(&self.table)
        );
        append_where(&mut sql, &fragment);

        Ok(Statement {
            sql: dialect.convert_identifiers(&sql),
            params: fragment.params,
        })
    }
}

/// Column alias carrying the row count of a [`CountBuilder`] statement
pub const COUNT_COLUMN: &str = "Count";

/// `SELECT COUNT(*)` builder
#[derive(Debug, Clone)]
pub struct CountBuilder {
    table: String,
    filter: Where,
}

impl CountBuilder {
    /// Create a new COUNT query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Where::new(),
        }
    }

    /// Restrict rows with a WHERE description
    #[must_use]
    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = filter;
        self
    }

    /// Build the statement for `dialect`
    pub fn build(&self, dialect: &dyn Dialect) -> Result<Statement> {
        let fragment = where_fragment(&self.filter, &mut PlaceholderNames::new())?;
        let mut sql = format!(
            "SELECT COUNT(*) AS {} FROM {}",
            backtick_identifier(COUNT_COLUMN),
            backtick_identifier(&self.table)
        );
        append_where(&mut sql, &fragment);

        Ok(Statement {
            sql: dialect.convert_identifiers(&sql),
            params: fragment.params,
        })
    }
}

/// INSERT query builder (one row, named placeholders)
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    values: Values,
}

impl InsertBuilder {
    /// Create a new INSERT query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Values::new(),
        }
    }

    /// Add a column-value pair
    #[must_use]
    pub fn value(mut self, column: &str, value: impl Into<Param>) -> Self {
        self.values = self.values.set(column, value);
        self
    }

    /// Replace the whole value set
    #[must_use]
    pub fn values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    /// Build the statement for `dialect`
    pub fn build(&self, dialect: &dyn Dialect) -> Result<Statement> {
        if self.values.is_empty() {
            return Err(DatabaseError::invalid_params(format!(
                "INSERT into `{}` needs at least one column",
                self.table
            )));
        }
        reject_lists(&self.values)?;

        let mut names = PlaceholderNames::new();
        let mut params = Params::new();
        let mut columns = Vec::with_capacity(self.values.len());
        let mut placeholders = Vec::with_capacity(self.values.len());

        for (column, value) in self.values.iter() {
            let name = names.claim(column);
            columns.push(backtick_identifier(column));
            placeholders.push(format!(":{}", name));
            params.insert(ParamKey::Name(name), value.clone());
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            backtick_identifier(&self.table),
            columns.join(", "),
            placeholders.join(", ")
        );

        Ok(Statement {
            sql: dialect.convert_identifiers(&sql),
            params,
        })
    }
}

/// Multi-row INSERT builder (positional placeholders)
#[derive(Debug, Clone)]
pub struct InsertMultiBuilder {
    table: String,
    rows: Vec<Values>,
}

impl InsertMultiBuilder {
    /// Create a new multi-row INSERT builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Vec::new(),
        }
    }

    /// Append one row
    #[must_use]
    pub fn row(mut self, values: Values) -> Self {
        self.rows.push(values);
        self
    }

    /// Append several rows
    #[must_use]
    pub fn rows(mut self, rows: impl IntoIterator<Item = Values>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Build the statement for `dialect`.
    ///
    /// Columns come from the first row; every other row must name the same
    /// columns in the same order.
    pub fn build(&self, dialect: &dyn Dialect) -> Result<Statement> {
        let first = self.rows.first().ok_or_else(|| {
            DatabaseError::invalid_params(format!("INSERT into `{}` has no rows", self.table))
        })?;
        if first.is_empty() {
            return Err(DatabaseError::invalid_params(format!(
                "INSERT into `{}` needs at least one column",
                self.table
            )));
        }

        let columns: Vec<&str> = first.columns().collect();
        let group = format!("({})", vec!["?"; columns.len()].join(", "));
        let mut flattened = Vec::with_capacity(columns.len() * self.rows.len());

        for (i, row) in self.rows.iter().enumerate() {
            reject_lists(row)?;
            if !row.columns().eq(columns.iter().copied()) {
                return Err(DatabaseError::invalid_params(format!(
                    "row {} of INSERT into `{}` does not match the columns of the first row",
                    i, self.table
                )));
            }
            flattened.extend(row.iter().map(|(_, p)| p.clone()));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            backtick_identifier(&self.table),
            columns
                .iter()
                .map(|c| backtick_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            vec![group; self.rows.len()].join(", ")
        );

        Ok(Statement {
            sql: dialect.convert_identifiers(&sql),
            params: Params::positional(flattened),
        })
    }
}

/// UPDATE query builder
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    values: Values,
    filter: Where,
}

impl UpdateBuilder {
    /// Create a new UPDATE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Values::new(),
            filter: Where::new(),
        }
    }

    /// Set a column value
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<Param>) -> Self {
        self.values = self.values.set(column, value);
        self
    }

    /// Replace the whole value set
    #[must_use]
    pub fn values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    /// Restrict rows with a WHERE description
    #[must_use]
    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = filter;
        self
    }

    /// Build the statement for `dialect`.
    ///
    /// SET placeholders are named `<column>_to_update` and claimed before the
    /// WHERE placeholders, so the two never share a name.
    pub fn build(&self, dialect: &dyn Dialect) -> Result<Statement> {
        if self.values.is_empty() {
            return Err(DatabaseError::invalid_params(format!(
                "UPDATE of `{}` needs at least one column",
                self.table
            )));
        }
        reject_lists(&self.values)?;

        let mut names = PlaceholderNames::new();
        let mut params = Params::new();
        let mut assignments = Vec::with_capacity(self.values.len());

        for (column, value) in self.values.iter() {
            let name = names.claim(&format!("{}_to_update", column));
            assignments.push(format!("{} = :{}", backtick_identifier(column), name));
            params.insert(ParamKey::Name(name), value.clone());
        }

        let fragment = where_fragment(&self.filter, &mut names)?;
        params.extend(fragment.params.clone());

        let mut sql = format!(
            "UPDATE {} SET {}",
            backtick_identifier(&self.table),
            assignments.join(", ")
        );
        append_where(&mut sql, &fragment);

        Ok(Statement {
            sql: dialect.convert_identifiers(&sql),
            params,
        })
    }
}

/// DELETE query builder
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    filter: Where,
}

impl DeleteBuilder {
    /// Create a new DELETE query builder
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Where::new(),
        }
    }

    /// Restrict rows with a WHERE description
    #[must_use]
    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = filter;
        self
    }

    /// Build the statement for `dialect`.
    ///
    /// An empty WHERE description is refused so that a whole table is never
    /// deleted by accident.
    pub fn build(&self, dialect: &dyn Dialect) -> Result<Statement> {
        if self.filter.is_empty() {
            return Err(DatabaseError::invalid_params(format!(
                "DELETE from `{}` without conditions",
                self.table
            )));
        }

        let fragment = where_fragment(&self.filter, &mut PlaceholderNames::new())?;
        let mut sql = format!("DELETE FROM {}", backtick_identifier(&self.table));
        append_where(&mut sql, &fragment);

        Ok(Statement {
            sql: dialect.convert_identifiers(&sql),
            params: fragment.params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dialect::{BacktickDialect, DoubleQuoteDialect};

    fn names(params: &Params) -> Vec<String> {
        params
            .iter()
            .map(|(k, _)| match k {
                ParamKey::Name(n) => n.clone(),
                ParamKey::Index(i) => i.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_empty_where() {
        let fragment = build_where(&Where::new(), &BacktickDialect).unwrap();
        assert!(fragment.is_empty());
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn test_where_equality_and_compare() {
        let filter = Where::new()
            .eq("Active", 1)
            .compare("Age", Operator::Ge, 18)
            .like("Name", "A%");
        let fragment = build_where(&filter, &BacktickDialect).unwrap();

        assert_eq!(
            fragment.sql,
            "WHERE `Active` = :Active AND `Age` >= :Age AND `Name` LIKE :Name"
        );
        assert_eq!(names(&fragment.params), vec!["Active", "Age", "Name"]);
    }

    #[test]
    fn test_where_between() {
        let filter = Where::new().between("x", 1, 10);
        let fragment = build_where(&filter, &BacktickDialect).unwrap();

        assert_eq!(fragment.sql, "WHERE `x` BETWEEN :x_FROM AND :x_TO");
        assert_eq!(names(&fragment.params), vec!["x_FROM", "x_TO"]);
    }

    #[test]
    fn test_where_in_and_not_in() {
        let filter = Where::new().is_in("Id", [1, 2, 3]).not_in("Kind", ["a"]);
        let fragment = build_where(&filter, &BacktickDialect).unwrap();

        assert_eq!(
            fragment.sql,
            "WHERE `Id` IN (:Id0, :Id1, :Id2) AND `Kind` NOT IN (:Kind0)"
        );
        assert_eq!(fragment.params.len(), 4);
    }

    #[test]
    fn test_where_empty_in_is_an_error() {
        let filter = Where::new().is_in("Id", Vec::<i32>::new());
        let err = build_where(&filter, &BacktickDialect).unwrap_err();
        assert!(matches!(err, DatabaseError::EmptyInList(col) if col == "Id"));
    }

    #[test]
    fn test_where_null_checks_bind_nothing() {
        let filter = Where::new().is_null("DeletedAt").is_not_null("Name");
        let fragment = build_where(&filter, &BacktickDialect).unwrap();

        assert_eq!(
            fragment.sql,
            "WHERE `DeletedAt` IS NULL AND `Name` IS NOT NULL"
        );
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn test_where_placeholder_collisions_are_resolved() {
        let filter = Where::new().is_in("Id", [5]).eq("Id0", 6).eq("Id", 7);
        let fragment = build_where(&filter, &BacktickDialect).unwrap();

        assert_eq!(
            fragment.sql,
            "WHERE `Id` IN (:Id0) AND `Id0` = :Id0_2 AND `Id` = :Id"
        );
    }

    #[test]
    fn test_where_sanitizes_placeholder_names() {
        let filter = Where::new().eq("first name", "A").eq("u.id", 1);
        let fragment = build_where(&filter, &BacktickDialect).unwrap();
        assert_eq!(
            fragment.sql,
            "WHERE `first name` = :first_name AND `u`.`id` = :u_id"
        );
    }

    #[test]
    fn test_where_double_quote_dialect() {
        let filter = Where::new().is_in("Id", [1, 2, 3]);
        let fragment = build_where(&filter, &DoubleQuoteDialect).unwrap();
        assert_eq!(fragment.sql, "WHERE \"Id\" IN (:Id0, :Id1, :Id2)");
    }

    #[test]
    fn test_where_with_type() {
        let filter = Where::new().eq("Id", "5").with_type(ParamType::Int);
        let fragment = build_where(&filter, &BacktickDialect).unwrap();
        assert_eq!(
            fragment.params.get(&ParamKey::Name("Id".into())),
            Some(&Param::Typed("5".into(), ParamType::Int))
        );
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!(" IS  NOT ".parse::<Operator>().unwrap(), Operator::IsNot);
        assert_eq!("Like".parse::<Operator>().unwrap(), Operator::Like);
        assert_eq!("<=>".parse::<Operator>().unwrap(), Operator::NullSafeEq);
        assert!(matches!(
            "~~".parse::<Operator>(),
            Err(DatabaseError::UnknownOperator(_))
        ));
    }

    #[test]
    fn test_condition_parse() {
        assert_eq!(
            Condition::parse("NOT BETWEEN", vec![1.into(), 9.into()]).unwrap(),
            Condition::NotBetween(1.into(), 9.into())
        );
        assert_eq!(
            Condition::parse("in", vec![1.into()]).unwrap(),
            Condition::In(vec![1.into()])
        );
        assert_eq!(
            Condition::parse("=", vec![3.into()]).unwrap(),
            Condition::Eq(3.into())
        );
        assert!(Condition::parse("between", vec![1.into()]).is_err());
        assert!(Condition::parse(">", vec![]).is_err());

        let filter = Where::new().operator("Age", "not between", [1, 2]).unwrap();
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_select_all_columns() {
        let stmt = SelectBuilder::new("Users").build(&BacktickDialect).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM `Users`");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_select_columns_and_alias() {
        let stmt = SelectBuilder::new("Users")
            .columns(&["Id"])
            .column_as("Name", "UserName")
            .filter(Where::new().eq("Active", 1))
            .build(&DoubleQuoteDialect)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT \"Id\", \"Name\" AS \"UserName\" FROM \"Users\" WHERE \"Active\" = :Active"
        );
    }

    #[test]
    fn test_count() {
        let stmt = CountBuilder::new("Users")
            .filter(Where::new().eq("Active", 1))
            .build(&BacktickDialect)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS `Count` FROM `Users` WHERE `Active` = :Active"
        );
    }

    #[test]
    fn test_insert() {
        let stmt = InsertBuilder::new("Users")
            .value("Name", "Alice")
            .value("Age", 30)
            .build(&BacktickDialect)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO `Users` (`Name`, `Age`) VALUES (:Name, :Age)"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_insert_rejects_empty_and_lists() {
        assert!(InsertBuilder::new("t").build(&BacktickDialect).is_err());
        assert!(InsertBuilder::new("t")
            .value("a", Param::list([1, 2]))
            .build(&BacktickDialect)
            .is_err());
    }

    #[test]
    fn test_insert_multi() {
        let stmt = InsertMultiBuilder::new("Users")
            .row(Values::new().set("Name", "A").set("Age", 1))
            .row(Values::new().set("Name", "B").set("Age", 2))
            .build(&DoubleQuoteDialect)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO \"Users\" (\"Name\", \"Age\") VALUES (?, ?), (?, ?)"
        );
        assert_eq!(names(&stmt.params), vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn test_insert_multi_requires_matching_rows() {
        let err = InsertMultiBuilder::new("t")
            .row(Values::new().set("a", 1).set("b", 2))
            .row(Values::new().set("b", 2).set("a", 1))
            .build(&BacktickDialect)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParameters(_)));

        assert!(InsertMultiBuilder::new("t").build(&BacktickDialect).is_err());
    }

    #[test]
    fn test_update_uses_disjoint_placeholders() {
        let stmt = UpdateBuilder::new("Users")
            .set("Name", "Bob")
            .filter(Where::new().eq("Name", "Alice"))
            .build(&BacktickDialect)
            .unwrap();

        assert_eq!(
            stmt.sql,
            "UPDATE `Users` SET `Name` = :Name_to_update WHERE `Name` = :Name"
        );
        assert_eq!(names(&stmt.params), vec!["Name_to_update", "Name"]);
    }

    #[test]
    fn test_update_where_key_shaped_like_set_placeholder() {
        let stmt = UpdateBuilder::new("t")
            .set("a", 1)
            .filter(Where::new().eq("a_to_update", 2))
            .build(&BacktickDialect)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE `t` SET `a` = :a_to_update WHERE `a_to_update` = :a_to_update_2"
        );
    }

    #[test]
    fn test_delete() {
        let stmt = DeleteBuilder::new("Users")
            .filter(Where::new().eq("Id", 42))
            .build(&BacktickDialect)
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM `Users` WHERE `Id` = :Id");

        assert!(DeleteBuilder::new("Users").build(&BacktickDialect).is_err());
    }
}
