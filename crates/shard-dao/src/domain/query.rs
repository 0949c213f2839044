//! # Query Objects
//!
//! Criteria and named-update descriptors. The accessors never look inside
//! these; they are handed to the storage boundary as-is.

use serde_json::Value;
use std::collections::BTreeMap;

/// Single column restriction.
#[derive(Clone, Debug, PartialEq)]
pub enum Restriction {
    /// Column equals value.
    Eq(String, Value),
    /// Column differs from value.
    Ne(String, Value),
    /// Column is absent or null.
    IsNull(String),
    /// Column is present and not null.
    IsNotNull(String),
}

/// Sort order on a column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Order {
    /// Ascending.
    Asc(String),
    /// Descending.
    Desc(String),
}

/// Selection criteria: conjunction of restrictions plus ordering.
///
/// Rows not otherwise ordered come back in id order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Criteria {
    restrictions: Vec<Restriction>,
    orders: Vec<Order>,
}

impl Criteria {
    /// Match every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `column == value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.restrictions
            .push(Restriction::Eq(column.into(), value.into()));
        self
    }

    /// Add `column != value`.
    pub fn ne(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.restrictions
            .push(Restriction::Ne(column.into(), value.into()));
        self
    }

    /// Add `column IS NULL`.
    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.restrictions.push(Restriction::IsNull(column.into()));
        self
    }

    /// Add `column IS NOT NULL`.
    pub fn is_not_null(mut self, column: impl Into<String>) -> Self {
        self.restrictions.push(Restriction::IsNotNull(column.into()));
        self
    }

    /// Order ascending by column.
    pub fn order_asc(mut self, column: impl Into<String>) -> Self {
        self.orders.push(Order::Asc(column.into()));
        self
    }

    /// Order descending by column.
    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.orders.push(Order::Desc(column.into()));
        self
    }

    /// Restrictions, in insertion order.
    pub fn restrictions(&self) -> &[Restriction] {
        &self.restrictions
    }

    /// Orderings, most significant first.
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }
}

/// Invocation of a registered named update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOperationMeta {
    /// Registered query name.
    pub query_name: String,
    /// Bound parameters.
    pub params: BTreeMap<String, Value>,
}

impl UpdateOperationMeta {
    /// Start an invocation of `query_name`.
    pub fn new(query_name: impl Into<String>) -> Self {
        Self {
            query_name: query_name.into(),
            params: BTreeMap::new(),
        }
    }

    /// Bind a parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Parameterized bulk update, registered on a store under a name.
///
/// Equivalent to
/// `UPDATE table SET c1 = :c1, ... WHERE f1 = :f1 AND ...`
/// where every column is bound from the parameter of the same name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedUpdate {
    /// Target table.
    pub table: String,
    /// Columns matched against same-named parameters.
    pub filter_columns: Vec<String>,
    /// Columns overwritten from same-named parameters.
    pub set_columns: Vec<String>,
}

impl NamedUpdate {
    /// Named update against `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter_columns: Vec::new(),
            set_columns: Vec::new(),
        }
    }

    /// Restrict to rows whose `column` equals the parameter of that name.
    pub fn filter_on(mut self, column: impl Into<String>) -> Self {
        self.filter_columns.push(column.into());
        self
    }

    /// Overwrite `column` with the parameter of that name.
    pub fn set(mut self, column: impl Into<String>) -> Self {
        self.set_columns.push(column.into());
        self
    }
}
