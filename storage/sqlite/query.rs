use crate::types::Timestamp;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

/// Value bound to a `?` placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

/// Bind `params` to `query` in placeholder order
pub fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Direction of a keyset walk over `(timestamp, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Query builder for the store's time-series access patterns
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    conditions: Vec<String>,
    params: Vec<SqlParam>,
    order_by: Option<String>,
    limit: Option<usize>,
}

impl QueryBuilder {
    /// Create a new query builder for a table
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            conditions: Vec::new(),
            params: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Inclusive time range filter on the canonical timestamp column
    pub fn time_range(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.conditions
            .push("timestamp >= ? AND timestamp <= ?".to_string());
        self.params.push(SqlParam::Text(from.to_canonical()));
        self.params.push(SqlParam::Text(to.to_canonical()));
        self
    }

    /// Strict upper bound on the timestamp column
    pub fn older_than(mut self, cutoff: Timestamp) -> Self {
        self.conditions.push("timestamp < ?".to_string());
        self.params.push(SqlParam::Text(cutoff.to_canonical()));
        self
    }

    /// Add equals condition on an integer column
    pub fn eq_int(mut self, column: &str, value: i64) -> Self {
        self.conditions.push(format!("{} = ?", column));
        self.params.push(SqlParam::Int(value));
        self
    }

    /// Add equals condition on a text column
    pub fn eq_text(mut self, column: &str, value: &str) -> Self {
        self.conditions.push(format!("{} = ?", column));
        self.params.push(SqlParam::Text(value.to_string()));
        self
    }

    /// Resume strictly after `(timestamp, id)` in the given walk order
    pub fn after_keyset(mut self, position: Option<&(Timestamp, i64)>, order: Order) -> Self {
        if let Some((timestamp, id)) = position {
            let cmp = match order {
                Order::Ascending => ">",
                Order::Descending => "<",
            };
            self.conditions.push(format!(
                "(timestamp {cmp} ? OR (timestamp = ? AND id {cmp} ?))"
            ));
            let ts = timestamp.to_canonical();
            self.params.push(SqlParam::Text(ts.clone()));
            self.params.push(SqlParam::Text(ts));
            self.params.push(SqlParam::Int(*id));
        }
        self
    }

    /// Order by `(timestamp, id)`; `id` breaks ties between duplicates
    pub fn order_by_time(mut self, order: Order) -> Self {
        let dir = match order {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        };
        self.order_by = Some(format!("timestamp {dir}, id {dir}"));
        self
    }

    /// Set limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Build SELECT query
    pub fn build_select(&self, columns: &[&str]) -> (String, Vec<SqlParam>) {
        let cols = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        };

        let mut query = format!("SELECT {} FROM {}", cols, self.table);
        query.push_str(&self.where_clause());

        if let Some(ref order) = self.order_by {
            query.push_str(&format!(" ORDER BY {}", order));
        }

        if let Some(limit) = self.limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        (query, self.params.clone())
    }

    /// Build COUNT query
    pub fn build_count(&self) -> (String, Vec<SqlParam>) {
        let query = format!("SELECT COUNT(*) FROM {}{}", self.table, self.where_clause());
        (query, self.params.clone())
    }

    /// Build a DELETE bounded to `limit` matching rows
    pub fn build_delete_chunk(&self, limit: usize) -> (String, Vec<SqlParam>) {
        let query = format!(
            "DELETE FROM {table} WHERE rowid IN (SELECT rowid FROM {table}{cond} LIMIT {limit})",
            table = self.table,
            cond = self.where_clause(),
            limit = limit
        );
        (query, self.params.clone())
    }
}
