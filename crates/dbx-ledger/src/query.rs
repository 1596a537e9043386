//! Query builders and typed mutations.

use dbx_core::{Label, OrderState};
use rusqlite::types::Value;

use crate::schema::Table;

/// Row ordering by event timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Selection over a trade table. Every criterion is optional; an empty
/// query returns the whole table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeQuery {
    pub currency: Option<String>,
    pub instrument_contains: Option<String>,
    pub label_contains: Option<String>,
    pub is_open: Option<bool>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl TradeQuery {
    pub fn currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_uppercase());
        self
    }

    pub fn instrument(mut self, fragment: &str) -> Self {
        self.instrument_contains = Some(fragment.to_string());
        self
    }

    pub fn label(mut self, fragment: &str) -> Self {
        self.label_contains = Some(fragment.to_string());
        self
    }

    pub fn open(mut self, is_open: bool) -> Self {
        self.is_open = Some(is_open);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// `WHERE .. ORDER BY .. LIMIT ..` tail and its bound parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(c) = &self.currency {
            clauses.push("currency = ?");
            params.push(Value::Text(c.clone()));
        }
        if let Some(i) = &self.instrument_contains {
            clauses.push("instrument_name LIKE '%' || ? || '%'");
            params.push(Value::Text(i.clone()));
        }
        if let Some(l) = &self.label_contains {
            clauses.push("label LIKE '%' || ? || '%'");
            params.push(Value::Text(l.clone()));
        }
        if let Some(o) = self.is_open {
            clauses.push("is_open = ?");
            params.push(Value::Integer(i64::from(o)));
        }
        let mut sql = where_clause(&clauses);
        sql.push_str(&format!(" ORDER BY timestamp {}, rowid {}", self.order.sql(), self.order.sql()));
        if let Some(n) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(n as i64));
        }
        (sql, params)
    }
}

/// Selection over the orders table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderQuery {
    pub currency: Option<String>,
    pub instrument_contains: Option<String>,
    pub label_contains: Option<String>,
    pub limit: Option<usize>,
}

impl OrderQuery {
    pub fn currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_uppercase());
        self
    }

    pub fn instrument(mut self, fragment: &str) -> Self {
        self.instrument_contains = Some(fragment.to_string());
        self
    }

    pub fn label(mut self, fragment: &str) -> Self {
        self.label_contains = Some(fragment.to_string());
        self
    }

    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(c) = &self.currency {
            clauses.push("currency = ?");
            params.push(Value::Text(c.clone()));
        }
        if let Some(i) = &self.instrument_contains {
            clauses.push("instrument_name LIKE '%' || ? || '%'");
            params.push(Value::Text(i.clone()));
        }
        if let Some(l) = &self.label_contains {
            clauses.push("label LIKE '%' || ? || '%'");
            params.push(Value::Text(l.clone()));
        }
        let mut sql = where_clause(&clauses);
        sql.push_str(" ORDER BY timestamp ASC, rowid ASC");
        if let Some(n) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(n as i64));
        }
        (sql, params)
    }
}

fn where_clause(clauses: &[&str]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

// ---- typed mutations ----

/// Column assignment for [`crate::Ledger::update_field`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Label(Option<Label>),
    IsOpen(bool),
    UserSeq(Option<u64>),
    OrderState(OrderState),
}

impl Field {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Label(_) => "label",
            Self::IsOpen(_) => "is_open",
            Self::UserSeq(_) => "user_seq",
            Self::OrderState(_) => "order_state",
        }
    }

    pub(crate) fn value(&self) -> Value {
        match self {
            Self::Label(l) => l.as_ref().map_or(Value::Null, |l| Value::Text(l.to_string())),
            Self::IsOpen(b) => Value::Integer(i64::from(*b)),
            Self::UserSeq(s) => s.map_or(Value::Null, |s| Value::Integer(s as i64)),
            Self::OrderState(s) => Value::Text(s.as_str().to_string()),
        }
    }

    pub(crate) fn applies_to(&self, table: Table) -> bool {
        match self {
            Self::Label(_) => true,
            Self::IsOpen(_) | Self::UserSeq(_) => table.is_trade_table(),
            Self::OrderState(_) => table == Table::Orders,
        }
    }
}

/// Row selector for updates and deletes.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    TradeId(String),
    OrderId(String),
    Label(Label),
}

impl Filter {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::TradeId(_) => "trade_id",
            Self::OrderId(_) => "order_id",
            Self::Label(_) => "label",
        }
    }

    pub(crate) fn value(&self) -> Value {
        match self {
            Self::TradeId(id) | Self::OrderId(id) => Value::Text(id.clone()),
            Self::Label(l) => Value::Text(l.to_string()),
        }
    }

    pub(crate) fn applies_to(&self, table: Table) -> bool {
        match self {
            Self::TradeId(_) => table.is_trade_table(),
            Self::OrderId(_) | Self::Label(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_has_no_where() {
        let (sql, params) = TradeQuery::default().to_sql();
        assert_eq!(sql, " ORDER BY timestamp ASC, rowid ASC");
        assert!(params.is_empty());
    }

    #[test]
    fn criteria_bind_in_order() {
        let (sql, params) = TradeQuery::default().currency("btc").label("scalping").newest_first().limit(5).to_sql();
        assert!(sql.starts_with(" WHERE currency = ? AND label LIKE"));
        assert!(sql.contains("DESC"));
        assert_eq!(params[0], Value::Text("BTC".into()));
        assert_eq!(params[1], Value::Text("scalping".into()));
        assert_eq!(params[2], Value::Integer(5));
    }

    #[test]
    fn field_table_compatibility() {
        assert!(Field::IsOpen(true).applies_to(Table::Trades));
        assert!(!Field::IsOpen(true).applies_to(Table::Orders));
        assert!(Field::OrderState(OrderState::Filled).applies_to(Table::Orders));
        assert!(!Filter::TradeId("1".into()).applies_to(Table::Orders));
    }
}
