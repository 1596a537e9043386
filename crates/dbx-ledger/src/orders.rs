//! Orders table operations.

use dbx_core::{Label, OrderRecord};
use rusqlite::{params, params_from_iter};
use tracing::debug;

use crate::error::Result;
use crate::query::{Filter, OrderQuery};
use crate::schema::{ORDER_COLUMNS, Table, order_from_row};
use crate::Ledger;

impl Ledger {
    /// Insert or replace the row for `order.order_id`.
    pub async fn upsert_order(&self, order: &OrderRecord) -> Result<()> {
        let o = order.clone();
        self.run("upsert_order", move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(order_id) DO UPDATE SET \
                         label = excluded.label, \
                         amount = excluded.amount, \
                         price = excluded.price, \
                         order_state = excluded.order_state, \
                         timestamp = excluded.timestamp"
                ),
                params![
                    o.order_id,
                    o.instrument_name,
                    o.currency(),
                    o.label.as_ref().map(Label::to_string),
                    o.side.as_str(),
                    o.amount.to_string(),
                    o.price,
                    o.order_state.as_str(),
                    o.timestamp as i64,
                ],
            )?;
            Ok(())
        })
        .await?;
        debug!("[ledger] upserted order {} ({})", order.order_id, order.order_state);
        self.notify_trades_changed(Table::Orders, "upsert").await;
        Ok(())
    }

    /// Remove the row for `order_id`. Returns whether it existed.
    pub async fn delete_order(&self, order_id: &str) -> Result<bool> {
        let removed = self.delete_row(Table::Orders, Filter::OrderId(order_id.to_string())).await?;
        if removed > 0 {
            self.notify_trades_changed(Table::Orders, "delete").await;
        }
        Ok(removed > 0)
    }

    pub async fn query_orders(&self, query: OrderQuery) -> Result<Vec<OrderRecord>> {
        let (tail, values) = query.to_sql();
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders{tail}");
        self.run("query_orders", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), order_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Field;
    use dbx_core::{OrderState, Side};
    use rust_decimal_macros::dec;

    fn order(id: &str, state: OrderState) -> OrderRecord {
        OrderRecord {
            order_id: id.to_string(),
            instrument_name: "ETH-PERPETUAL".into(),
            label: Some("hedging-open-3".parse().unwrap()),
            side: Side::Sell,
            amount: dec!(25),
            price: Some(3_100.5),
            order_state: state,
            timestamp: 10,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_state() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.upsert_order(&order("X1", OrderState::Open)).await.unwrap();
        ledger.upsert_order(&order("X1", OrderState::Filled)).await.unwrap();
        let stored = ledger.query_orders(OrderQuery::default().currency("eth")).await.unwrap();
        assert_eq!(stored, vec![order("X1", OrderState::Filled)]);
    }

    #[tokio::test]
    async fn update_state_and_delete() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.upsert_order(&order("X1", OrderState::Open)).await.unwrap();
        let n = ledger
            .update_field(Table::Orders, Field::OrderState(OrderState::Cancelled), Filter::OrderId("X1".into()))
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(ledger.query_orders(OrderQuery::default()).await.unwrap()[0].order_state, OrderState::Cancelled);
        assert!(ledger.delete_order("X1").await.unwrap());
        assert!(!ledger.delete_order("X1").await.unwrap());
        assert!(ledger.query_orders(OrderQuery::default().label("hedging")).await.unwrap().is_empty());
    }
}
