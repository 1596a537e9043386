//! Market-side snapshots: incrementally merged tickers.

use serde_json::{Map, Value};

/// Merge `update` into `base` field by field.
///
/// Fields present in `update` overwrite; fields absent from `update` keep their
/// previous value. Nested objects are merged recursively, any other value
/// (including arrays and `null`) replaces wholesale.
pub fn merge_fields(base: &mut Map<String, Value>, update: &Map<String, Value>) {
    for (key, new) in update {
        match (base.get_mut(key), new) {
            (Some(Value::Object(old)), Value::Object(new_obj)) => merge_fields(old, new_obj),
            _ => {
                base.insert(key.clone(), new.clone());
            }
        }
    }
}

/// Latest known ticker for one instrument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerSnapshot {
    pub fields: Map<String, Value>,
}

impl TickerSnapshot {
    pub fn apply(&mut self, update: &Map<String, Value>) {
        merge_fields(&mut self.fields, update);
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.fields.get("best_bid_price").and_then(Value::as_f64)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.fields.get("best_ask_price").and_then(Value::as_f64)
    }

    /// Index price, falling back to the estimated delivery price.
    pub fn index_price(&self) -> Option<f64> {
        self.fields
            .get("index_price")
            .and_then(Value::as_f64)
            .or_else(|| self.fields.get("estimated_delivery_price").and_then(Value::as_f64))
    }

    pub fn open_interest(&self) -> Option<f64> {
        self.fields.get("open_interest").and_then(Value::as_f64)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn unspecified_fields_persist() {
        let mut t = TickerSnapshot {
            fields: obj(json!({
                "instrument": "BTC-PERPETUAL",
                "best_bid": 100,
                "best_ask": 101,
                "stats": {"volume": 5}
            })),
        };
        t.apply(&obj(json!({"best_bid": 102})));
        assert_eq!(
            t.to_value(),
            json!({
                "instrument": "BTC-PERPETUAL",
                "best_bid": 102,
                "best_ask": 101,
                "stats": {"volume": 5}
            })
        );
    }

    #[test]
    fn nested_objects_merge() {
        let mut t = TickerSnapshot { fields: obj(json!({"stats": {"volume": 5, "high": 10}})) };
        t.apply(&obj(json!({"stats": {"high": 12}})));
        assert_eq!(t.to_value(), json!({"stats": {"volume": 5, "high": 12}}));
    }

    #[test]
    fn merge_is_idempotent() {
        let update = obj(json!({"best_bid_price": 1.5, "stats": {"low": 1}}));
        let mut a = TickerSnapshot::default();
        a.apply(&update);
        let once = a.clone();
        a.apply(&update);
        assert_eq!(a, once);
    }

    #[test]
    fn index_price_fallback_chain() {
        let t = TickerSnapshot { fields: obj(json!({"estimated_delivery_price": 99.5})) };
        assert_eq!(t.index_price(), Some(99.5));
        let t = TickerSnapshot { fields: obj(json!({"index_price": 100.0, "estimated_delivery_price": 99.5})) };
        assert_eq!(t.index_price(), Some(100.0));
        assert_eq!(TickerSnapshot::default().index_price(), None);
    }
}
