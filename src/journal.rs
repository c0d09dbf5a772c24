use crate::engine::order::{Order, OrderStatus};
use crate::portfolio::Trade;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

//append-only log of finished orders and closed trades
#[derive(Debug, Clone, Default)]
pub struct TradeJournal {
    orders: Vec<Order>,
    trades: Vec<Trade>,
}

#[derive(Debug, Serialize)]
struct TradeRow<'a> {
    id: u64,
    position_id: u64,
    symbol: &'a str,
    side: String,
    entry_time: String,
    exit_time: String,
    entry_price: f64,
    exit_price: f64,
    quantity: f64,
    pnl: f64,
    pnl_pct: f64,
    commission: f64,
    slippage: f64,
    duration_seconds: i64,
    reason: String,
}

#[derive(Debug, Serialize)]
struct OrderRow<'a> {
    id: u64,
    created_at: String,
    symbol: &'a str,
    side: String,
    order_type: String,
    quantity: f64,
    status: String,
    filled_quantity: f64,
    filled_price: Option<f64>,
    filled_at: Option<String>,
    commission: f64,
    slippage: f64,
    reject_reason: Option<&'a str>,
}

impl TradeJournal {
    pub fn new() -> Self {
        TradeJournal::default()
    }

    pub fn record_order(&mut self, order: Order) {
        self.orders.push(order);
    }

    pub fn record_trade(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    pub fn extend_trades(&mut self, trades: impl IntoIterator<Item = Trade>) {
        self.trades.extend(trades);
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    //orders that received at least one fill
    pub fn filled_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.filled_quantity > 0.0)
    }

    pub fn rejected_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders
            .iter()
            .filter(|o| o.status == OrderStatus::Rejected)
    }

    pub fn into_parts(self) -> (Vec<Order>, Vec<Trade>) {
        (self.orders, self.trades)
    }

    pub fn export_trades_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), csv::Error> {
        write_trades_csv(&self.trades, File::create(path)?)
    }

    pub fn export_orders_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), csv::Error> {
        write_orders_csv(&self.orders, File::create(path)?)
    }
}

//writes trades as csv, one row per closed trade
pub fn write_trades_csv<W: Write>(trades: &[Trade], sink: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(sink);
    for t in trades {
        writer.serialize(TradeRow {
            id: t.id,
            position_id: t.position_id,
            symbol: &t.symbol,
            side: format!("{:?}", t.side),
            entry_time: t.entry_time.to_rfc3339(),
            exit_time: t.exit_time.to_rfc3339(),
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            quantity: t.quantity,
            pnl: t.pnl,
            pnl_pct: t.pnl_pct,
            commission: t.commission,
            slippage: t.slippage,
            duration_seconds: t.duration_seconds,
            reason: t.reason.to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

//writes orders as csv, one row per order
pub fn write_orders_csv<W: Write>(orders: &[Order], sink: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(sink);
    for o in orders {
        writer.serialize(OrderRow {
            id: o.id,
            created_at: o.created_at.to_rfc3339(),
            symbol: &o.symbol,
            side: format!("{:?}", o.side),
            order_type: format!("{:?}", o.order_type),
            quantity: o.quantity,
            status: format!("{:?}", o.status),
            filled_quantity: o.filled_quantity,
            filled_price: o.filled_price,
            filled_at: o.filled_at.map(|t| t.to_rfc3339()),
            commission: o.commission,
            slippage: o.slippage,
            reject_reason: o.reject_reason.as_deref(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::order::OrderSide;
    use crate::portfolio::CloseReason;
    use chrono::{Duration, TimeZone, Utc};

    fn trade(id: u64, pnl: f64) -> Trade {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        Trade {
            id,
            position_id: id,
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            entry_time: t,
            exit_time: t + Duration::days(1),
            quantity: 1.0,
            pnl,
            pnl_pct: pnl / 100.0,
            commission: 0.0,
            slippage: 0.0,
            duration_seconds: 86_400,
            reason: CloseReason::TakeProfit,
        }
    }

    #[test]
    fn journal_keeps_insertion_order() {
        let mut journal = TradeJournal::new();
        journal.record_trade(trade(1, 5.0));
        journal.extend_trades(vec![trade(2, -3.0), trade(3, 1.0)]);
        let ids: Vec<u64> = journal.trades().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn order_views_filter_by_outcome() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut journal = TradeJournal::new();

        let mut filled = Order::market(1, t, "AAPL", OrderSide::Buy, 2.0);
        filled.record_fill(2.0, 100.0, 0.2, 0.0, t).unwrap();
        journal.record_order(filled);

        let mut rejected = Order::market(2, t, "AAPL", OrderSide::Buy, 0.0);
        rejected.reject("non-positive quantity");
        journal.record_order(rejected);

        assert_eq!(journal.filled_orders().count(), 1);
        assert_eq!(journal.rejected_orders().count(), 1);
    }

    #[test]
    fn exports_trades_to_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");

        let mut journal = TradeJournal::new();
        journal.record_trade(trade(1, 5.0));
        journal.record_trade(trade(2, -2.0));
        journal.export_trades_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("id,position_id,symbol,side"));
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("Take profit"));
    }

    #[test]
    fn exports_orders_to_csv() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut buf = Vec::new();
        write_orders_csv(&[Order::limit(9, t, "MSFT", OrderSide::Sell, 3.0, 410.0)], &mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("MSFT"));
        assert!(text.contains("Limit"));
        assert!(text.contains("Pending"));
    }
}
