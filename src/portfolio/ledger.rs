use crate::data::BarTable;
use crate::engine::order::Fill;
use crate::portfolio::position::{Exit, Position};
use crate::portfolio::trade::{CloseReason, Trade};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::debug;

//cash and open positions for one run
//
//accounting is margin style: fills move cash by their commission,
//closes move cash by gross pnl, equity = cash + unrealized pnl
#[derive(Debug, Clone)]
pub struct PositionLedger {
    pub initial_capital: f64,
    pub cash: f64,
    pub equity: f64,
    pub peak_equity: f64,
    leverage: f64,
    positions: IndexMap<String, Position>,
    last_prices: IndexMap<String, f64>,
    next_position_id: u64,
    next_trade_id: u64,
}

impl PositionLedger {
    pub fn new(initial_capital: f64, leverage: f64) -> Self {
        PositionLedger {
            initial_capital,
            cash: initial_capital,
            equity: initial_capital,
            peak_equity: initial_capital,
            leverage: leverage.max(f64::MIN_POSITIVE),
            positions: IndexMap::new(),
            last_prices: IndexMap::new(),
            next_position_id: 1,
            next_trade_id: 1,
        }
    }

    //books a fill: opens, adds to, reduces or flips the symbol's position
    pub fn apply_fill(&mut self, fill: &Fill) -> Vec<Trade> {
        self.cash -= fill.commission;
        self.last_prices
            .entry(fill.symbol.clone())
            .or_insert(fill.price);

        let mut trades = Vec::new();
        let existing_side = self.positions.get(&fill.symbol).map(|p| p.side);

        match existing_side {
            None => {
                self.open(fill, fill.qty);
            }
            Some(side) if side == fill.side => {
                if let Some(position) = self.positions.get_mut(&fill.symbol) {
                    position.add(fill);
                    debug!(symbol = %fill.symbol, qty = position.quantity, entry = position.entry_price, "position increased");
                }
            }
            Some(_) => {
                let open_qty = self.positions.get(&fill.symbol).map_or(0.0, |p| p.quantity);
                let close_qty = fill.qty.min(open_qty);
                let share = close_qty / fill.qty;
                let exit = Exit {
                    price: fill.price,
                    quantity: close_qty,
                    commission: fill.commission * share,
                    slippage: fill.slippage * share,
                    time: fill.timestamp,
                    reason: CloseReason::Manual,
                };
                if let Some(trade) = self.exit(&fill.symbol, exit) {
                    trades.push(trade);
                }

                let remainder = fill.qty - close_qty;
                if remainder > 1e-9 {
                    self.open(fill, remainder);
                }
            }
        }

        trades
    }

    fn open(&mut self, fill: &Fill, quantity: f64) {
        let position = Position::open(self.next_position_id, fill, quantity);
        self.next_position_id += 1;
        debug!(
            position_id = position.id,
            symbol = %position.symbol,
            side = ?position.side,
            qty = position.quantity,
            entry = position.entry_price,
            "position opened"
        );
        self.positions.insert(fill.symbol.clone(), position);
    }

    //applies an exit leg; gross pnl goes to cash, commissions were paid at fill time
    fn exit(&mut self, symbol: &str, exit: Exit) -> Option<Trade> {
        let position = self.positions.get_mut(symbol)?;
        let trade = position.apply_exit(exit, self.next_trade_id);
        self.next_trade_id += 1;
        self.cash += trade.gross_pnl();

        if !position.is_open() {
            self.positions.shift_remove(symbol);
        }

        debug!(
            symbol,
            reason = %trade.reason,
            exit = trade.exit_price,
            pnl = trade.pnl,
            "position closed"
        );
        Some(trade)
    }

    //closes a whole position at a given price without an order (stops, liquidation)
    pub fn close_position(
        &mut self,
        symbol: &str,
        price: f64,
        time: DateTime<Utc>,
        reason: CloseReason,
        commission_rate: f64,
    ) -> Option<Trade> {
        let quantity = self.positions.get(symbol)?.quantity;
        let commission = (price * quantity * commission_rate).abs();
        self.cash -= commission;
        self.exit(
            symbol,
            Exit {
                price,
                quantity,
                commission,
                slippage: 0.0,
                time,
                reason,
            },
        )
    }

    //evaluates stop-loss / take-profit against this timestamp's bars
    pub fn check_exits(
        &mut self,
        bars: &BarTable,
        time: DateTime<Utc>,
        commission_rate: f64,
    ) -> Vec<Trade> {
        let triggered: Vec<(String, f64, CloseReason)> = self
            .positions
            .values()
            .filter_map(|p| {
                let bar = bars.get(&p.symbol)?;
                let (price, reason) = p.check_exit(bar)?;
                Some((p.symbol.clone(), price, reason))
            })
            .collect();

        triggered
            .into_iter()
            .filter_map(|(symbol, price, reason)| {
                self.close_position(&symbol, price, time, reason, commission_rate)
            })
            .collect()
    }

    //closes everything at the last known prices
    pub fn close_all(
        &mut self,
        time: DateTime<Utc>,
        reason: CloseReason,
        commission_rate: f64,
    ) -> Vec<Trade> {
        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        let trades = symbols
            .into_iter()
            .filter_map(|symbol| {
                let price = self.last_price(&symbol)?;
                self.close_position(&symbol, price, time, reason, commission_rate)
            })
            .collect();
        self.refresh_equity();
        trades
    }

    //updates last prices from the bars' closes and revalues equity
    pub fn mark_to_market(&mut self, bars: &BarTable) {
        for (symbol, bar) in bars {
            self.last_prices.insert(symbol.clone(), bar.close);
        }
        self.refresh_equity();
    }

    fn refresh_equity(&mut self) {
        let mut unrealized = 0.0;
        for position in self.positions.values_mut() {
            if let Some(&price) = self.last_prices.get(&position.symbol) {
                position.mark(price);
            }
            unrealized += position.unrealized_pnl;
        }
        self.equity = self.cash + unrealized;
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.last_prices.get(symbol).copied()
    }

    //peak-to-current decline as a fraction of the peak
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity > 0.0 {
            ((self.peak_equity - self.equity) / self.peak_equity).max(0.0)
        } else {
            0.0
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    //copy of the open positions, safe to hand to strategies
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    //held quantity, positive long and negative short
    pub fn signed_quantity(&self, symbol: &str) -> f64 {
        self.positions
            .get(symbol)
            .map_or(0.0, |p| p.side.sign() * p.quantity)
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    //margin tied up by open positions at last prices
    pub fn margin_used(&self) -> f64 {
        self.positions.keys().map(|s| self.position_margin(s)).sum()
    }

    //margin tied up by one symbol's position
    pub fn position_margin(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| {
            let price = self.last_price(symbol).unwrap_or(p.entry_price);
            p.notional_value(price) / self.leverage
        })
    }

    pub fn available_margin(&self) -> f64 {
        self.equity - self.margin_used()
    }

    //total capital at risk across open positions
    pub fn heat(&self, fallback_risk: f64) -> f64 {
        self.positions.values().map(|p| p.heat(fallback_risk)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Bar;
    use crate::engine::order::OrderSide;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn fill(side: OrderSide, qty: f64, price: f64, rate: f64, day: u32) -> Fill {
        Fill {
            id: 1,
            order_id: 1,
            timestamp: ts(day),
            symbol: "SPY".to_string(),
            side,
            qty,
            price,
            commission: price * qty * rate,
            slippage: 0.0,
            stop_loss: None,
            take_profit: None,
        }
    }

    fn table(close: f64, day: u32) -> BarTable {
        let mut t = BarTable::new();
        t.insert(
            "SPY".to_string(),
            Bar::new_unchecked(ts(day), "SPY", close, close, close, close, 1.0),
        );
        t
    }

    #[test]
    fn round_trip_matches_reference_numbers() {
        let mut ledger = PositionLedger::new(10_000.0, 1.0);
        ledger.apply_fill(&fill(OrderSide::Buy, 10.0, 100.0, 0.001, 1));
        assert!((ledger.cash - 9_999.0).abs() < 1e-9);

        let trades = ledger.apply_fill(&fill(OrderSide::Sell, 10.0, 110.0, 0.001, 2));
        assert_eq!(trades.len(), 1);
        assert!((trades[0].pnl - 97.9).abs() < 1e-9);
        ledger.mark_to_market(&table(110.0, 2));
        assert!((ledger.equity - 10_097.9).abs() < 1e-9);
        assert_eq!(ledger.open_position_count(), 0);
        assert_eq!(ledger.signed_quantity("SPY"), 0.0);
    }

    #[test]
    fn opposite_fill_larger_than_position_flips() {
        let mut ledger = PositionLedger::new(10_000.0, 1.0);
        ledger.apply_fill(&fill(OrderSide::Buy, 5.0, 100.0, 0.0, 1));
        let trades = ledger.apply_fill(&fill(OrderSide::Sell, 8.0, 90.0, 0.0, 2));
        assert_eq!(trades.len(), 1);
        assert!((trades[0].pnl + 50.0).abs() < 1e-9);

        let short = ledger.position("SPY").unwrap();
        assert_eq!(short.side, OrderSide::Sell);
        assert_eq!(short.quantity, 3.0);
        assert_eq!(short.entry_price, 90.0);
        assert_eq!(ledger.signed_quantity("SPY"), -3.0);
    }

    #[test]
    fn equity_tracks_unrealized_pnl_and_drawdown() {
        let mut ledger = PositionLedger::new(10_000.0, 1.0);
        ledger.apply_fill(&fill(OrderSide::Buy, 10.0, 100.0, 0.0, 1));
        ledger.mark_to_market(&table(120.0, 1));
        assert!((ledger.equity - 10_200.0).abs() < 1e-9);
        ledger.mark_to_market(&table(90.0, 2));
        assert!((ledger.equity - 9_900.0).abs() < 1e-9);
        assert!((ledger.drawdown() - 300.0 / 10_200.0).abs() < 1e-12);
    }

    #[test]
    fn stop_loss_exit_closes_at_stop_price() {
        let mut ledger = PositionLedger::new(10_000.0, 1.0);
        let mut entry = fill(OrderSide::Buy, 10.0, 100.0, 0.0, 1);
        entry.stop_loss = Some(95.0);
        ledger.apply_fill(&entry);

        let mut bars = BarTable::new();
        bars.insert(
            "SPY".to_string(),
            Bar::new_unchecked(ts(2), "SPY", 97.0, 98.0, 90.0, 91.0, 1.0),
        );
        let trades = ledger.check_exits(&bars, ts(2), 0.0);
        assert_eq!(trades[0].exit_price, 95.0);
        assert_eq!(trades[0].reason, CloseReason::StopLoss);
        assert!((ledger.cash - 9_950.0).abs() < 1e-9);
    }

    #[test]
    fn margin_used_scales_with_leverage() {
        let mut ledger = PositionLedger::new(10_000.0, 4.0);
        ledger.apply_fill(&fill(OrderSide::Buy, 100.0, 100.0, 0.0, 1));
        ledger.mark_to_market(&table(100.0, 1));
        assert!((ledger.margin_used() - 2_500.0).abs() < 1e-9);
        assert!((ledger.available_margin() - 7_500.0).abs() < 1e-9);
        assert!((ledger.position_margin("SPY") - 2_500.0).abs() < 1e-9);
        assert_eq!(ledger.position_margin("QQQ"), 0.0);
        assert_eq!(ledger.signed_quantity("SPY"), 100.0);
    }
}
