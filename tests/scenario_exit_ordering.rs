mod common;

use backsight::prelude::*;
use common::{bars, day, frictionless, series};

//records what the strategy saw on each bar
struct Recorder {
    entered: bool,
    seen: Vec<usize>,
}

impl Strategy for Recorder {
    fn on_bar(&mut self, context: &StrategyContext) -> Vec<Signal> {
        self.seen.push(context.positions.len());
        if self.entered {
            return vec![];
        }
        self.entered = true;
        vec![Signal::buy("SPY")
            .with_quantity(10.0)
            .with_stop_loss(95.0)
            .with_take_profit(120.0)]
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

#[test]
fn stop_loss_is_booked_before_the_strategy_runs() {
    let engine = BacktestEngine::new(
        frictionless(10_000.0),
        series("SPY", &[100.0, 100.0, 100.0, 94.0, 94.0]),
    )
    .unwrap();
    let mut strategy = Recorder {
        entered: false,
        seen: Vec::new(),
    };
    let result = engine.run(&mut strategy);

    //flat, filled, held, stopped out before on_bar, flat
    assert_eq!(strategy.seen, vec![0, 1, 1, 0, 0]);

    let trade = &result.trades[0];
    assert_eq!(trade.reason, CloseReason::StopLoss);
    assert_eq!(trade.exit_price, 95.0);
    assert_eq!(trade.exit_time, day(3));
    assert!((trade.pnl + 50.0).abs() < 1e-9);
}

#[test]
fn stop_wins_when_one_bar_touches_both_levels() {
    let mut data = bars("SPY", &[100.0, 100.0, 100.0]);
    data[2].high = 125.0;
    data[2].low = 90.0;
    let engine =
        BacktestEngine::new(frictionless(10_000.0), BarSeries::new(data).unwrap()).unwrap();

    let mut strategy = Recorder {
        entered: false,
        seen: Vec::new(),
    };
    let result = engine.run(&mut strategy);

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].reason, CloseReason::StopLoss);
}

#[test]
fn take_profit_closes_at_the_target() {
    let engine = BacktestEngine::new(
        frictionless(10_000.0),
        series("SPY", &[100.0, 100.0, 121.0]),
    )
    .unwrap();
    let mut strategy = Recorder {
        entered: false,
        seen: Vec::new(),
    };
    let result = engine.run(&mut strategy);

    let trade = &result.trades[0];
    assert_eq!(trade.reason, CloseReason::TakeProfit);
    assert_eq!(trade.exit_price, 120.0);
    assert!((trade.pnl - 200.0).abs() < 1e-9);
    assert!((result.final_capital() - 10_200.0).abs() < 1e-9);
}

#[test]
fn limit_order_waits_for_its_price() {
    let engine = BacktestEngine::new(
        frictionless(10_000.0),
        series("SPY", &[100.0, 99.0, 97.0, 96.0]),
    )
    .unwrap();
    let mut sent = false;
    let mut strategy = FnStrategy::new("dip-buyer", move |_: &BarTable, _: &[Position], _, _| {
        if std::mem::replace(&mut sent, true) {
            vec![]
        } else {
            vec![Signal::buy("SPY").limit(97.5).with_quantity(1.0)]
        }
    });
    let result = engine.run(&mut strategy);

    //bar 1 low is 98, bar 2 low is 96
    let position = &result.open_positions[0];
    assert_eq!(position.entry_time, day(2));
    assert!(position.entry_price <= 97.5);
}
