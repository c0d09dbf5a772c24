mod common;

use backsight::prelude::*;
use common::{frictionless, series};

//buy 10 at 100, sell at 110, 0.1% commission each way
#[test]
fn round_trip_books_net_pnl_and_return() {
    let config = BacktestConfig {
        commission_rate: 0.001,
        ..frictionless(10_000.0)
    };
    let engine = BacktestEngine::new(config, series("SPY", &[100.0, 100.0, 110.0, 110.0])).unwrap();

    let mut bar = 0;
    let mut strategy = FnStrategy::new("round-trip", move |_: &BarTable, _: &[Position], _, _| {
        bar += 1;
        match bar {
            1 => vec![Signal::buy("SPY").with_quantity(10.0)],
            2 => vec![Signal::close("SPY")],
            _ => vec![],
        }
    });
    let result = engine.run(&mut strategy);

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.trades.len(), 1);

    let trade = &result.trades[0];
    assert_eq!(trade.entry_price, 100.0);
    assert_eq!(trade.exit_price, 110.0);
    assert!((trade.commission - 2.1).abs() < 1e-9);
    assert!((trade.pnl - 97.9).abs() < 1e-9);
    assert_eq!(trade.reason, CloseReason::Manual);

    assert!((result.final_capital() - 10_097.9).abs() < 1e-9);
    assert!((result.total_return() - 0.00979).abs() < 1e-12);
    assert_eq!(result.metrics.total_trades, 1);
    assert_eq!(result.metrics.winning_trades, 1);
    assert!((result.metrics.total_commission - 2.1).abs() < 1e-9);
}

#[test]
fn journal_holds_both_filled_orders() {
    let engine =
        BacktestEngine::new(frictionless(10_000.0), series("SPY", &[100.0, 101.0, 102.0])).unwrap();
    let mut bar = 0;
    let mut strategy = FnStrategy::new("in-out", move |_: &BarTable, _: &[Position], _, _| {
        bar += 1;
        match bar {
            1 => vec![Signal::buy("SPY").with_quantity(1.0).with_meta("tag", "entry")],
            2 => vec![Signal::close("SPY")],
            _ => vec![],
        }
    });
    let result = engine.run(&mut strategy);

    assert_eq!(result.orders.len(), 2);
    assert!(result.orders.iter().all(|o| o.status == OrderStatus::Filled));
    assert_eq!(result.orders[0].metadata.get("tag").map(String::as_str), Some("entry"));
    assert_eq!(result.orders[1].side, OrderSide::Sell);
}
