mod common;

use backsight::prelude::*;
use common::{count, day, frictionless, series};

fn leveraged() -> BacktestConfig {
    BacktestConfig {
        leverage: 2.0,
        margin_call_level: 0.3,
        ..frictionless(10_000.0)
    }
}

#[test]
fn drawdown_past_the_margin_level_liquidates_and_halts() {
    let engine = BacktestEngine::new(
        leveraged(),
        series("SPY", &[100.0, 100.0, 69.0, 80.0, 90.0]),
    )
    .unwrap();

    let mut strategy = FnStrategy::new("all-in", |_: &BarTable, p: &[Position], _, _| {
        if p.is_empty() {
            vec![Signal::buy("SPY").with_quantity(100.0)]
        } else {
            vec![]
        }
    });
    let result = engine.run(&mut strategy);

    assert_eq!(result.status, RunStatus::Halted);
    assert_eq!(result.halted_at, Some(day(2)));
    assert_eq!(result.bars_processed, 3);
    assert!(result.open_positions.is_empty());

    let trade = result.trades.last().unwrap();
    assert_eq!(trade.reason, CloseReason::MarginCall);
    assert_eq!(trade.exit_price, 69.0);
    assert!((trade.pnl + 3_100.0).abs() < 1e-9);

    assert!((result.final_capital() - 6_900.0).abs() < 1e-9);
    assert!((result.metrics.max_drawdown - 0.31).abs() < 1e-9);
    assert_eq!(
        count(&result.warnings, |w| matches!(w, RunWarning::MarginCall { .. })),
        1
    );
}

#[test]
fn halted_run_still_reports_metrics_and_journal() {
    let engine =
        BacktestEngine::new(leveraged(), series("SPY", &[100.0, 100.0, 60.0, 100.0])).unwrap();
    let mut strategy = FnStrategy::new("all-in", |_: &BarTable, p: &[Position], _, _| {
        if p.is_empty() {
            vec![Signal::buy("SPY").with_quantity(100.0)]
        } else {
            vec![]
        }
    });
    let result = engine.run(&mut strategy);

    assert_eq!(result.status, RunStatus::Halted);
    assert_eq!(result.equity_curve.len(), 3);
    assert_eq!(result.metrics.total_trades, 1);
    assert_eq!(result.metrics.losing_trades, 1);
    assert!(!result.orders.is_empty());
    assert!(result.to_json().unwrap().contains("MarginCall"));
}

#[test]
fn orders_beyond_available_margin_are_rejected() {
    let engine =
        BacktestEngine::new(frictionless(10_000.0), series("SPY", &[100.0, 100.0])).unwrap();
    let mut strategy = FnStrategy::new("too-big", |_: &BarTable, _: &[Position], _, _| {
        vec![Signal::buy("SPY").with_quantity(500.0)]
    });
    let result = engine.run(&mut strategy);

    assert!(result.trades.is_empty());
    assert!(result.open_positions.is_empty());
    assert!(result.orders.iter().all(|o| o.status == OrderStatus::Rejected));
    assert_eq!(
        count(&result.warnings, |w| matches!(w, RunWarning::OrderRejected { .. })),
        2
    );
}
