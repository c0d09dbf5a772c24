mod common;

use backsight::prelude::*;
use common::{bars, count, frictionless};

fn two_symbols() -> BarSeries {
    let mut data = bars("SPY", &[100.0, 101.0, 102.0, 103.0]);
    //QQQ has no bar on the last day
    data.extend(bars("QQQ", &[200.0, 202.0, 204.0]));
    BarSeries::new(data).unwrap()
}

#[test]
fn one_snapshot_per_timestamp_and_stale_prices_carry() {
    let engine = BacktestEngine::new(frictionless(10_000.0), two_symbols()).unwrap();
    let mut strategy = FnStrategy::new("pair", |_: &BarTable, p: &[Position], _, _| {
        if p.is_empty() {
            vec![
                Signal::buy("SPY").with_quantity(10.0),
                Signal::buy("QQQ").with_quantity(10.0),
            ]
        } else {
            vec![]
        }
    });
    let result = engine.run(&mut strategy);

    assert_eq!(result.equity_curve.len(), 4);
    assert_eq!(result.open_positions.len(), 2);
    let symbols: Vec<&str> = result.open_positions.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["SPY", "QQQ"]);

    //SPY 10 * (103 - 101) plus QQQ 10 * (204 - 202) at its last seen close
    assert!((result.final_capital() - 10_040.0).abs() < 1e-9);
}

#[test]
fn signal_for_a_symbol_without_a_bar_is_dropped() {
    let engine = BacktestEngine::new(frictionless(10_000.0), two_symbols()).unwrap();
    let mut strategy = FnStrategy::new("late", |bars: &BarTable, _: &[Position], _, _| {
        if bars.contains_key("QQQ") {
            vec![]
        } else {
            vec![Signal::buy("QQQ").with_quantity(1.0)]
        }
    });
    let result = engine.run(&mut strategy);

    assert!(result.orders.is_empty());
    assert_eq!(
        count(&result.warnings, |w| matches!(w, RunWarning::SignalValidation { .. })),
        1
    );
}

#[test]
fn concentrated_position_raises_a_warning() {
    let engine = BacktestEngine::new(frictionless(10_000.0), two_symbols()).unwrap();
    let mut strategy = FnStrategy::new("heavy", |_: &BarTable, p: &[Position], _, _| {
        if p.is_empty() {
            vec![Signal::buy("QQQ").with_quantity(20.0)]
        } else {
            vec![]
        }
    });
    let result = engine.run(&mut strategy);

    //about 40% of equity in one name against a 30% limit, for three bars
    assert_eq!(
        count(&result.warnings, |w| matches!(w, RunWarning::Concentration { .. })),
        1
    );
    assert_eq!(result.status, RunStatus::Completed);
}
