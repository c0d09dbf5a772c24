mod common;

use backsight::prelude::*;
use common::{count, frictionless, series};

fn buy_and_hold() -> impl Strategy {
    FnStrategy::new("hold", |_: &BarTable, p: &[Position], _, _| {
        if p.is_empty() {
            vec![Signal::buy("SPY").with_quantity(10.0)]
        } else {
            vec![]
        }
    })
}

fn wave(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 100.0 + 5.0 * (i as f64 * 0.7).sin() + i as f64 * 0.05)
        .collect()
}

#[test]
fn short_runs_zero_the_risk_statistics_and_warn() {
    let engine = BacktestEngine::new(frictionless(10_000.0), series("SPY", &wave(10))).unwrap();
    let result = engine.run(&mut buy_and_hold());

    let m = &result.metrics;
    assert_eq!(m.observations, 10);
    assert_eq!(m.sharpe_ratio, 0.0);
    assert_eq!(m.sortino_ratio, 0.0);
    assert_eq!(m.calmar_ratio, 0.0);
    assert_eq!(m.var_95, 0.0);
    assert_eq!(m.cvar_95, 0.0);
    assert_eq!(
        count(&result.warnings, |w| matches!(w, RunWarning::InsufficientSample { .. })),
        5
    );

    //plain statistics are still reported
    assert!(m.max_drawdown > 0.0);
    assert!(m.total_return != 0.0);
}

#[test]
fn long_runs_report_tail_risk() {
    let engine = BacktestEngine::new(frictionless(10_000.0), series("SPY", &wave(60))).unwrap();
    let result = engine.run(&mut buy_and_hold());

    let m = &result.metrics;
    assert_eq!(m.observations, 60);
    assert_eq!(
        count(&result.warnings, |w| matches!(w, RunWarning::InsufficientSample { .. })),
        0
    );
    assert!(m.var_95 < 0.0);
    assert!(m.cvar_95 <= m.var_95);
    assert!(m.volatility > 0.0);
    assert!(m.exposure > 0.9);
}
