use crate::config::SmaParams;
use crate::engine::backtest::{BacktestEngine, BacktestResult};
use crate::strategy::Strategy;
use rayon::prelude::*;
use tracing::info;

//runs one isolated backtest per parameter set, in parallel
//
//results come back in the order of `params`
pub fn run_sweep<P, F>(engine: &BacktestEngine, params: Vec<P>, factory: F) -> Vec<(P, BacktestResult)>
where
    P: Send,
    F: Fn(&P) -> Box<dyn Strategy> + Sync,
{
    info!(runs = params.len(), "parameter sweep started");
    params
        .into_par_iter()
        .map(|p| {
            let mut strategy = factory(&p);
            let result = engine.run(strategy.as_mut());
            (p, result)
        })
        .collect()
}

//every (fast, slow) pair with fast < slow
pub fn sma_grid(fast: &[usize], slow: &[usize], template: &SmaParams) -> Vec<SmaParams> {
    fast.iter()
        .flat_map(|&f| slow.iter().map(move |&s| (f, s)))
        .filter(|(f, s)| f < s)
        .map(|(fast_window, slow_window)| SmaParams {
            fast_window,
            slow_window,
            ..template.clone()
        })
        .collect()
}

//sorts sweep results best sharpe first; ties keep their original order
pub fn rank_by_sharpe<P>(results: &mut [(P, BacktestResult)]) {
    results.sort_by(|a, b| {
        b.1.metrics
            .sharpe_ratio
            .partial_cmp(&a.1.metrics.sharpe_ratio)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BacktestConfig, StrategyParams};
    use crate::data::{Bar, BarSeries};
    use chrono::{Duration, TimeZone, Utc};

    fn engine() -> BacktestEngine {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let bars = (0..120)
            .map(|i| {
                let c = 100.0 + 10.0 * ((i as f64) / 7.0).sin() + i as f64 * 0.1;
                Bar::new_unchecked(start + Duration::days(i), "SPY", c, c + 0.5, c - 0.5, c, 1e6)
            })
            .collect();
        BacktestEngine::new(BacktestConfig::default(), BarSeries::new(bars).unwrap()).unwrap()
    }

    #[test]
    fn grid_skips_inverted_windows() {
        let grid = sma_grid(&[5, 10, 20], &[10, 20], &SmaParams::default());
        let pairs: Vec<(usize, usize)> = grid.iter().map(|p| (p.fast_window, p.slow_window)).collect();
        assert_eq!(pairs, vec![(5, 10), (5, 20), (10, 20)]);
    }

    #[test]
    fn parallel_runs_match_sequential_runs() {
        let engine = engine();
        let grid = sma_grid(&[3, 5], &[10, 15], &SmaParams::default());

        let parallel = run_sweep(&engine, grid.clone(), |p| {
            StrategyParams::Sma(p.clone()).build("SPY", false)
        });
        assert_eq!(parallel.len(), grid.len());

        for (params, result) in &parallel {
            let mut strategy = StrategyParams::Sma(params.clone()).build("SPY", false);
            let sequential = engine.run(strategy.as_mut());
            assert_eq!(sequential.trades, result.trades);
            assert_eq!(sequential.equity_curve, result.equity_curve);
        }
    }
}
