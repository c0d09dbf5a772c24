use crate::error::RunWarning;
use crate::metrics::timeseries::{max_drawdown, EquityPoint};
use crate::portfolio::Trade;
use prettytable::{Cell, Row, Table};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::warn;

//risk statistics need at least this many return observations
pub const MIN_OBSERVATIONS: usize = 30;

//return, risk and trade-quality statistics of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return: f64,
    pub annual_return: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub recovery_factor: f64,
    pub best_return: f64,
    pub worst_return: f64,
    pub observations: usize,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    //magnitude of the average losing trade
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_trade_duration_hours: f64,
    pub total_commission: f64,
    pub total_slippage: f64,

    //share of bars with at least one open position
    pub exposure: f64,
}

//win/loss statistics over an ordered sequence of trade pnls
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TradeQuality {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
}

impl TradeQuality {
    pub fn from_pnls<I>(pnls: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut q = TradeQuality::default();
        let mut gross_win = 0.0;
        let mut gross_loss = 0.0;
        let (mut win_streak, mut loss_streak) = (0, 0);

        for pnl in pnls {
            q.total += 1;
            if pnl > 0.0 {
                q.wins += 1;
                gross_win += pnl;
                q.largest_win = q.largest_win.max(pnl);
                win_streak += 1;
                loss_streak = 0;
            } else if pnl < 0.0 {
                q.losses += 1;
                gross_loss += pnl.abs();
                q.largest_loss = q.largest_loss.min(pnl);
                loss_streak += 1;
                win_streak = 0;
            } else {
                win_streak = 0;
                loss_streak = 0;
            }
            q.max_consecutive_wins = q.max_consecutive_wins.max(win_streak);
            q.max_consecutive_losses = q.max_consecutive_losses.max(loss_streak);
        }

        if q.total == 0 {
            return q;
        }

        q.win_rate = q.wins as f64 / q.total as f64;
        q.avg_win = if q.wins > 0 { gross_win / q.wins as f64 } else { 0.0 };
        q.avg_loss = if q.losses > 0 { gross_loss / q.losses as f64 } else { 0.0 };
        q.profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        q.expectancy = q.win_rate * q.avg_win - (1.0 - q.win_rate) * q.avg_loss;
        q
    }
}

//turns an equity curve and trade ledger into PerformanceMetrics
#[derive(Debug, Clone, Copy)]
pub struct MetricsCalculator {
    //annual risk-free rate used for excess returns
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
    pub min_observations: usize,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        MetricsCalculator {
            risk_free_rate: 0.0,
            periods_per_year: 252.0,
            min_observations: MIN_OBSERVATIONS,
        }
    }
}

impl MetricsCalculator {
    pub fn new(risk_free_rate: f64) -> Self {
        MetricsCalculator {
            risk_free_rate,
            ..MetricsCalculator::default()
        }
    }

    //computes every statistic; statistics skipped by the sample guard come back as warnings
    pub fn calculate(
        &self,
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        initial_capital: f64,
        bars_in_market: usize,
    ) -> (PerformanceMetrics, Vec<RunWarning>) {
        let mut warnings = Vec::new();

        let final_capital = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);
        let total_return = if initial_capital != 0.0 {
            (final_capital - initial_capital) / initial_capital
        } else {
            0.0
        };
        let annual_return = annualize(total_return, equity_curve);
        let max_dd = max_drawdown(equity_curve);

        let returns: Vec<f64> = equity_curve.iter().map(|p| p.returns).collect();
        let observations = returns.len();
        let sufficient = observations >= self.min_observations;

        let (sharpe, sortino, calmar, var_95, cvar_95) = if sufficient {
            let (var_95, cvar_95) = value_at_risk(&returns);
            (
                self.sharpe(&returns),
                self.sortino(&returns),
                if max_dd > 0.0 { annual_return / max_dd.abs() } else { 0.0 },
                var_95,
                cvar_95,
            )
        } else {
            for statistic in ["sharpe_ratio", "sortino_ratio", "calmar_ratio", "var_95", "cvar_95"] {
                warnings.push(RunWarning::InsufficientSample {
                    statistic: statistic.to_string(),
                    observations,
                });
            }
            warn!(
                observations,
                required = self.min_observations,
                "too few returns for risk-adjusted statistics; reporting 0"
            );
            (0.0, 0.0, 0.0, 0.0, 0.0)
        };

        let volatility = if observations >= 2 {
            returns.as_slice().std_dev() * self.periods_per_year.sqrt()
        } else {
            0.0
        };

        let quality = TradeQuality::from_pnls(trades.iter().map(|t| t.pnl));
        let avg_trade_duration_hours = if trades.is_empty() {
            0.0
        } else {
            trades
                .iter()
                .map(|t| t.duration_seconds as f64 / 3600.0)
                .sum::<f64>()
                / trades.len() as f64
        };

        let metrics = PerformanceMetrics {
            initial_capital,
            final_capital,
            total_return,
            annual_return,
            volatility,
            max_drawdown: max_dd,
            sharpe_ratio: sharpe,
            sortino_ratio: sortino,
            calmar_ratio: calmar,
            var_95,
            cvar_95,
            recovery_factor: if max_dd > 0.0 { total_return / max_dd } else { 0.0 },
            best_return: returns.iter().copied().fold(0.0, f64::max),
            worst_return: returns.iter().copied().fold(0.0, f64::min),
            observations,

            total_trades: quality.total,
            winning_trades: quality.wins,
            losing_trades: quality.losses,
            win_rate: quality.win_rate,
            avg_win: quality.avg_win,
            avg_loss: quality.avg_loss,
            largest_win: quality.largest_win,
            largest_loss: quality.largest_loss,
            profit_factor: quality.profit_factor,
            expectancy: quality.expectancy,
            max_consecutive_wins: quality.max_consecutive_wins,
            max_consecutive_losses: quality.max_consecutive_losses,
            avg_trade_duration_hours,
            total_commission: trades.iter().map(|t| t.commission).sum(),
            total_slippage: trades.iter().map(|t| t.slippage).sum(),

            exposure: if equity_curve.is_empty() {
                0.0
            } else {
                bars_in_market as f64 / equity_curve.len() as f64
            },
        };

        (metrics, warnings)
    }

    fn sharpe(&self, returns: &[f64]) -> f64 {
        let rf = self.risk_free_rate / self.periods_per_year;
        let excess: Vec<f64> = returns.iter().map(|r| r - rf).collect();
        let std_dev = returns.std_dev();
        if !std_dev.is_finite() || std_dev == 0.0 {
            return 0.0;
        }
        self.periods_per_year.sqrt() * excess.as_slice().mean() / std_dev
    }

    fn sortino(&self, returns: &[f64]) -> f64 {
        let rf = self.risk_free_rate / self.periods_per_year;
        let mean = returns.iter().map(|r| r - rf).sum::<f64>() / returns.len() as f64;

        //downside deviation: root mean square of the negative returns over all periods
        let squared: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
        if squared == 0.0 {
            return 0.0;
        }
        let downside = (squared / returns.len() as f64).sqrt();
        if !downside.is_finite() {
            return 0.0;
        }
        self.periods_per_year.sqrt() * mean / downside
    }
}

//(1 + total)^(365 / days) - 1 over the curve's calendar span
fn annualize(total_return: f64, equity_curve: &[EquityPoint]) -> f64 {
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    let days = (last.timestamp - first.timestamp).num_seconds() as f64 / 86_400.0;
    if days <= 0.0 {
        return 0.0;
    }
    let growth = 1.0 + total_return;
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(365.0 / days) - 1.0
}

//historical VaR at 95% (5th percentile return) and the mean of returns at or below it
fn value_at_risk(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let var = Data::new(returns.to_vec()).percentile(5);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    let cvar = if tail.is_empty() {
        var
    } else {
        tail.iter().sum::<f64>() / tail.len() as f64
    };
    (var, cvar)
}

impl PerformanceMetrics {
    //prints metrics in a formatted table
    pub fn pretty_print_table(&self) {
        self.to_table().printstd();
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(Row::new(vec![Cell::new("Metric"), Cell::new("Value")]));

        let rows: Vec<(&str, String)> = vec![
            ("Initial Capital", format!("${:.2}", self.initial_capital)),
            ("Final Capital", format!("${:.2}", self.final_capital)),
            ("Total Return", format!("{:.2}%", self.total_return * 100.0)),
            ("Annual Return", format!("{:.2}%", self.annual_return * 100.0)),
            ("Volatility", format!("{:.2}%", self.volatility * 100.0)),
            ("Max Drawdown", format!("{:.2}%", self.max_drawdown * 100.0)),
            ("Sharpe Ratio", format!("{:.3}", self.sharpe_ratio)),
            ("Sortino Ratio", format!("{:.3}", self.sortino_ratio)),
            ("Calmar Ratio", format!("{:.3}", self.calmar_ratio)),
            ("VaR (95%)", format!("{:.3}%", self.var_95 * 100.0)),
            ("CVaR (95%)", format!("{:.3}%", self.cvar_95 * 100.0)),
            ("Recovery Factor", format!("{:.3}", self.recovery_factor)),
            ("Number of Trades", format!("{}", self.total_trades)),
            ("Win Rate", format!("{:.2}%", self.win_rate * 100.0)),
            ("Avg Win", format!("${:.2}", self.avg_win)),
            ("Avg Loss", format!("${:.2}", self.avg_loss)),
            ("Largest Win", format!("${:.2}", self.largest_win)),
            ("Largest Loss", format!("${:.2}", self.largest_loss)),
            ("Profit Factor", format!("{:.3}", self.profit_factor)),
            ("Expectancy", format!("${:.2}", self.expectancy)),
            (
                "Max Consecutive W/L",
                format!("{} / {}", self.max_consecutive_wins, self.max_consecutive_losses),
            ),
            ("Avg Duration", format!("{:.1}h", self.avg_trade_duration_hours)),
            ("Commission", format!("${:.2}", self.total_commission)),
            ("Exposure", format!("{:.2}%", self.exposure * 100.0)),
        ];

        for (label, value) in rows {
            table.add_row(Row::new(vec![Cell::new(label), Cell::new(&value)]));
        }
        table
    }
}
