use anyhow::{Context, Result};
use backsight::data::loader::parse_timestamp;
use backsight::journal::{write_orders_csv, write_trades_csv};
use backsight::metrics::calculate_equity_curve;
use backsight::prelude::*;
use clap::{Args, Parser, Subcommand};
use prettytable::{Cell, Row, Table};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "backsight")]
#[command(about = "An event-driven strategy backtesting engine with risk-adjusted sizing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    //run a backtest
    Run(RunArgs),
    //run sma crossover over a grid of windows in parallel
    Sweep(SweepArgs),
    //size a single trade
    Size(SizeArgs),
}

#[derive(Args)]
struct RunArgs {
    //json run configuration; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    //path to csv data file
    #[arg(long)]
    data: Option<PathBuf>,

    //symbol to trade
    #[arg(long)]
    symbol: Option<String>,

    //strategy type (sma, rsi)
    #[arg(long)]
    strategy: Option<String>,

    //fast sma window (for sma strategy)
    #[arg(long)]
    fast: Option<usize>,

    //slow sma window (for sma strategy)
    #[arg(long)]
    slow: Option<usize>,

    //rsi lookback period (for rsi strategy)
    #[arg(long)]
    rsi_lookback: Option<usize>,

    //rsi lower threshold (for rsi strategy)
    #[arg(long)]
    rsi_lower: Option<f64>,

    //rsi upper threshold (for rsi strategy)
    #[arg(long)]
    rsi_upper: Option<f64>,

    //stop loss distance as a fraction of entry
    #[arg(long)]
    stop_loss_pct: Option<f64>,

    //take profit distance as a fraction of entry
    #[arg(long)]
    take_profit_pct: Option<f64>,

    #[arg(long)]
    initial_capital: Option<f64>,

    //commission as a fraction of notional
    #[arg(long)]
    commission: Option<f64>,

    //slippage as a fraction of price
    #[arg(long)]
    slippage: Option<f64>,

    #[arg(long)]
    leverage: Option<f64>,

    //drawdown that triggers a margin call
    #[arg(long)]
    margin_call: Option<f64>,

    #[arg(long)]
    risk_per_trade: Option<f64>,

    //sizing method (kelly, optimal_f, volatility, fixed)
    #[arg(long)]
    sizing: Option<String>,

    //kelly risk level (conservative, moderate, aggressive, full)
    #[arg(long)]
    risk_level: Option<String>,

    #[arg(long)]
    allow_short: bool,

    #[arg(long)]
    close_at_end: bool,

    //first bar to include
    #[arg(long)]
    start: Option<String>,

    //last bar to include
    #[arg(long)]
    end: Option<String>,

    //output options
    #[arg(long)]
    output_json: Option<PathBuf>,

    #[arg(long)]
    output_equity_csv: Option<PathBuf>,

    #[arg(long)]
    output_trades_csv: Option<PathBuf>,

    #[arg(long)]
    output_orders_csv: Option<PathBuf>,

    //write the effective configuration to this path
    #[arg(long)]
    save_config: Option<PathBuf>,
}

#[derive(Args)]
struct SweepArgs {
    #[arg(long)]
    data: PathBuf,

    #[arg(long)]
    symbol: String,

    //fast windows, comma separated
    #[arg(long, value_delimiter = ',', default_value = "5,10,20")]
    fast: Vec<usize>,

    //slow windows, comma separated
    #[arg(long, value_delimiter = ',', default_value = "30,50,100")]
    slow: Vec<usize>,

    #[arg(long, default_value = "100000")]
    initial_capital: f64,

    //rows to show
    #[arg(long, default_value = "10")]
    top: usize,
}

#[derive(Args)]
struct SizeArgs {
    #[arg(long)]
    entry: f64,

    #[arg(long)]
    stop_loss: Option<f64>,

    #[arg(long)]
    take_profit: Option<f64>,

    #[arg(long, default_value = "100000")]
    equity: f64,

    //sizing method (kelly, optimal_f, volatility, fixed)
    #[arg(long, default_value = "kelly")]
    method: String,

    #[arg(long)]
    win_rate: Option<f64>,

    #[arg(long)]
    avg_win: Option<f64>,

    #[arg(long)]
    avg_loss: Option<f64>,

    //annualized volatility estimate
    #[arg(long)]
    volatility: Option<f64>,

    #[arg(long, default_value = "1.0")]
    strength: f64,

    #[arg(long, default_value = "moderate")]
    risk_level: String,

    #[arg(long, default_value = "0.02")]
    max_risk: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("backsight=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_backtest(args),
        Commands::Sweep(args) => run_parameter_sweep(args),
        Commands::Size(args) => size_trade(args),
    }
}

//merges flags over the json config (or defaults)
fn resolve_configuration(args: &RunArgs) -> Result<RunConfiguration> {
    let mut run = match &args.config {
        Some(path) => RunConfiguration::from_json_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => RunConfiguration::default(),
    };

    if let Some(data) = &args.data {
        run.data_path = data.clone();
    }
    if let Some(symbol) = &args.symbol {
        run.symbol = symbol.clone();
    }

    if let Some(name) = &args.strategy {
        let strategy_type = StrategyType::parse(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown strategy: {}", name))?;
        if strategy_type != run.strategy_params.strategy_type() {
            run.strategy_params = match strategy_type {
                StrategyType::SmaCrossover => StrategyParams::Sma(SmaParams::default()),
                StrategyType::RsiReversion => StrategyParams::Rsi(RsiParams::default()),
            };
        }
    }

    match &mut run.strategy_params {
        StrategyParams::Sma(p) => {
            p.fast_window = args.fast.unwrap_or(p.fast_window);
            p.slow_window = args.slow.unwrap_or(p.slow_window);
            p.stop_loss_pct = args.stop_loss_pct.or(p.stop_loss_pct);
            p.take_profit_pct = args.take_profit_pct.or(p.take_profit_pct);
            if p.fast_window >= p.slow_window {
                anyhow::bail!("--fast must be smaller than --slow");
            }
        }
        StrategyParams::Rsi(p) => {
            p.lookback = args.rsi_lookback.unwrap_or(p.lookback);
            p.oversold = args.rsi_lower.unwrap_or(p.oversold);
            p.overbought = args.rsi_upper.unwrap_or(p.overbought);
            p.stop_loss_pct = args.stop_loss_pct.or(p.stop_loss_pct);
        }
    }

    let bt = &mut run.backtest;
    bt.initial_capital = args.initial_capital.unwrap_or(bt.initial_capital);
    bt.commission_rate = args.commission.unwrap_or(bt.commission_rate);
    bt.slippage_rate = args.slippage.unwrap_or(bt.slippage_rate);
    bt.leverage = args.leverage.unwrap_or(bt.leverage);
    bt.margin_call_level = args.margin_call.unwrap_or(bt.margin_call_level);
    bt.risk_per_trade = args.risk_per_trade.unwrap_or(bt.risk_per_trade);
    bt.allow_short |= args.allow_short;
    bt.close_at_end |= args.close_at_end;

    if let Some(method) = &args.sizing {
        bt.sizing_method = SizingMethod::parse(method)
            .ok_or_else(|| anyhow::anyhow!("Unknown sizing method: {}", method))?;
    }
    if let Some(level) = &args.risk_level {
        bt.sizing.risk_level = RiskLevel::parse(level)
            .ok_or_else(|| anyhow::anyhow!("Unknown risk level: {}", level))?;
    }
    if let Some(start) = &args.start {
        bt.start_date = Some(
            parse_timestamp(start).ok_or_else(|| anyhow::anyhow!("Bad --start date: {}", start))?,
        );
    }
    if let Some(end) = &args.end {
        bt.end_date =
            Some(parse_timestamp(end).ok_or_else(|| anyhow::anyhow!("Bad --end date: {}", end))?);
    }

    run.output_json = args.output_json.clone().or(run.output_json);
    run.output_equity_csv = args.output_equity_csv.clone().or(run.output_equity_csv);
    run.output_trades_csv = args.output_trades_csv.clone().or(run.output_trades_csv);
    run.output_orders_csv = args.output_orders_csv.clone().or(run.output_orders_csv);

    Ok(run)
}

fn load_series(path: &Path, symbol: &str) -> Result<BarSeries> {
    let all_bars =
        load_csv(path, symbol).with_context(|| format!("Failed to load data from {:?}", path))?;
    let bars = if all_bars.is_multi_symbol() {
        all_bars
            .filter_symbol(symbol)
            .with_context(|| format!("No data found for symbol {}", symbol))?
    } else {
        all_bars
    };
    Ok(bars)
}

fn run_backtest(args: RunArgs) -> Result<()> {
    println!("Backsight Backtesting Engine");
    println!("============================\n");

    let run = resolve_configuration(&args)?;
    if let Some(path) = &args.save_config {
        run.to_json_file(path)?;
        println!("Configuration saved to {:?}", path);
    }

    println!("Loading data from {:?}...", run.data_path);
    let bars = load_series(&run.data_path, &run.symbol)?;
    let engine = BacktestEngine::new(run.backtest.clone(), bars)?;

    //date bounds are already applied here
    let series = engine.series();
    if let (Some(first), Some(last)) = (series.first_timestamp(), series.last_timestamp()) {
        println!("Loaded {} bars for {}", series.len(), run.symbol);
        println!("Date range: {} to {}\n", first, last);
    }

    let mut strategy = run
        .strategy_params
        .build(&run.symbol, run.backtest.allow_short);
    let config = engine.config();

    println!("Strategy: {}", strategy.name());
    println!("Sizing: {:?}", config.sizing_method);
    println!("Initial capital: ${:.2}", config.initial_capital);
    println!("Commission: {:.3}%", config.commission_rate * 100.0);
    println!("Slippage: {:.3}%\n", config.slippage_rate * 100.0);

    println!("Running backtest...\n");
    let result = engine.run(strategy.as_mut());

    println!("Backtest Results ({:?})", result.status);
    println!("================\n");
    result.metrics.pretty_print_table();

    if !result.warnings.is_empty() {
        println!("\n{} warning(s) recorded during the run", result.warnings.len());
    }

    if let Some(path) = &run.output_json {
        std::fs::write(path, result.to_json()?)?;
        println!("\nResult saved to {:?}", path);
    }

    if let Some(path) = &run.output_equity_csv {
        save_equity_csv(&result, path)?;
        println!("Equity curve saved to {:?}", path);
    }

    if let Some(path) = &run.output_trades_csv {
        write_trades_csv(&result.trades, std::fs::File::create(path)?)?;
        println!("Trades saved to {:?}", path);
    }

    if let Some(path) = &run.output_orders_csv {
        write_orders_csv(&result.orders, std::fs::File::create(path)?)?;
        println!("Orders saved to {:?}", path);
    }

    Ok(())
}

fn save_equity_csv(result: &BacktestResult, path: &Path) -> Result<()> {
    let curve = calculate_equity_curve(&result.equity_curve, result.config.initial_capital);
    let mut writer = csv::Writer::from_path(path)?;
    for point in &curve {
        writer.serialize(point)?;
    }
    writer.flush()?;
    Ok(())
}

fn run_parameter_sweep(args: SweepArgs) -> Result<()> {
    let bars = load_series(&args.data, &args.symbol)?;
    let config = BacktestConfig {
        initial_capital: args.initial_capital,
        ..BacktestConfig::default()
    };
    let engine = BacktestEngine::new(config, bars)?;

    let grid = sma_grid(&args.fast, &args.slow, &SmaParams::default());
    if grid.is_empty() {
        anyhow::bail!("No (fast, slow) pair with fast < slow");
    }
    println!("Running {} backtests in parallel...\n", grid.len());

    let symbol = args.symbol.clone();
    let mut results = run_sweep(&engine, grid, |p| {
        StrategyParams::Sma(p.clone()).build(&symbol, false)
    });
    rank_by_sharpe(&mut results);

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Fast"),
        Cell::new("Slow"),
        Cell::new("Return"),
        Cell::new("Max DD"),
        Cell::new("Sharpe"),
        Cell::new("Trades"),
        Cell::new("Status"),
    ]));
    for (params, result) in results.iter().take(args.top) {
        let m = &result.metrics;
        table.add_row(Row::new(vec![
            Cell::new(&params.fast_window.to_string()),
            Cell::new(&params.slow_window.to_string()),
            Cell::new(&format!("{:.2}%", m.total_return * 100.0)),
            Cell::new(&format!("{:.2}%", m.max_drawdown * 100.0)),
            Cell::new(&format!("{:.3}", m.sharpe_ratio)),
            Cell::new(&m.total_trades.to_string()),
            Cell::new(&format!("{:?}", result.status)),
        ]));
    }
    table.printstd();
    Ok(())
}

fn size_trade(args: SizeArgs) -> Result<()> {
    let method = SizingMethod::parse(&args.method)
        .ok_or_else(|| anyhow::anyhow!("Unknown sizing method: {}", args.method))?;
    let risk_level = RiskLevel::parse(&args.risk_level)
        .ok_or_else(|| anyhow::anyhow!("Unknown risk level: {}", args.risk_level))?;

    let sizer = PositionSizer::new(
        SizingConfig {
            max_risk_per_trade: args.max_risk,
            risk_level,
            ..SizingConfig::default()
        },
        args.equity,
    );

    let mut signal = SizingSignal::new("CLI", OrderSide::Buy, args.entry).with_strength(args.strength);
    signal.stop_loss = args.stop_loss;
    signal.take_profit = args.take_profit;
    signal.volatility = args.volatility;
    signal.win_rate = args.win_rate;
    signal.avg_win = args.avg_win;
    signal.avg_loss = args.avg_loss;

    let result = sizer.calculate_position_size(&signal, method);

    let mut table = Table::new();
    let rows = [
        ("Method", format!("{:?}", result.method)),
        ("Position Size", format!("{:.4}", result.position_size)),
        ("Risk Amount", format!("${:.2}", result.risk_amount)),
        ("Risk Fraction", format!("{:.4}", result.risk_fraction)),
        ("Kelly (raw)", format!("{:.4}", result.kelly_fraction)),
        ("Kelly (adjusted)", format!("{:.4}", result.adjusted_kelly)),
        ("Confidence", format!("{:.2}", result.confidence)),
        ("Risk/Reward", format!("{:.2}", result.risk_reward_ratio)),
        ("Expected Value", format!("{:.2}", result.expected_value)),
        ("Max Size", format!("{:.4}", result.max_position_size)),
        ("Reasoning", result.reasoning.clone()),
    ];
    for (label, value) in rows {
        table.add_row(Row::new(vec![Cell::new(label), Cell::new(&value)]));
    }
    table.printstd();
    Ok(())
}
