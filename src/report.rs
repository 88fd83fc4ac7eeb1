use crate::models::BacktestResult;
use anyhow::{anyhow, Context, Result};
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Html,
    Markdown,
    Json,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Markdown => "markdown",
            ReportFormat::Json => "json",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(ReportFormat::Html),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(anyhow!("Unknown report format '{}'", other)),
        }
    }
}

/// Renders a backtest result to the requested format and writes it out.
/// Report writes are the user-requested output, so failures are fatal.
pub fn write_report(result: &BacktestResult, format: ReportFormat, path: &Path) -> Result<()> {
    let content = render(result, format)?;
    fs::write(path, content)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}

pub fn render(result: &BacktestResult, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => {
            serde_json::to_string_pretty(result).context("failed to serialize backtest result")
        }
        ReportFormat::Markdown => Ok(render_markdown(result)),
        ReportFormat::Html => Ok(render_html(result)),
    }
}

fn metric_rows(result: &BacktestResult) -> Vec<(&'static str, String)> {
    let p = &result.performance;
    vec![
        ("Total return", format!("{:.2}%", p.total_return * 100.0)),
        (
            "Annualized return",
            format!("{:.2}%", p.annualized_return * 100.0),
        ),
        ("Volatility", format!("{:.2}%", p.volatility * 100.0)),
        ("Max drawdown", format!("{:.2}%", p.max_drawdown * 100.0)),
        ("Sharpe ratio", format!("{:.4}", p.sharpe_ratio)),
        ("Sortino ratio", format!("{:.4}", p.sortino_ratio)),
        ("Win rate", format!("{:.2}%", p.win_rate * 100.0)),
        (
            "Profit factor",
            if p.profit_factor.is_finite() {
                format!("{:.4}", p.profit_factor)
            } else {
                "inf".to_string()
            },
        ),
        ("Average trade", format!("{:.2}", p.average_trade)),
        ("Closed trades", format!("{}", p.total_trades)),
        ("Winning trades", format!("{}", p.winning_trades)),
        ("Losing trades", format!("{}", p.losing_trades)),
    ]
}

fn render_markdown(result: &BacktestResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Backtest report: {}", result.strategy);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Symbols: {}", result.symbols.join(", "));
    let _ = writeln!(
        out,
        "- Period: {} to {}",
        result.start_date.format("%Y-%m-%d"),
        result.end_date.format("%Y-%m-%d")
    );
    let _ = writeln!(out, "- Initial capital: {:.2}", result.initial_capital);
    let _ = writeln!(out, "- Final equity: {:.2}", result.final_equity);
    let _ = writeln!(out);
    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "|---|---|");
    for (name, value) in metric_rows(result) {
        let _ = writeln!(out, "| {} | {} |", name, value);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## Trades");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Symbol | Entry | Exit | Qty | PnL |");
    let _ = writeln!(out, "|---|---|---|---|---|");
    for trade in &result.trades {
        let exit = trade
            .exit_time
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "open".to_string());
        let pnl = trade
            .pnl
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "| {} | {} | {} | {:.2} | {} |",
            trade.symbol,
            trade.entry_time.format("%Y-%m-%d"),
            exit,
            trade.quantity,
            pnl
        );
    }
    out
}

fn render_html(result: &BacktestResult) -> String {
    let mut rows = String::new();
    for (name, value) in metric_rows(result) {
        let _ = writeln!(rows, "<tr><td>{}</td><td>{}</td></tr>", name, value);
    }
    let mut trade_rows = String::new();
    for trade in &result.trades {
        let exit = trade
            .exit_time
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "open".to_string());
        let pnl = trade
            .pnl
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            trade_rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td></tr>",
            trade.symbol,
            trade.entry_time.format("%Y-%m-%d"),
            exit,
            trade.quantity,
            pnl
        );
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Backtest report: {strategy}</title>\n\
         <style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse}}td,th{{border:1px solid #ccc;padding:4px 8px}}</style>\n\
         </head>\n<body>\n<h1>Backtest report: {strategy}</h1>\n\
         <p>Symbols: {symbols}<br>Period: {start} to {end}<br>Initial capital: {capital:.2}<br>Final equity: {equity:.2}</p>\n\
         <h2>Performance</h2>\n<table>{rows}</table>\n\
         <h2>Trades</h2>\n<table><tr><th>Symbol</th><th>Entry</th><th>Exit</th><th>Qty</th><th>PnL</th></tr>{trade_rows}</table>\n\
         </body>\n</html>\n",
        strategy = result.strategy,
        symbols = result.symbols.join(", "),
        start = result.start_date.format("%Y-%m-%d"),
        end = result.end_date.format("%Y-%m-%d"),
        capital = result.initial_capital,
        equity = result.final_equity,
        rows = rows,
        trade_rows = trade_rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EquityPoint, PerformanceSummary};
    use chrono::{TimeZone, Utc};

    fn sample_result() -> BacktestResult {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        BacktestResult {
            id: "r1".to_string(),
            strategy: "moving-average".to_string(),
            symbols: vec!["AAA".to_string()],
            start_date: start,
            end_date: end,
            initial_capital: 100_000.0,
            final_equity: 104_500.0,
            performance: PerformanceSummary {
                total_return: 0.045,
                annualized_return: 0.11,
                volatility: 0.2,
                max_drawdown: 0.08,
                sharpe_ratio: 0.9,
                sortino_ratio: 1.2,
                win_rate: 0.6,
                profit_factor: f64::INFINITY,
                average_trade: 150.0,
                total_trades: 10,
                winning_trades: 6,
                losing_trades: 4,
            },
            equity_curve: vec![EquityPoint {
                time: start,
                equity: 100_000.0,
                drawdown: 0.0,
            }],
            trades: Vec::new(),
            created_at: end,
        }
    }

    #[test]
    fn json_report_round_trips() {
        let rendered = render(&sample_result(), ReportFormat::Json).unwrap();
        let parsed: BacktestResult = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.strategy, "moving-average");
        assert!((parsed.performance.total_return - 0.045).abs() < 1e-12);
        assert!(parsed.performance.profit_factor.is_infinite());
    }

    #[test]
    fn markdown_report_mentions_key_metrics() {
        let rendered = render(&sample_result(), ReportFormat::Markdown).unwrap();
        assert!(rendered.contains("# Backtest report: moving-average"));
        assert!(rendered.contains("| Total return | 4.50% |"));
        assert!(rendered.contains("| Profit factor | inf |"));
    }

    #[test]
    fn html_report_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.html");
        write_report(&sample_result(), ReportFormat::Html, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("<title>Backtest report: moving-average</title>"));
    }
}
