use crate::data::bar::Bar;
use crate::data::series::BarSeries;
use crate::error::DataError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

#[derive(Debug, Deserialize)]
struct CsvRecord {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    symbol: Option<String>,
}

//loads bars from a csv file
//rows without a symbol column are tagged with default_symbol
pub fn load_csv<P: AsRef<Path>>(path: P, default_symbol: &str) -> Result<BarSeries, DataError> {
    let file = File::open(path.as_ref())?;
    read_csv(file, default_symbol)
}

//reads bars from any csv source
pub fn read_csv<R: Read>(source: R, default_symbol: &str) -> Result<BarSeries, DataError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h.eq_ignore_ascii_case(column)) {
            return Err(DataError::MissingColumn(column.to_string()));
        }
    }
    let headers = csv::StringRecord::from(
        headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect::<Vec<_>>(),
    );

    let mut bars = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let line = index + 2;
        let record: CsvRecord = result?.deserialize(Some(&headers))?;

        let timestamp = parse_timestamp(&record.timestamp).ok_or_else(|| {
            DataError::BadTimestamp {
                line,
                value: record.timestamp.clone(),
            }
        })?;

        bars.push(Bar::new_unchecked(
            timestamp,
            record
                .symbol
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default_symbol.to_string()),
            record.open,
            record.high,
            record.low,
            record.close,
            record.volume,
        ));
    }

    BarSeries::new(bars)
}

//accepts rfc3339, "YYYY-MM-DD HH:MM:SS" and plain dates (midnight utc)
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_single_symbol_csv() {
        let data = "timestamp,open,high,low,close,volume\n\
                    2024-01-02,100,101,99,100.5,1000\n\
                    2024-01-01,99,100,98,99.5,900\n";
        let series = read_csv(data.as_bytes(), "SPY").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[0].close, 99.5);
        assert_eq!(series.symbols(), vec!["SPY".to_string()]);
    }

    #[test]
    fn reads_multi_symbol_csv() {
        let data = "timestamp,symbol,open,high,low,close,volume\n\
                    2024-01-01T00:00:00Z,AAA,10,11,9,10,1\n\
                    2024-01-01T00:00:00Z,BBB,20,21,19,20,1\n";
        let series = read_csv(data.as_bytes(), "X").unwrap();
        assert_eq!(series.iter().count(), 1);
        assert!(series.is_multi_symbol());
    }

    #[test]
    fn missing_column_is_data_error() {
        let data = "timestamp,open,high,low,close\n2024-01-01,1,1,1,1\n";
        let err = read_csv(data.as_bytes(), "X").unwrap_err();
        assert!(matches!(err, DataError::MissingColumn(ref c) if c == "volume"));
    }

    #[test]
    fn header_only_file_is_empty() {
        let data = "timestamp,open,high,low,close,volume\n";
        assert!(matches!(read_csv(data.as_bytes(), "X"), Err(DataError::Empty)));
    }

    #[test]
    fn bad_timestamp_reports_line() {
        let data = "timestamp,open,high,low,close,volume\nyesterday,1,1,1,1,1\n";
        let err = read_csv(data.as_bytes(), "X").unwrap_err();
        assert!(matches!(err, DataError::BadTimestamp { line: 2, .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Timestamp,Open,High,Low,Close,Volume").unwrap();
        writeln!(file, "2024-01-01 09:30:00,5,6,4,5.5,10").unwrap();
        let series = load_csv(file.path(), "ES").unwrap();
        assert_eq!(series.bars()[0].symbol, "ES");
    }
}
