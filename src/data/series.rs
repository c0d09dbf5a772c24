use crate::data::bar::Bar;
use crate::error::DataError;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};

//all bars sharing one timestamp, keyed by symbol
pub type BarTable = IndexMap<String, Bar>;

//chronologically ordered ohlcv data for one or more symbols
//
//iteration never shares a cursor: every call to `iter` starts from the first bar
#[derive(Debug, Clone)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    //validates and sorts the bars by timestamp
    //bars sharing a timestamp keep their input order
    pub fn new(mut bars: Vec<Bar>) -> Result<Self, DataError> {
        if bars.is_empty() {
            return Err(DataError::Empty);
        }

        for (index, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|source| DataError::InvalidBar {
                index,
                symbol: bar.symbol.clone(),
                timestamp: bar.timestamp,
                source,
            })?;
        }

        bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let series = BarSeries { bars };
        series.check_duplicates()?;
        Ok(series)
    }

    fn check_duplicates(&self) -> Result<(), DataError> {
        for (timestamp, table_len, group) in self.groups() {
            if table_len != group.len() {
                let mut seen = IndexSet::new();
                for bar in group {
                    if !seen.insert(bar.symbol.as_str()) {
                        return Err(DataError::DuplicateBar {
                            symbol: bar.symbol.clone(),
                            timestamp,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    //yields (timestamp, distinct symbol count, bars) per timestamp
    fn groups(&self) -> impl Iterator<Item = (DateTime<Utc>, usize, &[Bar])> + '_ {
        let mut pos = 0;
        std::iter::from_fn(move || {
            let (end, timestamp) = group_end(&self.bars, pos)?;
            let group = &self.bars[pos..end];
            pos = end;
            let distinct: IndexSet<&str> = group.iter().map(|b| b.symbol.as_str()).collect();
            Some((timestamp, distinct.len(), group))
        })
    }

    //returns a fresh iterator over (timestamp, bar table)
    pub fn iter(&self) -> BarIter<'_> {
        BarIter {
            bars: &self.bars,
            pos: 0,
        }
    }

    //restricts the series to [start, end], both bounds inclusive
    pub fn between(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BarSeries, DataError> {
        let bars: Vec<Bar> = self
            .bars
            .iter()
            .filter(|b| start.map_or(true, |s| b.timestamp >= s))
            .filter(|b| end.map_or(true, |e| b.timestamp <= e))
            .cloned()
            .collect();

        if bars.is_empty() {
            return Err(DataError::EmptyRange);
        }
        Ok(BarSeries { bars })
    }

    //keeps only the bars of one symbol
    pub fn filter_symbol(&self, symbol: &str) -> Result<BarSeries, DataError> {
        let bars: Vec<Bar> = self
            .bars
            .iter()
            .filter(|b| b.symbol == symbol)
            .cloned()
            .collect();

        if bars.is_empty() {
            return Err(DataError::Empty);
        }
        Ok(BarSeries { bars })
    }

    //symbols in order of first appearance
    pub fn symbols(&self) -> Vec<String> {
        let set: IndexSet<&str> = self.bars.iter().map(|b| b.symbol.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    }

    pub fn is_multi_symbol(&self) -> bool {
        self.symbols().len() > 1
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }
}

//end index (exclusive) and timestamp of the group starting at pos
fn group_end(bars: &[Bar], pos: usize) -> Option<(usize, DateTime<Utc>)> {
    let timestamp = bars.get(pos)?.timestamp;
    let mut end = pos;
    while end < bars.len() && bars[end].timestamp == timestamp {
        end += 1;
    }
    Some((end, timestamp))
}

//lazy iterator over a series, one step per distinct timestamp
pub struct BarIter<'a> {
    bars: &'a [Bar],
    pos: usize,
}

impl<'a> Iterator for BarIter<'a> {
    type Item = (DateTime<Utc>, BarTable);

    fn next(&mut self) -> Option<Self::Item> {
        let (end, timestamp) = group_end(self.bars, self.pos)?;
        let table = self.bars[self.pos..end]
            .iter()
            .map(|b| (b.symbol.clone(), b.clone()))
            .collect();
        self.pos = end;
        Some((timestamp, table))
    }
}

impl<'a> IntoIterator for &'a BarSeries {
    type Item = (DateTime<Utc>, BarTable);
    type IntoIter = BarIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar(day: i64, symbol: &str, close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        Bar::new_unchecked(ts, symbol, close, close + 1.0, close - 1.0, close, 100.0)
    }

    #[test]
    fn empty_input_is_data_error() {
        assert!(matches!(BarSeries::new(vec![]), Err(DataError::Empty)));
    }

    #[test]
    fn sorts_unordered_input() {
        let series = BarSeries::new(vec![bar(2, "A", 3.0), bar(0, "A", 1.0), bar(1, "A", 2.0)])
            .unwrap();
        let closes: Vec<f64> = series.iter().map(|(_, t)| t["A"].close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn groups_multi_symbol_bars_by_timestamp() {
        let series = BarSeries::new(vec![
            bar(0, "A", 1.0),
            bar(0, "B", 10.0),
            bar(1, "B", 11.0),
            bar(1, "A", 2.0),
        ])
        .unwrap();

        let steps: Vec<_> = series.iter().collect();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].1.len(), 2);
        assert_eq!(steps[1].1["A"].close, 2.0);
        assert!(series.is_multi_symbol());
    }

    #[test]
    fn iteration_is_restartable() {
        let series = BarSeries::new(vec![bar(0, "A", 1.0), bar(1, "A", 2.0)]).unwrap();
        let mut first = series.iter();
        first.next();
        assert_eq!(series.iter().count(), 2);
        assert_eq!(first.count(), 1);
    }

    #[test]
    fn duplicate_symbol_at_same_timestamp_is_rejected() {
        let err = BarSeries::new(vec![bar(0, "A", 1.0), bar(0, "A", 1.5)]).unwrap_err();
        assert!(matches!(err, DataError::DuplicateBar { .. }));
    }

    #[test]
    fn invalid_bar_is_rejected() {
        let mut broken = bar(0, "A", 1.0);
        broken.high = 0.5;
        let err = BarSeries::new(vec![broken]).unwrap_err();
        assert!(matches!(err, DataError::InvalidBar { index: 0, .. }));
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let series =
            BarSeries::new((0..5).map(|d| bar(d, "A", 1.0 + d as f64)).collect()).unwrap();
        let start = series.bars()[1].timestamp;
        let end = series.bars()[3].timestamp;
        let window = series.between(Some(start), Some(end)).unwrap();
        assert_eq!(window.len(), 3);

        let late = series.last_timestamp().unwrap() + Duration::days(10);
        assert!(matches!(
            series.between(Some(late), None),
            Err(DataError::EmptyRange)
        ));
    }
}
