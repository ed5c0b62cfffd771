use super::source::Source;
use crate::types::{Candle, IndicatorResult};
use std::collections::{BTreeMap, HashMap};

/// Candles plus the indicator series conditions are evaluated against.
///
/// Indicator series are right-aligned to the candles: the last point of every
/// series lines up with the last candle. Series computed from the same candles
/// therefore line up index for index, and series from other timeframes line up
/// on their most recent closed bar.
#[derive(Debug, Clone, Default)]
pub struct SeriesFrame {
    candles: Vec<Candle>,
    indicators: HashMap<String, Vec<IndicatorResult>>,
}

impl SeriesFrame {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            candles,
            indicators: HashMap::new(),
        }
    }

    pub fn insert_indicator(&mut self, id: &str, series: Vec<IndicatorResult>) {
        self.indicators.insert(id.to_string(), series);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn candle(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    /// Value of `source` at bar `index`, `None` when undefined.
    pub fn value(&self, source: &Source, index: usize) -> Option<f64> {
        match source {
            Source::Price(field) => self.candles.get(index).map(|c| field.of(c)),
            Source::Indicator { id, field } => {
                let series = self.indicators.get(id)?;
                let aligned = (index + series.len()).checked_sub(self.candles.len())?;
                series.get(aligned)?.field(field.as_deref())
            }
        }
    }

    /// Keep only the last `n` bars of every series.
    pub fn tail(&self, n: usize) -> SeriesFrame {
        let keep = |len: usize| len.saturating_sub(n);
        SeriesFrame {
            candles: self.candles[keep(self.candles.len())..].to_vec(),
            indicators: self
                .indicators
                .iter()
                .map(|(id, series)| (id.clone(), series[keep(series.len())..].to_vec()))
                .collect(),
        }
    }

    /// Latest value of every indicator; multi-output indicators report each
    /// sub-series as `id.field`.
    pub fn latest_values(&self) -> BTreeMap<String, Option<f64>> {
        let mut out = BTreeMap::new();
        for (id, series) in &self.indicators {
            let last = series.last();
            match last.and_then(|p| p.values.as_ref()) {
                Some(values) => {
                    for (field, value) in values {
                        out.insert(format!("{}.{}", id, field), *value);
                    }
                }
                None => {
                    out.insert(id.clone(), last.and_then(|p| p.value));
                }
            }
        }
        out
    }
}
