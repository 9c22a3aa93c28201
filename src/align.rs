//! Nearest-match join of an irregular series onto a regular timeline.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use tracing::{info, warn};

use crate::series::{IrregularSeries, MetricSet, Reading, RegularSeries};

pub const DEFAULT_TOLERANCE_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRecord {
    pub timestamp: NaiveDateTime,
    pub values: Vec<Option<f64>>,
    /// Nearest irregular value; `None` both when nothing was within tolerance
    /// and when the matched reading itself had no value.
    pub label: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedTable {
    pub metrics: MetricSet,
    /// Name of the joined irregular series, absent when nothing was joined.
    pub label: Option<String>,
    pub records: Vec<AlignedRecord>,
}

impl AlignedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn matched_labels(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.label.is_some())
            .count()
    }
}

pub fn align(regular: &RegularSeries, irregular: Option<&IrregularSeries>) -> AlignedTable {
    align_with_tolerance(
        regular,
        irregular,
        ChronoDuration::minutes(DEFAULT_TOLERANCE_MINUTES),
    )
}

pub fn align_with_tolerance(
    regular: &RegularSeries,
    irregular: Option<&IrregularSeries>,
    tolerance: ChronoDuration,
) -> AlignedTable {
    let Some(irregular) = irregular else {
        return AlignedTable {
            metrics: regular.metrics().clone(),
            label: None,
            records: regular
                .rows()
                .iter()
                .map(|row| AlignedRecord {
                    timestamp: row.timestamp,
                    values: row.values.clone(),
                    label: None,
                })
                .collect(),
        };
    };

    let sorted;
    let readings: &[Reading] = if irregular.is_sorted() {
        &irregular.readings
    } else {
        warn!(
            component = "align",
            event = "align.irregular.unsorted",
            series = %irregular.name,
            readings = irregular.len()
        );
        let mut copy = irregular.clone();
        copy.sort_ascending();
        sorted = copy;
        &sorted.readings
    };

    let mut records = Vec::with_capacity(regular.len());
    let mut cursor = 0usize;
    for row in regular.rows() {
        let lower = row.timestamp - tolerance;
        let upper = row.timestamp + tolerance;

        while cursor < readings.len() && readings[cursor].timestamp < lower {
            cursor += 1;
        }

        let mut best: Option<(ChronoDuration, &Reading)> = None;
        for reading in readings[cursor..]
            .iter()
            .take_while(|reading| reading.timestamp <= upper)
        {
            let distance = (reading.timestamp - row.timestamp).abs();
            // Strict comparison keeps the earliest candidate on ties.
            if best.map_or(true, |(best_distance, _)| distance < best_distance) {
                best = Some((distance, reading));
            }
        }

        records.push(AlignedRecord {
            timestamp: row.timestamp,
            values: row.values.clone(),
            label: best.and_then(|(_, reading)| reading.value),
        });
    }

    let table = AlignedTable {
        metrics: regular.metrics().clone(),
        label: Some(irregular.name.clone()),
        records,
    };

    info!(
        component = "align",
        event = "align.finish",
        rows = table.len(),
        matched = table.matched_labels(),
        irregular_readings = readings.len(),
        tolerance_minutes = tolerance.num_minutes()
    );
    table
}
