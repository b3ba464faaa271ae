//! Trailing-window filtering and KPI aggregation.

use tracing::debug;

use crate::{
    Aggregates, CanonicalRecord, KpiSnapshot, LatestReadings, QueryError, SensorField,
    SeriesTable, TimeWindow,
};

// ---

/// Keep the records inside `window` and compute KPIs over them.
///
/// Fails with [`QueryError::EmptyWindow`] rather than aggregating nothing.
pub fn filter_and_aggregate(
    series: &SeriesTable,
    window: &TimeWindow,
) -> Result<(SeriesTable, KpiSnapshot), QueryError> {
    // ---
    let kept: Vec<CanonicalRecord> = series
        .iter()
        .filter(|record| window.contains(record.timestamp))
        .cloned()
        .collect();

    if kept.is_empty() {
        return Err(QueryError::EmptyWindow {
            window_minutes: window.minutes(),
        });
    }

    let filtered = SeriesTable::from_sorted(kept);
    let kpis = aggregate(&filtered);
    debug!(
        "Window {} min ending {} kept {} of {} records",
        window.minutes(),
        window.now,
        filtered.len(),
        series.len()
    );
    Ok((filtered, kpis))
}

fn aggregate(series: &SeriesTable) -> KpiSnapshot {
    // ---
    let temperature = Channel::collect(series, SensorField::Temperature);
    let moisture = Channel::collect(series, SensorField::Moisture);
    let co2 = Channel::collect(series, SensorField::Co2);

    KpiSnapshot {
        latest: LatestReadings {
            temperature: temperature.latest(),
            moisture: moisture.latest(),
            co2: co2.latest(),
        },
        aggregates: Aggregates {
            max_temp: temperature.max(),
            mean_temp: temperature.mean(),
            mean_moisture: moisture.mean(),
            mean_co2: co2.mean(),
        },
        alert_count: series.iter().filter(|r| r.alert.is_some()).count(),
        record_count: series.len(),
    }
}

/// Present values of one channel, in time order.
struct Channel(Vec<f64>);

impl Channel {
    fn collect(series: &SeriesTable, field: SensorField) -> Self {
        Channel(series.iter().filter_map(|r| field.value_of(r)).collect())
    }

    /// Most recent present value; trailing absent readings are skipped.
    fn latest(&self) -> Option<f64> {
        self.0.last().copied()
    }

    fn max(&self) -> Option<f64> {
        self.0.iter().copied().reduce(f64::max)
    }

    /// Mean over present values only; absent readings count in neither the
    /// sum nor the denominator.
    fn mean(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.iter().sum::<f64>() / self.0.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 18, minute, 0).unwrap()
    }

    fn reading(minute: u32, temp: Option<f64>, moisture: Option<f64>) -> CanonicalRecord {
        CanonicalRecord {
            temperature: temp,
            moisture,
            ..CanonicalRecord::at(at(minute))
        }
    }

    #[test]
    fn test_mean_excludes_absent_values() {
        // ---
        let series = SeriesTable::from_unsorted(vec![
            reading(0, Some(10.0), None),
            reading(1, None, None),
            reading(2, Some(30.0), None),
        ]);
        let window = TimeWindow::trailing(&series, 60).unwrap();

        let (_, kpis) = filter_and_aggregate(&series, &window).unwrap();
        assert_eq!(kpis.aggregates.mean_temp, Some(20.0));
        assert_eq!(kpis.aggregates.max_temp, Some(30.0));
        assert_eq!(kpis.aggregates.mean_moisture, None);
        assert_eq!(kpis.record_count, 3);
    }

    #[test]
    fn test_latest_walks_back_past_absent_values() {
        // ---
        let series = SeriesTable::from_unsorted(vec![
            reading(0, Some(10.0), Some(40.0)),
            reading(1, Some(11.0), None),
            reading(2, None, None),
        ]);
        let window = TimeWindow::trailing(&series, 60).unwrap();

        let (_, kpis) = filter_and_aggregate(&series, &window).unwrap();
        assert_eq!(kpis.latest.temperature, Some(11.0));
        assert_eq!(kpis.latest.moisture, Some(40.0));
        assert_eq!(kpis.latest.co2, None);
    }

    #[test]
    fn test_cutoff_is_inclusive() {
        // ---
        let series = SeriesTable::from_unsorted(vec![
            reading(0, Some(1.0), None),
            reading(10, Some(2.0), None),
            reading(30, Some(3.0), None),
        ]);
        let window = TimeWindow::trailing(&series, 20).unwrap();

        let (filtered, kpis) = filter_and_aggregate(&series, &window).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.first().unwrap().timestamp, at(10));
        assert_eq!(kpis.aggregates.max_temp, Some(3.0));
    }

    #[test]
    fn test_empty_window() {
        // ---
        let series = SeriesTable::from_unsorted(vec![reading(0, Some(1.0), None)]);
        let window = TimeWindow::ending_at(at(45), 30);

        let err = filter_and_aggregate(&series, &window).unwrap_err();
        assert!(matches!(err, QueryError::EmptyWindow { window_minutes: 30 }));

        let empty = SeriesTable::default();
        assert!(filter_and_aggregate(&empty, &window).is_err());
    }

    #[test]
    fn test_alert_count() {
        // ---
        let mut flagged = reading(1, Some(500.0), None);
        flagged.alert = Some(crate::AlertAnnotation {
            kind: "HIGH_TEMP".into(),
            value: 500.0,
        });
        let series = SeriesTable::from_unsorted(vec![reading(0, Some(1.0), None), flagged]);
        let window = TimeWindow::trailing(&series, 5).unwrap();

        let (_, kpis) = filter_and_aggregate(&series, &window).unwrap();
        assert_eq!(kpis.alert_count, 1);
    }
}
