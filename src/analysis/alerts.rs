//! Threshold alert evaluation.

use serde::Serialize;

use crate::ingest::sensor_field_for;
use crate::{AlertAnnotation, AlertEvent, AlertOrigin, CanonicalRecord, SensorField, SeriesTable};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Fires when the reading is strictly greater than the limit.
    Above,
    /// Fires when the reading is strictly less than the limit.
    Below,
}

/// A single limit on one sensor channel, e.g. `temperature > 450`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    pub field: SensorField,
    pub direction: Direction,
    pub limit: f64,
}

impl Threshold {
    pub fn above(field: SensorField, limit: f64) -> Self {
        Threshold {
            field,
            direction: Direction::Above,
            limit,
        }
    }

    pub fn below(field: SensorField, limit: f64) -> Self {
        Threshold {
            field,
            direction: Direction::Below,
            limit,
        }
    }

    pub fn breached_by(&self, value: f64) -> bool {
        match self.direction {
            Direction::Above => value > self.limit,
            Direction::Below => value < self.limit,
        }
    }

    /// Alert kind reported for breaches of this threshold.
    pub fn kind(&self) -> String {
        let suffix = match self.direction {
            Direction::Above => "high",
            Direction::Below => "low",
        };
        format!("{}_{}", self.field, suffix)
    }

    fn check(&self, record: &CanonicalRecord) -> Option<AlertEvent> {
        let value = self.field.value_of(record)?;
        self.breached_by(value).then(|| AlertEvent {
            timestamp: record.timestamp,
            kind: self.kind(),
            value,
            threshold_exceeded: true,
            origin: AlertOrigin::Threshold,
        })
    }
}

/// Caller-supplied threshold table, evaluated in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Thresholds(Vec<Threshold>);

impl Thresholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, threshold: Threshold) -> Self {
        self.0.push(threshold);
        self
    }

    /// Replace every threshold on `field` in `direction` with `threshold`.
    pub fn set(&mut self, threshold: Threshold) {
        self.0
            .retain(|t| !(t.field == threshold.field && t.direction == threshold.direction));
        self.0.push(threshold);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Threshold> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a source annotation's value breaches a threshold on the
    /// channel its kind names.
    fn exceeded_by(&self, annotation: &AlertAnnotation) -> bool {
        sensor_field_for(&annotation.kind).is_some_and(|field| {
            self.0
                .iter()
                .any(|t| t.field == field && t.breached_by(annotation.value))
        })
    }
}

impl FromIterator<Threshold> for Thresholds {
    fn from_iter<I: IntoIterator<Item = Threshold>>(iter: I) -> Self {
        Thresholds(iter.into_iter().collect())
    }
}

// ---

/// Alert events for `series`, in series order.
///
/// For each record, threshold breaches come first (in threshold order),
/// followed by the record's source annotation if it has one. The iterator
/// borrows its inputs without mutating them; clone it or call again to
/// restart.
pub fn evaluate<'a>(
    series: &'a SeriesTable,
    thresholds: &'a Thresholds,
) -> impl Iterator<Item = AlertEvent> + Clone + 'a {
    // ---
    series.iter().flat_map(move |record| {
        let breaches = thresholds.iter().filter_map(move |t| t.check(record));
        let source = record.alert.iter().map(move |annotation| AlertEvent {
            timestamp: record.timestamp,
            kind: annotation.kind.clone(),
            value: annotation.value,
            threshold_exceeded: thresholds.exceeded_by(annotation),
            origin: AlertOrigin::Source,
        });
        breaches.chain(source)
    })
}
