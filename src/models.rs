use serde::{Deserialize, Serialize};

use crate::meter::{DrMeasurement, MIN_DR};
use crate::track::TrackDuration;

/// Measurements of a successfully decoded track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackReport {
    pub dr_value: i32,
    pub peak_db: f64,
    pub rms_db: f64,
    pub duration: TrackDuration,
    pub fingerprint: String,
    /// Complete one-second blocks that went into the measurement.
    pub blocks: usize,
}

impl TrackReport {
    pub fn new(measurement: DrMeasurement, duration: TrackDuration, fingerprint: String) -> Self {
        Self {
            dr_value: measurement.dr_value,
            peak_db: measurement.peak_db,
            rms_db: measurement.rms_db,
            duration,
            fingerprint,
            blocks: measurement.blocks,
        }
    }

    pub fn measurement(&self) -> DrMeasurement {
        DrMeasurement {
            dr_value: self.dr_value,
            peak_db: self.peak_db,
            rms_db: self.rms_db,
            blocks: self.blocks,
        }
    }

    /// See [`DrMeasurement::aggregation_value`].
    pub fn aggregation_value(&self) -> i32 {
        self.measurement().aggregation_value()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success(TrackReport),
    Failure,
}

/// Result of scanning one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub file_name: String,
    pub outcome: Outcome,
}

impl ScanRecord {
    pub fn success(file_name: impl Into<String>, report: TrackReport) -> Self {
        Self {
            file_name: file_name.into(),
            outcome: Outcome::Success(report),
        }
    }

    pub fn failure(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            outcome: Outcome::Failure,
        }
    }

    pub fn report(&self) -> Option<&TrackReport> {
        match &self.outcome {
            Outcome::Success(report) => Some(report),
            Outcome::Failure => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure)
    }

    /// The DR value if this record may take part in batch aggregation.
    pub fn qualifying_dr(&self) -> Option<i32> {
        self.report()
            .map(TrackReport::aggregation_value)
            .filter(|&dr| dr > MIN_DR)
    }
}

/// Ordered records of one batch plus the aggregate derived from them.
///
/// The aggregate is always recomputed from the full record list, so the
/// fields are private.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    records: Vec<ScanRecord>,
    aggregate_dr: i32,
    successful_count: usize,
}

impl BatchResult {
    pub fn from_records(records: Vec<ScanRecord>) -> Self {
        let mut result = Self {
            records,
            aggregate_dr: 0,
            successful_count: 0,
        };
        result.recompute();
        result
    }

    pub fn push_record(&mut self, record: ScanRecord) {
        self.records.push(record);
        self.recompute();
    }

    fn recompute(&mut self) {
        let qualifying: Vec<i32> = self.records.iter().filter_map(ScanRecord::qualifying_dr).collect();
        self.successful_count = qualifying.len();
        self.aggregate_dr = if qualifying.is_empty() {
            0
        } else {
            let sum: f64 = qualifying.iter().map(|&dr| dr as f64).sum();
            (sum / qualifying.len() as f64).round_ties_even() as i32
        };
    }

    /// Records in enumeration order.
    pub fn records(&self) -> &[ScanRecord] {
        &self.records
    }

    pub fn aggregate_dr(&self) -> i32 {
        self.aggregate_dr
    }

    /// Number of records that contributed to [`Self::aggregate_dr`].
    pub fn successful_count(&self) -> usize {
        self.successful_count
    }

    pub fn failure_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_failure()).count()
    }

    /// No recognized audio files were scanned at all.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Sent from scan workers to an optional observer while a batch runs.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    FileStarted { index: usize, file_name: String },
    FileCompleted { index: usize, record: ScanRecord },
}
