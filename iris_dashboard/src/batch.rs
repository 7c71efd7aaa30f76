use crate::prediction::Predictor;
use csv::{StringRecord, Trim};
use iris_contract::{PredictionRequest, FEATURE_COLUMNS};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::instrument;

pub const PREDICTION_COLUMN: &str = "prediction";
pub const FAILURE_MARKER: &str = "error";

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Missing required column `{0}`")]
    MissingColumn(&'static str),
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Label(String),
    Failed(String),
}

impl RowOutcome {
    pub fn cell(&self) -> &str {
        match self {
            RowOutcome::Label(label) => label,
            RowOutcome::Failed(_) => FAILURE_MARKER,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RowOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub failed: usize,
    pub counts: BTreeMap<String, usize>,
}

/// The input rows with one outcome per row, in input order.
#[derive(Debug)]
pub struct BatchOutput {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    outcomes: Vec<RowOutcome>,
}

impl BatchOutput {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &[RowOutcome] {
        &self.outcomes
    }

    pub fn summary(&self) -> BatchSummary {
        let mut counts = BTreeMap::new();
        let mut failed = 0;
        for outcome in &self.outcomes {
            match outcome {
                RowOutcome::Label(label) => *counts.entry(label.clone()).or_insert(0) += 1,
                RowOutcome::Failed(_) => failed += 1,
            }
        }

        BatchSummary {
            total: self.outcomes.len(),
            failed,
            counts,
        }
    }

    /// Input columns followed by the `prediction` column.
    pub fn to_csv(&self) -> Result<Vec<u8>, BatchError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut headers = self.headers.clone();
        headers.push_field(PREDICTION_COLUMN);
        writer.write_record(&headers)?;

        for (row, outcome) in self.rows.iter().zip(&self.outcomes) {
            let mut record = row.clone();
            record.push_field(outcome.cell());
            writer.write_record(&record)?;
        }

        writer
            .into_inner()
            .map_err(|e| BatchError::Csv(csv::Error::from(e.into_error())))
    }
}

fn column_indexes(headers: &StringRecord) -> Result<[usize; 4], BatchError> {
    let mut indexes = [0; 4];
    for (slot, column) in indexes.iter_mut().zip(FEATURE_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == column)
            .ok_or(BatchError::MissingColumn(column))?;
    }
    Ok(indexes)
}

fn parse_row(row: &StringRecord, indexes: &[usize; 4]) -> Result<PredictionRequest, String> {
    let mut values = [0.0; 4];
    for ((value, &index), column) in values.iter_mut().zip(indexes).zip(FEATURE_COLUMNS) {
        let cell = row
            .get(index)
            .ok_or_else(|| format!("`{}` is missing", column))?;
        *value = cell
            .parse::<f64>()
            .map_err(|_| format!("`{}` is not a number: {:?}", column, cell))?;
    }
    Ok(PredictionRequest::new(values[0], values[1], values[2], values[3]))
}

/// Reads every data row. Rows that cannot be used are kept alongside the
/// reason, so the output stays aligned with the input. Each kept row is cut
/// or padded to the header width.
fn read_rows(
    reader: &mut csv::Reader<&[u8]>,
    indexes: &[usize; 4],
    width: usize,
) -> (Vec<StringRecord>, Vec<Result<PredictionRequest, String>>) {
    let mut rows = Vec::new();
    let mut requests = Vec::new();

    for record in reader.byte_records() {
        let (row, request) = match record {
            Ok(bytes) if bytes.len() != width => {
                let reason = format!("expected {} fields, found {}", width, bytes.len());
                (StringRecord::from_byte_record_lossy(bytes), Err(reason))
            }
            Ok(bytes) => match StringRecord::from_byte_record(bytes) {
                Ok(row) => {
                    let request = parse_row(&row, indexes);
                    (row, request)
                }
                Err(e) => {
                    let reason = format!("row is not valid UTF-8: {}", e.utf8_error());
                    (
                        StringRecord::from_byte_record_lossy(e.into_byte_record()),
                        Err(reason),
                    )
                }
            },
            Err(e) => (StringRecord::new(), Err(e.to_string())),
        };
        rows.push(fit_to_width(row, width));
        requests.push(request);
    }

    (rows, requests)
}

fn fit_to_width(row: StringRecord, width: usize) -> StringRecord {
    if row.len() == width {
        return row;
    }
    let mut fitted: StringRecord = row.iter().take(width).collect();
    while fitted.len() < width {
        fitted.push_field("");
    }
    fitted
}

/// Predicts every row of a CSV batch, one call at a time and in order.
///
/// A row that cannot be read or parsed, or whose call fails, gets the
/// failure marker and the batch moves on. Only a missing column or an
/// unreadable header fails the whole batch, before any call is made.
#[instrument(skip_all)]
pub async fn run_batch<P: Predictor>(
    predictor: &P,
    input: &[u8],
    mut on_progress: impl FnMut(BatchProgress) + Send,
) -> Result<BatchOutput, BatchError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers = reader.headers()?.clone();
    let indexes = column_indexes(&headers)?;
    let (rows, requests) = read_rows(&mut reader, &indexes, headers.len());

    let total = rows.len();
    let mut outcomes = Vec::with_capacity(total);
    tracing::info!(total, "Starting batch prediction");

    for (index, request) in requests.into_iter().enumerate() {
        let outcome = match request {
            Ok(request) => match predictor.predict(request).await {
                Ok(timed) => RowOutcome::Label(timed.result.flower_name),
                Err(e) => RowOutcome::Failed(e.to_string()),
            },
            Err(reason) => RowOutcome::Failed(reason),
        };

        if let RowOutcome::Failed(reason) = &outcome {
            tracing::warn!(row = index + 1, %reason, "Batch row failed");
        }
        outcomes.push(outcome);

        let progress = BatchProgress {
            completed: index + 1,
            total,
        };
        tracing::debug!(completed = progress.completed, total, "Batch progress");
        on_progress(progress);
    }

    let output = BatchOutput {
        headers,
        rows,
        outcomes,
    };
    let summary = output.summary();
    tracing::info!(total, failed = summary.failed, "Batch prediction finished");

    Ok(output)
}
