//! Per-session log of successful single predictions.
//!
//! Entries are append-only and kept in insertion order. Views over the log
//! (filter, sort, export) never modify it; only [`History::clear`] removes
//! entries, and it removes all of them.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use iris_contract::{PredictionRequest, PredictionResponse, FEATURE_COLUMNS};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashSet, str::FromStr};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub prediction: String,
    pub class_id: i64,
    #[serde(flatten)]
    pub request: PredictionRequest,
    pub response_time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Time,
    Latency,
    Label,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "time" | "timestamp" => Ok(Self::Time),
            "latency" | "response_time" => Ok(Self::Latency),
            "label" | "prediction" => Ok(Self::Label),
            other => Err(format!(
                "{} is not a supported sort key. Use `time`, `latency` or `label`.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            other => Err(format!(
                "{} is not a supported sort order. Use `asc` or `desc`.",
                other
            )),
        }
    }
}

/// A read-only view definition. `labels: None` keeps every entry; an empty
/// set keeps none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    pub labels: Option<HashSet<String>>,
    pub sort: SortKey,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_common: Option<String>,
    pub distinct_labels: usize,
}

#[derive(Debug, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
    next_sequence: u64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        request: PredictionRequest,
        result: PredictionResponse,
        timestamp: DateTime<Utc>,
        response_time_ms: f64,
    ) -> HistoryEntry {
        // stored at export precision so exported rows read back unchanged
        let entry = HistoryEntry {
            sequence: self.next_sequence,
            timestamp: timestamp.trunc_subsecs(6),
            prediction: result.flower_name,
            class_id: result.prediction,
            request,
            response_time_ms,
        };
        self.next_sequence += 1;
        self.entries.push(entry.clone());
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Removes every entry and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    /// Distinct labels in first-seen order.
    pub fn labels(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.prediction.as_str()))
            .map(|e| e.prediction.clone())
            .collect()
    }

    pub fn query(&self, query: &HistoryQuery) -> Vec<HistoryEntry> {
        let mut view: Vec<HistoryEntry> = self
            .entries
            .iter()
            .filter(|e| match &query.labels {
                Some(labels) => labels.contains(&e.prediction),
                None => true,
            })
            .cloned()
            .collect();

        // sort_by is stable: ties keep insertion order in both directions
        view.sort_by(|a, b| {
            let ordering = compare(a, b, query.sort);
            match query.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
        view
    }

    pub fn stats(&self) -> HistoryStats {
        let count = self.entries.len();
        if count == 0 {
            return HistoryStats {
                count,
                mean_response_time_ms: None,
                min_response_time_ms: None,
                max_response_time_ms: None,
                most_common: None,
                distinct_labels: 0,
            };
        }

        let latencies = self.entries.iter().map(|e| e.response_time_ms);
        let total: f64 = latencies.clone().sum();
        let min = latencies.clone().fold(f64::INFINITY, f64::min);
        let max = latencies.fold(f64::NEG_INFINITY, f64::max);

        let labels = self.labels();
        let most_common = labels
            .iter()
            .map(|label| {
                let n = self
                    .entries
                    .iter()
                    .filter(|e| &e.prediction == label)
                    .count();
                (label, n)
            })
            .fold(None::<(&String, usize)>, |best, (label, n)| match best {
                Some((_, best_n)) if best_n >= n => best,
                _ => Some((label, n)),
            })
            .map(|(label, _)| label.clone());

        HistoryStats {
            count,
            mean_response_time_ms: Some(total / count as f64),
            min_response_time_ms: Some(min),
            max_response_time_ms: Some(max),
            most_common,
            distinct_labels: labels.len(),
        }
    }
}

fn compare(a: &HistoryEntry, b: &HistoryEntry, key: SortKey) -> Ordering {
    match key {
        SortKey::Time => a.timestamp.cmp(&b.timestamp),
        SortKey::Latency => a.response_time_ms.total_cmp(&b.response_time_ms),
        SortKey::Label => a.prediction.cmp(&b.prediction),
    }
}

pub const EXPORT_HEADER: [&str; 8] = [
    "timestamp",
    "prediction",
    "class_id",
    FEATURE_COLUMNS[0],
    FEATURE_COLUMNS[1],
    FEATURE_COLUMNS[2],
    FEATURE_COLUMNS[3],
    "response_time_ms",
];

/// Renders entries as CSV. Floats use the shortest representation that
/// parses back to the same value.
pub fn export_csv(entries: &[HistoryEntry]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER)?;

    for entry in entries {
        writer.write_record([
            entry
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            entry.prediction.clone(),
            entry.class_id.to_string(),
            entry.request.sepal_length.to_string(),
            entry.request.sepal_width.to_string(),
            entry.request.petal_length.to_string(),
            entry.request.petal_width.to_string(),
            entry.response_time_ms.to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn result(class_id: i64, name: &str) -> PredictionResponse {
        PredictionResponse {
            prediction: class_id,
            flower_name: name.into(),
        }
    }

    fn sample_history() -> History {
        let mut history = History::new();
        let request = PredictionRequest::new(5.1, 3.5, 1.4, 0.2);
        history.record(request, result(0, "Setosa"), at(0), 12.5);
        history.record(request, result(1, "Versicolor"), at(1), 30.0);
        history.record(request, result(0, "Setosa"), at(2), 12.5);
        history.record(request, result(2, "Virginica"), at(3), 8.25);
        history.record(request, result(1, "Versicolor"), at(4), 30.0);
        history
    }

    fn sequences(entries: &[HistoryEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.sequence).collect()
    }

    #[test]
    fn test_record_appends_in_order() {
        let history = sample_history();

        assert_eq!(history.len(), 5);
        assert_eq!(sequences(history.entries()), vec![0, 1, 2, 3, 4]);
        assert_eq!(history.entries()[3].prediction, "Virginica");
        assert_eq!(history.entries()[3].class_id, 2);
    }

    #[test]
    fn test_clear_empties_history() {
        let mut history = sample_history();

        assert_eq!(history.clear(), 5);
        assert_eq!(history.len(), 0);
        assert!(history.query(&HistoryQuery::default()).is_empty());
    }

    #[test]
    fn test_labels_first_seen_order() {
        let history = sample_history();

        assert_eq!(history.labels(), vec!["Setosa", "Versicolor", "Virginica"]);
    }

    #[test]
    fn test_empty_label_selection_yields_nothing() {
        let history = sample_history();
        let query = HistoryQuery {
            labels: Some(HashSet::new()),
            ..Default::default()
        };

        assert!(history.query(&query).is_empty());
    }

    #[test]
    fn test_filter_by_labels() {
        let history = sample_history();
        let query = HistoryQuery {
            labels: Some(HashSet::from(["Setosa".to_string(), "Virginica".to_string()])),
            sort: SortKey::Time,
            order: SortOrder::Ascending,
        };

        assert_eq!(sequences(&history.query(&query)), vec![0, 2, 3]);
    }

    #[test]
    fn test_default_query_is_newest_first() {
        let history = sample_history();

        assert_eq!(
            sequences(&history.query(&HistoryQuery::default())),
            vec![4, 3, 2, 1, 0]
        );
    }

    #[test]
    fn test_latency_sort_is_stable_on_ties() {
        let history = sample_history();
        let ascending = HistoryQuery {
            labels: None,
            sort: SortKey::Latency,
            order: SortOrder::Ascending,
        };
        let descending = HistoryQuery {
            order: SortOrder::Descending,
            ..ascending.clone()
        };

        assert_eq!(sequences(&history.query(&ascending)), vec![3, 0, 2, 1, 4]);
        assert_eq!(sequences(&history.query(&descending)), vec![1, 4, 0, 2, 3]);
    }

    #[test]
    fn test_label_sort_is_stable_on_ties() {
        let history = sample_history();
        let query = HistoryQuery {
            labels: None,
            sort: SortKey::Label,
            order: SortOrder::Ascending,
        };

        assert_eq!(sequences(&history.query(&query)), vec![0, 2, 1, 4, 3]);
    }

    #[test]
    fn test_same_query_twice_is_identical() {
        let history = sample_history();
        let query = HistoryQuery {
            labels: Some(HashSet::from(["Versicolor".to_string(), "Setosa".to_string()])),
            sort: SortKey::Latency,
            order: SortOrder::Descending,
        };

        assert_eq!(history.query(&query), history.query(&query));
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn test_stats() {
        let history = sample_history();
        let stats = history.stats();

        assert_eq!(stats.count, 5);
        assert_eq!(stats.mean_response_time_ms, Some(18.65));
        assert_eq!(stats.min_response_time_ms, Some(8.25));
        assert_eq!(stats.max_response_time_ms, Some(30.0));
        // Setosa and Versicolor tie at two; Setosa was seen first
        assert_eq!(stats.most_common.as_deref(), Some("Setosa"));
        assert_eq!(stats.distinct_labels, 3);
    }

    #[test]
    fn test_stats_on_empty_history() {
        let stats = History::new().stats();

        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean_response_time_ms, None);
        assert_eq!(stats.most_common, None);
    }

    #[test]
    fn test_export_values_reimport_exactly() {
        let mut history = History::new();
        let request = PredictionRequest::new(0.1 + 0.2, 3.5, 1.0 / 3.0, 0.2);
        let timestamp = at(0) + Duration::microseconds(123_456);
        history.record(request, result(0, "Setosa"), timestamp, 41.123456789);

        let bytes = export_csv(history.entries()).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());

        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), EXPORT_HEADER.to_vec());

        let record = reader.records().next().unwrap().unwrap();
        let parsed_time: DateTime<Utc> = record[0].parse().unwrap();
        assert_eq!(parsed_time, timestamp);
        assert_eq!(&record[1], "Setosa");
        assert_eq!(record[2].parse::<i64>().unwrap(), 0);
        assert_eq!(record[3].parse::<f64>().unwrap(), 0.1 + 0.2);
        assert_eq!(record[5].parse::<f64>().unwrap(), 1.0 / 3.0);
        assert_eq!(record[7].parse::<f64>().unwrap(), 41.123456789);
    }

    #[test]
    fn test_nanosecond_timestamp_reimports_exactly() {
        let mut history = History::new();
        let timestamp = at(0) + Duration::nanoseconds(123_456_789);
        let entry = history.record(
            PredictionRequest::new(5.1, 3.5, 1.4, 0.2),
            result(0, "Setosa"),
            timestamp,
            12.5,
        );

        assert_eq!(entry.timestamp, at(0) + Duration::microseconds(123_456));

        let bytes = export_csv(history.entries()).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let record = reader.records().next().unwrap().unwrap();
        let parsed_time: DateTime<Utc> = record[0].parse().unwrap();
        assert_eq!(parsed_time, history.entries()[0].timestamp);
    }

    #[test]
    fn test_sort_params_parse() {
        assert_eq!("latency".parse::<SortKey>(), Ok(SortKey::Latency));
        assert_eq!("prediction".parse::<SortKey>(), Ok(SortKey::Label));
        assert_eq!("ASC".parse::<SortOrder>(), Ok(SortOrder::Ascending));
        assert!("size".parse::<SortKey>().is_err());
        assert!("up".parse::<SortOrder>().is_err());
    }
}
