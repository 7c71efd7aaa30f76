use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid line format: {0}")]
    InvalidLine(String),
    #[error("Class ids must be contiguous from 0, found {found} at position {expected}")]
    NonContiguous { expected: usize, found: usize },
    #[error("Empty label for class {0}")]
    EmptyLabel(usize),
    #[error("No labels defined")]
    Empty,
}

/// Class id to species name. Covers exactly `0..len()`.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new(mut entries: Vec<(usize, String)>) -> Result<Self, LabelsError> {
        if entries.is_empty() {
            return Err(LabelsError::Empty);
        }
        entries.sort_by_key(|(id, _)| *id);

        let mut labels = Vec::with_capacity(entries.len());
        for (expected, (id, label)) in entries.into_iter().enumerate() {
            if id != expected {
                return Err(LabelsError::NonContiguous {
                    expected,
                    found: id,
                });
            }
            if label.is_empty() {
                return Err(LabelsError::EmptyLabel(id));
            }
            labels.push(label);
        }

        Ok(Self { labels })
    }

    pub fn get(&self, class_id: i64) -> Option<&str> {
        usize::try_from(class_id)
            .ok()
            .and_then(|id| self.labels.get(id))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceState {
    labels: LabelMap,
    message: String,
    version: String,
}

impl ServiceState {
    pub fn new(labels: LabelMap) -> Self {
        Self {
            labels,
            message: "Iris ML API is running".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    pub fn load(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError> {
        let labels = load_iris_labels(&labels_cfg.get_path())?;
        tracing::info!("Loaded {} class labels", labels.len());
        Ok(Self::new(labels))
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Reads `class_id,label` lines. Blank lines are skipped.
pub fn load_iris_labels(filepath: &Path) -> Result<LabelMap, LabelsError> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut entries = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let (id, label) = line
            .split_once(',')
            .ok_or_else(|| LabelsError::InvalidLine(line.clone()))?;
        let id: usize = id
            .trim()
            .parse()
            .map_err(|_| LabelsError::InvalidLine(line.clone()))?;

        entries.push((id, label.trim().to_string()));
    }

    LabelMap::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn iris_labels() -> LabelMap {
        LabelMap::new(vec![
            (0, "Setosa".into()),
            (1, "Versicolor".into()),
            (2, "Virginica".into()),
        ])
        .unwrap()
    }

    #[test]
    fn test_every_declared_class_has_a_label() {
        let labels = iris_labels();

        for class_id in 0..labels.len() as i64 {
            let label = labels.get(class_id).expect("mapped class");
            assert!(!label.is_empty());
        }
    }

    #[test]
    fn test_out_of_range_class_is_unmapped() {
        let labels = iris_labels();

        assert_eq!(labels.get(3), None);
        assert_eq!(labels.get(-1), None);
    }

    #[test]
    fn test_gap_in_class_ids_is_rejected() {
        let result = LabelMap::new(vec![(0, "Setosa".into()), (2, "Virginica".into())]);

        assert!(matches!(
            result,
            Err(LabelsError::NonContiguous {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn test_empty_label_is_rejected() {
        let result = LabelMap::new(vec![(0, "".into())]);

        assert!(matches!(result, Err(LabelsError::EmptyLabel(0))));
    }

    #[test]
    fn test_load_labels_file_out_of_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2, Virginica").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "0,Setosa").unwrap();
        writeln!(file, "1,Versicolor").unwrap();

        let labels = load_iris_labels(file.path()).unwrap();

        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(0), Some("Setosa"));
        assert_eq!(labels.get(2), Some("Virginica"));
    }

    #[test]
    fn test_load_labels_rejects_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Setosa").unwrap();

        let result = load_iris_labels(file.path());

        assert!(matches!(result, Err(LabelsError::InvalidLine(_))));
    }
}
