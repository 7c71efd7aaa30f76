use super::ApiError;
use crate::{
    history::{export_csv, HistoryEntry, HistoryQuery, HistoryStats, SortKey, SortOrder},
    server::SharedState,
};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    labels: Option<String>,
    sort: Option<String>,
    order: Option<String>,
}

impl TryFrom<HistoryParams> for HistoryQuery {
    type Error = ApiError;

    fn try_from(params: HistoryParams) -> Result<Self, Self::Error> {
        let labels = params.labels.map(|labels| {
            labels
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .collect::<HashSet<String>>()
        });
        let sort = params
            .sort
            .map(|s| s.parse::<SortKey>())
            .transpose()
            .map_err(ApiError::InvalidQuery)?
            .unwrap_or_default();
        let order = params
            .order
            .map(|s| s.parse::<SortOrder>())
            .transpose()
            .map_err(ApiError::InvalidQuery)?
            .unwrap_or_default();

        Ok(HistoryQuery {
            labels,
            sort,
            order,
        })
    }
}

#[derive(Serialize)]
pub struct HistoryView {
    entries: Vec<HistoryEntry>,
    labels: Vec<String>,
}

#[derive(Serialize)]
pub struct Cleared {
    cleared: usize,
}

pub async fn list_history(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryView>, ApiError> {
    let query = HistoryQuery::try_from(params)?;

    let view = state.sessions.with_history(session_id, |history| HistoryView {
        entries: history.query(&query),
        labels: history.labels(),
    })?;

    Ok(Json(view))
}

pub async fn clear_history(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Cleared>, ApiError> {
    let cleared = state
        .sessions
        .with_history_mut(session_id, |history| history.clear())?;
    tracing::info!(session = %session_id, cleared, "History cleared");

    Ok(Json(Cleared { cleared }))
}

pub async fn export_history(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let query = HistoryQuery::try_from(params)?;

    let entries = state
        .sessions
        .with_history(session_id, |history| history.query(&query))?;
    let body = export_csv(&entries).map_err(|e| ApiError::Export(e.to_string()))?;

    let filename = format!("history_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}

pub async fn history_stats(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<HistoryStats>, ApiError> {
    let stats = state
        .sessions
        .with_history(session_id, |history| history.stats())?;

    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_labels_means_no_filter() {
        let query = HistoryQuery::try_from(HistoryParams::default()).unwrap();

        assert_eq!(query, HistoryQuery::default());
    }

    #[test]
    fn test_empty_labels_means_empty_selection() {
        let params = HistoryParams {
            labels: Some(String::new()),
            ..Default::default()
        };

        let query = HistoryQuery::try_from(params).unwrap();

        assert_eq!(query.labels.map(|l| l.len()), Some(0));
    }

    #[test]
    fn test_params_parse() {
        let params = HistoryParams {
            labels: Some("Setosa, Virginica".into()),
            sort: Some("latency".into()),
            order: Some("asc".into()),
        };

        let query = HistoryQuery::try_from(params).unwrap();

        let labels = query.labels.unwrap();
        assert!(labels.contains("Setosa") && labels.contains("Virginica"));
        assert_eq!(query.sort, SortKey::Latency);
        assert_eq!(query.order, SortOrder::Ascending);
    }

    #[test]
    fn test_bad_sort_is_rejected() {
        let params = HistoryParams {
            sort: Some("size".into()),
            ..Default::default()
        };

        assert!(matches!(
            HistoryQuery::try_from(params),
            Err(ApiError::InvalidQuery(_))
        ));
    }
}
