use crate::{
    history::{History, HistoryEntry},
    prediction::{PredictionClientError, Predictor},
};
use chrono::Utc;
use iris_contract::PredictionRequest;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unknown session {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Prediction(#[from] PredictionClientError),
}

/// Isolated histories, one per user session.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, History>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.write().insert(id, History::new());
        tracing::info!(session = %id, "Session created");
        id
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            tracing::info!(session = %id, "Session removed");
        }
        removed
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn with_history<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&History) -> R,
    ) -> Result<R, SessionError> {
        let sessions = self.sessions.read();
        let history = sessions.get(&id).ok_or(SessionError::NotFound(id))?;
        Ok(f(history))
    }

    pub fn with_history_mut<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut History) -> R,
    ) -> Result<R, SessionError> {
        let mut sessions = self.sessions.write();
        let history = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        Ok(f(history))
    }
}

/// Runs one prediction for a session and records it on success.
///
/// The store lock is not held while the call is in flight. A failed call
/// leaves the history untouched.
#[instrument(skip(store, predictor))]
pub async fn predict_and_record<P: Predictor>(
    store: &SessionStore,
    predictor: &P,
    session_id: Uuid,
    request: PredictionRequest,
) -> Result<HistoryEntry, SessionError> {
    if !store.contains(session_id) {
        return Err(SessionError::NotFound(session_id));
    }

    let timed = predictor.predict(request).await?;

    store.with_history_mut(session_id, |history| {
        history.record(request, timed.result, Utc::now(), timed.response_time_ms)
    })
}
