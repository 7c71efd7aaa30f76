use axum::response::Json;
use iris_contract::HealthStatus;

pub async fn healthcheck() -> Json<HealthStatus> {
    Json(HealthStatus::healthy())
}
