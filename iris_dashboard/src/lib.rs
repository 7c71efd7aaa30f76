mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod batch;
pub mod config;
pub mod history;
pub mod prediction;
pub mod session;

pub use app::start_app;
pub use server::{build_router, HttpServer, SharedState};
pub use telemetry::Metrics;
