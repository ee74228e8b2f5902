use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use vantage_db::{DbError, PlayerId};

/// Failures surfaced by the caching and analysis pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
  /// Bad or missing configuration. Fatal at startup.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// Storage could not be reached or rejected the operation.
  #[error("storage unavailable: {0}")]
  StorageUnavailable(#[source] DbError),

  /// Snapshot computation failed; the previous snapshot stays current.
  #[error("analysis failed: {0}")]
  AggregationFailure(String),

  /// A report could not be produced from storage.
  #[error("data unavailable: {0}")]
  DataUnavailable(String),

  #[error("player {0} not found")]
  PlayerNotFound(PlayerId),

  #[error("pipeline is shutting down")]
  ShuttingDown,
}

impl From<DbError> for PipelineError {
  fn from(err: DbError) -> Self {
    if err.is_configuration() {
      PipelineError::Configuration(err.to_string())
    } else {
      PipelineError::StorageUnavailable(err)
    }
  }
}

/// Receives failures that are recovered from locally and would otherwise go unseen.
pub trait ErrorReporter: Send + Sync {
  fn report(&self, context: &str, error: &PipelineError);
}

/// Reports failures to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
  fn report(&self, context: &str, error: &PipelineError) {
    tracing::error!(%context, %error, "pipeline error");
  }
}

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  Pipeline(PipelineError),
  ValidationError(String),
  AnalysisNotReady,
  Unauthorized,
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::Pipeline(err) => {
        // Log the detailed error server-side
        tracing::error!(?err, "pipeline error occurred");

        // Return user-friendly error to client
        let (status, response) = match &err {
          PipelineError::PlayerNotFound(id) => (
            StatusCode::NOT_FOUND,
            ErrorResponse::with_details("Player not found", id.to_string()),
          ),
          PipelineError::ShuttingDown => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new("Server is shutting down"),
          ),
          PipelineError::StorageUnavailable(_) | PipelineError::DataUnavailable(_) => (
            // Don't expose internal storage errors
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new("Data is temporarily unavailable. Please try again later."),
          ),
          PipelineError::Configuration(_) | PipelineError::AggregationFailure(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new("An internal error occurred. Please try again later."),
          ),
        };

        (status, Json(response)).into_response()
      }
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        let error_response = ErrorResponse::new(msg);
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
      }
      AppError::AnalysisNotReady => (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new("Analysis has not been run yet")),
      )
        .into_response(),
      AppError::Unauthorized => (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("Invalid or missing API key")),
      )
        .into_response(),
    }
  }
}

impl From<PipelineError> for AppError {
  fn from(err: PipelineError) -> Self {
    AppError::Pipeline(err)
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}
