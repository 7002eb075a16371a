use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::domain::{IngestError, Stage};

/// JSON body of every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'static str,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_headers: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl<'a> From<&'a IngestError> for ErrorBody<'a> {
    fn from(err: &'a IngestError) -> Self {
        let mut body = ErrorBody {
            error: err.code(),
            stage: err.stage(),
            message: err.to_string(),
            row: None,
            expected: None,
            actual: None,
            observed_headers: None,
            hint: err.hint(),
        };
        match err {
            IngestError::MalformedRow {
                row,
                expected,
                actual,
            } => {
                body.row = Some(*row);
                body.expected = Some(*expected);
                body.actual = Some(*actual);
            }
            IngestError::Parse { row, .. } => body.row = Some(*row),
            IngestError::UnrecognizedSchema { observed } => {
                body.observed_headers = Some(observed.as_slice())
            }
            _ => {}
        }
        body
    }
}

impl ResponseError for IngestError {
    fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Decoding(_)
            | IngestError::UnrecognizedSchema { .. }
            | IngestError::MalformedRow { .. }
            | IngestError::Parse { .. }
            | IngestError::BulkLoad { .. }
            | IngestError::InvalidIdentifier(_)
            | IngestError::InvalidField(_)
            | IngestError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::TableExists(_) => StatusCode::CONFLICT,
            IngestError::Database(_) | IngestError::Config(_) | IngestError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, stage = ?self.stage(), "request failed");
        }
        HttpResponse::build(status).json(ErrorBody::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            IngestError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            IngestError::TableExists("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            IngestError::InvalidIdentifier("1x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            IngestError::Database("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_malformed_row_body_carries_counts() {
        let err = IngestError::MalformedRow {
            row: 2,
            expected: 5,
            actual: 4,
        };
        let body = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(body["error"], "malformed_row");
        assert_eq!(body["stage"], "row");
        assert_eq!(body["row"], 2);
        assert_eq!(body["expected"], 5);
        assert_eq!(body["actual"], 4);
        assert!(body.get("observed_headers").is_none());
    }

    #[test]
    fn test_unrecognized_schema_body_lists_headers() {
        let err = IngestError::UnrecognizedSchema {
            observed: vec!["name".to_string(), "code".to_string()],
        };
        let body = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(body["stage"], "schema");
        assert_eq!(body["observed_headers"], serde_json::json!(["name", "code"]));
        assert!(body["hint"].as_str().unwrap().contains("school"));
    }
}
