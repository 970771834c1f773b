use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportPolicy {
    Ignore,
    Report,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    public_code: String,
    public_message: Option<String>,
    report_policy: ReportPolicy,
    report_summary: Option<String>,
}

impl ApiError {
    pub const NOT_FOUND: ApiError = ApiError {
        status: StatusCode::NOT_FOUND,
        public_code: String::new(),
        public_message: None,
        report_policy: ReportPolicy::Ignore,
        report_summary: None,
    };

    fn new(
        status: StatusCode,
        public_code: impl Into<String>,
        public_message: Option<String>,
        report_policy: ReportPolicy,
    ) -> Self {
        Self {
            status,
            public_code: public_code.into(),
            public_message,
            report_policy,
            report_summary: None,
        }
    }

    fn with_report(mut self, summary: impl Into<String>) -> Self {
        self.report_summary = Some(summary.into());
        self
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Not found: {}", msg);
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            Some(msg),
            ReportPolicy::Ignore,
        )
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Bad request: {}", msg);
        Self::new(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            Some(msg),
            ReportPolicy::Ignore,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine readable code sent to clients.
    pub fn code(&self) -> &str {
        if self.public_code.is_empty() {
            match self.status {
                StatusCode::NOT_FOUND => "NOT_FOUND",
                StatusCode::BAD_REQUEST => "BAD_REQUEST",
                _ => "ERROR",
            }
        } else {
            self.public_code.as_str()
        }
    }

    /// Message safe to show to clients; internal details stay in the logs.
    pub fn message(&self) -> &str {
        self.public_message
            .as_deref()
            .unwrap_or_else(|| self.status.canonical_reason().unwrap_or("Error"))
    }

    /// Mints an id for errors worth reporting and logs the hidden summary under it.
    pub(crate) fn report_id(&self) -> Option<String> {
        if self.report_policy != ReportPolicy::Report {
            return None;
        }
        let id = uuid::Uuid::new_v4().to_string();
        tracing::error!(
            error_id = %id,
            status = self.status.as_u16(),
            code = self.code(),
            "{}",
            self.report_summary.as_deref().unwrap_or(self.message())
        );
        Some(id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorEnvelope<'a> {
            error: ErrorBody<'a>,
        }

        #[derive(Serialize)]
        struct ErrorBody<'a> {
            code: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            id: Option<&'a str>,
            message: &'a str,
        }

        let error_id = self.report_id();

        let mut response = (
            self.status,
            Json(ErrorEnvelope {
                error: ErrorBody {
                    code: self.code(),
                    id: error_id.as_deref(),
                    message: self.message(),
                },
            }),
        )
            .into_response();

        if let Some(id) = error_id.as_deref()
            && let Ok(v) = HeaderValue::from_str(id)
        {
            response.headers_mut().insert("x-error-id", v);
        }

        response
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(err: sea_orm::DbErr) -> Self {
        tracing::error!("Database error: {:?}", err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DATABASE_ERROR",
            None,
            ReportPolicy::Report,
        )
        .with_report(format!("{:?}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!("IO error: {:?}", err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "IO_ERROR",
            None,
            ReportPolicy::Report,
        )
        .with_report(format!("{:?}", err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        // Parsing errors are caused by the client payload.
        Self::bad_request(format!("JSON error: {}", err))
    }
}

impl From<runlog_storage::StorageError> for ApiError {
    fn from(err: runlog_storage::StorageError) -> Self {
        match err {
            runlog_storage::StorageError::Body(msg) => {
                Self::bad_request(format!("Upload body error: {}", msg))
            }
            runlog_storage::StorageError::Store(err) => {
                tracing::error!("Object store error: {:?}", err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    None,
                    ReportPolicy::Report,
                )
                .with_report(format!("{:?}", err))
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.code())
    }
}

#[macro_export]
macro_rules! not_found {
    ($($arg:tt)*) => { $crate::error::ApiError::not_found(format!($($arg)*)) };
}

#[macro_export]
macro_rules! bad_request {
    ($($arg:tt)*) => { $crate::error::ApiError::bad_request(format!($($arg)*)) };
}
