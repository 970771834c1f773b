use regex::Regex;
use std::sync::LazyLock;

static OPERATION_HEADER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(mutation|query)\s+(\w+)").ok());

/// Operations the server understands, resolved once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ServerCapabilities,
    Viewer,
    UpsertBucket,
    CreateRunFiles,
    UpsertRun,
    Unknown,
}

impl Operation {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ProbeServerCapabilities" => Some(Self::ServerCapabilities),
            "Viewer" => Some(Self::Viewer),
            "UpsertBucket" => Some(Self::UpsertBucket),
            "CreateRunFiles" | "PrepareFiles" => Some(Self::CreateRunFiles),
            "UpsertRun" | "UpdateRun" => Some(Self::UpsertRun),
            _ => None,
        }
    }

    /// Name from the leading `query Name` / `mutation Name` header.
    pub fn infer_name(query: &str) -> Option<&str> {
        OPERATION_HEADER
            .as_ref()?
            .captures(query)?
            .get(2)
            .map(|m| m.as_str())
    }

    /// Explicit name, then the inferred header name, then a substring scan.
    pub fn resolve(operation_name: Option<&str>, query: &str) -> Self {
        if let Some(op) = operation_name.and_then(Self::from_name) {
            return op;
        }
        if let Some(op) = Self::infer_name(query).and_then(Self::from_name) {
            return op;
        }

        if query.contains("ProbeServerCapabilities") {
            Self::ServerCapabilities
        } else if query.contains("Viewer") {
            Self::Viewer
        } else if query.contains("UpsertBucket") {
            Self::UpsertBucket
        } else if query.contains("CreateRunFiles") || query.contains("PrepareFiles") {
            Self::CreateRunFiles
        } else if query.contains("upsertRun") || query.contains("UpdateRun") {
            Self::UpsertRun
        } else {
            Self::Unknown
        }
    }
}
