use reqwest::StatusCode;

/// Failures of the outbound weather lookups (geocoding and forecast).
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{service} request failed with status {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to parse {service} response: {source}")]
    Parse {
        service: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of the chat pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0} not configured")]
    MissingCredential(&'static str),
    #[error("Model request failed with status {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Malformed model stream: {0}")]
    Stream(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
