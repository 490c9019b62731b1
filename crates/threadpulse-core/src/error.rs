use thiserror::Error;

/// Failures inside the sentiment query tool.
///
/// The `Display` strings are what the language model sees, so they stay
/// short and actionable.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Error: Query format is incorrect. Must use 'subreddit=<name>, topic=<keyword>'.")]
    Parse,
    #[error("API returned an error status: {message}")]
    Upstream { message: String },
    #[error("Error connecting to the sentiment analysis API at {url}. Is the analysis service running? Error: {reason}")]
    Connect { url: String, reason: String },
    #[error("An unexpected error occurred during API processing: {0}")]
    Unexpected(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat model is not configured: {0}")]
    Unavailable(String),
    #[error("chat model call failed: {0}")]
    Model(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_matches_tool_contract() {
        assert_eq!(
            ToolError::Parse.to_string(),
            "Error: Query format is incorrect. Must use 'subreddit=<name>, topic=<keyword>'."
        );
    }

    #[test]
    fn upstream_error_carries_message() {
        let err = ToolError::Upstream {
            message: "Could not fetch data or model failed to load.".into(),
        };
        assert_eq!(
            err.to_string(),
            "API returned an error status: Could not fetch data or model failed to load."
        );
    }
}
