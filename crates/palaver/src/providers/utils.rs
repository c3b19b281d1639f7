use regex::Regex;
use reqwest::StatusCode;

use crate::errors::ChatError;

/// Replace characters providers reject in function names
pub fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    re.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    re.is_match(name)
}

pub(crate) fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        input.to_string()
    } else {
        let mut end = max_len;
        while !input.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &input[..end])
    }
}

/// Map a non-success streaming response to the right error. The one
/// documented transient condition — the selected model rejecting a sampling
/// parameter — becomes `UnsupportedParameter` so the caller can rebuild the
/// request without it and re-issue once. Everything else is transport.
pub(crate) fn classify_http_failure(provider: &str, status: StatusCode, body: &str) -> ChatError {
    if is_unsupported_sampling_rejection(body) {
        return ChatError::UnsupportedParameter(format!(
            "{provider} rejected a sampling parameter ({status}): {}",
            truncate_for_error(body, 200)
        ));
    }
    ChatError::Transport(format!(
        "{provider} request failed with status {status}: {}",
        truncate_for_error(body, 500)
    ))
}

fn is_unsupported_sampling_rejection(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("temperature")
        && (lower.contains("unsupported")
            || lower.contains("does not support")
            || lower.contains("not supported"))
}
