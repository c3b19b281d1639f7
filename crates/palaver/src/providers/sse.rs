use async_stream::try_stream;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::base::RawEventStream;
use crate::errors::ChatError;

/// Deframe a `text/event-stream` response body into JSON payloads.
///
/// All three provider families speak SSE: frames separated by a blank line,
/// payloads on `data:` lines. The OpenAI family terminates with a literal
/// `data: [DONE]` sentinel, which ends the stream here rather than reaching
/// the classifier. Non-JSON payloads are skipped. Cancellation is checked
/// between chunks so a cancelled exchange stops reading promptly.
pub(crate) fn event_stream(response: reqwest::Response, cancel: CancellationToken) -> RawEventStream {
    let mut bytes = response.bytes_stream();
    let stream = try_stream! {
        let mut buffer = String::new();
        'read: while let Some(chunk) = bytes.next().await {
            if cancel.is_cancelled() {
                Err(ChatError::Cancelled)?;
            }
            let chunk = chunk?;
            buffer.push_str(std::str::from_utf8(&chunk).unwrap_or_default());

            while let Some(pos) = buffer.find("\n\n") {
                let frame = buffer[..pos].to_string();
                buffer = buffer[pos + 2..].to_string();
                for line in frame.lines() {
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        break 'read;
                    }
                    let Ok(value) = serde_json::from_str::<Value>(payload) else {
                        continue;
                    };
                    yield value;
                }
            }
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(body: &str) -> Vec<Value> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let response = reqwest::get(format!("{}/stream", server.uri()))
            .await
            .unwrap();
        event_stream(response, CancellationToken::new())
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn deframes_data_lines_and_stops_on_done_sentinel() {
        let events = collect(concat!(
            "event: ping\ndata: {\"a\": 1}\n\n",
            "data: {\"b\": 2}\n\n",
            "data: [DONE]\n\n",
            "data: {\"never\": true}\n\n",
        ))
        .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["a"], 1);
        assert_eq!(events[1]["b"], 2);
    }

    #[tokio::test]
    async fn skips_non_json_payloads_and_comments() {
        let events = collect(": keepalive\n\ndata: not json\n\ndata: {\"ok\": true}\n\n").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["ok"], true);
    }
}
