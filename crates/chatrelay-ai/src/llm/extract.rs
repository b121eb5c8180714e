//! Token extraction from decoded frame payloads.

use serde_json::Value;

/// Pull the incremental text out of one payload.
///
/// Returns `None` for metadata-only payloads (role announcements, finish
/// reasons, usage reports) and for empty deltas.
pub fn extract_token(payload: &Value) -> Option<String> {
    let text = payload
        .get("token")
        .and_then(Value::as_str)
        .or_else(|| openai_delta(payload))
        .or_else(|| anthropic_delta(payload))?;

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn openai_delta(payload: &Value) -> Option<&str> {
    payload
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

fn anthropic_delta(payload: &Value) -> Option<&str> {
    if payload.get("type")?.as_str()? != "content_block_delta" {
        return None;
    }
    payload.get("delta")?.get("text")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relay_token_shape() {
        assert_eq!(extract_token(&json!({"token": "Hi"})), Some("Hi".to_string()));
    }

    #[test]
    fn openai_chunk() {
        let chunk = json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "delta": {"content": " there"}, "finish_reason": null}]
        });
        assert_eq!(extract_token(&chunk), Some(" there".to_string()));
    }

    #[test]
    fn anthropic_delta_event() {
        let event = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "hello"}
        });
        assert_eq!(extract_token(&event), Some("hello".to_string()));
    }

    #[test]
    fn metadata_only_payloads_yield_nothing() {
        let cases = [
            json!({"choices": [{"index": 0, "delta": {"role": "assistant"}}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"total_tokens": 12}}),
            json!({"choices": [{"delta": {"content": null}}]}),
            json!({"token": ""}),
            json!({"token": 42}),
            json!({"type": "message_stop"}),
            json!("just a string"),
            json!(null),
        ];
        for case in cases {
            assert_eq!(extract_token(&case), None, "{case}");
        }
    }
}
