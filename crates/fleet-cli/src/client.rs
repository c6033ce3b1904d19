use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

pub fn auth(builder: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(t) if !t.is_empty() => builder.bearer_auth(t),
        _ => builder,
    }
}

pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()?)
}

/// Sampling parameters sent with every chat completion.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

pub fn message(role: &str, content: &str) -> Value {
    serde_json::json!({ "role": role, "content": content })
}

/// Non-streaming OpenAI-style chat completion against one server; returns the trimmed reply.
pub async fn chat_completion(
    http: &reqwest::Client,
    api_base: &str,
    api_key: Option<&str>,
    model: &str,
    messages: &[Value],
    params: &CompletionParams,
) -> anyhow::Result<String> {
    let url = format!("{}/chat/completions", api_base.trim_end_matches('/'));
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
    });
    if let (Some(obj), Value::Object(extra)) = (body.as_object_mut(), serde_json::to_value(params)?) {
        obj.extend(extra);
    }

    let resp = auth(http.post(&url), api_key).json(&body).send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("chat request to {url} failed ({status}): {text}");
    }

    let v: Value = resp.json().await?;
    let content = v
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c0| c0.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("response from {url} has no message content"))?;
    Ok(content.trim().to_string())
}
