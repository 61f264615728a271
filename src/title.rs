//! Title suggestions for exported files.

use std::future::Future;

use crate::error::TitleError;

pub const FALLBACK_TITLE: &str = "diagram";
pub const DEFAULT_MAX_TITLE_LENGTH: usize = 50;

const ILLEGAL_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Suggests a short human-readable title for a diagram source.
pub trait TitleSuggester {
    fn suggest_title(&self, source: &str) -> impl Future<Output = Result<String, TitleError>>;
}

impl<T: TitleSuggester> TitleSuggester for &T {
    fn suggest_title(&self, source: &str) -> impl Future<Output = Result<String, TitleError>> {
        (**self).suggest_title(source)
    }
}

/// No suggester configured: always `Unavailable`.
impl<T: TitleSuggester> TitleSuggester for Option<T> {
    async fn suggest_title(&self, source: &str) -> Result<String, TitleError> {
        match self {
            Some(inner) => inner.suggest_title(source).await,
            None => Err(TitleError::Unavailable),
        }
    }
}

/// Makes a suggested title safe to use as a file stem. Returns `None` when
/// nothing usable is left.
pub fn sanitize_title(raw: &str, max_len: usize) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .filter(|c| !ILLEGAL_FILENAME_CHARS.contains(c))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(max_len).collect();
    let capped = capped.trim_matches(|c: char| c == '.' || c == ' ');
    if capped.is_empty() {
        None
    } else {
        Some(capped.to_string())
    }
}

#[cfg(feature = "gemini")]
pub use gemini::GeminiTitleSuggester;

#[cfg(feature = "gemini")]
mod gemini {
    use std::time::Duration;

    use log::debug;
    use serde_json::{Value, json};

    use super::TitleSuggester;
    use crate::config::TitleConfig;
    use crate::error::TitleError;

    const SYSTEM_PROMPT: &str = "You name diagrams. Reply with a short title of at most six words \
        for the Mermaid diagram you are given. Reply with the title only: no quotes, no \
        punctuation, no file extension.";

    /// Asks a Gemini model through the Generative Language REST API.
    #[derive(Debug, Clone)]
    pub struct GeminiTitleSuggester {
        client: reqwest::Client,
        endpoint: String,
        model: String,
        api_key: String,
    }

    impl GeminiTitleSuggester {
        pub fn new(config: &TitleConfig, api_key: impl Into<String>) -> Result<Self, TitleError> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .user_agent(concat!("mmdx/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|err| TitleError::Request(err.to_string()))?;
            Ok(Self {
                client,
                endpoint: config.endpoint.trim_end_matches('/').to_string(),
                model: config.model.clone(),
                api_key: api_key.into(),
            })
        }

        /// Builds a suggester when the configured API key variable is set.
        pub fn from_env(config: &TitleConfig) -> Option<Self> {
            let api_key = std::env::var(&config.api_key_env).ok()?;
            if api_key.trim().is_empty() {
                return None;
            }
            Self::new(config, api_key.trim()).ok()
        }

        fn url(&self) -> String {
            format!("{}/models/{}:generateContent", self.endpoint, self.model)
        }
    }

    pub(super) fn request_body(source: &str) -> Value {
        json!({
            "contents": [{ "parts": [{ "text": source }] }],
            "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
        })
    }

    pub(super) fn response_text(body: &Value) -> Option<&str> {
        body.pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    impl TitleSuggester for GeminiTitleSuggester {
        async fn suggest_title(&self, source: &str) -> Result<String, TitleError> {
            debug!(model = self.model.as_str(); "Requesting diagram title");
            let request_error = |err: reqwest::Error| {
                if err.is_timeout() {
                    TitleError::Timeout
                } else {
                    TitleError::Request(err.to_string())
                }
            };
            let response = self
                .client
                .post(self.url())
                .query(&[("key", self.api_key.as_str())])
                .json(&request_body(source))
                .send()
                .await
                .map_err(request_error)?;
            if !response.status().is_success() {
                return Err(TitleError::Request(format!(
                    "HTTP status: {}",
                    response.status()
                )));
            }
            let body: Value = response.json().await.map_err(request_error)?;
            response_text(&body)
                .map(str::to_string)
                .ok_or(TitleError::EmptyResponse)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl TitleSuggester for Fixed {
        async fn suggest_title(&self, _source: &str) -> Result<String, TitleError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn strips_illegal_and_control_characters() {
        assert_eq!(
            sanitize_title("  \"Order: Checkout/Flow?\"\n", 50).as_deref(),
            Some("Order CheckoutFlow")
        );
        assert_eq!(
            sanitize_title("a\u{0007}b\tc", 50).as_deref(),
            Some("ab c")
        );
        assert_eq!(sanitize_title("..hidden..", 50).as_deref(), Some("hidden"));
    }

    #[test]
    fn caps_length_on_char_boundaries() {
        assert_eq!(sanitize_title("線上課程購買流程", 4).as_deref(), Some("線上課程"));
        assert_eq!(sanitize_title("abc def", 4).as_deref(), Some("abc"));
    }

    #[test]
    fn nothing_usable_is_none() {
        assert_eq!(sanitize_title("", 50), None);
        assert_eq!(sanitize_title(" ?*<> .. ", 50), None);
    }

    #[tokio::test]
    async fn missing_suggester_is_unavailable() {
        let none: Option<Fixed> = None;
        assert!(matches!(
            none.suggest_title("flowchart LR").await,
            Err(TitleError::Unavailable)
        ));
        let some = Some(Fixed("Checkout"));
        assert_eq!(some.suggest_title("flowchart LR").await.unwrap(), "Checkout");
    }

    #[cfg(feature = "gemini")]
    #[test]
    fn gemini_payload_shape() {
        use serde_json::json;

        let body = gemini::request_body("graph TD; A-->B");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "graph TD; A-->B");
        assert!(body["systemInstruction"]["parts"][0]["text"].is_string());

        let reply = json!({ "candidates": [{ "content": { "parts": [{ "text": " Login Flow \n" }] } }] });
        assert_eq!(gemini::response_text(&reply), Some("Login Flow"));
        assert_eq!(gemini::response_text(&json!({ "candidates": [] })), None);
    }
}
