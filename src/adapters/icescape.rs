use crate::config::toml_config::SourceConfig;
use crate::core::RecordSource;
use crate::domain::{Record, TimeWindow};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

#[derive(serde::Deserialize)]
struct LoginResponse {
    #[serde(rename = "AccessToken")]
    access_token: String,
}

/// Non-2xx responses become [`EtlError::ApiStatusError`] carrying the body text.
pub async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!("❌ API request failed with status {}: {}", status, body);
    Err(EtlError::ApiStatusError {
        status: status.as_u16(),
        body,
    })
}

/// Replaces `{token}` (or a bare `{}`) with the session token.
pub fn render_header(template: &str, token: &str) -> String {
    template.replace("{token}", token).replace("{}", token)
}

/// 聯絡中心 API 用戶端：登入取得 token 後查詢聯絡人與對話紀錄
#[derive(Debug, Clone)]
pub struct IcescapeClient {
    client: Client,
    config: SourceConfig,
    headers: HeaderMap,
}

impl IcescapeClient {
    /// Logs in and prepares the authenticated headers.
    pub async fn connect(config: SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.unwrap_or(60)))
            .build()?;

        tracing::info!("🔐 Getting access token from {}", config.login_url);
        let response = client
            .post(&config.login_url)
            .query(&[("userID", config.user.as_str()), ("password", config.password.as_str())])
            .send()
            .await?;
        let login: LoginResponse = check_response(response).await?.json().await?;

        let headers = Self::build_headers(&config, &login.access_token)?;
        Ok(Self {
            client,
            config,
            headers,
        })
    }

    fn build_headers(config: &SourceConfig, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(templates) = &config.headers {
            for (name, template) in templates {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    EtlError::InvalidConfigValueError {
                        field: "source.headers".to_string(),
                        value: name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                headers.insert(name, header_value(&render_header(template, token))?);
            }
        }
        if !headers.contains_key(AUTHORIZATION) {
            headers.insert(AUTHORIZATION, header_value(&format!("Session {}", token))?);
        }
        if let Some(agent) = &config.user_agent {
            headers.insert(USER_AGENT, header_value(agent)?);
        }
        Ok(headers)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.headers(self.headers.clone())
    }
}

fn header_value(raw: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(raw).map_err(|e| EtlError::InvalidConfigValueError {
        field: "source.headers".to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Contacts come back as a list, sometimes wrapped in `{"Value": [...]}`.
fn into_records(payload: serde_json::Value) -> Result<Vec<Record>> {
    let items = match payload {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("Value") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(EtlError::ValidationError {
                    message: "Contact response is neither a list nor a Value-wrapped list"
                        .to_string(),
                })
            }
        },
        other => {
            return Err(EtlError::ValidationError {
                message: format!("Unexpected contact response: {}", other),
            })
        }
    };
    Ok(items.into_iter().filter_map(Record::from_json).collect())
}

#[async_trait]
impl RecordSource for IcescapeClient {
    async fn fetch_contacts(&self, interaction_type: &str, window: &TimeWindow) -> Result<Vec<Record>> {
        let max_results = self.config.max_results().to_string();
        let params = [
            ("interactionTypes", interaction_type),
            ("maxResults", max_results.as_str()),
            ("startTime", window.start.as_str()),
            ("endTime", window.end.as_str()),
            ("includeAdditionalData", "true"),
        ];
        tracing::info!(
            "📡 Requesting {} contacts for {} ({} .. {})",
            interaction_type,
            window.day,
            window.start,
            window.end
        );

        let request = self.authorized(self.client.get(&self.config.contacts_url).query(&params));
        let response = check_response(request.send().await?).await?;
        let records = into_records(response.json().await?)?;

        tracing::info!("✅ Fetched {} contacts for {}", records.len(), window.day);
        Ok(records)
    }

    async fn fetch_transcripts(&self, contact_ids: &[i64]) -> Result<Vec<serde_json::Value>> {
        let payload: Vec<String> = contact_ids.iter().map(|id| format!("C:{}", id)).collect();
        tracing::debug!("📡 Requesting recordings for {:?}", payload);

        let request = self.authorized(self.client.post(&self.config.recordings_url).json(&payload));
        let response = check_response(request.send().await?).await?;
        match response.json::<serde_json::Value>().await? {
            serde_json::Value::Array(items) => Ok(items),
            other => Err(EtlError::ValidationError {
                message: format!("Recordings response is not a list: {}", other),
            }),
        }
    }
}
