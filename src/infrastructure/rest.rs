//! REST Collaborator
//!
//! Stateless request/response calls that sit beside the gateway: posting a
//! message and looking a user up by id. Nothing here touches session state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Snowflake, UserInfo};
use crate::shared::error::{GatewayError, Result};

/// Default REST API root.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Outbound actions and identity lookups.
#[async_trait]
pub trait RestApi: Send + Sync {
    /// Post a text message to a channel.
    async fn create_message(&self, channel_id: Snowflake, content: &str) -> Result<()>;

    /// Fetch a user's identity by id.
    async fn get_user(&self, user_id: Snowflake) -> Result<UserInfo>;
}

#[derive(Debug, Serialize)]
struct CreateMessageBody<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// `reqwest` implementation authenticating with a bot token.
#[derive(Clone)]
pub struct HttpRestApi {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
}

impl HttpRestApi {
    pub fn new(token: &str, base_url: impl Into<String>, user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authorization: format!("Bot {}", token),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ApiErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RestApi for HttpRestApi {
    async fn create_message(&self, channel_id: Snowflake, content: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/channels/{}/messages", channel_id)))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(&CreateMessageBody { content })
            .send()
            .await?;
        Self::check(response).await?;

        tracing::debug!(channel_id = %channel_id, "Message sent");
        Ok(())
    }

    async fn get_user(&self, user_id: Snowflake) -> Result<UserInfo> {
        let response = self
            .http
            .get(self.url(&format!("/users/{}", user_id)))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
