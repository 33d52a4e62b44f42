//! Slack Web API client for posting replies.

use async_trait::async_trait;
use reqwest::Client;
use slackrelay_protocol::{AuthTestResponse, PostMessage, PostMessageResponse};

use super::{DeliveryError, MessagePoster};

/// Bearer-authenticated Slack Web API client.
pub struct SlackWebClient {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl SlackWebClient {
    #[must_use]
    pub fn new(client: Client, api_base: String, bot_token: String) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    /// Resolve the bot's own user ID via `auth.test`.
    pub async fn auth_test(&self) -> Result<String, DeliveryError> {
        let response = self
            .client
            .post(format!("{}/auth.test", self.api_base))
            .bearer_auth(&self.bot_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }

        let body: AuthTestResponse = response.json().await?;
        if !body.ok {
            return Err(DeliveryError::Api(
                body.error.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        body.user_id
            .ok_or_else(|| DeliveryError::Api("auth.test returned no user_id".to_string()))
    }
}

#[async_trait]
impl MessagePoster for SlackWebClient {
    async fn post_message(&self, message: &PostMessage) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(message)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }

        let body: PostMessageResponse = response.json().await?;
        if !body.ok {
            return Err(DeliveryError::Api(
                body.error.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        Ok(())
    }
}
