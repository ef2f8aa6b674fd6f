use std::{sync::Arc, time::Duration};

use futures::{Stream, future::BoxFuture};
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::models::{
    ApiResponse, DeleteWebhookRequest, EmptyRequest, GetUpdatesRequest, SendMessageRequest,
    SetWebhookRequest, Update, WebhookInfo,
};
use crate::gateway::{ChatGateway, GatewayError, InboundEvent, OutboundMessage};

const DEFAULT_API_URL: &str = "https://api.telegram.org";
const ALLOWED_UPDATES: &[&str] = &["message", "callback_query"];
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Thin Bot API client used both for long polling and for outbound messages.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: Arc<str>,
}

impl TelegramClient {
    /// Build a client talking to the public Bot API.
    pub fn new(token: &str) -> Result<Self, GatewayError> {
        Self::with_api_url(DEFAULT_API_URL, token)
    }

    /// Build a client against a custom Bot API server.
    pub fn with_api_url(api_url: &str, token: &str) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .build()
            .map_err(|source| GatewayError::ClientBuilder { source })?;
        let base_url = Arc::<str>::from(format!("{}/bot{}", api_url.trim_end_matches('/'), token));
        Ok(Self { client, base_url })
    }

    async fn call<P, R>(&self, method: &'static str, payload: &P) -> Result<R, GatewayError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|source| GatewayError::Request { method, source })?;

        let body = response
            .json::<ApiResponse<R>>()
            .await
            .map_err(|source| GatewayError::Decode { method, source })?;

        match body.result {
            Some(result) if body.ok => Ok(result),
            _ => Err(GatewayError::Api {
                method,
                code: body.error_code.unwrap_or_default(),
                description: body.description.unwrap_or_default(),
            }),
        }
    }

    /// Fetch the next batch of updates after `offset`, waiting up to `timeout`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, GatewayError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: ALLOWED_UPDATES,
        };
        self.call("getUpdates", &request).await
    }

    /// Long-poll the Bot API and yield events in order until `cancel` fires.
    ///
    /// Transport failures are logged and retried after a short pause.
    pub fn updates(
        &self,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> impl Stream<Item = InboundEvent> + Send + 'static {
        let client = self.clone();
        async_stream::stream! {
            let mut offset = 0;
            loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = client.get_updates(offset, timeout) => batch,
                };

                match batch {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            yield InboundEvent::from(update);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "long polling failed; retrying");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = sleep(POLL_RETRY_DELAY) => {}
                        }
                    }
                }
            }
            debug!("long polling stopped");
        }
    }

    /// Point the bot at a webhook URL.
    pub async fn set_webhook(&self, url: &str) -> Result<(), GatewayError> {
        let _: bool = self.call("setWebhook", &SetWebhookRequest { url }).await?;
        Ok(())
    }

    /// Remove any webhook so long polling can be used.
    pub async fn delete_webhook(&self) -> Result<(), GatewayError> {
        let request = DeleteWebhookRequest {
            drop_pending_updates: false,
        };
        let _: bool = self.call("deleteWebhook", &request).await?;
        Ok(())
    }

    /// Current webhook registration as seen by the Bot API.
    pub async fn webhook_info(&self) -> Result<WebhookInfo, GatewayError> {
        self.call("getWebhookInfo", &EmptyRequest {}).await
    }

    /// Send a text message.
    pub async fn send_message(&self, message: OutboundMessage) -> Result<(), GatewayError> {
        let request = SendMessageRequest::from(message);
        let _: serde_json::Value = self.call("sendMessage", &request).await?;
        Ok(())
    }
}

impl ChatGateway for TelegramClient {
    fn send(&self, message: OutboundMessage) -> BoxFuture<'static, Result<(), GatewayError>> {
        let client = self.clone();
        Box::pin(async move { client.send_message(message).await })
    }
}
