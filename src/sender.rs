use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::DiagnosticSink;
use crate::error::DeliveryError;

/// Request timeout for the send-message call.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts replies to the chat platform's send-message endpoint.  One attempt
/// per reply; failures are reported and swallowed.
pub struct ReplySender {
    api_base: String,
    bot_token: String,
    client: reqwest::Client,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl ReplySender {
    pub fn new(
        api_base: &str,
        bot_token: &str,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            client,
            diagnostics,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    /// Returns whether the platform accepted the message.
    pub async fn send(&self, chat_id: i64, text: &str) -> bool {
        match self.try_send(chat_id, text).await {
            Ok(()) => true,
            Err(err) => {
                // reqwest errors carry the URL, which embeds the token.
                let err = match err {
                    DeliveryError::Transport(e) => DeliveryError::Transport(e.without_url()),
                    other => other,
                };
                self.diagnostics.record(
                    "reply_sender",
                    &format!("failed to send message to chat {}: {}", chat_id, err),
                );
                false
            }
        }
    }

    pub async fn try_send(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        let chat_id = chat_id.to_string();
        let form = [("chat_id", chat_id.as_str()), ("text", text)];
        let resp = self.client.post(self.endpoint()).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}
