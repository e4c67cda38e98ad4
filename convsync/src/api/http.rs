//! `reqwest`-backed [`ConversationApi`].

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use url::Url;

use convsync_proto::api::{
    AckResponse, ConversationsResponse, MessagesResponse, SendMessageRequest, SendMessageResponse,
};
use convsync_proto::conversation::Conversation;
use convsync_proto::message::{ConversationId, Message, MessageId};

use super::{ApiError, ConversationApi};

/// Default number of messages requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// REST client for the messaging backend.
///
/// Cheap to clone: the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    /// API root, always ending in `/` (e.g. `https://host/api/`).
    base: Url,
    page_size: usize,
}

impl HttpApi {
    /// Build a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] unless `base_url` is an absolute
    /// `http`/`https` URL, and [`ApiError::Http`] if the HTTP client cannot
    /// be constructed.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let mut base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!(
                "unsupported scheme {:?}",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Set the page size sent with message fetches.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// The API root.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Build an endpoint URL from path segments; each segment is
    /// percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        tracing::trace!(%url, "GET");
        let response = self.client.get(url).send().await?;
        decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: Option<&SendMessageRequest>,
    ) -> Result<T, ApiError> {
        tracing::trace!(%url, "POST");
        let request = self.client.post(url);
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        let response = request.send().await?;
        decode(response).await
    }

    async fn post_ack(&self, url: Url) -> Result<(), ApiError> {
        let body: AckResponse = self.post(url, None).await?;
        if body.success {
            Ok(())
        } else {
            Err(rejected(body.error))
        }
    }
}

/// Decode a JSON body, turning non-2xx statuses into [`ApiError::Status`].
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    // Error bodies use the same `{success, error}` envelope when the
    // backend produced them itself.
    let message = match response.json::<AckResponse>().await {
        Ok(AckResponse {
            error: Some(error), ..
        }) => error,
        _ => status.canonical_reason().unwrap_or("unknown").to_string(),
    };
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

fn rejected(error: Option<String>) -> ApiError {
    ApiError::Rejected(error.unwrap_or_else(|| "no reason given".to_string()))
}

impl ConversationApi for HttpApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let body: ConversationsResponse = self.get(self.endpoint(&["conversations"])?).await?;
        if !body.success {
            return Err(rejected(body.error));
        }
        tracing::debug!(count = body.conversations.len(), "conversation list fetched");
        Ok(body.conversations)
    }

    async fn fetch_messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, ApiError> {
        let mut url = self.endpoint(&["conversations", conversation.as_str(), "messages"])?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string());

        let body: MessagesResponse = self.get(url).await?;
        if !body.success {
            return Err(rejected(body.error));
        }
        tracing::debug!(
            conversation_id = %conversation,
            count = body.messages.len(),
            "message page fetched"
        );
        Ok(body.messages)
    }

    async fn mark_conversation_read(&self, conversation: &ConversationId) -> Result<(), ApiError> {
        self.post_ack(self.endpoint(&["conversations", conversation.as_str(), "read"])?)
            .await
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.post_ack(self.endpoint(&["conversations", "read-all"])?)
            .await
    }

    async fn mark_message_read(&self, message: &MessageId) -> Result<(), ApiError> {
        self.post_ack(self.endpoint(&["messages", message.as_str(), "read"])?)
            .await
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message, ApiError> {
        let body: SendMessageResponse = self
            .post(self.endpoint(&["messages", "send"])?, Some(request))
            .await?;
        match body {
            SendMessageResponse {
                success: true,
                message: Some(message),
                ..
            } => Ok(message),
            SendMessageResponse { error, .. } => Err(rejected(error)),
        }
    }
}
