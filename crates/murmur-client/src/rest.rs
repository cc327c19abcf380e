//! REST client for history and sends.
//!
//! Executes the [`FetchHistory`](crate::ClientAction::FetchHistory) and
//! [`SubmitMessage`](crate::ClientAction::SubmitMessage) actions over HTTP.

use murmur_core::{FetchedPage, HistoryError, PageRequest, SendError};
use murmur_proto::{
    ConversationId, CorrelationKey, HistoryPage, Message, ProtocolError, SendTextRequest,
    WireMessage,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode, multipart};
use url::Url;

use crate::event::{FileUpload, OutgoingBody, Submission};

/// Content type sent when the file's is unknown.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// HTTP API for one user.
#[derive(Debug, Clone)]
pub struct RestApi {
    http: Client,
    base: String,
    token: String,
}

impl RestApi {
    /// Client for the API rooted at `base_url`, authenticating with `token`.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, url::ParseError> {
        let base = Url::parse(base_url)?;
        Ok(Self {
            http: Client::new(),
            base: base.as_str().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Fetch one page, newest first.
    ///
    /// Items that fail validation are logged and dropped; the page still
    /// counts them so the cursor moves past it.
    pub async fn fetch_history(&self, request: &PageRequest) -> Result<FetchedPage, HistoryError> {
        let url = self.conversation_url(request.conversation_id);
        let response = self
            .authorized(self.http.get(url))
            .query(&[("page", request.page_index), ("size", request.page_size)])
            .send()
            .await
            .map_err(|e| HistoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| HistoryError::Transport(e.to_string()))?;
        let page: HistoryPage = serde_json::from_str(&body).map_err(ProtocolError::from)?;

        let received = page.len();
        let messages: Vec<Message> = page
            .into_messages()
            .filter_map(|item| {
                item.inspect_err(|e| {
                    tracing::debug!(
                        conversation = %request.conversation_id,
                        page = request.page_index,
                        error = %e,
                        "dropping invalid history item"
                    );
                })
                .ok()
            })
            .collect();

        tracing::debug!(
            conversation = %request.conversation_id,
            page = request.page_index,
            received,
            kept = messages.len(),
            "history page fetched"
        );
        Ok(FetchedPage { messages, received })
    }

    /// Deliver a submission produced by the client.
    pub async fn submit(&self, submission: &Submission) -> Result<Message, SendError> {
        match &submission.body {
            OutgoingBody::Text(content) => {
                self.send_text(submission.conversation_id, content, &submission.correlation).await
            },
            OutgoingBody::File(file) => {
                self.send_file(submission.conversation_id, file, &submission.correlation).await
            },
        }
    }

    /// Post a text message.
    pub async fn send_text(
        &self,
        conversation_id: ConversationId,
        content: &str,
        correlation: &CorrelationKey,
    ) -> Result<Message, SendError> {
        let url = format!("{}/text", self.conversation_url(conversation_id));
        let body = SendTextRequest {
            content: content.to_string(),
            client_nonce: Some(correlation.clone()),
        };

        let response = self
            .authorized(self.http.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        created_message(response).await
    }

    /// Upload a file as an attachment message.
    pub async fn send_file(
        &self,
        conversation_id: ConversationId,
        file: &FileUpload,
        correlation: &CorrelationKey,
    ) -> Result<Message, SendError> {
        let url = format!("{}/attachment", self.conversation_url(conversation_id));
        let part = multipart::Part::bytes(file.bytes.clone())
            .file_name(file.filename.clone())
            .mime_str(file.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE))
            .map_err(|e| SendError::Rejected(format!("invalid content type: {e}")))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("clientNonce", correlation.as_str().to_string());

        let response = self
            .authorized(self.http.post(url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        created_message(response).await
    }

    fn conversation_url(&self, conversation_id: ConversationId) -> String {
        format!("{}/messages/group/{}", self.base, conversation_id.0)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

/// Decode the server's copy of a message it just accepted.
async fn created_message(response: Response) -> Result<Message, SendError> {
    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SendError::Transport(format!("status {}", status.as_u16())));
    }
    if !status.is_success() {
        return Err(SendError::Rejected(format!("status {}", status.as_u16())));
    }

    let body = response.text().await.map_err(|e| SendError::Transport(e.to_string()))?;
    serde_json::from_str::<WireMessage>(&body)
        .map_err(ProtocolError::from)
        .and_then(WireMessage::into_message)
        .map_err(|e| SendError::Rejected(format!("invalid response: {e}")))
}
