//! Dispatch of inbound broker control documents.
//!
//! Documents are JSON objects discriminated by `action`:
//! `publish_stats {enable}`, `upload {upload_action, info_hash, torrent_file?}`
//! and `ping_request {correlation_id, reply_to}`. Unknown actions and
//! incomplete documents are logged and ignored.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use seedbank_events::{Notification, Topic};
use seedbank_session::{PublishStatsParams, SessionCommand};
use seedbank_torrent_core::ContentHash;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::{AppContext, SERVER_SESSION_KEY};
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
struct PublishStatsRequest {
    #[serde(default)]
    enable: bool,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    #[serde(default)]
    upload_action: Option<String>,
    #[serde(default)]
    info_hash: Option<String>,
    #[serde(default)]
    torrent_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PingRequest {
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    reply_to: Option<String>,
}

/// Routes control documents to the supervisor, upload workflow and bus.
pub struct ControlHandler {
    context: Arc<AppContext>,
}

impl ControlHandler {
    /// Handler acting on `context`.
    #[must_use]
    pub const fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Handle one control document.
    ///
    /// # Errors
    ///
    /// Returns decoding errors for documents whose fields have the wrong type
    /// and errors raised by the upload workflow.
    pub async fn handle(&self, document: Value) -> AppResult<()> {
        let Some(action) = document
            .get("action")
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            warn!(%document, "control document without action");
            return Ok(());
        };
        debug!(%action, "control document received");
        match action.as_str() {
            "publish_stats" => {
                let request: PublishStatsRequest = decode(document)?;
                self.publish_stats(request.enable).await;
                Ok(())
            }
            "upload" => self.upload(decode(document)?).await,
            "ping_request" => {
                self.ping(decode(document)?);
                Ok(())
            }
            other => {
                warn!(action = other, "unknown control action");
                Ok(())
            }
        }
    }

    async fn publish_stats(&self, enable: bool) {
        info!(enable, "stats publishing requested");
        let command = SessionCommand::PublishStats(PublishStatsParams { enable });
        if self
            .context
            .supervisor()
            .send(SERVER_SESSION_KEY, &command)
            .await
            .is_err()
        {
            debug!("publish_stats not delivered");
        }
    }

    async fn upload(&self, request: UploadRequest) -> AppResult<()> {
        let (Some(verb), Some(info_hash)) = (request.upload_action, request.info_hash) else {
            warn!("upload request without upload_action or info_hash");
            return Ok(());
        };
        let uploads = self.context.uploads();
        if verb == "start" {
            let descriptor = request
                .torrent_file
                .map(|encoded| STANDARD.decode(encoded.as_bytes()))
                .transpose()
                .map_err(|_| AppError::invalid("torrent_file", "not base64"))?;
            return uploads.start(&info_hash, descriptor.as_deref()).await;
        }

        let content_hash =
            ContentHash::parse(&info_hash).map_err(|err| AppError::torrent("parse_hash", err))?;
        match verb.as_str() {
            "stop" => uploads.stop(&content_hash),
            "cancel" => uploads.cancel(&content_hash),
            "delete" => uploads.delete(&content_hash).await?,
            "status" => uploads.status(&content_hash),
            other => warn!(upload_action = other, "unknown upload action"),
        }
        Ok(())
    }

    fn ping(&self, request: PingRequest) {
        let (Some(correlation_id), Some(reply_to)) = (request.correlation_id, request.reply_to)
        else {
            warn!("ping request without correlation_id or reply_to");
            return;
        };
        debug!(%correlation_id, %reply_to, "answering ping");
        self.context.notifications().publish(
            Topic::Reply(reply_to),
            Notification::PingResponse { correlation_id },
        );
    }
}

fn decode<T: DeserializeOwned>(document: Value) -> AppResult<T> {
    serde_json::from_value(document).map_err(|err| AppError::codec("decode_control", err))
}
