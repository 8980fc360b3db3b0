//! Bridge between the notification bus and the message broker.
//!
//! The broker is reached over JSON lines: control documents arrive one per
//! line on the control input, and each outbound notification is written as
//! `{"queue": <name>, "body": <document>}` to a [`BrokerSink`].

use std::sync::Arc;

use async_trait::async_trait;
use seedbank_config::BrokerConfig;
use seedbank_events::{NotificationBus, NotificationEnvelope, Topic};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::control::ControlHandler;
use crate::error::{AppError, AppResult};

/// Outbound side of the broker.
#[async_trait]
pub trait BrokerSink: Send + Sync {
    /// Publish `document` to `queue`.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be encoded or delivered.
    async fn publish(&self, queue: &str, document: &Value) -> AppResult<()>;
}

/// Sink writing one JSON envelope per line.
pub struct LineSink<W> {
    writer: Mutex<W>,
}

impl<W> LineSink<W> {
    /// Sink over `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl LineSink<tokio::io::Stdout> {
    /// Sink over the process's stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> BrokerSink for LineSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, queue: &str, document: &Value) -> AppResult<()> {
        let mut line = serde_json::to_vec(&json!({"queue": queue, "body": document}))
            .map_err(|err| AppError::codec("encode_publish", err))?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|source| AppError::Io {
                operation: "publish",
                path: None,
                source,
            })?;
        writer.flush().await.map_err(|source| AppError::Io {
            operation: "flush",
            path: None,
            source,
        })
    }
}

/// Queue name a topic resolves to.
#[must_use]
pub fn queue_for<'a>(topic: &'a Topic, broker: &'a BrokerConfig) -> &'a str {
    match topic {
        Topic::Notify => &broker.notify_queue,
        Topic::Stats => &broker.stats_queue,
        Topic::Reply(queue) => queue,
    }
}

/// Background task publishing every bus notification to the broker.
pub struct NotificationForwarder {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl NotificationForwarder {
    /// Subscribe to `bus` and forward through `sink`.
    #[must_use]
    pub fn spawn(bus: &NotificationBus, broker: BrokerConfig, sink: Arc<dyn BrokerSink>) -> Self {
        let mut stream = bus.subscribe();
        let (shutdown, mut stop) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    next = stream.next() => match next {
                        Some(envelope) => forward(&envelope, &broker, sink.as_ref()).await,
                        None => return,
                    },
                }
            }
            while let Some(envelope) = stream.try_next() {
                forward(&envelope, &broker, sink.as_ref()).await;
            }
        });
        Self { shutdown, task }
    }

    /// Forward what is already queued, then stop.
    pub async fn finish(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            warn!(error = %err, "notification forwarder failed");
        }
    }
}

async fn forward(envelope: &NotificationEnvelope, broker: &BrokerConfig, sink: &dyn BrokerSink) {
    let queue = queue_for(&envelope.topic, broker);
    let document = match envelope.notification.document() {
        Ok(document) => document,
        Err(err) => {
            error!(id = envelope.id, error = %err, "cannot encode notification");
            return;
        }
    };
    if let Err(err) = sink.publish(queue, &document).await {
        error!(id = envelope.id, queue, error = %err, "cannot publish notification");
    } else {
        debug!(id = envelope.id, queue, "notification published");
    }
}

/// Read control documents line by line and hand them to `handler`.
///
/// The task ends when the input reaches EOF or fails.
pub fn spawn_control_consumer<R>(reader: R, handler: Arc<ControlHandler>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let document = match serde_json::from_str::<Value>(&line) {
                        Ok(document) => document,
                        Err(err) => {
                            warn!(error = %err, "malformed control document");
                            continue;
                        }
                    };
                    if let Err(err) = handler.handle(document).await {
                        error!(error = %err, "control document failed");
                    }
                }
                Ok(None) => {
                    info!("control input closed");
                    return;
                }
                Err(err) => {
                    error!(error = %err, "control input failed");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppContext;
    use seedbank_config::SeedbankConfig;
    use seedbank_data::MemoryStore;
    use seedbank_events::Notification;
    use seedbank_session::LocalLauncher;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        published: StdMutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl BrokerSink for RecordingSink {
        async fn publish(&self, queue: &str, document: &Value) -> AppResult<()> {
            self.published
                .lock()
                .expect("sink lock")
                .push((queue.to_string(), document.clone()));
            Ok(())
        }
    }

    #[test]
    fn topics_resolve_to_configured_queues() {
        let broker = BrokerConfig::default();
        assert_eq!(queue_for(&Topic::Notify, &broker), "terasaur.web");
        assert_eq!(queue_for(&Topic::Stats, &broker), "seedbank.stats");
        let reply = Topic::Reply("caller.1".to_string());
        assert_eq!(queue_for(&reply, &broker), "caller.1");
    }

    #[tokio::test]
    async fn line_sink_writes_queue_envelopes() -> anyhow::Result<()> {
        let sink = LineSink::new(Vec::new());
        sink.publish("seedbank.stats", &json!({"num_torrents": 2}))
            .await?;
        let written = String::from_utf8(sink.into_inner())?;
        let line: Value = serde_json::from_str(written.trim_end())?;
        assert_eq!(
            line,
            json!({"queue": "seedbank.stats", "body": {"num_torrents": 2}})
        );
        assert!(written.ends_with('\n'));
        Ok(())
    }

    #[tokio::test]
    async fn forwarder_flushes_pending_notifications_on_finish() {
        let bus = NotificationBus::new();
        let sink = Arc::new(RecordingSink::default());
        let forwarder = NotificationForwarder::spawn(&bus, BrokerConfig::default(), sink.clone());

        bus.publish(
            Topic::Notify,
            Notification::SeedbankInit {
                seedbank_id: "bank-1".to_string(),
                peer_id: "-SB0100-".to_string(),
            },
        );
        bus.publish(
            Topic::Reply("caller".to_string()),
            Notification::PingResponse {
                correlation_id: "c".to_string(),
            },
        );
        forwarder.finish().await;

        let published = sink.published.lock().expect("sink lock").clone();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "terasaur.web");
        assert_eq!(published[0].1["action"], "seedbank_init");
        assert_eq!(published[1].0, "caller");
        assert_eq!(published[1].1["correlation_id"], "c");
    }

    #[tokio::test]
    async fn control_consumer_dispatches_until_eof() -> anyhow::Result<()> {
        let context = Arc::new(AppContext::new(
            Arc::new(SeedbankConfig::default()),
            Arc::new(LocalLauncher::stub()),
            Arc::new(MemoryStore::new()),
            false,
        ));
        let mut stream = context.notifications().subscribe();
        let handler = Arc::new(ControlHandler::new(context.clone()));
        let (mut input, reader) = tokio::io::duplex(1024);

        let consumer = spawn_control_consumer(reader, handler);
        input.write_all(b"not json\n\n").await?;
        input
            .write_all(b"{\"action\":\"ping_request\",\"correlation_id\":\"p\",\"reply_to\":\"r\"}\n")
            .await?;
        drop(input);
        consumer.await?;

        let envelope = stream.try_next().expect("ping response");
        assert_eq!(envelope.topic, Topic::Reply("r".to_string()));
        assert!(stream.try_next().is_none());
        Ok(())
    }
}
