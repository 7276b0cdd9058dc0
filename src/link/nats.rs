use super::messages::{
    AudioChunk, ClientMessage, FrameSample, MediaPayload, ServerEvent, SessionOpen,
};
use super::SessionChannel;
use crate::codec;
use anyhow::{Context, Result};
use async_nats::Client;
use futures::stream::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the inbound event queue. Events are handled in arrival order
/// by a single consumer; the buffer only absorbs bursts.
const EVENT_QUEUE_DEPTH: usize = 256;

/// NATS transport for the session link.
///
/// Outbound chunks are published as JSON [`ClientMessage`]s on per-session
/// subjects; inbound server events arrive on the session's event subject and
/// are forwarded into the receiver handed out by [`NatsChannel::connect`].
pub struct NatsChannel {
    client: Client,
    session_id: String,
    audio_subject: String,
    frame_subject: String,
    forward_task: Mutex<Option<JoinHandle<()>>>,
}

impl NatsChannel {
    /// Connect to the inference service and open a session.
    ///
    /// Publishes the session-open envelope and subscribes to the session's
    /// event subject before returning, so no event can be missed. The
    /// returned receiver yields events for the connection's lifetime;
    /// it ends after a `Closed` event or when the channel is discarded.
    pub async fn connect(
        url: &str,
        open: SessionOpen,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>)> {
        info!("Connecting session link to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let session_id = open.session_id.clone();
        let event_subject = format!("consult.event.session-{}", session_id);
        let open_subject = format!("consult.open.session-{}", session_id);

        // Subscribe before announcing the session so the first events land
        // in the queue rather than the void.
        let mut subscriber = client
            .subscribe(event_subject.clone())
            .await
            .context("Failed to subscribe to session events")?;

        let payload = serde_json::to_vec(&ClientMessage::SessionOpen(open))?;
        client
            .publish(open_subject, payload.into())
            .await
            .context("Failed to publish session open")?;
        client.flush().await.context("Failed to flush session open")?;

        info!("Session link open: {}", session_id);

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let forward_session = session_id.clone();
        let forward_task = tokio::spawn(async move {
            let mut saw_closed = false;

            while let Some(msg) = subscriber.next().await {
                let event = match serde_json::from_slice::<ServerEvent>(&msg.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Dropping unparseable server event: {}", e);
                        continue;
                    }
                };

                saw_closed = matches!(event, ServerEvent::Closed);
                if event_tx.send(event).await.is_err() {
                    // Consumer went away; the session is tearing down.
                    break;
                }
                if saw_closed {
                    break;
                }
            }

            // Subscription ended without a Closed event: the transport is
            // gone. Surface it as an error followed by Closed.
            if !saw_closed && !event_tx.is_closed() {
                let _ = event_tx
                    .send(ServerEvent::Error {
                        message: "session link lost".to_string(),
                    })
                    .await;
                let _ = event_tx.send(ServerEvent::Closed).await;
            }

            debug!("Event forwarding ended for session {}", forward_session);
        });

        Ok((
            Self {
                client,
                audio_subject: format!("consult.audio.session-{}", session_id),
                frame_subject: format!("consult.frame.session-{}", session_id),
                session_id,
                forward_task: Mutex::new(Some(forward_task)),
            },
            event_rx,
        ))
    }

    fn media_payload(&self, data: &[u8], mime_type: &str) -> MediaPayload {
        MediaPayload {
            session_id: self.session_id.clone(),
            data: codec::encode_base64(data),
            mime_type: mime_type.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait::async_trait]
impl SessionChannel for NatsChannel {
    async fn send_audio(&self, chunk: AudioChunk) -> Result<()> {
        let message = ClientMessage::AudioChunk(self.media_payload(&chunk.data, chunk.mime_type));
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(self.audio_subject.clone(), payload.into())
            .await
            .context("Failed to publish audio chunk")?;

        debug!(
            "Published audio chunk to {} ({} bytes)",
            self.audio_subject,
            chunk.data.len()
        );

        Ok(())
    }

    async fn send_frame(&self, frame: FrameSample) -> Result<()> {
        let message = ClientMessage::ImageChunk(self.media_payload(&frame.data, frame.mime_type));
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(self.frame_subject.clone(), payload.into())
            .await
            .context("Failed to publish frame sample")?;

        debug!(
            "Published frame sample to {} ({} bytes)",
            self.frame_subject,
            frame.data.len()
        );

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing session link: {}", self.session_id);

        if let Some(task) = self.forward_task.lock().await.take() {
            // Dropping the forwarder drops the event sender, which ends the
            // consumer's stream. Outstanding sends are abandoned, not retried.
            task.abort();
        }

        // async-nats handles connection cleanup on drop.
        Ok(())
    }
}
