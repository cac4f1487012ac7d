//! Completion queue: publish side, receive side, and the polling consumer.
//!
//! The queue delivers session-completion events at least once with no
//! ordering guarantee, so the handler must be idempotent. Messages are
//! leased with a receipt handle and deleted only after the handler
//! succeeds; failed messages are left for redelivery.

use crate::config::QueueConfig;
use crate::error::RidepoolError;
use crate::session::Session;
use crate::sms::InboundSms;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Event published when a session gathers its final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    /// Snapshot of the completed session
    pub existing_session: Session,
    /// The inbound message that completed it
    pub inbound_message: InboundSms,
}

/// A leased queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    /// Handle used to delete the message after processing
    pub receipt_handle: String,
    /// JSON-encoded [`CompletionEvent`]
    pub body: String,
}

/// Publish side of the completion queue.
#[async_trait]
pub trait CompletionQueue: Send + Sync {
    /// Enqueue a completion event. Fire-and-forget from the caller's
    /// perspective; failure is reported but never rolls back session state.
    async fn publish(&self, event: &CompletionEvent) -> Result<(), RidepoolError>;
}

/// Receive side of the completion queue.
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Lease up to the configured batch of messages.
    async fn receive(&self) -> Result<Vec<QueueMessage>, RidepoolError>;

    /// Acknowledge a processed message.
    async fn delete(&self, receipt_handle: &str) -> Result<(), RidepoolError>;
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveRequest {
    max_messages: usize,
}

#[derive(Debug, Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    messages: Vec<QueueMessage>,
}

/// HTTP client for the queue API.
pub struct HttpQueueClient {
    client: Client,
    config: QueueConfig,
}

impl HttpQueueClient {
    /// Creates a new queue client.
    ///
    /// # Errors
    ///
    /// Returns `RidepoolError::Queue` if the HTTP client cannot be built.
    pub fn new(config: QueueConfig) -> Result<Self, RidepoolError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RidepoolError::Queue(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn build_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/queues/{}{}",
            self.config.base_url, self.config.completed_queue, path
        );
        self.client
            .request(method, &url)
            .header("Content-Type", "application/json")
    }

    async fn check(
        response: Result<reqwest::Response, reqwest::Error>,
        operation: &str,
    ) -> Result<reqwest::Response, RidepoolError> {
        let response =
            response.map_err(|e| RidepoolError::Queue(format!("{} failed: {}", operation, e)))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RidepoolError::Queue(format!(
                "{} returned {}: {}",
                operation, status, body
            )))
        }
    }
}

#[async_trait]
impl CompletionQueue for HttpQueueClient {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), RidepoolError> {
        let body = serde_json::to_string(event)
            .map_err(|e| RidepoolError::Queue(format!("encode event: {}", e)))?;
        let response = self
            .build_request(Method::POST, "/messages")
            .json(&SendRequest { body: &body })
            .send()
            .await;
        Self::check(response, "queue publish").await?;
        debug!(phone = %event.inbound_message.from, "published completion event");
        Ok(())
    }
}

#[async_trait]
impl QueueSource for HttpQueueClient {
    async fn receive(&self) -> Result<Vec<QueueMessage>, RidepoolError> {
        let response = self
            .build_request(Method::POST, "/messages/receive")
            .json(&ReceiveRequest {
                max_messages: self.config.receive_batch,
            })
            .send()
            .await;
        let response = Self::check(response, "queue receive").await?;
        let parsed: ReceiveResponse = response
            .json()
            .await
            .map_err(|e| RidepoolError::Queue(format!("queue receive body: {}", e)))?;
        Ok(parsed.messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), RidepoolError> {
        let response = self
            .build_request(Method::DELETE, &format!("/messages/{}", receipt_handle))
            .send()
            .await;
        Self::check(response, "queue delete").await?;
        Ok(())
    }
}

/// Handler invoked for each completion event the consumer leases.
///
/// Return `Ok(())` to acknowledge the message. Return `Err` to leave it on
/// the queue for redelivery; the consumer continues with other messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, event: CompletionEvent) -> crate::error::Result<()>;
}

/// Polling consumer for the completion queue.
pub struct QueueConsumer<S: QueueSource> {
    source: S,
    poll_interval: std::time::Duration,
    running: Arc<AtomicBool>,
}

impl<S: QueueSource> QueueConsumer<S> {
    /// Creates a consumer over `source`.
    pub fn new(source: S, config: &QueueConfig) -> Self {
        Self {
            source,
            poll_interval: std::time::Duration::from_secs(config.poll_interval_secs),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag the consumer to stop after the current poll.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run the poll loop until stopped.
    ///
    /// Each leased message is decoded and dispatched to `handler`; the
    /// message is deleted only when the handler succeeds. Undecodable
    /// messages are deleted immediately since redelivery cannot fix them.
    pub async fn run(&self, handler: Arc<dyn MessageHandler>) -> crate::error::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        info!(poll_interval_secs = self.poll_interval.as_secs(), "queue consumer started");

        while self.running.load(Ordering::SeqCst) {
            let messages = match self.source.receive().await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(error = %e, "queue receive failed");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            for message in messages {
                let event: CompletionEvent = match serde_json::from_str(&message.body) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable queue message");
                        if let Err(e) = self.source.delete(&message.receipt_handle).await {
                            error!(error = %e, "failed to delete poison message");
                        }
                        continue;
                    }
                };

                match handler.handle(event).await {
                    Ok(()) => {
                        if let Err(e) = self.source.delete(&message.receipt_handle).await {
                            // The message will be redelivered; the handler
                            // must tolerate reprocessing.
                            warn!(error = %e, "failed to delete processed message");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "handler failed; message left for redelivery");
                    }
                }
            }
        }

        info!("queue consumer stopped");
        Ok(())
    }
}
