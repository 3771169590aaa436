//! AMQP event consumer.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::retry::{RetryExecutor, RetryPolicy, RetryResult};
use crate::consumer::shutdown::ShutdownState;
use crate::event::Event;
use crate::handler::EventHandler;

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Durable queue carrying events.
    pub queue: String,
    /// Unacked message prefetch window.
    pub prefetch: u16,
    /// Per-message processing deadline; beyond it the message is nacked
    /// with requeue.
    pub processing_timeout: Duration,
}

impl ConsumerConfig {
    /// Build from service settings.
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            url: settings.rabbitmq_url.clone(),
            queue: settings.rabbitmq_queue.clone(),
            prefetch: 10,
            processing_timeout: Duration::from_secs(30),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("AMQP URL cannot be empty".to_string());
        }
        if self.queue.is_empty() {
            return Err("queue name cannot be empty".to_string());
        }
        if self.prefetch == 0 {
            return Err("prefetch must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Event consumer: connects, declares the durable queue, and feeds
/// deliveries through the handler with ack/nack semantics.
pub struct EventConsumer {
    config: ConsumerConfig,
    handler: Arc<EventHandler>,
    shutdown_state: Arc<ShutdownState>,
}

impl EventConsumer {
    /// Create a consumer.
    pub fn new(
        config: ConsumerConfig,
        handler: Arc<EventHandler>,
        shutdown_state: Arc<ShutdownState>,
    ) -> ConsumerResult<Self> {
        config
            .validate()
            .map_err(ConsumerError::Connection)?;
        Ok(Self {
            config,
            handler,
            shutdown_state,
        })
    }

    /// Run until shutdown, reconnecting on connection loss.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ConsumerResult<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let channel = match self.connect().await {
                Ok(channel) => channel,
                Err(e) => {
                    error!(error = %e, "broker connection failed, will retry");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };

            if let Err(e) = self.consume(&channel, &mut shutdown).await {
                if *shutdown.borrow() {
                    break;
                }
                warn!(error = %e, "consume loop ended, reconnecting");
            } else {
                break;
            }
        }

        info!("event consumer stopped");
        Ok(())
    }

    async fn connect(&self) -> ConsumerResult<Channel> {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(500), Duration::from_secs(10));
        let executor = RetryExecutor::new(policy);

        let url = self.config.url.clone();
        let connected = executor
            .execute(|| {
                let url = url.clone();
                async move { Connection::connect(&url, ConnectionProperties::default()).await }
            })
            .await;

        let connection = match connected {
            RetryResult::Success { value, .. } => value,
            RetryResult::Failed { error, .. } => {
                return Err(ConsumerError::Connection(format!(
                    "failed to connect to broker: {error}"
                )))
            }
        };

        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;
        channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.config.queue, "connected to broker");
        Ok(channel)
    }

    async fn consume(
        &self,
        channel: &Channel,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConsumerResult<()> {
        let mut consumer = channel
            .basic_consume(
                &self.config.queue,
                "trigger-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.config.queue, "starting message consumption");

        loop {
            tokio::select! {
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => self.process_delivery(delivery).await,
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(ConsumerError::Connection(
                                "delivery stream closed".to_string(),
                            ))
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("consumer received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    async fn process_delivery(&self, delivery: Delivery) {
        self.shutdown_state.add_inflight();

        let event = match Event::from_json(&delivery.data) {
            Ok(event) => event,
            Err(e) => {
                // Malformed payloads can never succeed; ack and drop.
                warn!(error = %e, "malformed event payload, dropping");
                metrics::counter!("trigger_events_malformed").increment(1);
                ack(&delivery).await;
                self.shutdown_state.remove_inflight();
                return;
            }
        };

        let outcome = tokio::time::timeout(
            self.config.processing_timeout,
            self.handler.handle(&event),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(event_id = %event.event_id, "event acknowledged");
                ack(&delivery).await;
            }
            Ok(Err(e)) => {
                // Systemic failure (store unreachable): redeliver.
                error!(event_id = %event.event_id, error = %e, "handler failed, nacking for redelivery");
                nack_requeue(&delivery).await;
            }
            Err(_) => {
                error!(event_id = %event.event_id, "processing deadline exceeded, nacking for redelivery");
                nack_requeue(&delivery).await;
            }
        }

        self.shutdown_state.remove_inflight();
    }
}

async fn ack(delivery: &Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(error = %e, "failed to ack delivery");
    }
}

async fn nack_requeue(delivery: &Delivery) {
    let options = BasicNackOptions {
        requeue: true,
        ..Default::default()
    };
    if let Err(e) = delivery.nack(options).await {
        error!(error = %e, "failed to nack delivery");
    }
}
