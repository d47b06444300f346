//! AMQP intake: one durable queue of submission messages, consumed with
//! manual acknowledgements. Every delivery is acknowledged exactly once;
//! only a shutdown before the terminal commit leaves a message on the
//! queue for redelivery.

use crate::config::AmqpConfig;
use crate::dump::MessageDump;
use crate::error::{Context as _, Result};
use crate::submission::context::{headers, CertificateInfo, SubmissionMessage};
use crate::submission::processor::{ProcessOutcome, SubmissionProcessor};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_executor_trait::Tokio as TokioExecutor;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One message taken off the submission queue.
#[derive(Debug, Clone)]
pub struct SubmissionDelivery {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub headers: HashMap<String, String>,
}

#[async_trait]
pub trait QueueConsumer: Send {
    async fn next_delivery(&mut self) -> Result<Option<SubmissionDelivery>>;

    async fn ack(&mut self, delivery_tag: u64) -> Result<()>;
}

pub struct LapinSubmissionConsumer {
    config: AmqpConfig,
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl LapinSubmissionConsumer {
    pub async fn connect(config: AmqpConfig) -> Result<Self> {
        let (connection, channel, consumer) = Self::open(&config).await?;
        Ok(Self {
            config,
            connection,
            channel,
            consumer,
        })
    }

    async fn reconnect(&mut self) -> Result<()> {
        let (connection, channel, consumer) = Self::open(&self.config).await?;
        self.connection = connection;
        self.channel = channel;
        self.consumer = consumer;
        Ok(())
    }

    async fn open(config: &AmqpConfig) -> Result<(Connection, Channel, Consumer)> {
        let properties = ConnectionProperties::default().with_executor(TokioExecutor::current());
        let connection = Connection::connect(&config.url, properties)
            .await
            .context("failed to connect to the message broker")?;

        let channel = connection
            .create_channel()
            .await
            .context("failed to open channel")?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("failed to declare exchange `{}`", config.exchange))?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("failed to declare queue `{}`", config.queue))?;

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                &config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("failed to bind queue `{}`", config.queue))?;

        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await
            .context("failed to configure prefetch")?;

        let consumer_tag = format!("reportsink-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &config.queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("failed to start consumer on queue `{}`", config.queue))?;

        Ok((connection, channel, consumer))
    }

    fn convert_delivery(delivery: lapin::message::Delivery) -> SubmissionDelivery {
        let headers = delivery
            .properties
            .headers()
            .as_ref()
            .map(string_headers)
            .unwrap_or_default();

        SubmissionDelivery {
            body: delivery.data,
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            headers,
        }
    }
}

#[async_trait]
impl QueueConsumer for LapinSubmissionConsumer {
    async fn next_delivery(&mut self) -> Result<Option<SubmissionDelivery>> {
        loop {
            match self.consumer.next().await {
                Some(Ok(delivery)) => return Ok(Some(Self::convert_delivery(delivery))),
                Some(Err(err)) => {
                    tracing::warn!(
                        target: "reportsink::consumer",
                        event = "consumer_error",
                        error = %err,
                    );
                    self.reconnect().await?;
                }
                None => {
                    tracing::warn!(
                        target: "reportsink::consumer",
                        event = "consumer_stream_ended",
                    );
                    self.reconnect().await?;
                }
            }
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .context("ack failed")
    }
}

fn string_headers(table: &FieldTable) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (key, value) in table {
        let text = match value {
            AMQPValue::LongString(text) => String::from_utf8_lossy(text.as_bytes()).into_owned(),
            AMQPValue::ShortString(text) => text.to_string(),
            _ => continue,
        };
        map.insert(key.to_string(), text);
    }
    map
}

/// Drives one consumer until shutdown, handing each delivery to the
/// processor. Unreadable messages are logged and acknowledged; replaying
/// them can never succeed.
pub struct SubmissionListener {
    processor: Arc<SubmissionProcessor>,
    dump: MessageDump,
}

impl SubmissionListener {
    pub fn new(processor: Arc<SubmissionProcessor>, dump: MessageDump) -> Self {
        Self { processor, dump }
    }

    pub async fn run<C: QueueConsumer>(&self, mut consumer: C, shutdown: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = consumer.next_delivery() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    self.handle_delivery(&mut consumer, delivery, &shutdown).await;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(
                        target: "reportsink::consumer",
                        event = "consumer_receive_failed",
                        error = %err,
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                    }
                }
            }
        }

        tracing::info!(
            target: "reportsink::consumer",
            event = "consumer_stopped",
        );
    }

    async fn handle_delivery<C: QueueConsumer>(
        &self,
        consumer: &mut C,
        delivery: SubmissionDelivery,
        shutdown: &CancellationToken,
    ) {
        let token_header = delivery.headers.get(headers::TOKEN).cloned();

        let dump_key = token_header
            .clone()
            .unwrap_or_else(|| format!("tag-{}", delivery.delivery_tag));
        self.dump.write(&dump_key, &delivery.body).await;

        tracing::info!(
            target: "reportsink::consumer",
            event = "delivery_received",
            token = token_header.as_deref().unwrap_or("(missing)"),
            delivery_tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
        );

        let outcome = match parse_delivery(&delivery) {
            Ok((token, message, certificate)) => {
                self.processor
                    .process(token, message, certificate, shutdown)
                    .await
            }
            Err(err) => {
                tracing::error!(
                    target: "reportsink::consumer",
                    event = "message_unreadable",
                    delivery_tag = delivery.delivery_tag,
                    error = %err,
                );
                ProcessOutcome::Discarded
            }
        };

        if outcome == ProcessOutcome::Cancelled {
            // The status row was never claimed; leaving the delivery
            // unacked puts it back on the queue once the connection
            // closes.
            return;
        }

        if let Err(err) = consumer.ack(delivery.delivery_tag).await {
            tracing::error!(
                target: "reportsink::consumer",
                event = "ack_failed",
                delivery_tag = delivery.delivery_tag,
                error = %err,
            );
        }
    }
}

fn parse_delivery(
    delivery: &SubmissionDelivery,
) -> Result<(Uuid, SubmissionMessage, CertificateInfo)> {
    let token_text = delivery
        .headers
        .get(headers::TOKEN)
        .ok_or_else(|| crate::err!("delivery carries no {} header", headers::TOKEN))?;
    let token = Uuid::parse_str(token_text)?;

    let message: SubmissionMessage =
        serde_json::from_slice(&delivery.body).context("submission body is not valid JSON")?;

    let certificate = CertificateInfo {
        subject: delivery
            .headers
            .get(headers::SUBJECT)
            .cloned()
            .unwrap_or_default(),
        issuer: delivery.headers.get(headers::ISSUER).cloned(),
        thumbprint: delivery.headers.get(headers::THUMBPRINT).cloned(),
    };

    Ok((token, message, certificate))
}
