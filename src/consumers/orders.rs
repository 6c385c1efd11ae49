// Kafka topic consumers for orders and returns
//
// Topic-pull shape: one reader pulls messages one by one and dispatches
// each to a spawned task gated by a counting semaphore, so at most
// `workers` messages are in flight at once.

use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::KafkaConfig;
use crate::points::error::PointsResult;
use crate::points::service::PointsService;

/// Which ledger operation a topic feeds.
#[derive(Debug, Clone, Copy)]
pub enum StreamKind {
    Orders,
    Returns,
}

pub struct TopicConsumer {
    consumer: StreamConsumer,
    service: Arc<PointsService>,
    permits: Arc<Semaphore>,
    workers: u32,
    kind: StreamKind,
}

impl TopicConsumer {
    pub fn new(
        config: &KafkaConfig,
        service: Arc<PointsService>,
        kind: StreamKind,
        workers: usize,
    ) -> PointsResult<Self> {
        let topic = match kind {
            StreamKind::Orders => &config.orders_topic,
            StreamKind::Returns => &config.returns_topic,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[topic])?;
        tracing::info!(topic = %topic, "kafka consumer subscribed");

        let workers = workers.max(1);
        Ok(Self {
            consumer,
            service,
            permits: Arc::new(Semaphore::new(workers)),
            workers: workers as u32,
            kind,
        })
    }

    /// Pull and dispatch until cancellation, then drain in-flight handlers.
    /// Per-message failures are logged; redelivery is the broker's job.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut stream = self.consumer.stream();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        let Some(payload) = message.payload() else { continue };
                        let order = match std::str::from_utf8(payload) {
                            Ok(text) => text.to_owned(),
                            Err(err) => {
                                tracing::error!(error = %err, "message payload is not utf-8");
                                continue;
                            }
                        };

                        let permit = match self.permits.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        let service = self.service.clone();
                        let kind = self.kind;
                        tokio::spawn(async move {
                            let _permit = permit;
                            let result = match kind {
                                StreamKind::Orders => service.order_calculate(&order).await,
                                StreamKind::Returns => service.return_process(&order).await,
                            };
                            if let Err(err) = result {
                                tracing::error!(error = %err, "message processing failed");
                            }
                        });
                    }
                    Some(Err(err)) => tracing::error!(error = %err, "kafka read error"),
                    None => break,
                }
            }
        }

        // every permit back means every in-flight handler finished
        let _ = self.permits.acquire_many(self.workers).await;
        tracing::info!("topic consumer stopped");
    }
}
