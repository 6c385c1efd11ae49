// RabbitMQ consumer for redemption requests
//
// Channel shape: the broker consumer forwards deliveries into an in-process
// channel read by a fixed pool of workers. Every attempt, successful or
// not, is answered with a confirmation on the reply queue.

use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::RabbitConfig;
use crate::points::error::{PointsError, PointsResult};
use crate::points::models::{RedeemConfirmation, RedeemMessage};
use crate::points::service::PointsService;

pub struct RedeemConsumer {
    channel: Channel,
    consumer: Consumer,
    confirm_queue: String,
    service: Arc<PointsService>,
    workers: usize,
}

impl RedeemConsumer {
    pub async fn connect(
        config: &RabbitConfig,
        service: Arc<PointsService>,
        workers: usize,
    ) -> PointsResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                &config.redeem_queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(
                &config.confirm_queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let consumer = channel
            .basic_consume(
                &config.redeem_queue,
                "points-redeems",
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(Self {
            channel,
            consumer,
            confirm_queue: config.confirm_queue.clone(),
            service,
            workers: workers.max(1),
        })
    }

    /// Feed deliveries to the worker pool until cancellation or channel
    /// closure, then wait for the workers to finish.
    pub async fn run(&self, cancel: CancellationToken) {
        let (sender, receiver) = mpsc::channel::<Vec<u8>>(self.workers);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let receiver = receiver.clone();
            let service = self.service.clone();
            let channel = self.channel.clone();
            let confirm_queue = self.confirm_queue.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let body = tokio::select! {
                        _ = cancel.cancelled() => break,
                        body = async { receiver.lock().await.recv().await } => match body {
                            Some(body) => body,
                            None => break,
                        },
                    };
                    process_redeem(&service, &channel, &confirm_queue, &body).await;
                }
                tracing::debug!(worker, "redeem worker stopped");
            }));
        }

        let mut deliveries = self.consumer.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = deliveries.next() => match delivery {
                    Some(Ok(delivery)) => {
                        if sender.send(delivery.data).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => tracing::error!(error = %err, "rabbitmq read error"),
                    None => break,
                }
            }
        }

        drop(sender);
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("redeem consumer stopped");
    }
}

async fn process_redeem(
    service: &PointsService,
    channel: &Channel,
    confirm_queue: &str,
    body: &[u8],
) {
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = %err, "redeem payload is not utf-8");
            return;
        }
    };

    // A message without a usable redeem id cannot be confirmed either way.
    let message = match RedeemMessage::parse(text) {
        Ok(message) => message,
        Err(err) => {
            tracing::error!(error = %err, "redeem message rejected");
            return;
        }
    };

    let success = match service
        .redeem(&message.user_id, message.points, &message.redeem_id)
        .await
    {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(redeem = %message.redeem_id, error = %err, "redeem failed");
            false
        }
    };

    if let Err(err) =
        publish_confirmation(channel, confirm_queue, &message.redeem_id, success).await
    {
        tracing::error!(redeem = %message.redeem_id, error = %err, "confirmation publish failed");
    }
}

async fn publish_confirmation(
    channel: &Channel,
    queue: &str,
    redeem_id: &str,
    success: bool,
) -> PointsResult<()> {
    let confirmation = RedeemConfirmation {
        redeem_id: redeem_id.to_string(),
        success,
    };
    let payload =
        serde_json::to_vec(&confirmation).map_err(|err| PointsError::Broker(err.to_string()))?;

    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default().with_content_type("application/json".into()),
        )
        .await?;
    Ok(())
}
