// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-feature event accumulation and flushing.
//!
//! Each [`EventChannel`] owns one [`BatchBuffer`] and is driven by a single
//! task, so accumulating and flushing never race and the buffer needs no lock.
//! Producers talk to it through a cheap, cloneable [`EventChannelHandle`].
//!
//! A batch is flushed when, right after an event is accumulated, either the
//! event count reaches `max_events` or the encoded size reaches `max_bytes`.
//! Independently a timer fires every `max_age` (restarted after every flush)
//! and flushes whatever is pending; a tick with nothing pending is a no-op.
//!
//! Finished batches are handed to a per-channel delivery task that calls the
//! [`Sender`] one batch at a time, so events arriving during a slow delivery
//! already land in the next batch and batches reach the intake in flush order.
//! Delivery is at-most-once: failures are reported and the batch is discarded.

use crate::compressor::{BatchBuffer, GzipBuffer};
use crate::feature::Feature;
use crate::observer::{Failure, FailureObserver};
use crate::sender::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Queue depth used when the configuration does not provide one.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Flush triggers of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferThresholds {
    /// Flush once this many events are pending.
    pub max_events: u64,
    /// Flush once the encoded batch reaches this many bytes.
    pub max_bytes: u64,
    /// Flush pending events at least this often.
    pub max_age: Duration,
}

impl Default for BufferThresholds {
    fn default() -> Self {
        Self {
            max_events: 100,
            max_bytes: 2_000_000,
            max_age: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug)]
pub enum ChannelCommand {
    Event(Vec<u8>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Producer side of an [`EventChannel`].
#[derive(Debug, Clone)]
pub struct EventChannelHandle {
    feature: Feature,
    tx: mpsc::Sender<ChannelCommand>,
}

impl EventChannelHandle {
    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// Enqueues a serialized event.
    ///
    /// Waits only while the queue is full. An event pushed after the channel
    /// stopped is dropped.
    pub async fn push(&self, event: Vec<u8>) {
        if self.tx.send(ChannelCommand::Event(event)).await.is_err() {
            debug!(
                "PUBSTACK | [{}] channel stopped, dropping event",
                self.feature
            );
        }
    }

    /// Flushes pending events and waits until every in-flight batch was delivered or dropped.
    pub async fn flush(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ChannelCommand::Flush(response_tx))
            .await
            .map_err(|e| format!("Failed to send flush command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    /// Stops the channel after flushing what is pending.
    pub async fn shutdown(&self) -> Result<(), mpsc::error::SendError<ChannelCommand>> {
        self.tx.send(ChannelCommand::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both handles feed the same channel task.
    pub fn same_channel(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ChannelMetrics {
    event_count: u64,
    buffer_size: u64,
    event_errors: u64,
}

/// Work item for the delivery task of a channel.
enum Delivery {
    Batch(Vec<u8>),
    /// Answered once every batch queued before it was delivered or dropped.
    Barrier(oneshot::Sender<()>),
}

/// Consumer side: owns the buffer and runs the flush policy.
pub struct EventChannel {
    feature: Feature,
    thresholds: BufferThresholds,
    buffer: Box<dyn BatchBuffer>,
    metrics: ChannelMetrics,
    sender: Arc<dyn Sender>,
    observer: Arc<dyn FailureObserver>,
    rx: mpsc::Receiver<ChannelCommand>,
}

impl EventChannel {
    pub fn new(
        feature: Feature,
        thresholds: BufferThresholds,
        sender: Arc<dyn Sender>,
        observer: Arc<dyn FailureObserver>,
        queue_capacity: usize,
    ) -> (Self, EventChannelHandle) {
        Self::with_buffer(
            feature,
            thresholds,
            Box::new(GzipBuffer::default()),
            sender,
            observer,
            queue_capacity,
        )
    }

    pub fn with_buffer(
        feature: Feature,
        thresholds: BufferThresholds,
        buffer: Box<dyn BatchBuffer>,
        sender: Arc<dyn Sender>,
        observer: Arc<dyn FailureObserver>,
        queue_capacity: usize,
    ) -> (Self, EventChannelHandle) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let channel = Self {
            feature,
            thresholds,
            buffer,
            metrics: ChannelMetrics::default(),
            sender,
            observer,
            rx,
        };
        (channel, EventChannelHandle { feature, tx })
    }

    /// Creates a channel and starts its processing task.
    pub fn spawn(
        feature: Feature,
        thresholds: BufferThresholds,
        sender: Arc<dyn Sender>,
        observer: Arc<dyn FailureObserver>,
        queue_capacity: usize,
    ) -> EventChannelHandle {
        let (channel, handle) = Self::new(feature, thresholds, sender, observer, queue_capacity);
        tokio::spawn(channel.run());
        handle
    }

    /// Processes commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("PUBSTACK | [{}] event channel started", self.feature);

        let (deliveries, delivery_rx) = mpsc::unbounded_channel();
        let delivery_task = tokio::spawn(deliver(
            self.feature,
            Arc::clone(&self.sender),
            Arc::clone(&self.observer),
            delivery_rx,
        ));

        // `interval_at` panics on a zero period.
        let max_age = self.thresholds.max_age.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + max_age, max_age);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(ChannelCommand::Event(event)) => {
                        self.accumulate(&event);
                        if self.threshold_reached() {
                            self.flush(&deliveries);
                            ticker.reset();
                        }
                    }
                    Some(ChannelCommand::Flush(response_tx)) => {
                        // The barrier answers after this flush and all earlier ones were shipped.
                        if self.metrics.event_count > 0 {
                            self.flush(&deliveries);
                            ticker.reset();
                        }
                        if let Err(SendError(Delivery::Barrier(response_tx))) =
                            deliveries.send(Delivery::Barrier(response_tx))
                        {
                            let _ = response_tx.send(());
                        }
                    }
                    Some(ChannelCommand::Shutdown) | None => break,
                },
                _ = ticker.tick() => {
                    if self.metrics.event_count > 0 {
                        self.flush(&deliveries);
                        ticker.reset();
                    } else {
                        trace!("PUBSTACK | [{}] nothing to flush", self.feature);
                    }
                }
            }
        }

        if self.metrics.event_count > 0 {
            self.flush(&deliveries);
        }
        drop(deliveries);
        if let Err(e) = delivery_task.await {
            debug!("PUBSTACK | [{}] delivery task failed: {e}", self.feature);
        }

        debug!("PUBSTACK | [{}] event channel stopped", self.feature);
    }

    fn accumulate(&mut self, event: &[u8]) {
        if let Err(e) = self.buffer.write(event) {
            self.metrics.event_errors += 1;
            self.observer.report(&Failure::Compression {
                feature: self.feature,
                message: e.to_string(),
            });
            return;
        }
        self.metrics.event_count += 1;
        self.metrics.buffer_size = self.buffer.len() as u64;
    }

    fn threshold_reached(&self) -> bool {
        self.metrics.event_count >= self.thresholds.max_events
            || self.metrics.buffer_size >= self.thresholds.max_bytes
    }

    /// Extracts the batch and resets buffer and counters before queueing it for delivery.
    fn flush(&mut self, deliveries: &mpsc::UnboundedSender<Delivery>) {
        let metrics = std::mem::take(&mut self.metrics);
        debug!(
            "PUBSTACK | [{}] flushing events={} size={} errors={}",
            self.feature, metrics.event_count, metrics.buffer_size, metrics.event_errors
        );

        let payload = match self.buffer.finish() {
            Ok(payload) => payload,
            Err(e) => {
                self.observer.report(&Failure::Compression {
                    feature: self.feature,
                    message: e.to_string(),
                });
                return;
            }
        };

        if deliveries.send(Delivery::Batch(payload)).is_err() {
            self.observer.report(&Failure::Delivery {
                feature: self.feature,
                message: "delivery task stopped".to_string(),
            });
        }
    }
}

/// Ships batches one at a time, in flush order.
async fn deliver(
    feature: Feature,
    sender: Arc<dyn Sender>,
    observer: Arc<dyn FailureObserver>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Batch(payload) => {
                if let Err(e) = sender.send(payload).await {
                    observer.report(&Failure::Delivery {
                        feature,
                        message: e.to_string(),
                    });
                }
            }
            Delivery::Barrier(response_tx) => {
                if response_tx.send(()).is_err() {
                    debug!("PUBSTACK | [{feature}] flush requester went away");
                }
            }
        }
    }
}
