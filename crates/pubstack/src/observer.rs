// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Failure reporting for the fire-and-forget paths.
//!
//! Nothing on the event path returns an error to the producer. Every dropped
//! event or batch is reported here instead so it can be logged and counted.

use crate::feature::Feature;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// A failure that cost one event, one batch or one configuration refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// An event could not be written into the compression stream.
    Compression { feature: Feature, message: String },
    /// An event could not be converted to its wire form.
    Serialization { feature: Feature, message: String },
    /// A batch was rejected by the intake or never reached it.
    Delivery { feature: Feature, message: String },
    /// A periodic configuration fetch failed; the previous configuration stays active.
    Refresh { message: String },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compression { feature, message } => {
                write!(f, "[{feature}] failed to compress event: {message}")
            }
            Self::Serialization { feature, message } => {
                write!(f, "[{feature}] failed to serialize event: {message}")
            }
            Self::Delivery { feature, message } => {
                write!(f, "[{feature}] failed to deliver batch: {message}")
            }
            Self::Refresh { message } => {
                write!(f, "failed to refresh configuration: {message}")
            }
        }
    }
}

/// Sink for failures on the event, batch and refresh paths.
pub trait FailureObserver: Send + Sync {
    fn report(&self, failure: &Failure);
}

/// Logs every failure through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl FailureObserver for LoggingObserver {
    fn report(&self, failure: &Failure) {
        match failure {
            Failure::Delivery { .. } => error!("PUBSTACK | {failure}"),
            _ => warn!("PUBSTACK | {failure}"),
        }
    }
}

/// Failure counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct FailureCounters {
    compression: AtomicU64,
    serialization: AtomicU64,
    delivery: AtomicU64,
    refresh: AtomicU64,
}

impl FailureCounters {
    pub fn snapshot(&self) -> FailureSnapshot {
        FailureSnapshot {
            compression: self.compression.load(Ordering::Relaxed),
            serialization: self.serialization.load(Ordering::Relaxed),
            delivery: self.delivery.load(Ordering::Relaxed),
            refresh: self.refresh.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`FailureCounters`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FailureSnapshot {
    pub compression: u64,
    pub serialization: u64,
    pub delivery: u64,
    pub refresh: u64,
}

impl fmt::Display for FailureSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compression={}, serialization={}, delivery={}, refresh={}",
            self.compression, self.serialization, self.delivery, self.refresh
        )
    }
}

/// Counts failures by kind and logs them like [`LoggingObserver`].
#[derive(Debug, Clone, Default)]
pub struct CountingObserver {
    counters: Arc<FailureCounters>,
}

impl CountingObserver {
    pub fn new(counters: Arc<FailureCounters>) -> Self {
        Self { counters }
    }

    pub fn counters(&self) -> Arc<FailureCounters> {
        self.counters.clone()
    }

    pub fn snapshot(&self) -> FailureSnapshot {
        self.counters.snapshot()
    }
}

impl FailureObserver for CountingObserver {
    fn report(&self, failure: &Failure) {
        let counter = match failure {
            Failure::Compression { .. } => &self.counters.compression,
            Failure::Serialization { .. } => &self.counters.serialization,
            Failure::Delivery { .. } => &self.counters.delivery,
            Failure::Refresh { .. } => &self.counters.refresh,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        LoggingObserver.report(failure);
    }
}
