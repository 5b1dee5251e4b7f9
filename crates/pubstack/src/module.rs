// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Routing of producer events to per-feature channels, and runtime reconfiguration.
//!
//! The active channels and the configuration they were built from live in one
//! immutable [`Snapshot`] published through an [`ArcSwap`]. A refresh builds a
//! complete new snapshot (one fresh channel per enabled feature) and swaps it
//! in, so a concurrent [`PubstackModule::log_event`] sees either the whole old
//! set or the whole new one, and reads never take a lock.
//!
//! Replaced channels are not drained explicitly: once the last handle to an
//! old channel is gone its task flushes what it holds and stops. An event
//! racing a swap can still be lost, e.g. when it is routed to an old channel
//! that already observed shutdown. Analytics delivery is best-effort, so this
//! window is accepted.

use crate::client::{
    build_client, ConfigSource, HealthProbe, HttpConfigSource, HttpHealthProbe,
};
use crate::config::{ModuleOptions, ModuleSettings, RemoteConfig};
use crate::errors::Creation;
use crate::event_channel::{EventChannel, EventChannelHandle};
use crate::events::{
    jsonify, AmpObject, AnalyticsEvent, AuctionObject, CookieSyncObject, SetUidObject,
    VideoObject,
};
use crate::feature::Feature;
use crate::observer::{Failure, FailureObserver, LoggingObserver};
use crate::sender::{HttpSenderFactory, SenderFactory};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Channels and the configuration they were built from, published together.
#[derive(Debug, Default)]
struct Snapshot {
    config: Arc<RemoteConfig>,
    channels: HashMap<Feature, EventChannelHandle>,
}

/// Result of one configuration poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A document was received and a new channel set installed, even when the
    /// document is identical to the previous one.
    Reconfigured,
    /// The fetch failed; the previous configuration stays active.
    Failed,
    /// The module was shut down; nothing was fetched.
    Stopped,
}

/// External collaborators of the module, replaceable for embedding and tests.
pub struct Collaborators {
    pub source: Arc<dyn ConfigSource>,
    pub probe: Arc<dyn HealthProbe>,
    pub senders: Arc<dyn SenderFactory>,
    pub observer: Arc<dyn FailureObserver>,
}

struct Inner {
    settings: ModuleSettings,
    state: ArcSwap<Snapshot>,
    source: Arc<dyn ConfigSource>,
    senders: Arc<dyn SenderFactory>,
    observer: Arc<dyn FailureObserver>,
    // Serializes refreshes so two fetched documents are never installed out of order.
    refresh_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl Inner {
    fn channel(&self, feature: Feature) -> Option<EventChannelHandle> {
        self.state.load().channels.get(&feature).cloned()
    }

    async fn refresh(&self) -> RefreshOutcome {
        let _guard = self.refresh_lock.lock().await;
        if self.cancel.is_cancelled() {
            debug!("PUBSTACK | module stopped, skipping configuration refresh");
            return RefreshOutcome::Stopped;
        }

        let config = match self.source.fetch().await {
            Ok(config) => config,
            Err(e) => {
                self.observer.report(&Failure::Refresh {
                    message: e.to_string(),
                });
                return RefreshOutcome::Failed;
            }
        };

        self.install(config);
        RefreshOutcome::Reconfigured
    }

    /// Builds one new channel per enabled feature and publishes them with `config`.
    ///
    /// Channels are always recreated, including for features that stay enabled.
    fn install(&self, config: RemoteConfig) {
        if config.scope_id != self.settings.scope_id {
            warn!(
                "PUBSTACK | configuration scope '{}' differs from module scope '{}'",
                config.scope_id, self.settings.scope_id
            );
        }

        let endpoint = config.intake_endpoint(&self.settings.endpoint);
        let thresholds = config.thresholds(self.settings.thresholds);
        let channels: HashMap<Feature, EventChannelHandle> = config
            .enabled_features()
            .into_iter()
            .map(|feature| {
                let handle = EventChannel::spawn(
                    feature,
                    thresholds,
                    self.senders.sender_for(&endpoint, feature),
                    Arc::clone(&self.observer),
                    self.settings.queue_capacity,
                );
                (feature, handle)
            })
            .collect();

        let mut enabled: Vec<&str> = channels.keys().map(Feature::as_str).collect();
        enabled.sort_unstable();
        info!(
            "PUBSTACK | installing configuration: endpoint={endpoint} features={enabled:?} thresholds={thresholds:?}"
        );

        self.state.store(Arc::new(Snapshot {
            config: Arc::new(config),
            channels,
        }));
    }

    async fn run_config_poller(self: Arc<Self>) {
        let cancel = self.cancel.clone();
        let delay = self.settings.refresh_delay;
        let mut ticker = interval_at(Instant::now() + delay, delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("PUBSTACK | configuration poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.refresh().await;
                    trace!("PUBSTACK | configuration poll finished: {outcome:?}");
                }
            }
        }
    }
}

/// Analytics module: routes events to the channel of their feature.
///
/// Dropping the module stops the configuration poller; channels flush what
/// they hold once the last reference to them is gone.
pub struct PubstackModule {
    inner: Arc<Inner>,
}

impl PubstackModule {
    /// Builds the module with HTTP collaborators and logging-only failure reporting.
    pub async fn new(options: &ModuleOptions) -> Result<Self, Creation> {
        let settings = options.parse()?;
        info!(
            "PUBSTACK | initializing module with scope: {} endpoint: {}",
            settings.scope_id, settings.endpoint
        );

        let client = build_client().map_err(|e| Creation::Client(e.to_string()))?;
        let collaborators = Collaborators {
            source: Arc::new(HttpConfigSource::new(
                client.clone(),
                &settings.endpoint,
                &settings.scope_id,
            )),
            probe: Arc::new(HttpHealthProbe::new(client.clone(), &settings.endpoint)),
            senders: Arc::new(HttpSenderFactory::new(client)),
            observer: Arc::new(LoggingObserver),
        };
        Self::with_collaborators(settings, collaborators).await
    }

    /// Probes the backend, installs the initial configuration and starts the poller.
    ///
    /// Nothing is left running when an error is returned.
    pub async fn with_collaborators(
        settings: ModuleSettings,
        collaborators: Collaborators,
    ) -> Result<Self, Creation> {
        let Collaborators {
            source,
            probe,
            senders,
            observer,
        } = collaborators;

        probe.probe().await.map_err(Creation::Unreachable)?;
        let config = source.fetch().await.map_err(Creation::Bootstrap)?;

        let inner = Arc::new(Inner {
            settings,
            state: ArcSwap::from_pointee(Snapshot::default()),
            source,
            senders,
            observer,
            refresh_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        });
        inner.install(config);

        tokio::spawn(Arc::clone(&inner).run_config_poller());

        Ok(Self { inner })
    }

    /// Serializes `event` and queues it on the channel of `feature`.
    ///
    /// Dropped silently when the feature is not enabled. Never reports an error
    /// to the caller.
    pub async fn log_event<T: Serialize + ?Sized>(&self, feature: Feature, event: &T) {
        let Some(channel) = self.inner.channel(feature) else {
            trace!("PUBSTACK | [{feature}] disabled, dropping event");
            return;
        };

        match jsonify(&self.inner.settings.scope_id, event) {
            Ok(line) => channel.push(line).await,
            Err(e) => self.inner.observer.report(&Failure::Serialization {
                feature,
                message: e.to_string(),
            }),
        }
    }

    pub async fn log<E: AnalyticsEvent>(&self, event: &E) {
        self.log_event(E::FEATURE, event).await;
    }

    pub async fn log_auction_object(&self, event: &AuctionObject) {
        self.log(event).await;
    }

    pub async fn log_video_object(&self, event: &VideoObject) {
        self.log(event).await;
    }

    pub async fn log_amp_object(&self, event: &AmpObject) {
        self.log(event).await;
    }

    pub async fn log_cookie_sync_object(&self, event: &CookieSyncObject) {
        self.log(event).await;
    }

    pub async fn log_set_uid_object(&self, event: &SetUidObject) {
        self.log(event).await;
    }

    /// Polls the configuration source once, outside the regular schedule.
    ///
    /// Returns [`RefreshOutcome::Stopped`] without fetching once the module was shut down.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    /// Features that currently have a channel, in declaration order.
    pub fn enabled_features(&self) -> Vec<Feature> {
        let snapshot = self.inner.state.load();
        let mut features: Vec<Feature> = snapshot.channels.keys().copied().collect();
        features.sort_unstable();
        features
    }

    pub fn current_config(&self) -> Arc<RemoteConfig> {
        Arc::clone(&self.inner.state.load().config)
    }

    /// Flushes every active channel and waits for the resulting deliveries.
    pub async fn flush(&self) {
        let snapshot = self.inner.state.load_full();
        for (feature, channel) in &snapshot.channels {
            if let Err(e) = channel.flush().await {
                debug!("PUBSTACK | [{feature}] flush failed: {e}");
            }
        }
    }

    /// Stops the poller, then flushes and stops every channel.
    ///
    /// Events logged afterwards are dropped and later refreshes do nothing.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let _guard = self.inner.refresh_lock.lock().await;
        let snapshot = self.inner.state.swap(Arc::new(Snapshot::default()));
        for (feature, channel) in &snapshot.channels {
            if let Err(e) = channel.flush().await {
                debug!("PUBSTACK | [{feature}] flush failed: {e}");
            }
            if let Err(e) = channel.shutdown().await {
                debug!("PUBSTACK | [{feature}] shutdown failed: {e}");
            }
        }
        info!("PUBSTACK | module stopped");
    }
}

impl Drop for PubstackModule {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
