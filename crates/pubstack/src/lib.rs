// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered forwarding of analytics events to a remote intake.
//!
//! Events are grouped per [`Feature`], accumulated into a gzip stream by one
//! [`event_channel`] task per enabled feature and shipped in batches by a
//! [`sender::Sender`]. The [`module::PubstackModule`] routes producer calls to
//! the right channel and periodically swaps the whole channel set when the
//! remote configuration changes.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod compressor;
pub mod config;
pub mod errors;
pub mod event_channel;
pub mod events;
pub mod feature;
pub mod module;
pub mod observer;
pub mod sender;
pub mod util;

pub use config::{ModuleOptions, ModuleSettings, RemoteConfig};
pub use event_channel::{BufferThresholds, EventChannel, EventChannelHandle};
pub use events::{
    AmpObject, AnalyticsEvent, AuctionObject, CookieSyncObject, SetUidObject, VideoObject,
};
pub use feature::Feature;
pub use module::{Collaborators, PubstackModule, RefreshOutcome};
pub use observer::{CountingObserver, Failure, FailureObserver, LoggingObserver};
