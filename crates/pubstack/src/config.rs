// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Construction options and the remotely fetched configuration document.

use crate::errors::ConfigError;
use crate::event_channel::{BufferThresholds, DEFAULT_QUEUE_CAPACITY};
use crate::feature::Feature;
use crate::util::{parse_byte_size, parse_duration};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;
use tracing::warn;

const ENV_SCOPE_ID: &str = "PUBSTACK_SCOPE_ID";
const ENV_ENDPOINT: &str = "PUBSTACK_ENDPOINT";
const ENV_REFRESH_DELAY: &str = "PUBSTACK_CONFIG_REFRESH_DELAY";
const ENV_BUFFER_EVENTS: &str = "PUBSTACK_BUFFER_EVENTS";
const ENV_BUFFER_SIZE: &str = "PUBSTACK_BUFFER_SIZE";
const ENV_BUFFER_TIMEOUT: &str = "PUBSTACK_BUFFER_TIMEOUT";
const ENV_QUEUE_CAPACITY: &str = "PUBSTACK_QUEUE_CAPACITY";

const DEFAULT_REFRESH_DELAY: &str = "2h";
const DEFAULT_BUFFER_EVENTS: u64 = 100;
const DEFAULT_BUFFER_SIZE: &str = "2MB";
const DEFAULT_BUFFER_TIMEOUT: &str = "15m";

/// Buffering thresholds as written in the host configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferOptions {
    /// Maximum number of events per batch.
    pub events: u64,
    /// Maximum encoded batch size, e.g. `"2MB"`.
    pub size: String,
    /// Maximum time between flushes, e.g. `"15m"`.
    pub timeout: String,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            events: DEFAULT_BUFFER_EVENTS,
            size: DEFAULT_BUFFER_SIZE.to_string(),
            timeout: DEFAULT_BUFFER_TIMEOUT.to_string(),
        }
    }
}

/// Raw module options, validated by [`ModuleOptions::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOptions {
    /// Tenant identifier sent with configuration requests and embedded in every event.
    pub scope_id: String,
    /// Base url of the pubstack backend.
    pub endpoint: String,
    /// How often the remote configuration is polled, e.g. `"2h"`.
    pub configuration_refresh_delay: String,
    pub buffers: BufferOptions,
    /// Depth of each channel queue before producers wait.
    pub queue_capacity: usize,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            scope_id: String::new(),
            endpoint: String::new(),
            configuration_refresh_delay: DEFAULT_REFRESH_DELAY.to_string(),
            buffers: BufferOptions::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ModuleOptions {
    /// Reads options from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Reads options from key/value pairs, falling back to defaults for missing keys.
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let defaults = Self::default();
        let get = |key: &str| {
            map.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            scope_id: get(ENV_SCOPE_ID).unwrap_or(defaults.scope_id),
            endpoint: get(ENV_ENDPOINT).unwrap_or(defaults.endpoint),
            configuration_refresh_delay: get(ENV_REFRESH_DELAY)
                .unwrap_or(defaults.configuration_refresh_delay),
            buffers: BufferOptions {
                // An unparsable count is kept as 0 so `parse` rejects it instead of hiding it.
                events: get(ENV_BUFFER_EVENTS)
                    .map(|value| value.parse().unwrap_or(0))
                    .unwrap_or(defaults.buffers.events),
                size: get(ENV_BUFFER_SIZE).unwrap_or(defaults.buffers.size),
                timeout: get(ENV_BUFFER_TIMEOUT).unwrap_or(defaults.buffers.timeout),
            },
            queue_capacity: get(ENV_QUEUE_CAPACITY)
                .map(|value| value.parse().unwrap_or(0))
                .unwrap_or(defaults.queue_capacity),
        }
    }

    /// Validates every option, failing on the first malformed one.
    pub fn parse(&self) -> Result<ModuleSettings, ConfigError> {
        let scope_id = self.scope_id.trim();
        if scope_id.is_empty() {
            return Err(ConfigError::MissingScope);
        }

        let endpoint = parse_endpoint(&self.endpoint)?;

        let refresh_delay =
            parse_duration(&self.configuration_refresh_delay).ok_or_else(|| {
                ConfigError::InvalidDuration {
                    field: "configuration_refresh_delay",
                    value: self.configuration_refresh_delay.clone(),
                }
            })?;
        if refresh_delay.is_zero() {
            return Err(ConfigError::ZeroValue("configuration_refresh_delay"));
        }

        if self.buffers.events == 0 {
            return Err(ConfigError::ZeroValue("buffers.events"));
        }
        let max_bytes =
            parse_byte_size(&self.buffers.size).ok_or_else(|| ConfigError::InvalidSize {
                field: "buffers.size",
                value: self.buffers.size.clone(),
            })?;
        if max_bytes == 0 {
            return Err(ConfigError::ZeroValue("buffers.size"));
        }
        let max_age =
            parse_duration(&self.buffers.timeout).ok_or_else(|| ConfigError::InvalidDuration {
                field: "buffers.timeout",
                value: self.buffers.timeout.clone(),
            })?;
        if max_age.is_zero() {
            return Err(ConfigError::ZeroValue("buffers.timeout"));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("queue_capacity"));
        }

        Ok(ModuleSettings {
            scope_id: scope_id.to_string(),
            endpoint,
            refresh_delay,
            thresholds: BufferThresholds {
                max_events: self.buffers.events,
                max_bytes,
                max_age,
            },
            queue_capacity: self.queue_capacity,
        })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Validated module settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSettings {
    pub scope_id: String,
    pub endpoint: Url,
    pub refresh_delay: Duration,
    /// Defaults for every channel unless the remote configuration overrides them.
    pub thresholds: BufferThresholds,
    pub queue_capacity: usize,
}

/// Per-deployment buffering overrides carried by the remote configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBuffers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Configuration document returned by the bootstrap endpoint.
///
/// Never mutated once installed; a refresh replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(default)]
    pub scope_id: String,
    /// Base url batches are sent to; the module endpoint is used when empty.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffers: Option<RemoteBuffers>,
}

impl RemoteConfig {
    /// Features marked enabled, in declaration order. Unknown names are ignored.
    pub fn enabled_features(&self) -> Vec<Feature> {
        for name in self.features.keys() {
            if name.parse::<Feature>().is_err() {
                warn!("PUBSTACK | ignoring unknown feature '{name}' in configuration");
            }
        }
        Feature::ALL
            .into_iter()
            .filter(|feature| self.is_enabled(*feature))
            .collect()
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.features
            .get(feature.as_str())
            .copied()
            .unwrap_or(false)
    }

    /// Base url for intake requests.
    pub fn intake_endpoint(&self, fallback: &Url) -> Url {
        if self.endpoint.trim().is_empty() {
            return fallback.clone();
        }
        match parse_endpoint(&self.endpoint) {
            Ok(url) => url,
            Err(e) => {
                warn!("PUBSTACK | {e}, sending to {fallback} instead");
                fallback.clone()
            }
        }
    }

    /// Applies the document's buffer overrides on top of `defaults`, field by field.
    ///
    /// Malformed or zero overrides are ignored.
    pub fn thresholds(&self, defaults: BufferThresholds) -> BufferThresholds {
        let Some(buffers) = &self.buffers else {
            return defaults;
        };

        let mut thresholds = defaults;
        match buffers.events {
            Some(0) => warn!("PUBSTACK | ignoring buffers.events override of 0"),
            Some(events) => thresholds.max_events = events,
            None => {}
        }
        if let Some(size) = &buffers.size {
            match parse_byte_size(size) {
                Some(bytes) if bytes > 0 => thresholds.max_bytes = bytes,
                _ => warn!("PUBSTACK | ignoring invalid buffers.size override '{size}'"),
            }
        }
        if let Some(timeout) = &buffers.timeout {
            match parse_duration(timeout) {
                Some(age) if !age.is_zero() => thresholds.max_age = age,
                _ => warn!("PUBSTACK | ignoring invalid buffers.timeout override '{timeout}'"),
            }
        }
        thresholds
    }
}
