// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer-facing event shapes and their newline-delimited JSON form.

use crate::feature::Feature;
use serde::Serialize;
use serde_json::Value;

/// An event that belongs to exactly one feature.
pub trait AnalyticsEvent: Serialize {
    const FEATURE: Feature;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionObject {
    pub status: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub request: Value,
    pub response: Value,
    /// Milliseconds since the Unix epoch.
    pub start_time: i64,
}

impl AnalyticsEvent for AuctionObject {
    const FEATURE: Feature = Feature::Auction;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoObject {
    pub status: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub request: Value,
    pub response: Value,
    pub video_request: Value,
    pub video_response: Value,
    pub start_time: i64,
}

impl AnalyticsEvent for VideoObject {
    const FEATURE: Feature = Feature::Video;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmpObject {
    pub status: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub request: Value,
    pub auction_response: Value,
    pub amp_targeting_values: Value,
    pub origin: String,
    pub start_time: i64,
}

impl AnalyticsEvent for AmpObject {
    const FEATURE: Feature = Feature::Amp;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSyncObject {
    pub status: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub bidder_status: Value,
}

impl AnalyticsEvent for CookieSyncObject {
    const FEATURE: Feature = Feature::CookieSync;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetUidObject {
    pub status: u16,
    pub bidder: String,
    pub uid: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub success: bool,
}

impl AnalyticsEvent for SetUidObject {
    const FEATURE: Feature = Feature::SetUid;
}

#[derive(Serialize)]
struct Scoped<'a, T: Serialize + ?Sized> {
    scope: &'a str,
    #[serde(flatten)]
    event: &'a T,
}

/// Serializes `event` as one JSON line tagged with `scope`.
///
/// Non-object payloads cannot be flattened and are rejected.
pub fn jsonify<T: Serialize + ?Sized>(scope: &str, event: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(&Scoped { scope, event })?;
    line.push(b'\n');
    Ok(line)
}
