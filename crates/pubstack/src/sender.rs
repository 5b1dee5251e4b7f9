// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of finished batches to the intake.

use crate::errors::DeliveryError;
use crate::feature::Feature;
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use tracing::debug;

const INTAKE_PATH: &str = "intake";

/// Delivers one finished batch. Implementations must not retry.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<(), DeliveryError>;
}

/// Builds the [`Sender`] used by the channel of a feature.
pub trait SenderFactory: Send + Sync {
    fn sender_for(&self, endpoint: &Url, feature: Feature) -> Arc<dyn Sender>;
}

/// Returns `<endpoint>/intake/<feature>`, keeping any path prefix of `endpoint`.
pub fn intake_url(endpoint: &Url, feature: Feature) -> Url {
    let mut url = endpoint.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .push(INTAKE_PATH)
            .push(feature.as_str());
    }
    url
}

/// POSTs gzip batches to a fixed intake url.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: Client,
    url: Url,
}

impl HttpSender {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, payload: Vec<u8>) -> Result<(), DeliveryError> {
        let size = payload.len();
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_ENCODING, "gzip")
            .body(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                debug!("PUBSTACK | delivered batch of {size} bytes to {}", self.url);
                Ok(())
            }
            status => Err(DeliveryError::Status(status.as_u16())),
        }
    }
}

/// Creates [`HttpSender`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpSenderFactory {
    client: Client,
}

impl HttpSenderFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl SenderFactory for HttpSenderFactory {
    fn sender_for(&self, endpoint: &Url, feature: Feature) -> Arc<dyn Sender> {
        Arc::new(HttpSender::new(
            self.client.clone(),
            intake_url(endpoint, feature),
        ))
    }
}
