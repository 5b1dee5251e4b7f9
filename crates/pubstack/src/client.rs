// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP access to the pubstack backend: configuration bootstrap and liveness probe.

use crate::config::RemoteConfig;
use crate::errors::FetchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

const BOOTSTRAP_PATH: &str = "bootstrap";
const HEALTH_PATH: &str = "/v1/health";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the client shared by the probe, the configuration source and the senders.
pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder().timeout(REQUEST_TIMEOUT).build()
}

/// Source of configuration documents for the refresh loop.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<RemoteConfig, FetchError>;
}

/// Checks that the backend answers before the module starts.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), FetchError>;
}

/// `GET <endpoint>/bootstrap?scopeId=<scope>`.
#[derive(Debug, Clone)]
pub struct HttpConfigSource {
    client: Client,
    url: Url,
}

impl HttpConfigSource {
    pub fn new(client: Client, endpoint: &Url, scope_id: &str) -> Self {
        let mut url = endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(BOOTSTRAP_PATH);
        }
        url.query_pairs_mut().clear().append_pair("scopeId", scope_id);
        Self { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self) -> Result<RemoteConfig, FetchError> {
        debug!("PUBSTACK | fetching configuration from {}", self.url);
        let response = self.client.get(self.url.clone()).send().await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// `GET <endpoint>/v1/health`, which must answer 200.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    url: Url,
}

impl HttpHealthProbe {
    pub fn new(client: Client, endpoint: &Url) -> Self {
        let mut url = endpoint.clone();
        url.set_path(HEALTH_PATH);
        url.set_query(None);
        Self { client, url }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Result<(), FetchError> {
        let response = self.client.get(self.url.clone()).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(FetchError::Status(status.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use mockito::{Matcher, Server};

    #[test]
    fn test_bootstrap_url() {
        let endpoint = Url::parse("https://pubstack.example.com/api/").expect("invalid url");
        let source = HttpConfigSource::new(Client::new(), &endpoint, "scope 1");
        assert_eq!(
            source.url().as_str(),
            "https://pubstack.example.com/api/bootstrap?scopeId=scope+1"
        );
    }

    #[tokio::test]
    async fn test_fetch_configuration() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/bootstrap")
            .match_query(Matcher::UrlEncoded("scopeId".into(), "scope-1".into()))
            .with_status(200)
            .with_body(
                r#"{"scopeId":"scope-1","endpoint":"http://intake","features":{"auction":true}}"#,
            )
            .create_async()
            .await;

        let endpoint = Url::parse(&server.url()).expect("invalid url");
        let config = HttpConfigSource::new(Client::new(), &endpoint, "scope-1")
            .fetch()
            .await
            .expect("fetch failed");

        assert_eq!(config.scope_id, "scope-1");
        assert_eq!(config.endpoint, "http://intake");
        assert_eq!(config.enabled_features(), vec![Feature::Auction]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_non_200() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/bootstrap")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let endpoint = Url::parse(&server.url()).expect("invalid url");
        let result = HttpConfigSource::new(Client::new(), &endpoint, "scope-1")
            .fetch()
            .await;
        assert!(matches!(result, Err(FetchError::Status(500))));
    }

    #[tokio::test]
    async fn test_fetch_malformed_json() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/bootstrap")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{\"features\": ")
            .create_async()
            .await;

        let endpoint = Url::parse(&server.url()).expect("invalid url");
        let result = HttpConfigSource::new(Client::new(), &endpoint, "scope-1")
            .fetch()
            .await;
        assert!(matches!(result, Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_health_probe() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/health")
            .with_status(200)
            .create_async()
            .await;

        let endpoint = Url::parse(&format!("{}/some/path?x=1", server.url())).expect("invalid url");
        HttpHealthProbe::new(Client::new(), &endpoint)
            .probe()
            .await
            .expect("probe failed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_health_probe_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/health")
            .with_status(503)
            .create_async()
            .await;

        let endpoint = Url::parse(&server.url()).expect("invalid url");
        let result = HttpHealthProbe::new(Client::new(), &endpoint).probe().await;
        assert!(matches!(result, Err(FetchError::Status(503))));
    }
}
