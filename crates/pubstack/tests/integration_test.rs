// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use flate2::read::GzDecoder;
use mockito::{Matcher, Server, ServerGuard};
use pubstack::client::{build_client, HttpConfigSource, HttpHealthProbe};
use pubstack::errors::Creation;
use pubstack::sender::HttpSenderFactory;
use pubstack::{
    AuctionObject, Collaborators, CountingObserver, Feature, ModuleOptions, PubstackModule,
    SetUidObject,
};
use serde_json::{json, Value};
use std::io::Read;
use std::sync::{Arc, Mutex};

type Captured = Arc<Mutex<Vec<Vec<u8>>>>;

fn options(server: &ServerGuard) -> ModuleOptions {
    ModuleOptions {
        scope_id: "scope-1".to_string(),
        endpoint: server.url(),
        ..Default::default()
    }
}

async fn mock_health(server: &mut ServerGuard, status: usize) -> mockito::Mock {
    server
        .mock("GET", "/v1/health")
        .with_status(status)
        .create_async()
        .await
}

async fn mock_bootstrap(server: &mut ServerGuard, body: Value) -> mockito::Mock {
    server
        .mock("GET", "/bootstrap")
        .match_query(Matcher::UrlEncoded("scopeId".into(), "scope-1".into()))
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await
}

async fn mock_intake(
    server: &mut ServerGuard,
    feature: &str,
    status: usize,
    captured: &Captured,
) -> mockito::Mock {
    let captured = Arc::clone(captured);
    server
        .mock("POST", format!("/intake/{feature}").as_str())
        .match_header("content-type", "application/octet-stream")
        .match_header("content-encoding", "gzip")
        .with_status(status)
        .with_body_from_request(move |request| {
            let body = request.body().expect("missing body").clone();
            captured.lock().expect("lock poisoned").push(body);
            Vec::new()
        })
        .create_async()
        .await
}

fn decode(batch: &[u8]) -> Vec<Value> {
    let mut text = String::new();
    GzDecoder::new(batch)
        .read_to_string(&mut text)
        .expect("invalid gzip batch");
    text.lines()
        .map(|line| serde_json::from_str(line).expect("invalid json line"))
        .collect()
}

#[tokio::test]
async fn test_events_reach_intake_as_gzip_batches() {
    let mut server = Server::new_async().await;
    let health = mock_health(&mut server, 200).await;
    let bootstrap = mock_bootstrap(
        &mut server,
        json!({"scopeId": "scope-1", "features": {"auction": true, "setuid": true, "video": false}}),
    )
    .await;
    let captured = Captured::default();
    let intake = mock_intake(&mut server, "auction", 200, &captured).await;

    let module = PubstackModule::new(&options(&server))
        .await
        .expect("module creation failed");
    assert_eq!(
        module.enabled_features(),
        vec![Feature::Auction, Feature::SetUid]
    );

    for id in ["a", "b"] {
        module
            .log_auction_object(&AuctionObject {
                status: 200,
                request: json!({"id": id}),
                ..Default::default()
            })
            .await;
    }
    module.flush().await;

    health.assert_async().await;
    bootstrap.assert_async().await;
    intake.assert_async().await;

    let batches = captured.lock().expect("lock poisoned").clone();
    assert_eq!(batches.len(), 1);
    let lines = decode(&batches[0]);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["scope"], "scope-1");
    assert_eq!(lines[0]["request"]["id"], "a");
    assert_eq!(lines[1]["request"]["id"], "b");

    module.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_pending_events() {
    let mut server = Server::new_async().await;
    let _health = mock_health(&mut server, 200).await;
    let _bootstrap = mock_bootstrap(&mut server, json!({"features": {"setuid": true}})).await;
    let captured = Captured::default();
    let intake = mock_intake(&mut server, "setuid", 200, &captured).await;

    let module = PubstackModule::new(&options(&server))
        .await
        .expect("module creation failed");
    module
        .log_set_uid_object(&SetUidObject {
            status: 200,
            bidder: "appnexus".to_string(),
            uid: "uid-1".to_string(),
            success: true,
            ..Default::default()
        })
        .await;
    module.shutdown().await;

    intake.assert_async().await;
    let batches = captured.lock().expect("lock poisoned").clone();
    assert_eq!(decode(&batches[0])[0]["bidder"], "appnexus");
}

#[tokio::test]
async fn test_unreachable_backend_fails_creation() {
    let mut server = Server::new_async().await;
    let _health = mock_health(&mut server, 503).await;
    let bootstrap = server
        .mock("GET", "/bootstrap")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let result = PubstackModule::new(&options(&server)).await;
    assert!(matches!(result, Err(Creation::Unreachable(_))));
    bootstrap.assert_async().await;
}

#[tokio::test]
async fn test_failed_bootstrap_fails_creation() {
    let mut server = Server::new_async().await;
    let _health = mock_health(&mut server, 200).await;
    let _bootstrap = server
        .mock("GET", "/bootstrap")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let result = PubstackModule::new(&options(&server)).await;
    assert!(matches!(result, Err(Creation::Bootstrap(_))));
}

#[tokio::test]
async fn test_invalid_options_fail_creation() {
    let options = ModuleOptions {
        scope_id: "scope-1".to_string(),
        endpoint: "ftp://pubstack.example.com".to_string(),
        ..Default::default()
    };
    let result = PubstackModule::new(&options).await;
    assert!(matches!(result, Err(Creation::Config(_))));
}

#[tokio::test]
async fn test_rejected_batch_is_counted_and_dropped() {
    let mut server = Server::new_async().await;
    let _health = mock_health(&mut server, 200).await;
    let _bootstrap = mock_bootstrap(&mut server, json!({"features": {"auction": true}})).await;
    let captured = Captured::default();
    let intake = mock_intake(&mut server, "auction", 500, &captured).await;

    let settings = options(&server).parse().expect("options should be valid");
    let client = build_client().expect("client creation failed");
    let observer = CountingObserver::default();
    let module = PubstackModule::with_collaborators(
        settings.clone(),
        Collaborators {
            source: Arc::new(HttpConfigSource::new(
                client.clone(),
                &settings.endpoint,
                &settings.scope_id,
            )),
            probe: Arc::new(HttpHealthProbe::new(client.clone(), &settings.endpoint)),
            senders: Arc::new(HttpSenderFactory::new(client)),
            observer: Arc::new(observer.clone()),
        },
    )
    .await
    .expect("module creation failed");

    module.log_auction_object(&AuctionObject::default()).await;
    module.flush().await;

    intake.assert_async().await;
    assert_eq!(observer.snapshot().delivery, 1);

    // Nothing is retried.
    module.shutdown().await;
    assert_eq!(captured.lock().expect("lock poisoned").len(), 1);
}
