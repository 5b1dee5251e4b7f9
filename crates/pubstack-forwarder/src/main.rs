// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use pubstack::{Feature, ModuleOptions, PubstackModule};
use serde::Deserialize;
use std::env;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// One stdin line: `{"feature": "auction", "event": {...}}`.
#[derive(Debug, Deserialize)]
struct Envelope {
    feature: Feature,
    event: serde_json::Value,
}

/// Blank lines are skipped.
fn parse_line(line: &str) -> Result<Option<Envelope>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("PUBSTACK_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let options = ModuleOptions::from_env();
    let module = match PubstackModule::new(&options).await {
        Ok(module) => module,
        Err(e) => {
            error!("Error creating pubstack module: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Forwarding events from stdin, enabled features: {:?}",
        module.enabled_features()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded: u64 = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Ok(Some(envelope)) => {
                    module.log_event(envelope.feature, &envelope.event).await;
                    forwarded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping malformed line: {e}"),
            },
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {e}");
                break;
            }
        }
    }

    info!("Input closed after {forwarded} events, flushing");
    module.shutdown().await;
    ExitCode::SUCCESS
}
