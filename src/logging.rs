// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Tracing subscriber bootstrap.

use crate::configs::AppSettings;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured level. With `log_json` set, events are
/// written as JSON lines.
pub fn init(settings: &AppSettings) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    let (plain, json) = if settings.log_json {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init()
}
