// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Service entry point.
//!
//! Declares the order topology, starts the consumer workers and accepts
//! orders as JSON lines on stdin until SIGINT or SIGTERM.

use order_intake::{
    broker::BrokerChannel,
    channel::{new_amqp_channel, AmqpChannel},
    configs::AppConfigs,
    consumer::LogOrderHandler,
    dispatcher::OrderDispatcher,
    errors::AmqpError,
    intake::OrderIntake,
    logging,
    publisher::OrderPublisher,
    topology::Topology,
};
use std::{process::ExitCode, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    signal,
    sync::watch,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = AppConfigs::from_env();

    if let Err(err) = logging::init(&cfg.app) {
        eprintln!("failure to install tracing subscriber: {err}");
    }

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = err.to_string(), "order intake stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: AppConfigs) -> Result<(), AmqpError> {
    let (conn, channel) = new_amqp_channel(&cfg.app, &cfg.rabbitmq).await?;

    // the service must not start on a broker whose topology differs
    Topology::orders(&cfg.topology)
        .install(channel.as_ref())
        .await?;

    let mut channels: Vec<Arc<dyn BrokerChannel>> = vec![];
    for _ in 0..cfg.consumer.workers {
        channels.push(AmqpChannel::open(&conn, false).await?);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = OrderDispatcher::new(&cfg.topology.queue, &cfg.consumer)
        .register(cfg.validation.clone(), Arc::new(LogOrderHandler))
        .spawn(channels, shutdown_rx)
        .await?;

    let publisher = OrderPublisher::new(
        channel.clone(),
        &cfg.topology,
        cfg.rabbitmq.publish_timeout,
    );
    let reader = tokio::spawn(read_orders(OrderIntake::new(Arc::new(publisher))));

    info!(workers = workers.len(), "order intake started");
    shutdown_signal().await;

    reader.abort();
    if shutdown_tx.send(true).is_err() {
        warn!("workers already stopped");
    }
    workers.join().await?;

    channel.close().await?;
    conn.close(200, "OK").await.map_err(|err| {
        error!(error = err.to_string(), "error closing connection");
        AmqpError::ConnectionError
    })?;

    info!("order intake shut down gracefully");
    Ok(())
}

/// Publishes every JSON line read from stdin as an order.
async fn read_orders(intake: OrderIntake) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!(error = err.to_string(), "failure reading stdin");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match intake.create_order_from_json(line.as_bytes()).await {
            Ok(receipt) => println!("{}", receipt.message()),
            Err(err) => eprintln!("{err}"),
        }
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = err.to_string(), "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = err.to_string(), "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        }
    }
}
