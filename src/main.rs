use std::sync::Arc;

use tokio::{signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use user_persistence_worker::{
    config::AppConfig,
    infrastructure::{
        amqp_broker::AmqpBroker, argon2_secret_hasher::Argon2SecretHasher,
        sea_orm_user_store::SeaOrmUserStore,
    },
    presentation::{
        registration_consumer::RegistrationConsumer, response_publisher::ResponsePublisher,
    },
    usecase::register_user_usecase::RegisterUserUsecase,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // a missing .env is fine; the process environment still applies
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = dotenv {
        info!(reason = %err, "no .env loaded");
    }

    let config = AppConfig::from_env()?;
    info!(
        queue = %config.broker.queue,
        exchange = %config.broker.exchange,
        binding = %config.broker.persist_routing_key,
        concurrency = config.worker.concurrency,
        "starting user persistence worker"
    );

    let store = config
        .retry
        .run("database connect", || SeaOrmUserStore::connect(&config.database))
        .await?;
    if config.database.create_schema {
        store.ensure_schema().await?;
    }
    let broker = AmqpBroker::connect(&config.broker, config.worker.prefetch, &config.retry).await?;

    let usecase = RegisterUserUsecase::new(store.clone(), Argon2SecretHasher::new());
    let publisher = ResponsePublisher::new(broker.outbound_channel(), config.retry.clone());
    let consumer = Arc::new(RegistrationConsumer::new(
        usecase,
        publisher,
        config.retry.clone(),
    ));

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop.send(true);
    });

    let deliveries = broker.consume().await?;
    let result = consumer.run(deliveries, shutdown, &config.worker).await;

    // channel and connection first, then the pool
    if let Err(err) = broker.close().await {
        warn!(error = %err, "broker did not close cleanly");
    }
    if let Err(err) = store.close().await {
        warn!(error = %err, "database pool did not close cleanly");
    }

    if let Err(err) = result {
        error!(error = %err, "worker stopped on broker failure");
        return Err(err.into());
    }
    info!("user persistence worker stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = dotenvy::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let result = if json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };
    if let Err(err) = result {
        eprintln!("tracing init failed: {err}");
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
