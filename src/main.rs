mod agent;
mod batch;
mod config;
mod drivers;
mod http;
mod mqtt;
mod quantity;
mod sampler;
mod scheduler;
mod sensor;
mod sink;

use crate::config::Config;
use crate::scheduler::Publisher;
use anyhow::Result;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_publisher=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let sensors = drivers::build_registry(&config);
    tracing::info!(sensors = sensors.len(), node_id=%config.node_id, "sensor registry ready");
    let publisher = Publisher::new(sensors, config.policy(), config.max_batch_entries);

    let (sink, eventloop) = mqtt::connect(&config);
    let pending = sink.pending();
    let (agent, agent_handle) =
        agent::spawn_agent(publisher, Box::new(sink), config.delay_between_readings());
    let mqtt_handle = mqtt::spawn_poller(eventloop, pending, agent.clone());

    let app = http::router(http::HttpState { agent });
    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    tracing::info!(bind=%config.http_bind, "sensor-publisher HTTP listening");
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .inspect_err(|err| tracing::error!(error=%err, "HTTP server failed"))
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
        res = agent_handle => Err(task_exited("publisher", res.map(Ok))),
        res = mqtt_handle => Err(task_exited("mqtt poller", res.map(Ok))),
        res = http_handle => Err(task_exited("http server", res)),
    }
}

/// Every background task runs forever; any exit is fatal.
fn task_exited(
    task: &str,
    res: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> anyhow::Error {
    let err = match res {
        Ok(Ok(())) => anyhow::anyhow!("{task} task exited"),
        Ok(Err(err)) => anyhow::Error::new(err).context(format!("{task} task failed")),
        Err(err) => anyhow::Error::new(err).context(format!("{task} task aborted")),
    };
    tracing::error!(error=%format!("{err:#}"), "background task stopped");
    err
}
