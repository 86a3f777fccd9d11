use anyhow::Context;
use fulfill::{Config, Server, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    logging::init(config.log_json);

    Server::bind(config.addr)
        .read_timeout(config.read_timeout())
        .write_timeout(config.write_timeout())
        .idle_timeout(config.idle_timeout())
        .keep_alive(config.keep_alive)
        .shutdown_grace(config.shutdown_grace())
        .serve(fulfill::app(&config))
        .await
        .context("server error")?;

    tracing::info!("shutting down");
    Ok(())
}
