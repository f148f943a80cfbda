use anyhow::Context;
use chunkserver::api::metastore::{EtcdMetaStore, MetaClient};
use chunkserver::cli::{Cli, Commands};
use chunkserver::keepalive::Announcer;
use chunkserver::protocol::config::load_config;
use chunkserver::server::serve;
use chunkserver::store::local::LocalChunkStore;
use chunkserver::watcher::ChunkWatcher;
use clap::Parser;
use log::error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Start { config } => {
            let cfg = load_config(config.to_str().unwrap())?;

            let store = EtcdMetaStore::connect(&cfg.etcd)
                .await
                .context("failed to connect to etcd")?;
            let meta = Arc::new(MetaClient::new(Arc::new(store), &cfg.etcd.prefix));
            let chunks = Arc::new(
                LocalChunkStore::open(&cfg.chunk_dir)
                    .await
                    .context("failed to open chunk directory")?,
            );

            let shutdown = CancellationToken::new();

            let announcer = Announcer::new(
                meta.clone(),
                &cfg.node_name,
                &cfg.node_addr,
                Duration::from_secs(cfg.heartbeat_period_secs),
                cfg.lease_ttl_secs,
            );
            tokio::spawn(announcer.run(shutdown.child_token()));

            let watcher = ChunkWatcher::new(meta.clone());
            let watch_token = shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = watcher.run(watch_token).await {
                    error!("chunk watcher failed: {e}");
                }
            });

            println!("[chunkserver] listening on {}", cfg.addr);
            serve(&cfg, meta, chunks).await?;
        }
    }

    Ok(())
}
