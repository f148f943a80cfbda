//! QUIC front door: one bidirectional stream per call.

use crate::api::metastore::MetaClient;
use crate::chunk::reader::ChunkReader;
use crate::chunk::remover::FileRemover;
use crate::chunk::writer::ChunkWriter;
use crate::protocol::config::Config;
use crate::protocol::{self, NodeMessage, NodeResponse};
use crate::store::ChunkStore;
use anyhow::Result;
use common::FileFragment;
use futures::StreamExt;
use log::{error, info};
use quinn::{Connection, Endpoint, ServerConfig, VarInt};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared handles every call runs against.
pub struct ServerState {
    meta: Arc<MetaClient>,
    store: Arc<dyn ChunkStore>,
    node_name: String,
    chunk_size: usize,
    max_frame: usize,
}

impl ServerState {
    pub fn new(
        meta: Arc<MetaClient>,
        store: Arc<dyn ChunkStore>,
        node_name: &str,
        chunk_size: usize,
        max_frame: usize,
    ) -> Self {
        Self {
            meta,
            store,
            node_name: node_name.to_string(),
            chunk_size,
            max_frame,
        }
    }
}

/// Launches the listener and serves until the endpoint closes. Each
/// accepted connection gets its own task.
pub async fn serve(
    cfg: &Config,
    meta: Arc<MetaClient>,
    store: Arc<dyn ChunkStore>,
) -> Result<()> {
    let endpoint = make_server_endpoint(cfg.addr.parse()?).await?;
    let state = Arc::new(ServerState::new(
        meta,
        store,
        &cfg.node_name,
        cfg.chunk_size,
        cfg.max_message_size,
    ));
    info!("listening on {}", cfg.addr);
    run(endpoint, state).await
}

/// Accept loop over an already bound endpoint.
pub async fn run(endpoint: Endpoint, state: Arc<ServerState>) -> Result<()> {
    loop {
        let connecting = endpoint.accept().await;
        match connecting {
            Some(connecting) => match connecting.await {
                Ok(conn) => {
                    info!("connection accepted: addr={}", conn.remote_address());
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            error!("handle_connection error: {e:?}");
                        }
                    });
                }
                Err(e) => error!("failed to establish connection: {e:?}"),
            },
            None => break,
        }
    }
    Ok(())
}

/// Accepts call streams on one connection; each call runs independently.
async fn handle_connection(conn: Connection, state: Arc<ServerState>) -> Result<()> {
    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_call(send, recv, state).await {
                        error!("call failed: {e:?}");
                    }
                });
            }
            Err(e) => {
                info!("connection closed: {e}");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_call(
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    state: Arc<ServerState>,
) -> Result<()> {
    let Some(msg) = protocol::read_frame::<_, NodeMessage>(&mut recv, state.max_frame).await?
    else {
        return Ok(());
    };

    match msg {
        NodeMessage::CreateFile => {
            let writer = ChunkWriter::new(
                state.meta.clone(),
                state.store.clone(),
                &state.node_name,
                state.chunk_size,
            );
            let max_frame = state.max_frame;
            let fragments = futures::stream::unfold(recv, move |mut recv| async move {
                match protocol::read_frame::<_, FileFragment>(&mut recv, max_frame).await {
                    Ok(Some(fragment)) => Some((Ok(fragment), recv)),
                    Ok(None) => None,
                    Err(e) => Some((Err(anyhow::Error::from(e)), recv)),
                }
            });
            let resp = match writer.write(fragments.boxed()).await {
                Ok(file) => NodeResponse::FileCreated(Box::new(file)),
                Err(e) => NodeResponse::Error(e.to_string()),
            };
            protocol::write_frame(&mut send, &resp).await?;
            send.finish()?;
        }
        NodeMessage::ReadFile(file_uuid) => {
            let reader = ChunkReader::local(state.meta.clone(), state.store.clone());
            let (tx, mut rx) = mpsc::channel::<FileFragment>(8);
            let read_task = {
                let file_uuid = file_uuid.clone();
                tokio::spawn(async move { reader.read(&file_uuid, tx).await })
            };

            match rx.recv().await {
                Some(first) => {
                    protocol::write_frame(&mut send, &NodeResponse::Ack("success".to_string()))
                        .await?;
                    protocol::write_frame(&mut send, &first).await?;
                    while let Some(fragment) = rx.recv().await {
                        protocol::write_frame(&mut send, &fragment).await?;
                    }
                    match read_task.await? {
                        Ok(()) => {
                            send.finish()?;
                        }
                        Err(e) => {
                            // fragments already went out; all that is left
                            // is to kill the stream
                            error!("read of file {file_uuid} failed mid-stream: {e}");
                            let _ = send.reset(VarInt::from_u32(1));
                        }
                    }
                }
                None => match read_task.await? {
                    Ok(()) => {
                        protocol::write_frame(
                            &mut send,
                            &NodeResponse::Ack("success".to_string()),
                        )
                        .await?;
                        send.finish()?;
                    }
                    Err(e) => {
                        protocol::write_frame(&mut send, &NodeResponse::Error(e.to_string()))
                            .await?;
                        send.finish()?;
                    }
                },
            }
        }
        NodeMessage::RemoveFile(file_uuid) => {
            let remover = FileRemover::new(state.meta.clone(), state.store.clone());
            let resp = match remover.remove(&file_uuid).await {
                Ok(report) if report.clean() => NodeResponse::Ack("success".to_string()),
                Ok(report) => NodeResponse::Ack(format!(
                    "success; {} of {} chunk deletions incomplete",
                    report.failure_count(),
                    report.chunks_total
                )),
                Err(e) => NodeResponse::Error(e.to_string()),
            };
            protocol::write_frame(&mut send, &resp).await?;
            send.finish()?;
        }
        NodeMessage::CreateChunk { chunk_uuid, data } => {
            let resp = match state.store.append(&chunk_uuid, &data).await {
                Ok(()) => {
                    info!("chunk {chunk_uuid} has been appended");
                    NodeResponse::Ack(chunk_uuid)
                }
                Err(e) => {
                    error!("failed to create chunk {chunk_uuid}: {e}");
                    NodeResponse::Error(e.to_string())
                }
            };
            protocol::write_frame(&mut send, &resp).await?;
            send.finish()?;
        }
    }

    Ok(())
}

/// Sets up the QUIC server endpoint with a TLS certificate.
pub async fn make_server_endpoint(bind_addr: SocketAddr) -> Result<Endpoint> {
    let server_config = configure_server()?;
    let endpoint = Endpoint::server(server_config, bind_addr)?;
    Ok(endpoint)
}

/// Generates a self-signed TLS certificate and constructs the QUIC server
/// config.
fn configure_server() -> Result<ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let cert_der = CertificateDer::from(cert.serialize_der()?);
    let key = PrivatePkcs8KeyDer::from(cert.serialize_private_key_der());
    let certs = vec![cert_der];
    let server_config =
        ServerConfig::with_single_cert(certs, rustls::pki_types::PrivateKeyDer::Pkcs8(key))?;
    Ok(server_config)
}
