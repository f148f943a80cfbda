//! QUIC client issuing the node's four calls.

use crate::protocol::{self, NodeMessage, NodeResponse};
use anyhow::{Result, bail};
use common::{File, FileFragment};
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint};
use rustls::DigitallySignedStruct;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore, SignatureScheme};
use std::net::SocketAddr;
use std::sync::Arc;

/// Skip certificate verification
#[derive(Debug)]
struct SkipServerVerification;

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

pub struct NodeClient {
    _endpoint: Endpoint,
    connection: Connection,
    max_frame: usize,
}

impl NodeClient {
    pub async fn connect(server_addr: SocketAddr, max_frame: usize) -> Result<Self> {
        let mut tls = RustlsClientConfig::builder()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        tls.dangerous()
            .set_certificate_verifier(Arc::new(SkipServerVerification));

        let quic_crypto = QuicClientConfig::try_from(tls)?;
        let client_cfg = QuinnClientConfig::new(Arc::new(quic_crypto));
        let mut endpoint = Endpoint::client("0.0.0.0:0".parse().unwrap())?;
        endpoint.set_default_client_config(client_cfg);

        let connection = endpoint.connect(server_addr, "localhost")?.await?;
        Ok(Self {
            _endpoint: endpoint,
            connection,
            max_frame,
        })
    }

    /// Streams fragments up and returns the committed File record.
    pub async fn create_file(&self, fragments: Vec<FileFragment>) -> Result<File> {
        let (mut send, mut recv) = self.connection.open_bi().await?;
        protocol::write_frame(&mut send, &NodeMessage::CreateFile).await?;
        for fragment in &fragments {
            protocol::write_frame(&mut send, fragment).await?;
        }
        send.finish()?;

        match protocol::read_frame::<_, NodeResponse>(&mut recv, self.max_frame).await? {
            Some(NodeResponse::FileCreated(file)) => Ok(*file),
            Some(NodeResponse::Error(e)) => bail!("create file failed: {e}"),
            other => bail!("unexpected create file response: {other:?}"),
        }
    }

    /// Reads a file back as its original fragments, in order.
    pub async fn read_file(&self, file_uuid: &str) -> Result<Vec<FileFragment>> {
        let (mut send, mut recv) = self.connection.open_bi().await?;
        protocol::write_frame(&mut send, &NodeMessage::ReadFile(file_uuid.to_string())).await?;
        send.finish()?;

        match protocol::read_frame::<_, NodeResponse>(&mut recv, self.max_frame).await? {
            Some(NodeResponse::Ack(_)) => {}
            Some(NodeResponse::Error(e)) => bail!("read file failed: {e}"),
            other => bail!("unexpected read file response: {other:?}"),
        }

        let mut fragments = Vec::new();
        while let Some(fragment) =
            protocol::read_frame::<_, FileFragment>(&mut recv, self.max_frame).await?
        {
            fragments.push(fragment);
        }
        Ok(fragments)
    }

    pub async fn remove_file(&self, file_uuid: &str) -> Result<String> {
        let (mut send, mut recv) = self.connection.open_bi().await?;
        protocol::write_frame(&mut send, &NodeMessage::RemoveFile(file_uuid.to_string())).await?;
        send.finish()?;

        match protocol::read_frame::<_, NodeResponse>(&mut recv, self.max_frame).await? {
            Some(NodeResponse::Ack(msg)) => Ok(msg),
            Some(NodeResponse::Error(e)) => bail!("remove file failed: {e}"),
            other => bail!("unexpected remove file response: {other:?}"),
        }
    }

    /// Appends bytes to a chunk that already exists on the node.
    pub async fn create_chunk(&self, chunk_uuid: &str, data: Vec<u8>) -> Result<String> {
        let (mut send, mut recv) = self.connection.open_bi().await?;
        protocol::write_frame(
            &mut send,
            &NodeMessage::CreateChunk {
                chunk_uuid: chunk_uuid.to_string(),
                data,
            },
        )
        .await?;
        send.finish()?;

        match protocol::read_frame::<_, NodeResponse>(&mut recv, self.max_frame).await? {
            Some(NodeResponse::Ack(msg)) => Ok(msg),
            Some(NodeResponse::Error(e)) => bail!("create chunk failed: {e}"),
            other => bail!("unexpected create chunk response: {other:?}"),
        }
    }
}
