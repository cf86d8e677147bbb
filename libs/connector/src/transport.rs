use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use stomp_client::{Conn, ConnectOptions, StompError, Subscription};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::{Config, TlsConfig};
use crate::error::{ConfigError, TeardownError, TransportError};

/// Заголовок CONNECT с идентификатором клиента (durable подписки).
const CLIENT_ID_HEADER: &str = "client-id";

// ═══════════════════════════════════════════════════════════════
//  Connect
// ═══════════════════════════════════════════════════════════════

/// Открыть STOMP соединение: TCP или mTLS, затем CONNECT.
///
/// `client_id` передаёт только source; destination всегда `None`.
pub async fn connect(config: &Config, client_id: Option<&str>) -> Result<Conn, TransportError> {
    let address = config.address()?;
    let mut options = ConnectOptions::new()
        .login(&config.user, &config.password)
        .heart_beat(config.send_heartbeat, config.recv_heartbeat)
        .host(config.virtual_host(&address))
        .connect_timeout(config.connect_timeout)
        .receipt_timeout(config.receipt_timeout);
    if let Some(id) = client_id.filter(|id| !id.is_empty()) {
        options = options.header(CLIENT_ID_HEADER, id);
    }

    // Сертификаты читаются до dial: ошибка конфигурации не открывает сокет.
    let tls = if config.tls.enabled {
        tracing::debug!(url = %config.url, "using TLS to connect to broker");
        Some(load_tls_config(&config.tls)?)
    } else {
        None
    };

    let authority = address.authority();
    let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&authority))
        .await
        .map_err(|_| TransportError::Timeout(config.connect_timeout))?
        .map_err(|source| TransportError::Dial { address: authority.clone(), source })?;
    // Heartbeat'ы STOMP мелкие, Nagle только задерживает их.
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }

    let Some(tls) = tls else {
        let conn = stomp_client::connect(tcp, options)
            .await
            .map_err(TransportError::Handshake)?;
        tracing::debug!(url = %config.url, version = conn.version(), "opened connection to broker");
        return Ok(conn);
    };

    let server_name = ServerName::try_from(address.host.clone())
        .map_err(|_| TransportError::InvalidServerName(address.host.clone()))?;
    let stream = TlsConnector::from(Arc::new(tls))
        .connect(server_name, tcp)
        .await
        .map_err(|source| TransportError::TlsHandshake { address: authority.clone(), source })?;
    tracing::debug!(address = %authority, "TLS connection established");

    let conn = stomp_client::connect(stream, options)
        .await
        .map_err(TransportError::Handshake)?;
    tracing::debug!(url = %config.url, version = conn.version(), "STOMP connection using TLS established");
    Ok(conn)
}

// ═══════════════════════════════════════════════════════════════
//  TLS
// ═══════════════════════════════════════════════════════════════

/// Клиентская TLS конфигурация: TLS 1.2–1.3, клиентский сертификат,
/// доверие только загруженному CA.
pub fn load_tls_config(tls: &TlsConfig) -> Result<ClientConfig, TransportError> {
    let cert_path = tls
        .client_cert_path
        .as_deref()
        .ok_or(ConfigError::Missing("tls.client_cert_path"))?;
    let key_path = tls
        .client_key_path
        .as_deref()
        .ok_or(ConfigError::Missing("tls.client_key_path"))?;
    let ca_path = tls
        .ca_cert_path
        .as_deref()
        .ok_or(ConfigError::Missing("tls.ca_cert_path"))?;

    let certs = read_certs(cert_path).map_err(|detail| TransportError::LoadClientCert {
        path: cert_path.to_path_buf(),
        detail,
    })?;
    let key = read_key(key_path).map_err(|detail| TransportError::LoadClientKey {
        path: key_path.to_path_buf(),
        detail,
    })?;
    tracing::debug!(cert = %cert_path.display(), key = %key_path.display(), "loaded client key pair");

    let mut roots = RootCertStore::empty();
    let ca_certs = read_certs(ca_path).map_err(|detail| TransportError::LoadCaCert {
        path: ca_path.to_path_buf(),
        detail,
    })?;
    for cert in ca_certs {
        roots.add(cert).map_err(|e| TransportError::LoadCaCert {
            path: ca_path.to_path_buf(),
            detail: e.to_string(),
        })?;
    }
    tracing::debug!(ca = %ca_path.display(), "loaded CA cert");

    let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?;
    let config = if tls.insecure_skip_verify {
        tracing::warn!("TLS server certificate verification is disabled (insecure_skip_verify)");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification))
            .with_client_auth_cert(certs, key)?
    } else {
        builder
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)?
    };
    Ok(config)
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, String> {
    let data = std::fs::read(path).map_err(|e| e.to_string())?;
    let certs = rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid PEM: {e}"))?;
    if certs.is_empty() {
        return Err("no certificates found in PEM data".into());
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, String> {
    let data = std::fs::read(path).map_err(|e| e.to_string())?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|e| format!("invalid PEM: {e}"))?
        .ok_or_else(|| "no private key found in PEM data".into())
}

/// Принимает любой сертификат брокера. Включается только `insecure_skip_verify`.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
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
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

// ═══════════════════════════════════════════════════════════════
//  Teardown
// ═══════════════════════════════════════════════════════════════

/// Снять подписку, затем закрыть соединение.
///
/// Оба шага выполняются независимо друг от друга; возвращается первая ошибка.
/// Уже снятая подписка ошибкой не считается.
pub async fn teardown(
    subscription: Option<&mut Subscription>,
    conn: Option<&Conn>,
) -> Result<(), TeardownError> {
    let mut first = None;

    if let Some(subscription) = subscription {
        match subscription.unsubscribe().await {
            Ok(()) => tracing::debug!(destination = subscription.destination(), "unsubscribed"),
            Err(StompError::CompletedSubscription) => {
                tracing::debug!(destination = subscription.destination(), "subscription already unsubscribed")
            }
            Err(e) => {
                tracing::warn!(destination = subscription.destination(), error = %e, "failed to unsubscribe");
                first = Some(TeardownError::Unsubscribe(e));
            }
        }
    }

    if let Some(conn) = conn {
        match conn.disconnect().await {
            Ok(()) => tracing::debug!("disconnected from broker"),
            Err(e) => {
                tracing::warn!(error = %e, "failed to disconnect");
                first.get_or_insert(TeardownError::Disconnect(e));
            }
        }
    }

    first.map_or(Ok(()), Err)
}
