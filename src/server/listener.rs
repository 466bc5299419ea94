use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{Instrument, error, info, info_span, warn};

use crate::auth::{AuthMethod, CredentialStore};
use crate::config::{ConfigError, ServerConfig, UntypedParamPolicy};
use crate::engine::Engine;
use crate::server::connection::Connection;
use crate::server::handshake::{Handshake, HandshakeResult};
use crate::server::stream::{Stream, load_tls_acceptor};
use crate::wire::OidCache;

/// State shared by every connection of one server.
pub struct ServerContext {
    next_connection_id: AtomicU32,
    pub process_id: i32,
    pub tls_acceptor: Option<TlsAcceptor>,
    pub auth_method: AuthMethod,
    pub credentials: CredentialStore,
    pub oids: Arc<OidCache>,
    pub read_timeout: Option<Duration>,
    pub max_message_size: usize,
    pub untyped_params: UntypedParamPolicy,
}

impl ServerContext {
    /// A context with trust authentication, no TLS and default limits.
    pub fn new(oids: Arc<OidCache>) -> Self {
        Self::with_config(&ServerConfig::default(), None, CredentialStore::new(), oids)
    }

    /// Builds the context for a validated configuration, loading the TLS
    /// certificate and deriving every user's SCRAM secret.
    pub fn from_config(config: &ServerConfig, oids: Arc<OidCache>) -> Result<Self, ConfigError> {
        let tls_acceptor = match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => Some(
                load_tls_acceptor(cert, key)
                    .map_err(|e| ConfigError::Invalid(format!("TLS setup failed: {e}")))?,
            ),
            _ => None,
        };
        let credentials = CredentialStore::from_passwords(
            config
                .users
                .iter()
                .map(|(user, password)| (user.as_str(), password.as_str())),
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self::with_config(config, tls_acceptor, credentials, oids))
    }

    fn with_config(
        config: &ServerConfig,
        tls_acceptor: Option<TlsAcceptor>,
        credentials: CredentialStore,
        oids: Arc<OidCache>,
    ) -> Self {
        Self {
            next_connection_id: AtomicU32::new(1),
            process_id: std::process::id() as i32,
            tls_acceptor,
            auth_method: config.auth_method(),
            credentials,
            oids,
            read_timeout: config.read_timeout(),
            max_message_size: config.max_message_size,
            untyped_params: config.untyped_params,
        }
    }

    pub fn next_connection_id(&self) -> u32 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// TCP server implementing PostgreSQL wire protocol.
pub struct Server<E: Engine> {
    listener: TcpListener,
    engine: Arc<E>,
    context: Arc<ServerContext>,
}

impl<E: Engine> Server<E> {
    /// Creates a new server with a given listener, engine and shared context.
    pub fn new(listener: TcpListener, engine: Arc<E>, context: Arc<ServerContext>) -> Self {
        Self {
            listener,
            engine,
            context,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting connections and serving clients.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        loop {
            let (socket, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // EMFILE and friends can clear up on their own
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            if let Err(e) = socket.set_nodelay(true) {
                warn!(error = %e, "failed to set TCP_NODELAY");
            }

            let conn_id = self.context.next_connection_id();
            let engine = self.engine.clone();
            let context = self.context.clone();
            let span = info_span!("conn", id = conn_id);

            tokio::spawn(
                async move {
                    info!(%peer_addr, "accepted connection");

                    let handshake = Handshake::new(Stream::Plain(socket), context.clone());
                    let startup = match handshake.run().await {
                        Ok(HandshakeResult::Ready(startup)) => startup,
                        Ok(HandshakeResult::CancelRequested { process_id }) => {
                            info!(process_id, "cancel request ignored");
                            return;
                        }
                        Ok(HandshakeResult::Closed) => {
                            info!("connection closed during startup");
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "handshake failed");
                            return;
                        }
                    };

                    info!(user = %startup.parameters.user, tls = startup.framed.get_ref().is_tls(), "connection ready");
                    let connection = Connection::new(startup, engine, context);
                    if let Err(e) = connection.run().await {
                        error!(error = %e, "connection error");
                    }
                    info!("connection closed");
                }
                .instrument(span),
            );
        }
    }
}
