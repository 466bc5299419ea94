use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::auth::{AuthError, AuthMethod, ScramExchange};
use crate::protocol::{
    BackendMessage, FrontendMessage, PostgresCodec, ProtocolError, StartupCodec, StartupMessage,
    StartupParameters,
};
use crate::server::connection::ConnectionError;
use crate::server::listener::ServerContext;
use crate::server::stream::Stream;

/// Parameters reported to every client after authentication.
const SERVER_PARAMETERS: [(&str, &str); 2] =
    [("server_version", "15.0"), ("client_encoding", "UTF8")];

/// A connection that finished the startup phase.
pub struct Startup {
    pub framed: Framed<Stream, PostgresCodec>,
    pub parameters: StartupParameters,
}

pub enum HandshakeResult {
    /// Handshake completed successfully, transitioning to query phase.
    Ready(Startup),
    /// Handshake was a CancelRequest.
    CancelRequested { process_id: i32 },
    /// The client went away before sending a StartupMessage.
    Closed,
}

/// A single client handshake: SSL negotiation, the startup packet and
/// authentication.
///
/// Everything up to BackendKeyData is sent here; selecting the database
/// and the first ReadyForQuery are left to the connection.
pub struct Handshake {
    stream: Stream,
    context: Arc<ServerContext>,
}

impl Handshake {
    pub fn new(stream: Stream, context: Arc<ServerContext>) -> Self {
        Self { stream, context }
    }

    pub async fn run(self) -> Result<HandshakeResult, ConnectionError> {
        let Handshake { stream, context } = self;
        let codec = StartupCodec::with_max_message_size(context.max_message_size);
        let mut framed = Framed::new(stream, codec);

        let parameters = loop {
            let Some(message) = framed.next().await.transpose()? else {
                return Ok(HandshakeResult::Closed);
            };

            match message {
                StartupMessage::SslRequest => match &context.tls_acceptor {
                    Some(acceptor) if !framed.get_ref().is_tls() => {
                        debug!("accepting SSL request");
                        reply(&mut framed, b'S').await?;
                        framed = upgrade(framed, acceptor).await?;
                    }
                    _ => reply(&mut framed, b'N').await?,
                },
                StartupMessage::GssEncRequest => reply(&mut framed, b'N').await?,
                StartupMessage::CancelRequest { process_id, .. } => {
                    return Ok(HandshakeResult::CancelRequested { process_id });
                }
                StartupMessage::Startup { parameters, .. } => break parameters,
            }
        };

        debug!(
            user = %parameters.user,
            database = ?parameters.database,
            application_name = ?parameters.application_name,
            "startup"
        );

        let mut framed = framed.map_codec(StartupCodec::ready);
        if let Err(e) = authenticate(&context, &mut framed, &parameters.user).await {
            if let ConnectionError::Auth(auth) = &e {
                framed.send(auth.to_error_info().into()).await?;
            }
            return Err(e);
        }

        let secret_key = rand::random::<i32>();
        send_startup_info(&context, &mut framed, secret_key).await?;

        Ok(HandshakeResult::Ready(Startup { framed, parameters }))
    }
}

/// Runs the configured authentication method for `user`.
async fn authenticate(
    context: &ServerContext,
    framed: &mut Framed<Stream, PostgresCodec>,
    user: &str,
) -> Result<(), ConnectionError> {
    if context.auth_method == AuthMethod::Trust {
        return Ok(());
    }

    let secret = context.credentials.get(user).cloned();
    let mut exchange = ScramExchange::new(user, secret);

    framed
        .send(BackendMessage::AuthenticationSasl {
            mechanisms: ScramExchange::mechanisms(),
        })
        .await?;
    let payload = read_auth_payload(framed).await?;
    let server_first = exchange.initial_response(&payload)?;

    framed
        .send(BackendMessage::AuthenticationSaslContinue {
            data: Bytes::from(server_first),
        })
        .await?;
    let payload = read_auth_payload(framed).await?;
    let server_final = exchange.response(&payload)?;

    framed
        .feed(BackendMessage::AuthenticationSaslFinal {
            data: Bytes::from(server_final),
        })
        .await?;
    debug!(user, "SCRAM authentication succeeded");
    Ok(())
}

async fn send_startup_info(
    context: &ServerContext,
    framed: &mut Framed<Stream, PostgresCodec>,
    secret_key: i32,
) -> Result<(), ConnectionError> {
    framed.feed(BackendMessage::AuthenticationOk).await?;

    for (name, value) in SERVER_PARAMETERS {
        framed
            .feed(BackendMessage::ParameterStatus {
                name: name.to_string(),
                value: value.to_string(),
            })
            .await?;
    }

    framed
        .feed(BackendMessage::BackendKeyData {
            process_id: context.process_id,
            secret_key,
        })
        .await?;
    Ok(())
}

/// Answers an SSLRequest or GSSENCRequest with a single byte.
async fn reply(framed: &mut Framed<Stream, StartupCodec>, answer: u8) -> std::io::Result<()> {
    let stream = framed.get_mut();
    stream.write_all(&[answer]).await?;
    stream.flush().await
}

/// Runs the TLS handshake on the raw socket and resumes startup over it.
async fn upgrade(
    framed: Framed<Stream, StartupCodec>,
    acceptor: &TlsAcceptor,
) -> Result<Framed<Stream, StartupCodec>, ConnectionError> {
    let parts = framed.into_parts();
    // Nothing may follow an SSLRequest until the TLS handshake is done.
    if !parts.read_buf.is_empty() {
        return Err(ProtocolError::InvalidMessage.into());
    }
    let Stream::Plain(socket) = parts.io else {
        return Err(ProtocolError::InvalidMessage.into());
    };
    let tls = acceptor.accept(socket).await.map_err(ConnectionError::Tls)?;
    Ok(Framed::new(Stream::Tls(Box::new(tls)), parts.codec))
}

/// Reads the next `'p'` message of the SASL exchange.
async fn read_auth_payload(
    framed: &mut Framed<Stream, PostgresCodec>,
) -> Result<Bytes, ConnectionError> {
    match framed.next().await.transpose()? {
        Some(FrontendMessage::Password(payload)) => Ok(payload),
        Some(_) => Err(AuthError::UnexpectedMessage.into()),
        None => Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
    }
}
