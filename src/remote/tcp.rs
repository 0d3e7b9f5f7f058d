//! TCP transport for collector channels
//!
//! One stream per channel, length-delimited frames, bincode-encoded
//! [`Request`]/[`Response`] envelopes matched by correlation id. Calls on one
//! channel are serialized. A call that fails or is dropped at its deadline
//! discards the stream; the next call re-dials the same endpoint.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::remote::channel::{ChannelSettings, CollectorChannel, Connector, Endpoint};
use crate::remote::proto::{
    Commands, CorrelationId, InstancePing, InstanceProperties, MetricCollection, Request,
    RequestBody, Response, ResponseBody,
};
use crate::remote::status::RpcError;

/// Byte stream a channel runs over (plain TCP or TLS)
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type FramedStream = Framed<Box<dyn AsyncStream>, LengthDelimitedCodec>;

/// Connector that dials eagerly so a dead endpoint fails the build
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(crate::utils::DEFAULT_UPSTREAM_TIMEOUT)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        settings: ChannelSettings,
    ) -> Result<Arc<dyn CollectorChannel>, RpcError> {
        let channel = TcpChannel::new(settings, self.connect_timeout);
        let stream = channel.dial().await?;
        *channel.stream.lock().await = Some(stream);
        channel.connected.store(true, Ordering::Release);
        Ok(Arc::new(channel))
    }
}

/// Channel over a single framed TCP stream
pub struct TcpChannel {
    settings: ChannelSettings,
    connect_timeout: Duration,
    stream: Mutex<Option<FramedStream>>,
    connected: AtomicBool,
    shutdown: AtomicBool,
    next_id: AtomicU64,
}

/// Marks the channel disconnected unless the call completed and returned its stream
struct InFlight<'a> {
    connected: &'a AtomicBool,
    completed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.connected.store(false, Ordering::Release);
        }
    }
}

impl TcpChannel {
    pub fn new(settings: ChannelSettings, connect_timeout: Duration) -> Self {
        Self {
            settings,
            connect_timeout,
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    async fn dial(&self) -> Result<FramedStream, RpcError> {
        let endpoint = &self.settings.endpoint;
        let tcp = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| RpcError::unavailable(format!("connect to {} timed out", endpoint)))?
        .map_err(|e| RpcError::unavailable(format!("connect to {} failed: {}", endpoint, e)))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", endpoint, e);
        }

        let stream: Box<dyn AsyncStream> = match &self.settings.tls {
            None => Box::new(tcp),
            #[cfg(feature = "tls")]
            Some(tls) => Box::new(tls::wrap(tcp, tls).await?),
            #[cfg(not(feature = "tls"))]
            Some(_) => {
                return Err(RpcError::new(
                    crate::remote::status::StatusCode::FailedPrecondition,
                    "TLS requested but the tls feature is disabled",
                ))
            }
        };

        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(self.settings.max_frame_length)
            .new_codec();
        debug!("Connected to collector {}", endpoint);
        Ok(Framed::new(stream, codec))
    }

    async fn call(&self, body: RequestBody) -> Result<ResponseBody, RpcError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RpcError::unavailable("channel is shut down"));
        }

        let mut slot = self.stream.lock().await;
        let mut in_flight = InFlight {
            connected: &self.connected,
            completed: false,
        };

        let mut framed = match slot.take() {
            Some(framed) => framed,
            None => self.dial().await?,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            id,
            metadata: self.settings.metadata.clone(),
            body,
        };
        let bytes = bincode::serialize(&request)
            .map_err(|e| RpcError::internal(format!("failed to encode request: {}", e)))?;
        framed.send(bytes::Bytes::from(bytes)).await?;

        let result = Self::read_response(&mut framed, id).await?;

        if !self.shutdown.load(Ordering::Acquire) {
            *slot = Some(framed);
            in_flight.completed = true;
            self.connected.store(true, Ordering::Release);
        }
        result
    }

    async fn read_response(
        framed: &mut FramedStream,
        id: CorrelationId,
    ) -> Result<Result<ResponseBody, RpcError>, RpcError> {
        loop {
            let frame = framed
                .next()
                .await
                .ok_or_else(|| RpcError::unavailable("connection closed by collector"))??;
            let response: Response = bincode::deserialize(&frame)
                .map_err(|e| RpcError::internal(format!("failed to decode response: {}", e)))?;
            if response.id == id {
                return Ok(response.result);
            }
            warn!(
                "Skipping response with correlation_id={}, expected {}",
                response.id, id
            );
        }
    }

    fn expect_commands(body: ResponseBody) -> Result<Commands, RpcError> {
        match body {
            ResponseBody::Commands(commands) => Ok(commands),
            ResponseBody::Empty => Ok(Commands::default()),
        }
    }
}

#[async_trait]
impl CollectorChannel for TcpChannel {
    fn endpoint(&self) -> &Endpoint {
        &self.settings.endpoint
    }

    fn is_connected(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire) && self.connected.load(Ordering::Acquire)
    }

    async fn collect(&self, batch: MetricCollection) -> Result<Commands, RpcError> {
        self.call(RequestBody::Collect(batch))
            .await
            .and_then(Self::expect_commands)
    }

    async fn report_instance_properties(
        &self,
        properties: InstanceProperties,
    ) -> Result<(), RpcError> {
        self.call(RequestBody::ReportInstanceProperties(properties))
            .await
            .map(|_| ())
    }

    async fn keep_alive(&self, ping: InstancePing) -> Result<Commands, RpcError> {
        self.call(RequestBody::KeepAlive(ping))
            .await
            .and_then(Self::expect_commands)
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        // An in-flight call drops its stream itself once it sees the flag
        if let Ok(mut slot) = self.stream.try_lock() {
            slot.take();
        }
        debug!("Channel to {} shut down", self.settings.endpoint);
    }
}

#[cfg(feature = "tls")]
mod tls {
    use rustls::{ClientConfig, RootCertStore, ServerName};
    use std::io::BufReader;
    use std::sync::Arc;
    use tokio::net::TcpStream;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::TlsConnector;

    use crate::remote::channel::TlsSettings;
    use crate::remote::status::{RpcError, StatusCode};

    pub(super) async fn wrap(
        tcp: TcpStream,
        settings: &TlsSettings,
    ) -> Result<TlsStream<TcpStream>, RpcError> {
        let file = std::fs::File::open(&settings.ca_path).map_err(|e| {
            RpcError::new(
                StatusCode::FailedPrecondition,
                format!("cannot open {}: {}", settings.ca_path.display(), e),
            )
        })?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file)).map_err(|e| {
            RpcError::new(
                StatusCode::FailedPrecondition,
                format!("invalid CA file {}: {}", settings.ca_path.display(), e),
            )
        })?;

        let mut roots = RootCertStore::empty();
        let (added, _ignored) = roots.add_parsable_certificates(&certs);
        if added == 0 {
            return Err(RpcError::new(
                StatusCode::FailedPrecondition,
                format!("no usable certificate in {}", settings.ca_path.display()),
            ));
        }

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = ServerName::try_from(settings.server_name.as_str()).map_err(|e| {
            RpcError::new(
                StatusCode::InvalidArgument,
                format!("invalid server name {}: {}", settings.server_name, e),
            )
        })?;

        TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
            .map_err(RpcError::from)
    }
}
