//! Transport factory.
//!
//! A [`Connector`] opens one duplex byte channel per client connection. The
//! production implementation, [`LocalSocketConnector`], resolves the channel
//! with the [`locator`](crate::ipc::locator) and connects through
//! `interprocess` local sockets; tests substitute in-memory pipes.

use futures_util::future::BoxFuture;
use interprocess::local_socket::tokio::Stream as LocalStream;
use interprocess::local_socket::traits::tokio::Stream as _;
use interprocess::local_socket::{GenericFilePath, ToFsName};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::ipc::locator::{locate, Platform, PipeSelector};
use crate::{AppError, Result};

/// Any duplex byte stream usable as the IPC channel.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased transport.
pub type BoxedTransport = Box<dyn Transport>;

/// Opens the duplex channel to the server.
pub trait Connector: Send + Sync {
    /// Connect and return the open channel.
    ///
    /// Implementations report "no channel" and "connection refused" as
    /// [`AppError::InvalidPipe`].
    fn connect(&self) -> BoxFuture<'_, Result<BoxedTransport>>;
}

/// Connects to the desktop application's local socket or named pipe.
#[derive(Debug, Clone)]
pub struct LocalSocketConnector {
    platform: Platform,
    selector: PipeSelector,
}

impl LocalSocketConnector {
    /// Connector for `selector` on `platform`.
    #[must_use]
    pub fn new(platform: Platform, selector: PipeSelector) -> Self {
        Self { platform, selector }
    }

    /// Connector for the running OS.
    #[must_use]
    pub fn for_current_platform(selector: PipeSelector) -> Self {
        Self::new(Platform::from_env(), selector)
    }

    async fn open(&self) -> Result<BoxedTransport> {
        let path = locate(&self.platform, &self.selector)?;
        debug!(path = %path.display(), "transport: connecting");

        let name = path
            .as_path()
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| AppError::InvalidPipe(format!("invalid pipe path '{}': {err}", path.display())))?;

        let stream = LocalStream::connect(name)
            .await
            .map_err(|err| AppError::InvalidPipe(format!("connect to '{}' failed: {err}", path.display())))?;

        info!(path = %path.display(), "transport: connected");
        Ok(Box::new(stream))
    }
}

impl Connector for LocalSocketConnector {
    fn connect(&self) -> BoxFuture<'_, Result<BoxedTransport>> {
        Box::pin(self.open())
    }
}
