//! TCP transport for a Space.
//!
//! `SpaceServer` exposes any [`Space`] on a socket; `RemoteSpace` is the
//! client handle workers use. Each call opens its own connection, sends one
//! request line and reads one response line. A blocking `take` whose client
//! disconnects is abandoned without consuming anything.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::wire::{Request, Response, WireError};
use super::{LeaseId, Space, SpaceError, Wait};
use crate::domain::{Entry, Template};

pub struct SpaceServer {
    listener: TcpListener,
    space: Arc<dyn Space>,
}

impl SpaceServer {
    pub async fn bind(addr: SocketAddr, space: Arc<dyn Space>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, space })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(self, shutdown: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, "space server listening"),
            Err(e) => tracing::warn!(error = %e, "space server listening on unknown address"),
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let space = Arc::clone(&self.space);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, space, shutdown).await {
                            tracing::debug!(%peer, error = %e, "connection dropped");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
        tracing::info!("space server stopped");
    }
}

async fn handle_connection(stream: TcpStream, space: Arc<dyn Space>, shutdown: CancellationToken) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let request: Request = match serde_json::from_str(&line) {
        Ok(request) => request,
        Err(e) => {
            let response = Response::Error {
                error: WireError::Failed(format!("malformed request: {e}")),
            };
            return send(&mut write_half, &response).await;
        }
    };

    // The client sends nothing after its request, so any further read
    // completing means it went away.
    let mut rest = String::new();
    let response = tokio::select! {
        response = dispatch(space.as_ref(), request) => response,
        _ = reader.read_line(&mut rest) => {
            tracing::debug!("client left before reply; request abandoned");
            return Ok(());
        }
        _ = shutdown.cancelled() => return Ok(()),
    };

    send(&mut write_half, &response).await
}

async fn dispatch(space: &dyn Space, request: Request) -> Response {
    let result = match request {
        Request::Write { entry, lease } => space.write(entry, lease).await.map(|lease| Response::Lease { lease }),
        Request::Take { template, wait } => space.take(&template, wait).await.map(|entry| Response::Entry { entry }),
        Request::Read { template, wait } => space.read(&template, wait).await.map(|entry| Response::Entry { entry }),
        Request::ReadAll { template } => space.read_all(&template).await.map(|entries| Response::Entries { entries }),
        Request::Renew { lease, period } => space.renew(lease, period).await.map(|()| Response::Done),
        Request::Cancel { lease } => space.cancel(lease).await.map(|entry| Response::Entry { entry }),
    };
    result.unwrap_or_else(|e| Response::Error { error: WireError::from(&e) })
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> io::Result<()> {
    let mut line = serde_json::to_string(response).map_err(io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Client handle for a Space served by [`SpaceServer`].
#[derive(Debug, Clone)]
pub struct RemoteSpace {
    addr: SocketAddr,
}

impl RemoteSpace {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Check that the server answers before handing out the handle.
    pub async fn connect(addr: SocketAddr) -> Result<Self, SpaceError> {
        TcpStream::connect(addr).await?;
        Ok(Self::new(addr))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn call(&self, request: Request) -> Result<Response, SpaceError> {
        let stream = TcpStream::connect(self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(&request).map_err(|e| SpaceError::Protocol(e.to_string()))?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;
        write_half.flush().await?;

        let mut reply = String::new();
        if BufReader::new(read_half).read_line(&mut reply).await? == 0 {
            return Err(SpaceError::Unreachable(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }
        match serde_json::from_str(&reply).map_err(|e| SpaceError::Protocol(e.to_string()))? {
            Response::Error { error } => Err(request.error(error)),
            response => Ok(response),
        }
    }
}

fn unexpected(response: Response) -> SpaceError {
    SpaceError::Protocol(format!("unexpected response {response:?}"))
}

#[async_trait]
impl Space for RemoteSpace {
    async fn write(&self, entry: Entry, lease: Option<Duration>) -> Result<LeaseId, SpaceError> {
        match self.call(Request::Write { entry, lease }).await? {
            Response::Lease { lease } => Ok(lease),
            other => Err(unexpected(other)),
        }
    }

    async fn take(&self, template: &Template, wait: Wait) -> Result<Entry, SpaceError> {
        let request = Request::Take {
            template: template.clone(),
            wait,
        };
        match self.call(request).await? {
            Response::Entry { entry } => Ok(entry),
            other => Err(unexpected(other)),
        }
    }

    async fn read(&self, template: &Template, wait: Wait) -> Result<Entry, SpaceError> {
        let request = Request::Read {
            template: template.clone(),
            wait,
        };
        match self.call(request).await? {
            Response::Entry { entry } => Ok(entry),
            other => Err(unexpected(other)),
        }
    }

    async fn read_all(&self, template: &Template) -> Result<Vec<Entry>, SpaceError> {
        let request = Request::ReadAll {
            template: template.clone(),
        };
        match self.call(request).await? {
            Response::Entries { entries } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    async fn renew(&self, lease: LeaseId, period: Duration) -> Result<(), SpaceError> {
        match self.call(Request::Renew { lease, period }).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn cancel(&self, lease: LeaseId) -> Result<Entry, SpaceError> {
        match self.call(Request::Cancel { lease }).await? {
            Response::Entry { entry } => Ok(entry),
            other => Err(unexpected(other)),
        }
    }
}
