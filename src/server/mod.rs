use std::{future::Future, io, net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::JoinHandle,
};

use crate::{config::Config, hardware::Hardware};

pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use error::{CommandError, ErrorKind};
pub use protocol::Envelope;

/// Single-client TCP front end. A connection arriving while a session is
/// active is closed immediately.
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub async fn bind(config: &Config, hardware: Arc<dyn Hardware>) -> io::Result<Self> {
        let listener = TcpListener::bind((config.server.host, config.server.port)).await?;
        let dispatcher = Dispatcher::new(hardware, config.monitor.clone());

        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until `shutdown` resolves, then aborts the active session.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        tokio::pin!(shutdown);

        let mut session: Option<JoinHandle<()>> = None;

        tracing::info!("Listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {e}");
                        continue;
                    }
                },
            };

            if session.as_ref().is_some_and(|task| !task.is_finished()) {
                tracing::warn!("Rejecting {peer}, a client is already connected");
                drop(stream);
                continue;
            }

            session = Some(tokio::spawn(Self::session(
                self.dispatcher.clone(),
                stream,
                peer,
            )));
        }

        if let Some(task) = session {
            task.abort();
            let _ = task.await;
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    #[tracing::instrument(name = "session", skip_all, fields(peer = %peer))]
    async fn session(dispatcher: Arc<Dispatcher>, stream: TcpStream, peer: SocketAddr) {
        tracing::info!("Client connected");

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to disable Nagle's algorithm: {e}");
        }

        match dispatcher.serve(stream).await {
            Ok(()) => tracing::info!("Client disconnected"),
            Err(e) => tracing::warn!("Client connection lost: {e}"),
        }
    }
}
