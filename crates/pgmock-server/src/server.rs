use crate::handler::Handler;
use crate::registry::Registry;
use crate::session::Session;
use anyhow::Context;
use metrics::{counter, gauge};
use pgmock_core::ResponseProvider;
use pgmock_protocol::WireCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Accepts client connections and runs one session task per connection.
pub struct Server {
    listener: TcpListener,
    handler: Arc<Handler>,
    registry: Arc<Registry>,
    max_message_length: usize,
}

impl Server {
    pub async fn bind(
        addr: &str,
        provider: Arc<dyn ResponseProvider>,
        max_message_length: usize,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        Ok(Self {
            listener,
            handler: Arc::new(Handler::new(provider)),
            registry: Arc::new(Registry::new()),
            max_message_length,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Accept loop. A failed accept is logged and never stops the server.
    pub async fn serve(self) -> anyhow::Result<()> {
        info!("pgmock listening on {}", self.local_addr()?);
        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => self.spawn_session(socket, peer),
                Err(err) => {
                    error!("accept error: {err}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn spawn_session(&self, socket: TcpStream, peer: SocketAddr) {
        if let Err(err) = socket.set_nodelay(true) {
            debug!(%peer, "set_nodelay failed: {err}");
        }
        let (key, control) = self.registry.register();
        let pid = key.process_id;
        counter!("pgmock_sessions_accepted_total").increment(1);
        gauge!("pgmock_sessions_active").increment(1.0);
        debug!(pid, %peer, "accepted connection");

        let wire = WireCodec::new(BufReader::new(socket))
            .with_max_message_length(self.max_message_length);
        let session = Session::new(
            wire,
            key,
            self.handler.clone(),
            self.registry.clone(),
            control,
        );
        let task = tokio::spawn(session.run());

        // The supervisor outlives a panicking session so cleanup always runs.
        let registry = self.registry.clone();
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => debug!(pid, %peer, "session closed"),
                Ok(Err(err)) => warn!(pid, %peer, "session ended: {err:#}"),
                Err(err) if err.is_panic() => error!(pid, %peer, "session panicked"),
                Err(err) => error!(pid, %peer, "session task failed: {err}"),
            }
            registry.unregister(&key);
            gauge!("pgmock_sessions_active").decrement(1.0);
        });
    }
}
