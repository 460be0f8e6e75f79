use crate::handler::Handler;
use crate::registry::{Control, Registry};
use anyhow::Context;
use pgmock_core::SessionKey;
use pgmock_protocol::messages::{Authentication, ErrorResponse, ReadyForQuery};
use pgmock_protocol::{BackendMessage, FrontendMessage, ProtocolError, StartupPacket, WireCodec};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    PreAuth,
    Ready,
}

/// Whether the message loop keeps going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Close,
}

enum Event {
    Control(Control),
    Tag(Result<u8, ProtocolError>),
}

/// One client connection: handshake first, then steady-state dispatch.
pub struct Session<S> {
    wire: WireCodec<S>,
    key: SessionKey,
    state: SessionState,
    handler: Arc<Handler>,
    registry: Arc<Registry>,
    control: UnboundedReceiver<Control>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(
        wire: WireCodec<S>,
        key: SessionKey,
        handler: Arc<Handler>,
        registry: Arc<Registry>,
        control: UnboundedReceiver<Control>,
    ) -> Self {
        Self {
            wire,
            key,
            state: SessionState::PreAuth,
            handler,
            registry,
            control,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs until the client terminates, disconnects, or an error occurs.
    /// A clean disconnect between messages is not an error.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            let step = match self.state {
                SessionState::PreAuth => self.handshake().await?,
                SessionState::Ready => self.next_message().await?,
            };
            if step == Step::Close {
                return Ok(());
            }
        }
    }

    async fn handshake(&mut self) -> anyhow::Result<Step> {
        let packet = match StartupPacket::read(&mut self.wire).await {
            Ok(packet) => packet,
            Err(err) if err.is_eof() => return Ok(Step::Close),
            Err(err) => return Err(err).context("reading startup packet"),
        };
        match packet {
            StartupPacket::SslRequest | StartupPacket::GssEncRequest => {
                debug!(pid = self.key.process_id, "declining encryption request");
                self.wire.write_u8(b'N');
                self.wire.flush().await?;
                Ok(Step::Continue)
            }
            StartupPacket::CancelRequest(target) => {
                metrics::counter!("pgmock_cancel_requests_total").increment(1);
                let delivered = self.registry.issue_cancel_request(target);
                info!(
                    target_pid = target.process_id,
                    delivered, "cancel request received"
                );
                Ok(Step::Close)
            }
            StartupPacket::Startup(startup) => {
                debug!(
                    pid = self.key.process_id,
                    parameters = ?startup.parameters,
                    "startup"
                );
                // Control work queued before the client held its key is stale.
                let mut stale = 0usize;
                while self.control.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!(
                        pid = self.key.process_id,
                        stale, "dropped control work queued before startup"
                    );
                }
                self.state = SessionState::Ready;
                BackendMessage::Authentication(Authentication::Ok).encode(&mut self.wire)?;
                BackendMessage::BackendKeyData(self.key).encode(&mut self.wire)?;
                BackendMessage::ReadyForQuery(ReadyForQuery::idle()).encode(&mut self.wire)?;
                self.wire.flush().await.context("completing handshake")?;
                info!(pid = self.key.process_id, "session ready");
                Ok(Step::Continue)
            }
            StartupPacket::Unsupported { code } => {
                warn!(pid = self.key.process_id, code, "ignoring unknown negotiation code");
                Ok(Step::Continue)
            }
        }
    }

    async fn next_message(&mut self) -> anyhow::Result<Step> {
        // Control work is drained before the next message is read. Reading a
        // single tag byte loses nothing if the control branch wins the race.
        let event = tokio::select! {
            biased;
            Some(control) = self.control.recv() => Event::Control(control),
            tag = self.wire.read_u8() => Event::Tag(tag),
        };
        let tag = match event {
            Event::Control(control) => {
                self.apply(control).await?;
                return Ok(Step::Continue);
            }
            Event::Tag(Ok(tag)) => tag,
            Event::Tag(Err(err)) if err.is_eof() => {
                debug!(pid = self.key.process_id, "client disconnected");
                return Ok(Step::Close);
            }
            Event::Tag(Err(err)) => return Err(err.into()),
        };
        let body = self.wire.read_body().await?;
        let message = FrontendMessage::decode(tag, &body).await?;
        self.dispatch(message).await
    }

    async fn apply(&mut self, control: Control) -> anyhow::Result<()> {
        match control {
            Control::Cancel => {
                info!(pid = self.key.process_id, "cancelling session work");
                BackendMessage::ErrorResponse(ErrorResponse::query_canceled())
                    .encode(&mut self.wire)?;
                BackendMessage::ReadyForQuery(ReadyForQuery::idle()).encode(&mut self.wire)?;
                self.wire.flush().await.context("delivering cancellation")?;
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, message: FrontendMessage) -> anyhow::Result<Step> {
        match message {
            FrontendMessage::Terminate => {
                debug!(pid = self.key.process_id, "terminate");
                return Ok(Step::Close);
            }
            FrontendMessage::Query(query) => {
                self.handler.handle_query(&mut self.wire, &query).await?;
            }
            FrontendMessage::Parse(parse) => {
                self.handler.handle_parse(&mut self.wire, &parse).await?;
            }
            FrontendMessage::Describe(describe) => {
                self.handler
                    .handle_describe(&mut self.wire, &describe)
                    .await?;
            }
            FrontendMessage::Bind(bind) => {
                debug!(portal = %bind.portal, statement = %bind.statement, "bind");
                BackendMessage::BindComplete.encode(&mut self.wire)?;
                self.wire.flush().await?;
            }
            FrontendMessage::Close(close) => {
                debug!(kind = ?close.target, name = %close.name, "close");
                BackendMessage::CloseComplete.encode(&mut self.wire)?;
                self.wire.flush().await?;
            }
            FrontendMessage::Sync => {
                BackendMessage::ReadyForQuery(ReadyForQuery::idle()).encode(&mut self.wire)?;
                self.wire.flush().await?;
            }
            FrontendMessage::Flush => {
                self.wire.flush().await?;
            }
            FrontendMessage::Execute(execute) => {
                debug!(portal = %execute.portal, max_rows = execute.max_rows, "execute");
            }
            FrontendMessage::Unsupported { tag } => {
                debug!(
                    pid = self.key.process_id,
                    tag = %(tag as char),
                    "skipping unsupported message"
                );
            }
        }
        Ok(Step::Continue)
    }
}
