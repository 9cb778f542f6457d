//! Pulling end of a replication stream
//!
//! Presents the local clock, applies what the pusher sends and steers it:
//! - a delta the store already has means another peer is feeding us, so
//!   the pusher is asked to go lazy
//! - a delta that does not fit the local clock means the pusher's view of
//!   us is stale, so the clock is presented again
//! - a heartbeat announcing unseen changes switches the pusher back to eager

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::Notify;
use tracing::{debug, trace};

use dias_core::{DiasError, DiasResult, PeerId, VectorClock};
use dias_store::{SaveOutcome, StoreEvent};
use dias_transport::{Connection, ConnectionSink};
use dias_wire::ReplicationMessage;

use crate::Protocol;

struct PullSession {
    proto: Arc<Protocol>,
    remote: PeerId,
    sink: ConnectionSink,
    /// Clock reached by our own latest save; no need to present it
    last_saved: Option<VectorClock>,
}

pub(crate) async fn run(
    proto: Arc<Protocol>,
    remote: PeerId,
    conn: Connection,
    shutdown: Arc<Notify>,
) -> DiasResult<()> {
    let (sink, mut source) = conn.split();
    let mut store_events = proto.store().subscribe();
    let mut session = PullSession {
        proto,
        remote,
        sink,
        last_saved: None,
    };
    debug!(peer = %remote, "pull session started");
    session.present().await?;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!(peer = %remote, "pull session closed locally");
                return Ok(());
            }
            message = source.recv() => {
                let Some(bytes) = message else {
                    return Ok(());
                };
                let message = session.proto.received(remote, &bytes)?;
                session.on_message(message).await?;
            }
            event = store_events.recv() => {
                let changed = match event {
                    Ok(StoreEvent::ClockChanged(_)) | Err(RecvError::Lagged(_)) => true,
                    Ok(_) => false,
                    Err(RecvError::Closed) => return Ok(()),
                };
                if changed {
                    loop {
                        match store_events.try_recv() {
                            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                            _ => {}
                        }
                    }
                    session.clock_changed().await?;
                }
            }
        }
    }
}

impl PullSession {
    async fn present(&self) -> DiasResult<()> {
        let clock = self.proto.store().latest_clock().await?;
        self.send(&ReplicationMessage::presentation(Some(clock))).await
    }

    async fn clock_changed(&mut self) -> DiasResult<()> {
        let clock = self.proto.store().latest_clock().await?;
        if self.last_saved.as_ref() == Some(&clock) {
            return Ok(());
        }
        trace!(peer = %self.remote, clock = ?clock, "re-presenting clock");
        self.send(&ReplicationMessage::presentation(Some(clock))).await
    }

    async fn on_message(&mut self, message: ReplicationMessage) -> DiasResult<()> {
        match message {
            ReplicationMessage::Delta(record) => {
                let next = record.next_clock();
                self.proto.clocks().merge_for(self.remote, &next);
                let outcome = self
                    .proto
                    .store()
                    .save_delta(
                        Some(record.previous_clock),
                        Some(record.author_clock),
                        record.payload,
                    )
                    .await?;
                match outcome {
                    SaveOutcome::Applied(clock) => {
                        trace!(peer = %self.remote, clock = ?clock, "applied delta");
                        self.last_saved = Some(clock);
                    }
                    SaveOutcome::NotApplied => {
                        if self.proto.store().contains(&next).await? {
                            debug!(peer = %self.remote, "already had delta, asking for lazy mode");
                            self.send(&ReplicationMessage::start_lazy(None)).await?;
                        } else {
                            debug!(peer = %self.remote, "delta gap, presenting clock again");
                            self.present().await?;
                        }
                    }
                }
                Ok(())
            }
            ReplicationMessage::State {
                clock,
                states: Some(states),
            } => {
                self.proto.clocks().merge_for(self.remote, &clock);
                if let Some(clock) = self.proto.store().save_states(Some(clock), &states).await? {
                    self.last_saved = Some(clock);
                }
                Ok(())
            }
            ReplicationMessage::State { clock, states: None } => {
                self.proto.clocks().merge_for(self.remote, &clock);
                if !self.proto.store().contains(&clock).await? {
                    debug!(peer = %self.remote, "heartbeat shows news, asking for eager mode");
                    let local = self.proto.store().latest_clock().await?;
                    self.send(&ReplicationMessage::start_eager(Some(local))).await?;
                }
                Ok(())
            }
            ReplicationMessage::Presentation { .. } => Err(DiasError::UnexpectedMessage(
                "pulling end does not accept presentations".into(),
            )),
        }
    }

    async fn send(&self, message: &ReplicationMessage) -> DiasResult<()> {
        self.proto.send(&self.sink, self.remote, message).await
    }
}
