//! Pushing end of a replication stream
//!
//! States: awaiting the puller's presentation, then syncing in eager or
//! lazy mode until the stream closes. Every local clock change schedules
//! one entropy pass; changes arriving while a pass is pending collapse
//! into it.

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::Notify;
use tracing::{debug, trace};

use dias_core::{DeltaRecord, DiasResult, PeerId, VectorClock};
use dias_store::StoreEvent;
use dias_transport::{Connection, ConnectionSink};
use dias_wire::ReplicationMessage;

use crate::{DeltaMode, Protocol};

/// Push session state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushState {
    AwaitingPresentation,
    Eager,
    Lazy,
}

struct PushSession {
    proto: Arc<Protocol>,
    remote: PeerId,
    sink: ConnectionSink,
    state: PushState,
}

pub(crate) async fn run(
    proto: Arc<Protocol>,
    remote: PeerId,
    conn: Connection,
    shutdown: Arc<Notify>,
) -> DiasResult<()> {
    let (sink, mut source) = conn.split();
    let mut store_events = proto.store().subscribe();
    let mut session = PushSession {
        proto,
        remote,
        sink,
        state: PushState::AwaitingPresentation,
    };
    debug!(peer = %remote, "push session started");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!(peer = %remote, "push session closed locally");
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
                    Ok(StoreEvent::ClockChanged(clock)) => {
                        session.local_changed(clock);
                        true
                    }
                    Ok(_) => false,
                    Err(RecvError::Lagged(_)) => true,
                    Err(RecvError::Closed) => return Ok(()),
                };
                if changed {
                    // fold everything already queued into this pass
                    loop {
                        match store_events.try_recv() {
                            Ok(StoreEvent::ClockChanged(clock)) => session.local_changed(clock),
                            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                        }
                    }
                    if session.state != PushState::AwaitingPresentation {
                        session.reduce_entropy().await?;
                    }
                }
            }
        }
    }
}

impl PushSession {
    fn local_changed(&self, clock: VectorClock) {
        trace!(peer = %self.remote, clock = ?clock, "local clock changed");
        self.proto.clocks().set_for(self.proto.self_id(), clock);
    }

    fn local_clock(&self) -> VectorClock {
        self.proto.clocks().get_for(&self.proto.self_id())
    }

    fn remote_clock(&self) -> VectorClock {
        self.proto.clocks().get_for(&self.remote)
    }

    fn remote_needs_update(&self, local: &VectorClock) -> bool {
        !self.remote_clock().dominates(local)
    }

    async fn on_message(&mut self, message: ReplicationMessage) -> DiasResult<()> {
        let ReplicationMessage::Presentation {
            clock,
            start_lazy,
            start_eager,
        } = message
        else {
            return Err(dias_core::DiasError::UnexpectedMessage(
                "pushing end only accepts presentations".into(),
            ));
        };

        if self.state == PushState::AwaitingPresentation {
            self.state = PushState::Eager;
        }
        if start_lazy {
            debug!(peer = %self.remote, "push now lazy");
            self.state = PushState::Lazy;
        }
        if start_eager {
            debug!(peer = %self.remote, "push now eager");
            self.state = PushState::Eager;
        }

        let has_clock = clock.is_some();
        if let Some(clock) = clock {
            self.proto.clocks().set_for(self.remote, clock);
        }
        if has_clock || start_eager {
            let local = self.proto.store().latest_clock().await?;
            self.proto.clocks().set_for(self.proto.self_id(), local);
            self.reduce_entropy().await?;
        }
        Ok(())
    }

    async fn reduce_entropy(&mut self) -> DiasResult<()> {
        let local = self.local_clock();
        if !self.remote_needs_update(&local) {
            trace!(peer = %self.remote, "remote up to date");
            return Ok(());
        }
        match self.state {
            PushState::Eager => self.update_remote(&local).await,
            PushState::Lazy => {
                self.send(&ReplicationMessage::heartbeat(local)).await
            }
            PushState::AwaitingPresentation => Ok(()),
        }
    }

    async fn update_remote(&mut self, local: &VectorClock) -> DiasResult<()> {
        self.push_deltas().await?;
        if !self.remote_needs_update(local) {
            return Ok(());
        }

        debug!(peer = %self.remote, "deltas not enough, pushing states");
        let (clock, states) = self.proto.store().clock_and_states().await?;
        if clock.is_empty() {
            return Ok(());
        }
        self.proto.clocks().set_for(self.remote, clock.clone());
        self.send(&ReplicationMessage::State {
            clock,
            states: Some(states),
        })
        .await
    }

    async fn push_deltas(&mut self) -> DiasResult<()> {
        let since = self.remote_clock();
        let store = self.proto.store();
        let records: Vec<DeltaRecord> = match self.proto.config().delta_mode {
            DeltaMode::Stream => store.delta_stream(&since).await?.collect(),
            DeltaMode::Batch => match store.delta_batch(&since).await {
                Ok(batch) => batch,
                Err(e) => {
                    debug!(peer = %self.remote, error = %e, "delta batch unavailable, streaming");
                    store.delta_stream(&since).await?.collect()
                }
            },
        };
        for record in records {
            self.proto.clocks().set_for(self.remote, record.next_clock());
            self.send(&ReplicationMessage::Delta(record)).await?;
        }
        Ok(())
    }

    async fn send(&self, message: &ReplicationMessage) -> DiasResult<()> {
        self.proto.send(&self.sink, self.remote, message).await
    }
}
