//! Primary/backup failover: heartbeat replication, promotion, and the
//! recovered-primary handshake.

use std::net::SocketAddr;
use std::sync::{PoisonError, Weak};

use crate::coordinator::Coordinator;
use crate::protocol::{CoordinatorRole, Message, NodeKind, Reply};

use tokio::time::{self, Duration, MissedTickBehavior};

/// Outcome of one heartbeat probe by a backup.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PulseOutcome {
    /// Primary answered; its metadata snapshot was adopted.
    Replicated,

    /// Primary did not answer; this coordinator promoted itself.
    Promoted,

    /// Nothing to probe (already primary, or no primary to reach).
    Skipped,
}

impl Coordinator {
    /// Handler of PULSE: served in any role, always with the full metadata
    /// snapshot. A backup only gets pulsed while a restarted primary is still
    /// reclaiming primacy.
    pub(super) fn handle_pulse(&self, sender: SocketAddr) -> Reply {
        if self.role() == CoordinatorRole::Backup {
            pf_debug!(self.tag; "pulse from '{}' while backup", sender);
        } else {
            pf_trace!(self.tag; "pulse from '{}'", sender);
        }
        Reply::with_snapshot(self.pages.snapshot())
    }

    /// Handler of RECOVERED: a primary hands its metadata to the restarted
    /// coordinator, steps down to backup, and starts probing it.
    pub(super) fn handle_recovered(&self, coordinator_addr: SocketAddr) -> Reply {
        let snapshot = {
            let mut role =
                self.role.lock().unwrap_or_else(PoisonError::into_inner);
            if *role != CoordinatorRole::Primary {
                pf_warn!(self.tag; "RECOVERED from '{}' ignored while backup",
                                   coordinator_addr);
                return Reply::nack();
            }
            *role = CoordinatorRole::Backup;
            self.pages.snapshot()
        };

        pf_info!(self.tag; "coordinator '{}' recovered; stepping down to backup",
                           coordinator_addr);
        self.start_heartbeat();
        Reply::with_snapshot(snapshot)
    }

    /// Sends one PULSE to the registered primary. Adopts the returned snapshot
    /// on success; promotes this coordinator if the primary does not answer.
    pub async fn probe_primary(&self) -> PulseOutcome {
        if self.role() == CoordinatorRole::Primary {
            return PulseOutcome::Skipped;
        }

        let primary = match self.registry.lookup_primary() {
            Ok(Some(addr)) if addr != self.addr => addr,
            Ok(_) => {
                pf_error!(self.tag; "no primary coordinator to probe");
                return PulseOutcome::Skipped;
            }
            Err(e) => {
                pf_error!(self.tag; "error looking up primary: {}", e);
                return PulseOutcome::Skipped;
            }
        };

        let reply = self
            .transport
            .call(
                NodeKind::Coordinator,
                primary,
                Message::Pulse { sender: self.addr },
            )
            .await;
        if reply.ack {
            if let Some(snapshot) = reply.snapshot {
                pf_trace!(self.tag; "replicated metadata of {} pages",
                                    snapshot.len());
                self.pages.replace(snapshot);
            }
            PulseOutcome::Replicated
        } else {
            pf_warn!(self.tag; "primary '{}' not answering pulses", primary);
            self.promote().await;
            PulseOutcome::Promoted
        }
    }

    /// Starts the periodic heartbeat thread if not already running.
    pub fn start_heartbeat(&self) {
        let mut handle = self
            .heartbeat_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let interval = Duration::from_millis(self.config.pulse_interval_ms);
        *handle = Some(tokio::spawn(Self::heartbeat_thread(
            self.myself.clone(),
            interval,
        )));
        pf_debug!(self.tag; "heartbeat thread spawned");
    }

    /// Stops the heartbeat thread if running.
    pub fn stop_heartbeat(&self) {
        if let Some(handle) = self
            .heartbeat_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Heartbeat thread function. Exits once the coordinator is dropped or a
    /// probe returns anything but `Replicated`.
    async fn heartbeat_thread(myself: Weak<Coordinator>, interval: Duration) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(me) = myself.upgrade() else {
                break;
            };
            if me.probe_primary().await != PulseOutcome::Replicated {
                pf_debug!(me.tag; "heartbeat thread exitted");
                break;
            }
        }
    }

    /// Takes over as primary: resolves stalled transfers and points every
    /// registered client here. Stops at the first client that does not
    /// acknowledge. Returns true if all clients were re-pointed.
    pub async fn promote(&self) -> bool {
        if self.set_role(CoordinatorRole::Primary) == CoordinatorRole::Primary {
            return true;
        }
        pf_info!(self.tag; "promoted to primary");
        self.resolve_all_stalled();
        self.repoint_clients(true).await
    }

    /// Run at startup of a restarted primary: announces recovery to the other
    /// coordinators, adopts the first snapshot handed back, becomes primary,
    /// and points every registered client here on a best-effort basis.
    /// Returns true if a snapshot was adopted.
    pub async fn recover_primacy(&self) -> bool {
        let coordinators = match self.registry.list_coordinators() {
            Ok(coordinators) => coordinators,
            Err(e) => {
                pf_error!(self.tag; "error listing coordinators: {}", e);
                Vec::new()
            }
        };

        let mut adopted = false;
        for record in coordinators.iter().filter(|c| c.addr != self.addr) {
            let reply = self
                .transport
                .call(
                    NodeKind::Coordinator,
                    record.addr,
                    Message::Recovered {
                        coordinator_addr: self.addr,
                    },
                )
                .await;
            if !reply.ack {
                continue;
            }
            if let Some(snapshot) = reply.snapshot {
                pf_info!(self.tag; "adopted metadata of {} pages from '{}'",
                                   snapshot.len(), record.addr);
                self.pages.replace(snapshot);
            }
            adopted = true;
            break;
        }
        if !adopted {
            pf_warn!(self.tag; "no coordinator handed over metadata");
        }

        self.stop_heartbeat();
        self.set_role(CoordinatorRole::Primary);
        self.resolve_all_stalled();
        self.repoint_clients(false).await;
        adopted
    }

    /// Sends CHANGE_CM to every registered client. Returns true if all of
    /// them acknowledged.
    async fn repoint_clients(&self, abort_on_failure: bool) -> bool {
        let clients = match self.registry.list_clients() {
            Ok(clients) => clients,
            Err(e) => {
                pf_error!(self.tag; "error listing clients: {}", e);
                return false;
            }
        };

        let mut all_acked = true;
        for client in clients {
            let reply = self
                .transport
                .call(
                    NodeKind::Client,
                    client.addr,
                    Message::ChangeCoordinator {
                        new_addr: self.addr,
                    },
                )
                .await;
            if !reply.ack {
                pf_error!(self.tag; "client {} not re-pointed", client);
                all_acked = false;
                if abort_on_failure {
                    break;
                }
            }
        }
        all_acked
    }
}
