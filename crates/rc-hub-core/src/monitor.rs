use rc_types::models::{CommandKind, InFlightCommand};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::warn;

/// Warning threshold: past this many seconds of elapsed runtime, the agent
/// gets a one-time textual warning.
pub const WARN_THRESHOLD: Duration = Duration::from_secs(90);
/// Hard timeout: past this, the command is cancelled and the record dropped.
pub const HARD_TIMEOUT: Duration = Duration::from_secs(120);
/// Monitor tick period.
pub const TICK_PERIOD: Duration = Duration::from_secs(5);

/// Outcome of feeding one `…:END` result into the monitor.
pub enum ResultOutcome {
    /// More sub-results are still expected (a `SIMPL` batch not yet complete).
    AwaitingMore,
    /// The command is fully finalized; carries the joined output ready for
    /// persistence and, if this command was tied to a deferred record, the
    /// index to credit.
    Finished {
        combined: String,
        kind: CommandKind,
        command_text: String,
        deferred_index: Option<u64>,
    },
}

/// The command monitor (C6): at most one in-flight command per connected
/// agent id, plus the per-agent FIFO of deferred-command indices awaiting a
/// result (so a replayed deferred command's completion can be credited back
/// to the right record once its result arrives).
#[derive(Default)]
pub struct CommandMonitor {
    inflight: RwLock<HashMap<String, InFlightCommand>>,
    deferred_pending: RwLock<HashMap<String, VecDeque<u64>>>,
    warned: RwLock<HashSet<String>>,
}

impl CommandMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the start of a new in-flight command. Per testable property
    /// 6, at most one record may exist per id at a time; a second register
    /// before unregister is a programming error in the caller.
    pub async fn register(&self, id: &str, kind: CommandKind, command_text: impl Into<String>, total: u32) {
        let mut guard = self.inflight.write().await;
        let previous = guard.insert(id.to_string(), InFlightCommand::new(kind, command_text, total));
        debug_assert!(
            previous.is_none(),
            "in-flight command invariant violated: {id} already had a record"
        );
        self.warned.write().await.remove(id);
    }

    pub async fn unregister(&self, id: &str) -> Option<InFlightCommand> {
        self.inflight.write().await.remove(id)
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.inflight.read().await.contains_key(id)
    }

    /// Pushes a deferred-command index onto `id`'s replay FIFO, so that the
    /// next result this agent produces credits that record.
    pub async fn push_deferred_pending(&self, id: &str, deferred_id: u64) {
        self.deferred_pending
            .write()
            .await
            .entry(id.to_string())
            .or_default()
            .push_back(deferred_id);
    }

    /// Pops the next pending deferred index for `id`. Used both by
    /// `record_result` on a finished command and directly by a session's
    /// `EXPORT` batch handler, whose completion is signalled by a dedicated
    /// `EXPORT:COMPLETE` line rather than an `OUTPUT:END`/`FILETRU:END`.
    pub(crate) async fn pop_deferred_pending(&self, id: &str) -> Option<u64> {
        let mut guard = self.deferred_pending.write().await;
        let queue = guard.get_mut(id)?;
        let popped = queue.pop_front();
        if queue.is_empty() {
            guard.remove(id);
        }
        popped
    }

    /// Clears `id`'s deferred-replay FIFO (used on disconnect, mirroring the
    /// discard of an in-flight record).
    pub async fn clear_deferred_pending(&self, id: &str) {
        self.deferred_pending.write().await.remove(id);
    }

    /// Feeds one finished result stream (`OUTPUT:END` / `FILETRU:END`) into
    /// the in-flight record for `id`. Returns `None` if there is no in-flight
    /// record for `id` — a late result after a timeout or manual cancel is
    /// treated as an unknown frame by the caller.
    pub async fn record_result(&self, id: &str, output: String) -> Option<ResultOutcome> {
        let finished = {
            let mut guard = self.inflight.write().await;
            let record = guard.get_mut(id)?;
            record.accumulated_output.push(output);
            record.received_subcommands += 1;
            record.is_complete()
        };

        if !finished {
            return Some(ResultOutcome::AwaitingMore);
        }

        let record = self.inflight.write().await.remove(id)?;
        let deferred_index = self.pop_deferred_pending(id).await;
        Some(ResultOutcome::Finished {
            combined: record.combined_output(),
            kind: record.kind,
            command_text: record.command_text,
            deferred_index,
        })
    }

    /// Snapshot of every currently in-flight command, for the periodic
    /// server-state snapshot and the `status` console command.
    pub async fn active_snapshot(&self) -> HashMap<String, InFlightCommand> {
        self.inflight.read().await.clone()
    }

    /// One monitor tick: warns agents past `WARN_THRESHOLD` once, and
    /// cancels (returning the ids to notify) agents past `HARD_TIMEOUT`.
    pub async fn tick(&self) -> TickResult {
        let now = chrono::Utc::now();
        let mut to_warn = Vec::new();
        let mut to_cancel = Vec::new();

        {
            let guard = self.inflight.read().await;
            let mut warned = self.warned.write().await;
            for (id, record) in guard.iter() {
                let elapsed = now.signed_duration_since(record.start_time);
                let elapsed = Duration::from_secs(elapsed.num_seconds().max(0) as u64);

                if elapsed > HARD_TIMEOUT {
                    to_cancel.push(id.clone());
                } else if elapsed > WARN_THRESHOLD && !warned.contains(id) {
                    warned.insert(id.clone());
                    to_warn.push((id.clone(), elapsed));
                }
            }
        }

        for id in &to_cancel {
            self.warned.write().await.remove(id);
            if let Some(record) = self.unregister(id).await {
                warn!(agent = %id, command = %record.command_text, "command exceeded hard timeout, cancelling");
            }
            self.clear_deferred_pending(id).await;
        }

        TickResult { to_warn, to_cancel }
    }
}

/// What a caller (the hub orchestrator's monitor task) should do after a
/// tick: send a warning line to each id in `to_warn`, and `CMD:CANCEL_TIMEOUT`
/// to each id in `to_cancel`.
pub struct TickResult {
    pub to_warn: Vec<(String, Duration)>,
    pub to_cancel: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_in_flight_per_agent() {
        let monitor = CommandMonitor::new();
        monitor.register("eve", CommandKind::Cmd, "whoami", 1).await;
        assert!(monitor.is_registered("eve").await);
        monitor.unregister("eve").await;
        assert!(!monitor.is_registered("eve").await);
    }

    #[tokio::test]
    async fn multi_result_aggregation_waits_for_every_subcommand() {
        let monitor = CommandMonitor::new();
        monitor.register("bob", CommandKind::Simpl, "simpl (3 commands)", 3).await;

        assert!(matches!(
            monitor.record_result("bob", "l1".into()).await,
            Some(ResultOutcome::AwaitingMore)
        ));
        assert!(matches!(
            monitor.record_result("bob", "l2".into()).await,
            Some(ResultOutcome::AwaitingMore)
        ));
        match monitor.record_result("bob", "l3".into()).await {
            Some(ResultOutcome::Finished { combined, .. }) => {
                assert_eq!(combined, "l1\n\nl2\n\nl3");
            }
            _ => panic!("expected the third result to finalize the command"),
        }
        assert!(!monitor.is_registered("bob").await);
    }

    #[tokio::test]
    async fn unknown_result_after_unregister_is_none() {
        let monitor = CommandMonitor::new();
        assert!(monitor.record_result("ghost", "late".into()).await.is_none());
    }

    #[tokio::test]
    async fn deferred_index_is_popped_on_finish() {
        let monitor = CommandMonitor::new();
        monitor.register("carl", CommandKind::Cmd, "uptime", 1).await;
        monitor.push_deferred_pending("carl", 7).await;

        match monitor.record_result("carl", "up 3 days".into()).await {
            Some(ResultOutcome::Finished { deferred_index, .. }) => {
                assert_eq!(deferred_index, Some(7));
            }
            _ => panic!("expected a finished result"),
        }
    }
}
