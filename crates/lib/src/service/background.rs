//! Background loop driving a started [`SyncService`].
//!
//! Commands are drained after every unit of work, so triggers that arrive
//! while a cycle runs collapse into a single follow-up cycle and a shutdown
//! request always wins over timers that became due in the meantime.

use std::time::Duration;

use tokio::{
    sync::mpsc::{self, error::TryRecvError},
    time::{Instant, MissedTickBehavior, interval_at, sleep_until},
};
use tracing::{Instrument, debug, info, info_span};

use super::SyncService;

/// Commands accepted by the background loop.
#[derive(Debug)]
pub(super) enum SyncCommand {
    /// Process pending events after the high-priority delay.
    Expedite,
    /// Run a reconciliation cycle now.
    Trigger { reason: String },
    /// Finish the current work and exit.
    Shutdown,
}

/// Work requested through commands and not yet done.
#[derive(Debug, Default)]
struct Requests {
    /// Reason of the first trigger since the last cycle.
    trigger: Option<String>,
    /// Pending fast-path deadline. Later expedite requests fold into it.
    expedite_at: Option<Instant>,
    shutdown: bool,
}

impl Requests {
    fn accept(&mut self, command: Option<SyncCommand>, high_priority_delay: Duration) {
        match command {
            Some(SyncCommand::Expedite) => {
                if self.expedite_at.is_none() {
                    debug!("scheduling fast-path processing");
                    self.expedite_at = Some(Instant::now() + high_priority_delay);
                }
            }
            Some(SyncCommand::Trigger { reason }) => match &self.trigger {
                Some(first) => debug!(%reason, %first, "trigger coalesced"),
                None => self.trigger = Some(reason),
            },
            Some(SyncCommand::Shutdown) | None => self.shutdown = true,
        }
    }

    /// Take every command already waiting in the channel.
    fn absorb(&mut self, commands: &mut mpsc::Receiver<SyncCommand>, high_priority_delay: Duration) {
        loop {
            match commands.try_recv() {
                Ok(command) => self.accept(Some(command), high_priority_delay),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.accept(None, high_priority_delay);
                    break;
                }
            }
        }
    }
}

async fn at_or_never(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub(super) async fn run(service: SyncService, mut commands: mpsc::Receiver<SyncCommand>) {
    async move {
        let config = service.config().clone();
        let high_priority_delay = config.high_priority_delay();
        info!(
            interval_secs = config.sync_interval_secs,
            initial_delay_ms = config.initial_delay_ms,
            "starting background sync"
        );

        let mut periodic = interval_at(
            Instant::now() + config.initial_delay(),
            config.sync_interval(),
        );
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut requests = Requests::default();

        loop {
            if requests.shutdown {
                info!("background sync shutting down");
                break;
            }
            if let Some(reason) = requests.trigger.take() {
                service.trigger_sync(&reason).await;
                requests.absorb(&mut commands, high_priority_delay);
                continue;
            }

            let expedite = at_or_never(requests.expedite_at);
            let retry = at_or_never(service.next_retry_in().map(|wait| Instant::now() + wait));

            tokio::select! {
                biased;

                command = commands.recv() => {
                    requests.accept(command, high_priority_delay);
                }

                _ = periodic.tick() => {
                    service.perform_synchronization().await;
                }

                _ = expedite => {
                    requests.expedite_at = None;
                    let results = service.process_pending_events().await;
                    debug!(count = results.len(), "fast-path processing done");
                }

                _ = retry => {
                    let results = service.process_pending_events().await;
                    debug!(count = results.len(), "retry processing done");
                }

                // A failed event was put back; recompute the retry deadline.
                _ = service.retry_scheduled() => {}
            }

            requests.absorb(&mut commands, high_priority_delay);
        }
    }
    .instrument(info_span!("background_sync"))
    .await
}
