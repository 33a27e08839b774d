//! Update manager
//!
//! The UpdateManager is responsible for:
//! - Receiving name change requests from an NcrSource
//! - Matching each request to its forward and reverse domains
//! - Running one transaction per request, a bounded number at a time
//! - Reporting outcomes as manager events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  NcrSource  │─── NameChangeRequest ───┐
//! └─────────────┘                         │
//!                                         ▼
//!                                ┌────────────────┐
//!                                │ UpdateManager  │
//!                                └────────────────┘
//!                                         │
//!         ┌───────────────────────────────┼──────────────────────────┐
//!         │                               │                          │
//!         ▼                               ▼                          ▼
//! ┌───────────────┐             ┌──────────────────┐         ┌─────────────┐
//! │ Domain lists  │             │ Transactions     │         │   Events    │
//! │ (match)       │             │ (JoinSet)        │         │  (notify)   │
//! └───────────────┘             └──────────────────┘         └─────────────┘
//! ```
//!
//! ## Request Flow
//!
//! 1. Request received and validated
//! 2. Queued, unless the queue is full
//! 3. Started when a transaction slot is free and no other transaction is
//!    working on the same DHCID
//! 4. Transaction driven to completion over the DnsTransport
//! 5. Outcome emitted

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::add::SimpleAddTransaction;
use crate::config::UpdateConfig;
use crate::domain::reverse_name;
use crate::error::Result;
use crate::ncr::{ChangeType, Dhcid, NameChangeRequest, NcrStatus};
use crate::remove::SimpleRemoveTransaction;
use crate::traits::{DnsTransport, NcrSource};
use crate::transaction::{UpdateTransaction, drive};

/// Events emitted by the UpdateManager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Manager started
    Started {
        forward_domains: usize,
        reverse_domains: usize,
    },

    /// Request accepted into the queue
    RequestQueued {
        fqdn: String,
        change_type: ChangeType,
    },

    /// Request discarded without a transaction
    RequestDropped { fqdn: String, reason: String },

    /// Transaction started
    TransactionStarted {
        fqdn: String,
        change_type: ChangeType,
    },

    /// Transaction ended with every requested change applied
    TransactionCompleted {
        fqdn: String,
        change_type: ChangeType,
    },

    /// Transaction ended without applying every requested change
    TransactionFailed {
        fqdn: String,
        change_type: ChangeType,
    },

    /// Manager stopped
    Stopped { reason: String },
}

/// Core update manager
///
/// ## Lifecycle
///
/// 1. Create with [`UpdateManager::new()`]
/// 2. Start with [`UpdateManager::run()`]
/// 3. Manager runs until a shutdown signal is received or the source ends
/// 4. Transactions still running are awaited before `run` returns
///
/// ## Load Resistance
///
/// - **Bounded concurrency**: at most `max_transactions` run at once
/// - **Bounded queue**: requests beyond `ncr_queue_max` are dropped (logged)
/// - **Bounded event channel**: when full, events are dropped (logged)
pub struct UpdateManager {
    /// Source of requests
    source: Box<dyn NcrSource>,

    /// Transport shared by all transactions
    transport: Arc<dyn DnsTransport>,

    /// Domains and parameters
    config: UpdateConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ManagerEvent>,
}

/// Mutable bookkeeping of one run
#[derive(Default)]
struct RunState {
    queue: VecDeque<NameChangeRequest>,
    busy: HashSet<Dhcid>,
    tasks: JoinSet<NameChangeRequest>,
    running: HashMap<Id, RunningTransaction>,
}

/// What a spawned transaction works on, kept in case its task fails
struct RunningTransaction {
    fqdn: String,
    change_type: ChangeType,
    dhcid: Dhcid,
}

impl UpdateManager {
    /// Create a new update manager
    ///
    /// # Returns
    ///
    /// A tuple of (manager, event_receiver) where event_receiver yields manager events
    pub fn new(
        source: Box<dyn NcrSource>,
        transport: Arc<dyn DnsTransport>,
        config: UpdateConfig,
    ) -> Result<(Self, mpsc::Receiver<ManagerEvent>)> {
        config.params.validate()?;

        let (tx, rx) = mpsc::channel(config.params.event_channel_capacity);

        let manager = Self {
            source,
            transport,
            config,
            event_tx: tx,
        };

        Ok((manager, rx))
    }

    /// Run the manager until SIGINT or the end of the request stream
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the manager with a controlled shutdown signal
    ///
    /// Tests use this instead of [`UpdateManager::run`]; `None` falls back to
    /// SIGINT.
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(ManagerEvent::Started {
            forward_domains: self.config.forward_domains.domains().len(),
            reverse_domains: self.config.reverse_domains.domains().len(),
        });
        info!(
            "Update manager started (max {} transactions via {})",
            self.config.params.max_transactions,
            self.transport.transport_name()
        );

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        };
        tokio::pin!(shutdown);

        let mut requests = self.source.watch();
        let mut source_open = true;
        let mut run = RunState::default();

        let reason = loop {
            tokio::select! {
                next = requests.next(), if source_open => match next {
                    Some(ncr) => {
                        self.enqueue(&mut run, ncr);
                        self.start_ready(&mut run);
                    }
                    None => {
                        debug!("Request source closed");
                        source_open = false;
                    }
                },

                Some(joined) = run.tasks.join_next_with_id(), if !run.tasks.is_empty() => {
                    self.transaction_finished(&mut run, joined);
                    self.start_ready(&mut run);
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break "Shutdown signal".to_string();
                }
            }

            if !source_open && run.tasks.is_empty() && run.queue.is_empty() {
                break "Request source closed".to_string();
            }
        };

        if !run.queue.is_empty() {
            warn!("Discarding {} queued requests", run.queue.len());
            for ncr in run.queue.drain(..) {
                self.emit_event(ManagerEvent::RequestDropped {
                    fqdn: ncr.fqdn,
                    reason: "shutting down".to_string(),
                });
            }
        }

        if !run.tasks.is_empty() {
            info!("Waiting for {} transactions to finish", run.tasks.len());
        }
        while let Some(joined) = run.tasks.join_next_with_id().await {
            self.transaction_finished(&mut run, joined);
        }

        self.emit_event(ManagerEvent::Stopped { reason });
        info!("Update manager stopped");

        Ok(())
    }

    /// Validate and queue a request
    fn enqueue(&self, run: &mut RunState, ncr: NameChangeRequest) {
        if let Err(e) = ncr.validate() {
            warn!("Dropping invalid request for {}: {}", ncr.fqdn, e);
            self.emit_event(ManagerEvent::RequestDropped {
                fqdn: ncr.fqdn,
                reason: e.to_string(),
            });
            return;
        }

        if run.queue.len() >= self.config.params.ncr_queue_max {
            warn!(
                "Request queue full ({} entries), dropping request for {}",
                run.queue.len(),
                ncr.fqdn
            );
            self.emit_event(ManagerEvent::RequestDropped {
                fqdn: ncr.fqdn,
                reason: "queue full".to_string(),
            });
            return;
        }

        debug!("Queued {} request for {}", ncr.change_type, ncr.fqdn);
        self.emit_event(ManagerEvent::RequestQueued {
            fqdn: ncr.fqdn.clone(),
            change_type: ncr.change_type,
        });
        run.queue.push_back(ncr);
    }

    /// Start queued requests while slots are free
    ///
    /// A request whose DHCID has a transaction running stays queued, in
    /// order, until that transaction ends.
    fn start_ready(&self, run: &mut RunState) {
        let mut deferred = VecDeque::new();

        while run.tasks.len() < self.config.params.max_transactions {
            let Some(ncr) = run.queue.pop_front() else {
                break;
            };

            if run.busy.contains(&ncr.dhcid) {
                debug!("Deferring request for {}: DHCID {} is busy", ncr.fqdn, ncr.dhcid);
                deferred.push_back(ncr);
                continue;
            }

            self.start_transaction(run, ncr);
        }

        while let Some(ncr) = deferred.pop_back() {
            run.queue.push_front(ncr);
        }
    }

    /// Match domains and spawn the transaction for `ncr`
    fn start_transaction(&self, run: &mut RunState, ncr: NameChangeRequest) {
        let forward = if ncr.forward_change {
            let matched = self.config.forward_domains.match_domain(&ncr.fqdn);
            if matched.is_none() {
                warn!("No forward domain matches {}, skipping forward change", ncr.fqdn);
            }
            matched
        } else {
            None
        };

        let reverse = if ncr.reverse_change {
            let name = reverse_name(&ncr.ip_address);
            let matched = self.config.reverse_domains.match_domain(&name);
            if matched.is_none() {
                warn!("No reverse domain matches {}, skipping reverse change", name);
            }
            matched
        } else {
            None
        };

        let ncr = ncr
            .with_forward_change(forward.is_some())
            .with_reverse_change(reverse.is_some());

        if !ncr.forward_change && !ncr.reverse_change {
            error!("No DDNS domain matches request for {}", ncr.fqdn);
            self.emit_event(ManagerEvent::RequestDropped {
                fqdn: ncr.fqdn,
                reason: "no matching DDNS domain".to_string(),
            });
            return;
        }

        let fqdn = ncr.fqdn.clone();
        let change_type = ncr.change_type;
        let dhcid = ncr.dhcid.clone();
        let transport = self.transport.clone();
        let timeout = self.config.params.dns_server_timeout();

        let spawned = match change_type {
            ChangeType::Add => SimpleAddTransaction::new(ncr, forward, reverse)
                .map(|txn| run.tasks.spawn(run_transaction(txn, transport, timeout))),
            ChangeType::Remove => SimpleRemoveTransaction::new(ncr, forward, reverse)
                .map(|txn| run.tasks.spawn(run_transaction(txn, transport, timeout))),
        };

        match spawned {
            Ok(handle) => {
                run.running.insert(
                    handle.id(),
                    RunningTransaction {
                        fqdn: fqdn.clone(),
                        change_type,
                        dhcid: dhcid.clone(),
                    },
                );
                run.busy.insert(dhcid);
                self.emit_event(ManagerEvent::TransactionStarted { fqdn, change_type });
            }
            Err(e) => {
                error!("Cannot create transaction for {}: {}", fqdn, e);
                self.emit_event(ManagerEvent::RequestDropped {
                    fqdn,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Release the DHCID of a finished transaction and report its outcome
    fn transaction_finished(
        &self,
        run: &mut RunState,
        joined: std::result::Result<(Id, NameChangeRequest), JoinError>,
    ) {
        let (id, ncr) = match joined {
            Ok(finished) => finished,
            Err(e) => {
                error!("Transaction task failed: {}", e);
                // The request is lost with the task; report it as failed
                if let Some(running) = run.running.remove(&e.id()) {
                    run.busy.remove(&running.dhcid);
                    self.emit_event(ManagerEvent::TransactionFailed {
                        fqdn: running.fqdn,
                        change_type: running.change_type,
                    });
                }
                return;
            }
        };

        run.running.remove(&id);
        run.busy.remove(&ncr.dhcid);

        let event = match ncr.status() {
            NcrStatus::Completed => ManagerEvent::TransactionCompleted {
                fqdn: ncr.fqdn,
                change_type: ncr.change_type,
            },
            NcrStatus::Failed | NcrStatus::Pending => ManagerEvent::TransactionFailed {
                fqdn: ncr.fqdn,
                change_type: ncr.change_type,
            },
        };
        self.emit_event(event);
    }

    /// Emit a manager event
    fn emit_event(&self, event: ManagerEvent) {
        // Send event, logging warning if channel is full (backpressure)
        if self.event_tx.try_send(event).is_err() {
            warn!(
                "Event channel full, dropping event. Consider increasing event_channel_capacity."
            );
        }
    }
}

/// Drive one transaction and hand back its request with the final status
async fn run_transaction<T>(
    mut transaction: T,
    transport: Arc<dyn DnsTransport>,
    timeout: Duration,
) -> NameChangeRequest
where
    T: UpdateTransaction + 'static,
{
    if let Err(e) = drive(&mut transaction, transport.as_ref(), timeout).await {
        error!("Transaction for {} did not start: {}", transaction.ncr().fqdn, e);
    }
    transaction.ncr().clone()
}
