//! Name change transactions
//!
//! A transaction carries one [`NameChangeRequest`] through DNS updates of
//! its forward and reverse domains. [`NameChangeTransaction`] is the context
//! every concrete transaction embeds: the request, the target domains, the
//! server selection cursor, the attempt counter, the outstanding request and
//! last response, and the completion flags. It also provides the handlers
//! that are the same for every transaction (ready, server selection,
//! terminal states).
//!
//! ## Server failover
//!
//! Each direction has a selecting state. On `SELECT_SERVER` it restarts at
//! the first server of the domain; on `SERVER_IO_ERROR` it moves on to the
//! next one. A work state sends the update and, on an I/O failure, calls
//! [`NameChangeTransaction::retry_transition`], which resends to the same
//! server until [`MAX_UPDATE_TRIES_PER_SERVER`] attempts were made and then
//! hands control back to the selecting state. When the server list is
//! exhausted the transaction fails with `NO_MORE_SERVERS`.
//!
//! ## Driving
//!
//! Sending does not block. [`NameChangeTransaction::send_update`] records a
//! [`PendingExchange`] and suspends the model. [`drive`] performs the
//! exchange and feeds the outcome to [`UpdateTransaction::io_completed`],
//! until the transaction is done. At most one exchange is outstanding.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::dns_client::{DnsClient, DnsClientStatus};
use crate::domain::{DdnsDomain, DnsServerInfo};
use crate::error::{Error, Result};
use crate::labels::Event;
use crate::message::{Rcode, RecordType, UpdateMessage, UpdateResponse};
use crate::ncr::{NameChangeRequest, NcrStatus};
use crate::state_model::{ModelDictionaries, ModelState, StateHandler, StateModel};
use crate::traits::DnsTransport;

/// Update attempts made against one server before moving to the next
pub const MAX_UPDATE_TRIES_PER_SERVER: usize = 3;

/// States every transaction has
pub trait TransactionState: ModelState {
    /// Start state
    const READY: Self;
    /// Choosing a forward server
    const SELECTING_FWD_SERVER: Self;
    /// Choosing a reverse server
    const SELECTING_REV_SERVER: Self;
    /// Every requested change was applied
    const PROCESS_TRANS_OK: Self;
    /// The transaction failed
    const PROCESS_TRANS_FAILED: Self;
}

/// Which half of a request a step works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Name to address
    Forward,
    /// Address to name
    Reverse,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Reverse => f.write_str("reverse"),
        }
    }
}

/// An update waiting to be sent
#[derive(Debug, Clone)]
pub struct PendingExchange {
    /// Client bound to the current server
    pub client: DnsClient,
    /// The unsigned request
    pub request: UpdateMessage,
}

/// Shared context of a transaction
#[derive(Debug)]
pub struct NameChangeTransaction<S: TransactionState> {
    model: StateModel<S>,
    ncr: NameChangeRequest,
    forward_domain: Option<Arc<DdnsDomain>>,
    reverse_domain: Option<Arc<DdnsDomain>>,
    servers: Vec<Arc<DnsServerInfo>>,
    next_server_pos: usize,
    current_server: Option<Arc<DnsServerInfo>>,
    dns_client: Option<DnsClient>,
    dns_request: Option<UpdateMessage>,
    dns_response: Option<UpdateResponse>,
    dns_update_status: DnsClientStatus,
    update_attempts: usize,
    forward_change_completed: bool,
    reverse_change_completed: bool,
    pending: Option<PendingExchange>,
}

impl<S: TransactionState> NameChangeTransaction<S> {
    /// Events every transaction uses, beyond the model's own
    pub const REQUIRED_EVENTS: [Event; 7] = [
        Event::SELECT_SERVER,
        Event::SERVER_SELECTED,
        Event::SERVER_IO_ERROR,
        Event::NO_MORE_SERVERS,
        Event::IO_COMPLETED,
        Event::UPDATE_OK,
        Event::UPDATE_FAILED,
    ];

    /// Create the context of a transaction for `ncr`
    ///
    /// Fails if the request is invalid or a requested direction has no
    /// domain.
    pub fn new(
        dictionaries: &'static ModelDictionaries<S>,
        ncr: NameChangeRequest,
        forward_domain: Option<Arc<DdnsDomain>>,
        reverse_domain: Option<Arc<DdnsDomain>>,
    ) -> Result<Self> {
        ncr.validate()
            .map_err(|e| Error::transaction(format!("invalid request: {}", e)))?;

        if ncr.forward_change && forward_domain.is_none() {
            return Err(Error::transaction(format!(
                "forward change requested for {} but no forward domain",
                ncr.fqdn
            )));
        }
        if ncr.reverse_change && reverse_domain.is_none() {
            return Err(Error::transaction(format!(
                "reverse change requested for {} but no reverse domain",
                ncr.ip_address
            )));
        }

        Ok(Self {
            model: StateModel::new(dictionaries),
            ncr,
            forward_domain,
            reverse_domain,
            servers: Vec::new(),
            next_server_pos: 0,
            current_server: None,
            dns_client: None,
            dns_request: None,
            dns_response: None,
            dns_update_status: DnsClientStatus::Other,
            update_attempts: 0,
            forward_change_completed: false,
            reverse_change_completed: false,
            pending: None,
        })
    }

    /// Define the model events and the transaction events
    pub fn define_events(dictionaries: &mut ModelDictionaries<S>) -> Result<()> {
        StateModel::define_events(dictionaries)?;
        dictionaries.define_event(Event::SELECT_SERVER, "SELECT_SERVER_EVT")?;
        dictionaries.define_event(Event::SERVER_SELECTED, "SERVER_SELECTED_EVT")?;
        dictionaries.define_event(Event::SERVER_IO_ERROR, "SERVER_IO_ERROR_EVT")?;
        dictionaries.define_event(Event::NO_MORE_SERVERS, "NO_MORE_SERVERS_EVT")?;
        dictionaries.define_event(Event::IO_COMPLETED, "IO_COMPLETED_EVT")?;
        dictionaries.define_event(Event::UPDATE_OK, "UPDATE_OK_EVT")?;
        dictionaries.define_event(Event::UPDATE_FAILED, "UPDATE_FAILED_EVT")?;
        Ok(())
    }

    /// Verify the model events and the transaction events
    pub fn verify_events(dictionaries: &ModelDictionaries<S>) -> Result<()> {
        StateModel::verify_events(dictionaries)?;
        dictionaries.verify_events(&Self::REQUIRED_EVENTS)
    }

    /// Define the model states and the transaction states
    pub fn define_states(dictionaries: &mut ModelDictionaries<S>) -> Result<()> {
        StateModel::define_states(dictionaries)?;
        dictionaries.define_state(S::READY)?;
        dictionaries.define_state(S::SELECTING_FWD_SERVER)?;
        dictionaries.define_state(S::SELECTING_REV_SERVER)?;
        dictionaries.define_state(S::PROCESS_TRANS_OK)?;
        dictionaries.define_state(S::PROCESS_TRANS_FAILED)?;
        Ok(())
    }

    /// Verify the model states and the transaction states
    pub fn verify_states(dictionaries: &ModelDictionaries<S>) -> Result<()> {
        StateModel::verify_states(dictionaries)?;
        dictionaries.verify_states(&[
            S::READY,
            S::SELECTING_FWD_SERVER,
            S::SELECTING_REV_SERVER,
            S::PROCESS_TRANS_OK,
            S::PROCESS_TRANS_FAILED,
        ])
    }

    pub fn model(&self) -> &StateModel<S> {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut StateModel<S> {
        &mut self.model
    }

    pub fn ncr(&self) -> &NameChangeRequest {
        &self.ncr
    }

    pub fn into_ncr(self) -> NameChangeRequest {
        self.ncr
    }

    pub fn forward_domain(&self) -> Option<&Arc<DdnsDomain>> {
        self.forward_domain.as_ref()
    }

    pub fn reverse_domain(&self) -> Option<&Arc<DdnsDomain>> {
        self.reverse_domain.as_ref()
    }

    pub fn current_server(&self) -> Option<&Arc<DnsServerInfo>> {
        self.current_server.as_ref()
    }

    pub fn dns_client(&self) -> Option<&DnsClient> {
        self.dns_client.as_ref()
    }

    pub fn dns_request(&self) -> Option<&UpdateMessage> {
        self.dns_request.as_ref()
    }

    pub fn dns_response(&self) -> Option<&UpdateResponse> {
        self.dns_response.as_ref()
    }

    pub fn dns_update_status(&self) -> DnsClientStatus {
        self.dns_update_status
    }

    pub fn update_attempts(&self) -> usize {
        self.update_attempts
    }

    pub fn forward_change_completed(&self) -> bool {
        self.forward_change_completed
    }

    pub fn reverse_change_completed(&self) -> bool {
        self.reverse_change_completed
    }

    /// Whether an update is waiting to be sent
    pub fn has_pending_exchange(&self) -> bool {
        self.pending.is_some()
    }

    /// Mark one direction done
    ///
    /// Only the work state of that direction calls this, on a successful
    /// outcome.
    pub fn set_change_completed(&mut self, direction: Direction) {
        match direction {
            Direction::Forward => self.forward_change_completed = true,
            Direction::Reverse => self.reverse_change_completed = true,
        }
    }

    pub fn clear_update_attempts(&mut self) {
        self.update_attempts = 0;
    }

    /// The domain of `direction`
    pub fn domain(&self, direction: Direction) -> Result<Arc<DdnsDomain>> {
        let domain = match direction {
            Direction::Forward => self.forward_domain.as_ref(),
            Direction::Reverse => self.reverse_domain.as_ref(),
        };
        domain
            .cloned()
            .ok_or_else(|| Error::invalid_context(format!("no {} domain", direction)))
    }

    /// Restart server selection at the first server of `domain`
    pub fn init_server_selection(&mut self, domain: &Arc<DdnsDomain>) {
        self.servers = domain.servers().to_vec();
        self.next_server_pos = 0;
        self.current_server = None;
        self.dns_client = None;
        self.dns_response = None;
    }

    /// Make the next enabled server current
    ///
    /// Returns `false` once the list is exhausted, leaving no current
    /// server. Each selection gets a fresh client, an empty response slot
    /// and a zero attempt counter.
    pub fn select_next_server(&mut self) -> bool {
        while let Some(server) = self.servers.get(self.next_server_pos).cloned() {
            self.next_server_pos += 1;
            if !server.enabled {
                debug!("Skipping disabled server {}", server);
                continue;
            }

            debug!("Selected server {} for {}", server, self.ncr.fqdn);
            self.dns_client = Some(DnsClient::new(server.clone()));
            self.current_server = Some(server);
            self.dns_request = None;
            self.dns_response = None;
            self.update_attempts = 0;
            return true;
        }

        self.current_server = None;
        self.dns_client = None;
        false
    }

    /// Resend to the current server, or give up on it
    ///
    /// Below [`MAX_UPDATE_TRIES_PER_SERVER`] attempts the current state is
    /// re-run with `SERVER_SELECTED`; otherwise the model moves to
    /// `failure_state` with `SERVER_IO_ERROR`.
    pub fn retry_transition(&mut self, failure_state: S) -> Result<()> {
        let server = self
            .current_server
            .as_ref()
            .map(|server| server.to_string())
            .unwrap_or_default();

        if self.update_attempts < MAX_UPDATE_TRIES_PER_SERVER {
            warn!(
                "Update for {} to {} failed with {}, retrying (attempt {} of {})",
                self.ncr.fqdn,
                server,
                self.dns_update_status,
                self.update_attempts,
                MAX_UPDATE_TRIES_PER_SERVER
            );
            let current = self.model.curr_state();
            self.model.transition(current, Event::SERVER_SELECTED)
        } else {
            warn!(
                "Giving up on {} for {} after {} attempts",
                server, self.ncr.fqdn, self.update_attempts
            );
            self.model.transition(failure_state, Event::SERVER_IO_ERROR)
        }
    }

    /// Queue `request` for the current server and suspend the model
    pub fn send_update(&mut self, request: UpdateMessage) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::invalid_context(
                "an update is already outstanding for this transaction",
            ));
        }

        let client = self
            .dns_client
            .clone()
            .ok_or_else(|| Error::invalid_context("no server selected"))?;

        self.update_attempts += 1;
        info!(
            "Sending update for {} to {} (attempt {})",
            self.ncr.fqdn,
            client.server(),
            self.update_attempts
        );

        self.dns_request = Some(request.clone());
        self.dns_response = None;
        self.pending = Some(PendingExchange { client, request });
        self.model.post_next_event(Event::NOP)
    }

    /// Hand the queued update to whoever performs the exchange
    pub fn take_pending_exchange(&mut self) -> Option<PendingExchange> {
        self.pending.take()
    }

    /// Record the outcome of the exchange
    pub fn set_exchange_outcome(
        &mut self,
        status: DnsClientStatus,
        response: Option<UpdateResponse>,
    ) {
        self.pending = None;
        self.dns_update_status = status;
        self.dns_response = response;
    }

    /// Response code of an accepted response
    pub fn response_rcode(&self) -> Option<Rcode> {
        match self.dns_update_status {
            DnsClientStatus::Success => self.dns_response.as_ref().map(|r| r.rcode),
            _ => None,
        }
    }

    /// Address record type of the request
    pub fn address_rr_type(&self) -> RecordType {
        RecordType::for_address(&self.ncr.ip_address)
    }

    /// TTL for added records
    pub fn ttl(&self) -> u32 {
        self.ncr.lease_length
    }

    /// Summary of the last exchange, e.g. `SUCCESS, rcode: NXDOMAIN`
    pub fn response_string(&self) -> String {
        match self.response_rcode() {
            Some(rcode) => format!("{}, rcode: {}", self.dns_update_status, rcode),
            None => self.dns_update_status.to_string(),
        }
    }

    /// Summary of the transaction for its final log record
    pub fn transaction_outcome_string(&self) -> String {
        let outcome = |requested: bool, completed: bool| match (requested, completed) {
            (false, _) => "not requested",
            (true, true) => "completed",
            (true, false) => "failed",
        };

        format!(
            "Status: {}, Event: {}, Forward change: {}, Reverse change: {}, request: {}",
            self.ncr.status(),
            self.model.event_label(self.model.next_event()),
            outcome(self.ncr.forward_change, self.forward_change_completed),
            outcome(self.ncr.reverse_change, self.reverse_change_completed),
            self.ncr.to_text()
        )
    }

    /// Record the failure of an aborted model on the request
    pub fn on_model_failure(&mut self, explanation: &str) {
        self.ncr.set_status(NcrStatus::Failed);
        self.pending = None;
        error!(
            "Transaction for {} aborted: {}: {}",
            self.ncr.fqdn,
            explanation,
            self.transaction_outcome_string()
        );
    }

    /// Handler of `READY`: pick the first direction
    pub fn ready_handler(&mut self) -> Result<()> {
        match self.model.next_event() {
            Event::START => {
                if self.ncr.forward_change {
                    self.model
                        .transition(S::SELECTING_FWD_SERVER, Event::SELECT_SERVER)
                } else {
                    self.model
                        .transition(S::SELECTING_REV_SERVER, Event::SELECT_SERVER)
                }
            }
            other => Err(self.unexpected_event(other)),
        }
    }

    /// Handler of a selecting state: make a server current or fail
    pub fn selecting_server_handler(&mut self, direction: Direction, work_state: S) -> Result<()> {
        match self.model.next_event() {
            Event::SELECT_SERVER => {
                let domain = self.domain(direction)?;
                self.init_server_selection(&domain);
            }
            Event::SERVER_IO_ERROR => {}
            other => return Err(self.unexpected_event(other)),
        }

        if self.select_next_server() {
            self.model.transition(work_state, Event::SERVER_SELECTED)
        } else {
            error!(
                "No more {} servers to try for {}",
                direction, self.ncr.fqdn
            );
            self.model
                .transition(S::PROCESS_TRANS_FAILED, Event::NO_MORE_SERVERS)
        }
    }

    /// Handler of `PROCESS_TRANS_OK`
    pub fn process_trans_ok_handler(&mut self) -> Result<()> {
        match self.model.next_event() {
            Event::UPDATE_OK => {
                self.ncr.set_status(NcrStatus::Completed);
                info!("Transaction completed: {}", self.transaction_outcome_string());
                self.model.end_model();
                Ok(())
            }
            other => Err(self.unexpected_event(other)),
        }
    }

    /// Handler of `PROCESS_TRANS_FAILED`
    pub fn process_trans_failed_handler(&mut self) -> Result<()> {
        match self.model.next_event() {
            Event::UPDATE_FAILED | Event::NO_MORE_SERVERS => {
                self.ncr.set_status(NcrStatus::Failed);
                error!("Transaction failed: {}", self.transaction_outcome_string());
                self.model.end_model();
                Ok(())
            }
            other => Err(self.unexpected_event(other)),
        }
    }

    /// The error a handler returns for an event it does not handle
    pub fn unexpected_event(&self, event: Event) -> Error {
        Error::invalid_context(format!(
            "unexpected event {} in {}",
            self.model.event_label(event),
            self.model.state_label(self.model.curr_state())
        ))
    }
}

/// A concrete transaction that can be started and driven
pub trait UpdateTransaction: StateHandler<State: TransactionState> + Send {
    /// The embedded context
    fn base(&self) -> &NameChangeTransaction<Self::State>;

    /// The embedded context
    fn base_mut(&mut self) -> &mut NameChangeTransaction<Self::State>;

    /// Run from `READY` until the first update is queued or the model ends
    fn start_transaction(&mut self) -> Result<()> {
        info!(
            "Starting {} transaction for {}",
            self.base().ncr().change_type,
            self.base().ncr().fqdn
        );
        self.start_model(<Self::State as TransactionState>::READY, Event::START)
    }

    /// Completion callback of an exchange
    ///
    /// Records the outcome and resumes the model with `IO_COMPLETED`. A
    /// completion arriving while the model is not waiting is rejected and
    /// leaves the context untouched.
    fn io_completed(
        &mut self,
        status: DnsClientStatus,
        response: Option<UpdateResponse>,
    ) -> Result<()> {
        if !self.model().is_model_waiting() {
            return Err(Error::state_model(format!(
                "cannot complete update: model is not waiting, {}",
                self.model().context_str()
            )));
        }

        let base = self.base_mut();
        base.set_exchange_outcome(status, response);
        debug!("Update for {} completed: {}", base.ncr().fqdn, base.response_string());
        self.resume_model(Event::IO_COMPLETED)
    }

    /// Hand the queued update to the caller
    fn take_pending_exchange(&mut self) -> Option<PendingExchange> {
        self.base_mut().take_pending_exchange()
    }

    /// The request being processed
    fn ncr(&self) -> &NameChangeRequest {
        self.base().ncr()
    }
}

/// Run `transaction` to completion, exchanging its updates over `transport`
///
/// Returns an error only if the transaction could not be started; every
/// failure after that is recorded on the request.
pub async fn drive<T>(
    transaction: &mut T,
    transport: &dyn DnsTransport,
    timeout: Duration,
) -> Result<()>
where
    T: UpdateTransaction,
{
    transaction.start_transaction()?;

    while transaction.model().is_model_waiting() {
        let Some(exchange) = transaction.take_pending_exchange() else {
            transaction.abort_model("waiting without an outstanding update");
            break;
        };

        let outcome = exchange
            .client
            .send_update(transport, exchange.request, timeout)
            .await;
        transaction.io_completed(outcome.status, outcome.response)?;
    }

    Ok(())
}
