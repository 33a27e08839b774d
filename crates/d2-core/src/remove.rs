//! Simple remove transaction
//!
//! Deletes the lease's address record and the DHCID RRset from its FQDN,
//! then every RRset at its reverse name. A server answering `NXDOMAIN` has
//! nothing to delete, which counts as success.

use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::dns_client::DnsClientStatus;
use crate::domain::{DdnsDomain, reverse_name};
use crate::error::{Error, Result};
use crate::labels::Event;
use crate::message::{Rcode, RecordData, RecordType, Rrset, UpdateMessage};
use crate::ncr::NameChangeRequest;
use crate::state_model::{ModelDictionaries, ModelState, StateHandler, StateModel};
use crate::transaction::{Direction, NameChangeTransaction, TransactionState, UpdateTransaction};

/// States of [`SimpleRemoveTransaction`]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoveState {
    New = 0,
    End = 1,
    Ready = 10,
    SelectingFwdServer = 11,
    SelectingRevServer = 12,
    ProcessTransOk = 13,
    ProcessTransFailed = 14,
    RemovingFwdRrs = 100,
    RemovingRevPtrs = 101,
}

impl ModelState for RemoveState {
    const NEW: Self = RemoveState::New;
    const END: Self = RemoveState::End;

    fn value(self) -> u16 {
        self as u16
    }

    fn label(self) -> &'static str {
        match self {
            RemoveState::New => "NEW_ST",
            RemoveState::End => "END_ST",
            RemoveState::Ready => "READY_ST",
            RemoveState::SelectingFwdServer => "SELECTING_FWD_SERVER_ST",
            RemoveState::SelectingRevServer => "SELECTING_REV_SERVER_ST",
            RemoveState::ProcessTransOk => "PROCESS_TRANS_OK_ST",
            RemoveState::ProcessTransFailed => "PROCESS_TRANS_FAILED_ST",
            RemoveState::RemovingFwdRrs => "REMOVING_FWD_RRS_ST",
            RemoveState::RemovingRevPtrs => "REMOVING_REV_PTRS_ST",
        }
    }
}

impl TransactionState for RemoveState {
    const READY: Self = RemoveState::Ready;
    const SELECTING_FWD_SERVER: Self = RemoveState::SelectingFwdServer;
    const SELECTING_REV_SERVER: Self = RemoveState::SelectingRevServer;
    const PROCESS_TRANS_OK: Self = RemoveState::ProcessTransOk;
    const PROCESS_TRANS_FAILED: Self = RemoveState::ProcessTransFailed;
}

static DICTIONARIES: OnceLock<ModelDictionaries<RemoveState>> = OnceLock::new();

fn dictionaries() -> Result<&'static ModelDictionaries<RemoveState>> {
    if let Some(dictionaries) = DICTIONARIES.get() {
        return Ok(dictionaries);
    }
    let built = ModelDictionaries::build::<SimpleRemoveTransaction>()?;
    Ok(DICTIONARIES.get_or_init(|| built))
}

/// Removes the DNS data of an expired or released lease
#[derive(Debug)]
pub struct SimpleRemoveTransaction {
    base: NameChangeTransaction<RemoveState>,
}

impl SimpleRemoveTransaction {
    /// Create a transaction for `ncr`
    pub fn new(
        ncr: NameChangeRequest,
        forward_domain: Option<Arc<DdnsDomain>>,
        reverse_domain: Option<Arc<DdnsDomain>>,
    ) -> Result<Self> {
        let base =
            NameChangeTransaction::new(dictionaries()?, ncr, forward_domain, reverse_domain)?;
        Ok(Self { base })
    }

    /// Update deleting the lease's address record and the FQDN's DHCID
    pub fn build_remove_fwd_rrs_request(&self) -> Result<UpdateMessage> {
        let domain = self.base.domain(Direction::Forward)?;
        let ncr = self.base.ncr();

        let mut request = UpdateMessage::new(domain.name());
        request.add_update(Rrset::delete_record(
            &ncr.fqdn,
            self.base.address_rr_type(),
            RecordData::Address(ncr.ip_address),
        ));
        request.add_update(Rrset::delete_rrset(&ncr.fqdn, RecordType::Dhcid));
        Ok(request)
    }

    /// Update deleting everything at the reverse name
    pub fn build_remove_rev_ptrs_request(&self) -> Result<UpdateMessage> {
        let domain = self.base.domain(Direction::Reverse)?;
        let name = reverse_name(&self.base.ncr().ip_address);

        let mut request = UpdateMessage::new(domain.name());
        request.add_update(Rrset::delete_rrset(name, RecordType::Any));
        Ok(request)
    }

    fn removing_handler(&mut self, direction: Direction) -> Result<()> {
        if self.base.model_mut().do_on_entry() {
            self.base.clear_update_attempts();
        }

        match self.base.model().next_event() {
            Event::SERVER_SELECTED => {
                let request = match (self.base.dns_request(), direction) {
                    (Some(request), _) => request.clone(),
                    (None, Direction::Forward) => self.build_remove_fwd_rrs_request()?,
                    (None, Direction::Reverse) => self.build_remove_rev_ptrs_request()?,
                };
                self.base.send_update(request)
            }
            Event::IO_COMPLETED => self.update_completed(direction),
            other => Err(self.base.unexpected_event(other)),
        }
    }

    fn update_completed(&mut self, direction: Direction) -> Result<()> {
        let selecting = match direction {
            Direction::Forward => RemoveState::SelectingFwdServer,
            Direction::Reverse => RemoveState::SelectingRevServer,
        };

        match self.base.dns_update_status() {
            DnsClientStatus::Success => match self.base.response_rcode() {
                Some(rcode @ (Rcode::NoError | Rcode::NxDomain)) => {
                    if rcode == Rcode::NxDomain {
                        debug!(
                            "Nothing to remove in {} domain for {}",
                            direction,
                            self.base.ncr().fqdn
                        );
                    }
                    self.base.set_change_completed(direction);
                    if direction == Direction::Forward && self.base.ncr().reverse_change {
                        self.base
                            .model_mut()
                            .transition(RemoveState::SelectingRevServer, Event::SELECT_SERVER)
                    } else {
                        self.base
                            .model_mut()
                            .transition(RemoveState::ProcessTransOk, Event::UPDATE_OK)
                    }
                }
                Some(rcode) => {
                    warn!(
                        "Server rejected {} removal for {}: {}",
                        direction,
                        self.base.ncr().fqdn,
                        rcode
                    );
                    self.base
                        .model_mut()
                        .transition(RemoveState::ProcessTransFailed, Event::UPDATE_FAILED)
                }
                None => self.base.retry_transition(selecting),
            },
            DnsClientStatus::IoStopped => self
                .base
                .model_mut()
                .transition(RemoveState::ProcessTransFailed, Event::UPDATE_FAILED),
            DnsClientStatus::Timeout
            | DnsClientStatus::InvalidResponse
            | DnsClientStatus::Other => self.base.retry_transition(selecting),
        }
    }
}

impl StateHandler for SimpleRemoveTransaction {
    type State = RemoveState;

    fn model(&self) -> &StateModel<RemoveState> {
        self.base.model()
    }

    fn model_mut(&mut self) -> &mut StateModel<RemoveState> {
        self.base.model_mut()
    }

    fn define_events(dictionaries: &mut ModelDictionaries<RemoveState>) -> Result<()> {
        NameChangeTransaction::define_events(dictionaries)
    }

    fn verify_events(dictionaries: &ModelDictionaries<RemoveState>) -> Result<()> {
        NameChangeTransaction::verify_events(dictionaries)
    }

    fn define_states(dictionaries: &mut ModelDictionaries<RemoveState>) -> Result<()> {
        NameChangeTransaction::define_states(dictionaries)?;
        dictionaries.define_state(RemoveState::RemovingFwdRrs)?;
        dictionaries.define_state(RemoveState::RemovingRevPtrs)
    }

    fn verify_states(dictionaries: &ModelDictionaries<RemoveState>) -> Result<()> {
        NameChangeTransaction::verify_states(dictionaries)?;
        dictionaries.verify_states(&[RemoveState::RemovingFwdRrs, RemoveState::RemovingRevPtrs])
    }

    fn run_state(&mut self, state: RemoveState) -> Result<()> {
        match state {
            RemoveState::Ready => self.base.ready_handler(),
            RemoveState::SelectingFwdServer => self
                .base
                .selecting_server_handler(Direction::Forward, RemoveState::RemovingFwdRrs),
            RemoveState::SelectingRevServer => self
                .base
                .selecting_server_handler(Direction::Reverse, RemoveState::RemovingRevPtrs),
            RemoveState::RemovingFwdRrs => self.removing_handler(Direction::Forward),
            RemoveState::RemovingRevPtrs => self.removing_handler(Direction::Reverse),
            RemoveState::ProcessTransOk => self.base.process_trans_ok_handler(),
            RemoveState::ProcessTransFailed => self.base.process_trans_failed_handler(),
            RemoveState::New | RemoveState::End => Err(Error::invalid_context(format!(
                "{} has no handler",
                state.label()
            ))),
        }
    }

    fn on_model_failure(&mut self, explanation: &str) {
        self.base.on_model_failure(explanation);
    }
}

impl UpdateTransaction for SimpleRemoveTransaction {
    fn base(&self) -> &NameChangeTransaction<RemoveState> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NameChangeTransaction<RemoveState> {
        &mut self.base
    }
}
