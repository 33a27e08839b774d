//! Simple add transaction
//!
//! Replaces the forward address and DHCID records of a lease's FQDN, then
//! the PTR and DHCID records of its reverse name. No conflict detection is
//! done: whatever was there before is deleted.
//!
//! ```text
//!   READY ──START──► SELECTING_FWD_SERVER ──SERVER_SELECTED──► REPLACING_FWD_ADDRS
//!                         ▲        │                            │   │
//!                         └─SERVER_IO_ERROR──────────────────────┘   │ NOERROR
//!                                  │ NO_MORE_SERVERS                 ▼
//!                                  ▼                     SELECTING_REV_SERVER ─► REPLACING_REV_PTRS
//!                         PROCESS_TRANS_FAILED                                    │ NOERROR
//!                                                                                 ▼
//!                                                                        PROCESS_TRANS_OK
//! ```

use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::dns_client::DnsClientStatus;
use crate::domain::{DdnsDomain, reverse_name};
use crate::error::{Error, Result};
use crate::labels::Event;
use crate::message::{Rcode, RecordData, RecordType, Rrset, UpdateMessage};
use crate::ncr::NameChangeRequest;
use crate::state_model::{ModelDictionaries, ModelState, StateHandler, StateModel};
use crate::transaction::{Direction, NameChangeTransaction, TransactionState, UpdateTransaction};

/// States of [`SimpleAddTransaction`]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddState {
    New = 0,
    End = 1,
    Ready = 10,
    SelectingFwdServer = 11,
    SelectingRevServer = 12,
    ProcessTransOk = 13,
    ProcessTransFailed = 14,
    /// Sending the forward replacement
    ReplacingFwdAddrs = 100,
    /// Sending the reverse replacement
    ReplacingRevPtrs = 101,
}

impl ModelState for AddState {
    const NEW: Self = AddState::New;
    const END: Self = AddState::End;

    fn value(self) -> u16 {
        self as u16
    }

    fn label(self) -> &'static str {
        match self {
            AddState::New => "NEW_ST",
            AddState::End => "END_ST",
            AddState::Ready => "READY_ST",
            AddState::SelectingFwdServer => "SELECTING_FWD_SERVER_ST",
            AddState::SelectingRevServer => "SELECTING_REV_SERVER_ST",
            AddState::ProcessTransOk => "PROCESS_TRANS_OK_ST",
            AddState::ProcessTransFailed => "PROCESS_TRANS_FAILED_ST",
            AddState::ReplacingFwdAddrs => "REPLACING_FWD_ADDRS_ST",
            AddState::ReplacingRevPtrs => "REPLACING_REV_PTRS_ST",
        }
    }
}

impl TransactionState for AddState {
    const READY: Self = AddState::Ready;
    const SELECTING_FWD_SERVER: Self = AddState::SelectingFwdServer;
    const SELECTING_REV_SERVER: Self = AddState::SelectingRevServer;
    const PROCESS_TRANS_OK: Self = AddState::ProcessTransOk;
    const PROCESS_TRANS_FAILED: Self = AddState::ProcessTransFailed;
}

static DICTIONARIES: OnceLock<ModelDictionaries<AddState>> = OnceLock::new();

fn dictionaries() -> Result<&'static ModelDictionaries<AddState>> {
    if let Some(dictionaries) = DICTIONARIES.get() {
        return Ok(dictionaries);
    }
    let built = ModelDictionaries::build::<SimpleAddTransaction>()?;
    Ok(DICTIONARIES.get_or_init(|| built))
}

/// Adds the DNS data of a new lease
#[derive(Debug)]
pub struct SimpleAddTransaction {
    base: NameChangeTransaction<AddState>,
}

impl SimpleAddTransaction {
    /// Create a transaction for `ncr`
    ///
    /// Each direction the request changes needs its domain.
    pub fn new(
        ncr: NameChangeRequest,
        forward_domain: Option<Arc<DdnsDomain>>,
        reverse_domain: Option<Arc<DdnsDomain>>,
    ) -> Result<Self> {
        let base =
            NameChangeTransaction::new(dictionaries()?, ncr, forward_domain, reverse_domain)?;
        Ok(Self { base })
    }

    /// Update replacing the address and DHCID records of the FQDN
    pub fn build_replace_fwd_addrs_request(&self) -> Result<UpdateMessage> {
        let domain = self.base.domain(Direction::Forward)?;
        let ncr = self.base.ncr();
        let rtype = self.base.address_rr_type();
        let ttl = self.base.ttl();

        let mut request = UpdateMessage::new(domain.name());
        request.add_update(Rrset::delete_rrset(&ncr.fqdn, rtype));
        request.add_update(Rrset::delete_rrset(&ncr.fqdn, RecordType::Dhcid));
        request.add_update(Rrset::add_record(
            &ncr.fqdn,
            rtype,
            ttl,
            RecordData::Address(ncr.ip_address),
        ));
        request.add_update(Rrset::add_record(
            &ncr.fqdn,
            RecordType::Dhcid,
            ttl,
            RecordData::Dhcid(ncr.dhcid.as_bytes().to_vec()),
        ));
        Ok(request)
    }

    /// Update replacing the PTR and DHCID records of the reverse name
    pub fn build_replace_rev_ptrs_request(&self) -> Result<UpdateMessage> {
        let domain = self.base.domain(Direction::Reverse)?;
        let ncr = self.base.ncr();
        let name = reverse_name(&ncr.ip_address);
        let ttl = self.base.ttl();

        let mut request = UpdateMessage::new(domain.name());
        request.add_update(Rrset::delete_rrset(&name, RecordType::Ptr));
        request.add_update(Rrset::delete_rrset(&name, RecordType::Dhcid));
        request.add_update(Rrset::add_record(
            &name,
            RecordType::Ptr,
            ttl,
            RecordData::Ptr(ncr.fqdn.clone()),
        ));
        request.add_update(Rrset::add_record(
            &name,
            RecordType::Dhcid,
            ttl,
            RecordData::Dhcid(ncr.dhcid.as_bytes().to_vec()),
        ));
        Ok(request)
    }

    fn replacing_fwd_addrs_handler(&mut self) -> Result<()> {
        if self.base.model_mut().do_on_entry() {
            self.base.clear_update_attempts();
        }

        match self.base.model().next_event() {
            Event::SERVER_SELECTED => {
                // A retry resends the same request
                let request = match self.base.dns_request() {
                    Some(request) => request.clone(),
                    None => self.build_replace_fwd_addrs_request()?,
                };
                self.base.send_update(request)
            }
            Event::IO_COMPLETED => self.update_completed(Direction::Forward),
            other => Err(self.base.unexpected_event(other)),
        }
    }

    fn replacing_rev_ptrs_handler(&mut self) -> Result<()> {
        if self.base.model_mut().do_on_entry() {
            self.base.clear_update_attempts();
        }

        match self.base.model().next_event() {
            Event::SERVER_SELECTED => {
                let request = match self.base.dns_request() {
                    Some(request) => request.clone(),
                    None => self.build_replace_rev_ptrs_request()?,
                };
                self.base.send_update(request)
            }
            Event::IO_COMPLETED => self.update_completed(Direction::Reverse),
            other => Err(self.base.unexpected_event(other)),
        }
    }

    fn update_completed(&mut self, direction: Direction) -> Result<()> {
        let selecting = match direction {
            Direction::Forward => AddState::SelectingFwdServer,
            Direction::Reverse => AddState::SelectingRevServer,
        };

        match self.base.dns_update_status() {
            DnsClientStatus::Success => match self.base.response_rcode() {
                Some(Rcode::NoError) => {
                    self.base.set_change_completed(direction);
                    if direction == Direction::Forward && self.base.ncr().reverse_change {
                        self.base
                            .model_mut()
                            .transition(AddState::SelectingRevServer, Event::SELECT_SERVER)
                    } else {
                        self.base
                            .model_mut()
                            .transition(AddState::ProcessTransOk, Event::UPDATE_OK)
                    }
                }
                Some(rcode) => {
                    warn!(
                        "Server rejected {} update for {}: {}",
                        direction,
                        self.base.ncr().fqdn,
                        rcode
                    );
                    self.base
                        .model_mut()
                        .transition(AddState::ProcessTransFailed, Event::UPDATE_FAILED)
                }
                None => self.base.retry_transition(selecting),
            },
            DnsClientStatus::IoStopped => {
                warn!(
                    "I/O stopped during {} update for {}",
                    direction,
                    self.base.ncr().fqdn
                );
                self.base
                    .model_mut()
                    .transition(AddState::ProcessTransFailed, Event::UPDATE_FAILED)
            }
            DnsClientStatus::Timeout
            | DnsClientStatus::InvalidResponse
            | DnsClientStatus::Other => self.base.retry_transition(selecting),
        }
    }
}

impl StateHandler for SimpleAddTransaction {
    type State = AddState;

    fn model(&self) -> &StateModel<AddState> {
        self.base.model()
    }

    fn model_mut(&mut self) -> &mut StateModel<AddState> {
        self.base.model_mut()
    }

    fn define_events(dictionaries: &mut ModelDictionaries<AddState>) -> Result<()> {
        NameChangeTransaction::define_events(dictionaries)
    }

    fn verify_events(dictionaries: &ModelDictionaries<AddState>) -> Result<()> {
        NameChangeTransaction::verify_events(dictionaries)
    }

    fn define_states(dictionaries: &mut ModelDictionaries<AddState>) -> Result<()> {
        NameChangeTransaction::define_states(dictionaries)?;
        dictionaries.define_state(AddState::ReplacingFwdAddrs)?;
        dictionaries.define_state(AddState::ReplacingRevPtrs)
    }

    fn verify_states(dictionaries: &ModelDictionaries<AddState>) -> Result<()> {
        NameChangeTransaction::verify_states(dictionaries)?;
        dictionaries.verify_states(&[AddState::ReplacingFwdAddrs, AddState::ReplacingRevPtrs])
    }

    fn run_state(&mut self, state: AddState) -> Result<()> {
        match state {
            AddState::Ready => self.base.ready_handler(),
            AddState::SelectingFwdServer => self
                .base
                .selecting_server_handler(Direction::Forward, AddState::ReplacingFwdAddrs),
            AddState::SelectingRevServer => self
                .base
                .selecting_server_handler(Direction::Reverse, AddState::ReplacingRevPtrs),
            AddState::ReplacingFwdAddrs => self.replacing_fwd_addrs_handler(),
            AddState::ReplacingRevPtrs => self.replacing_rev_ptrs_handler(),
            AddState::ProcessTransOk => self.base.process_trans_ok_handler(),
            AddState::ProcessTransFailed => self.base.process_trans_failed_handler(),
            AddState::New | AddState::End => Err(Error::invalid_context(format!(
                "{} has no handler",
                state.label()
            ))),
        }
    }

    fn on_model_failure(&mut self, explanation: &str) {
        self.base.on_model_failure(explanation);
    }
}

impl UpdateTransaction for SimpleAddTransaction {
    fn base(&self) -> &NameChangeTransaction<AddState> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NameChangeTransaction<AddState> {
        &mut self.base
    }
}
