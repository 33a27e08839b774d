//! Contract Test: Update Outcomes
//!
//! Constraints verified:
//! - A successful add updates the forward domain first, then the reverse
//!   domain, and completes the request
//! - Only the requested directions are updated
//! - Completion flags are set only for directions a server accepted
//! - A server's rejection fails the request without touching the other
//!   direction
//! - A remove treats NXDOMAIN as success
//! - The request's final status is the only place failures surface
//! - A completion arriving after the end leaves the outcome untouched

mod common;

use common::*;
use d2_core::dns_client::DnsClientStatus;
use d2_core::message::{Rcode, RecordClass, RecordData, RecordType};
use d2_core::ncr::NcrStatus;
use d2_core::state_model::StateHandler;
use d2_core::transaction::{UpdateTransaction, drive};
use d2_core::{AddState, Event, NameChangeRequest, SimpleAddTransaction, SimpleRemoveTransaction};
use std::time::Duration;

const SERVER: &str = "192.0.2.1";

fn timeout() -> Duration {
    Duration::from_millis(TEST_TIMEOUT_MS)
}

fn add_transaction(request: NameChangeRequest) -> SimpleAddTransaction {
    let config = build(&test_config(&[SERVER]));
    let forward = request
        .forward_change
        .then(|| config.forward_domains.match_domain(&request.fqdn))
        .flatten();
    let reverse = request
        .reverse_change
        .then(|| config.reverse_domains.match_domain("10.2.0.192.in-addr.arpa."))
        .flatten();
    SimpleAddTransaction::new(request, forward, reverse).unwrap()
}

fn remove_transaction(request: NameChangeRequest) -> SimpleRemoveTransaction {
    let config = build(&test_config(&[SERVER]));
    let forward = config.forward_domains.match_domain(&request.fqdn);
    let reverse = config.reverse_domains.match_domain("10.2.0.192.in-addr.arpa.");
    SimpleRemoveTransaction::new(request, forward, reverse).unwrap()
}

#[tokio::test]
async fn add_updates_forward_then_reverse() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::NoError));
    let mut txn = add_transaction(add_request("host.example.com.", "192.0.2.10"));

    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert!(txn.model().is_model_done());
    assert!(!txn.model().did_model_fail());
    assert_eq!(txn.ncr().status(), NcrStatus::Completed);
    assert!(txn.base().forward_change_completed());
    assert!(txn.base().reverse_change_completed());
    assert_eq!(txn.model().prev_state(), AddState::ProcessTransOk);
    assert_eq!(txn.model().last_event(), Event::UPDATE_OK);

    let exchanges = transport.exchanges();
    assert_eq!(exchanges.len(), 2);

    let forward = &exchanges[0].request;
    assert_eq!(forward.zone, "example.com.");
    assert!(forward.updates.iter().any(|rr| {
        rr.rtype == RecordType::A
            && rr.class == RecordClass::In
            && rr.ttl == 3600
            && rr.rdata == vec![RecordData::Address("192.0.2.10".parse().unwrap())]
    }));

    let reverse = &exchanges[1].request;
    assert_eq!(reverse.zone, "2.0.192.in-addr.arpa.");
    assert!(reverse.updates.iter().any(|rr| {
        rr.name == "10.2.0.192.in-addr.arpa."
            && rr.rtype == RecordType::Ptr
            && rr.rdata == vec![RecordData::Ptr("host.example.com.".to_string())]
    }));
}

#[tokio::test]
async fn forward_only_add_skips_reverse() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::NoError));
    let request = add_request("host.example.com.", "192.0.2.10").with_reverse_change(false);
    let mut txn = add_transaction(request);

    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert_eq!(txn.ncr().status(), NcrStatus::Completed);
    assert_eq!(transport.exchange_count(), 1);
    assert!(txn.base().forward_change_completed());
    assert!(!txn.base().reverse_change_completed());
}

#[tokio::test]
async fn reverse_only_add_starts_at_reverse() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::NoError));
    let request = add_request("host.example.com.", "192.0.2.10").with_forward_change(false);
    let mut txn = add_transaction(request);

    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert_eq!(txn.ncr().status(), NcrStatus::Completed);
    assert_eq!(transport.exchange_count(), 1);
    assert_eq!(transport.exchanges()[0].request.zone, "2.0.192.in-addr.arpa.");
    assert!(!txn.base().forward_change_completed());
    assert!(txn.base().reverse_change_completed());
}

#[tokio::test]
async fn forward_rejection_fails_without_reverse_update() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::Refused));
    let mut txn = add_transaction(add_request("host.example.com.", "192.0.2.10"));

    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert_eq!(txn.ncr().status(), NcrStatus::Failed);
    assert_eq!(transport.exchange_count(), 1);
    assert!(!txn.base().forward_change_completed());
    assert!(!txn.base().reverse_change_completed());
    assert_eq!(txn.model().last_event(), Event::UPDATE_FAILED);
}

#[tokio::test]
async fn reverse_rejection_keeps_forward_completion() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::NoError))
        .with_script([Reply::Rcode(Rcode::NoError), Reply::Rcode(Rcode::NotAuth)]);
    let mut txn = add_transaction(add_request("host.example.com.", "192.0.2.10"));

    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert_eq!(txn.ncr().status(), NcrStatus::Failed);
    assert!(txn.base().forward_change_completed());
    assert!(!txn.base().reverse_change_completed());
    assert!(
        txn.base()
            .transaction_outcome_string()
            .contains("Forward change: completed, Reverse change: failed")
    );
}

#[tokio::test]
async fn nxdomain_fails_an_add() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::NxDomain));
    let mut txn = add_transaction(add_request("host.example.com.", "192.0.2.10"));

    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert_eq!(txn.ncr().status(), NcrStatus::Failed);
}

#[tokio::test]
async fn remove_treats_nxdomain_as_success() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::NxDomain));
    let mut txn = remove_transaction(remove_request("host.example.com.", "192.0.2.10"));

    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert_eq!(txn.ncr().status(), NcrStatus::Completed);
    assert!(txn.base().forward_change_completed());
    assert!(txn.base().reverse_change_completed());

    let exchanges = transport.exchanges();
    assert_eq!(exchanges.len(), 2);
    assert!(exchanges[0].request.updates.iter().any(|rr| {
        rr.class == RecordClass::None
            && rr.rdata == vec![RecordData::Address("192.0.2.10".parse().unwrap())]
    }));
    assert!(exchanges[1].request.updates.iter().any(|rr| {
        rr.name == "10.2.0.192.in-addr.arpa."
            && rr.rtype == RecordType::Any
            && rr.class == RecordClass::Any
    }));
}

#[tokio::test]
async fn remove_rejection_fails() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::ServFail));
    let mut txn = remove_transaction(remove_request("host.example.com.", "192.0.2.10"));

    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert_eq!(txn.ncr().status(), NcrStatus::Failed);
    assert_eq!(transport.exchange_count(), 1);
}

#[tokio::test]
async fn aaaa_records_for_v6_requests() {
    let config = build(&{
        let mut config = test_config(&[SERVER]);
        config.reverse_ddns = Vec::new();
        config
    });
    let request = add_request("host.example.com.", "2001:db8::10").with_reverse_change(false);
    let forward = config.forward_domains.match_domain(&request.fqdn);
    let mut txn = SimpleAddTransaction::new(request, forward, None).unwrap();

    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::NoError));
    drive(&mut txn, &transport, timeout()).await.unwrap();

    assert_eq!(txn.ncr().status(), NcrStatus::Completed);
    assert!(
        transport.exchanges()[0]
            .request
            .updates
            .iter()
            .any(|rr| rr.rtype == RecordType::Aaaa)
    );
}

#[tokio::test]
async fn late_completion_keeps_final_outcome() {
    let transport = ScriptedTransport::new(Reply::Rcode(Rcode::NoError));
    let mut txn = add_transaction(add_request("host.example.com.", "192.0.2.10"));

    drive(&mut txn, &transport, timeout()).await.unwrap();
    assert_eq!(txn.base().response_string(), "SUCCESS, rcode: NOERROR");

    assert!(txn.io_completed(DnsClientStatus::Timeout, None).is_err());

    assert_eq!(txn.base().response_string(), "SUCCESS, rcode: NOERROR");
    assert_eq!(txn.base().dns_update_status(), DnsClientStatus::Success);
    assert_eq!(txn.ncr().status(), NcrStatus::Completed);
    assert!(txn.model().is_model_done());
}
