//! End to end session behaviour against the in-memory relay

mod common;

use std::sync::Arc;

use common::{dapp_meta, DappPeer, Harness, ACCOUNT, DAPP_PEER_ID, FIRST_WALLET_ID, WALLET_PEER_ID};
use serde_json::json;
use wc_interactor::rpc::{error_codes, Outcome, Response};
use wc_interactor::transport::memory::MemoryRelay;
use wc_interactor::{
    CryptoError, EncryptedPayload, Interactor, InteractorConfig, InteractorError, InteractorEvent,
    SessionRecord, SessionState, SymmetricKey,
};

#[tokio::test]
async fn test_handshake_approve() {
    let mut h = Harness::connected().await;
    assert_eq!(h.wallet.state(), SessionState::Connecting);

    let id = h.dapp.request_session().await;
    match h.next_event().await {
        InteractorEvent::SessionRequest { id: got, params } => {
            assert_eq!(got, id);
            assert_eq!(params.peer_id, DAPP_PEER_ID);
            assert_eq!(params.peer_meta, dapp_meta());
            assert_eq!(params.chain_id, Some(1));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(h.wallet.peer_id().as_deref(), Some(DAPP_PEER_ID));

    h.wallet
        .approve_session(vec![ACCOUNT.to_string()], 1)
        .await
        .unwrap();
    assert_eq!(h.wallet.state(), SessionState::Connected);

    let response = h.dapp.recv_response().await;
    assert_eq!(response.id, id);
    let Outcome::Success(result) = response.outcome else {
        panic!("handshake was not approved");
    };
    assert_eq!(result["approved"], true);
    assert_eq!(result["chainId"], 1);
    assert_eq!(result["accounts"], json!([ACCOUNT]));
    assert_eq!(result["peerId"], WALLET_PEER_ID);
    assert_eq!(
        result["peerMeta"]["name"],
        InteractorConfig::default().client_meta.name
    );

    let record = h.wallet.session_record().unwrap();
    assert_eq!(record.peer_id, DAPP_PEER_ID);
    assert_eq!(record.accounts, vec![ACCOUNT.to_string()]);

    // a second approval has nothing to answer
    assert!(matches!(
        h.wallet.approve_session(vec![ACCOUNT.to_string()], 1).await,
        Err(InteractorError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_handshake_reject() {
    let mut h = Harness::connected().await;
    let id = h.dapp.request_session().await;
    h.next_event().await;

    h.wallet.reject_session("User rejected").await.unwrap();

    let response = h.dapp.recv_response().await;
    assert_eq!(response.id, id);
    match response.outcome {
        Outcome::Failure(err) => {
            assert_eq!(err.code, error_codes::SERVER_ERROR);
            assert_eq!(err.message, "User rejected");
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    assert_eq!(
        h.next_event().await,
        InteractorEvent::Disconnected {
            cause: Some("session rejected".to_string())
        }
    );
    assert_eq!(h.wallet.state(), SessionState::Disconnected);
    assert_eq!(h.wallet.session_record(), None);
    assert_eq!(
        h.wallet.send("eth_chainId", json!([])).await,
        Err(InteractorError::SessionClosed)
    );
}

#[tokio::test]
async fn test_repeated_session_request_is_ignored() {
    let mut h = Harness::connected().await;
    h.dapp.request_session().await;
    h.next_event().await;

    h.dapp.request_session().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_pause_holds_frames_until_resume() {
    let mut h = Harness::paired().await;
    let before = h.sent_to_dapp();

    h.wallet.pause().unwrap();
    assert_eq!(h.wallet.state(), SessionState::Paused);

    let first = {
        let wallet = h.wallet.clone();
        tokio::spawn(async move { wallet.send("first", json!([])).await })
    };
    h.wait_pending(1).await;
    let second = {
        let wallet = h.wallet.clone();
        tokio::spawn(async move { wallet.send("second", json!([])).await })
    };
    h.wait_pending(2).await;

    assert_eq!(h.sent_to_dapp(), before);
    h.dapp.assert_silent().await;

    h.wallet.resume().await.unwrap();
    assert_eq!(h.wallet.state(), SessionState::Connected);

    let a = h.dapp.recv_request().await;
    let b = h.dapp.recv_request().await;
    assert_eq!(a.method, "first");
    assert_eq!(b.method, "second");
    assert!(a.id < b.id);

    h.dapp.respond(Response::success(b.id, json!("b"))).await;
    h.dapp.respond(Response::success(a.id, json!("a"))).await;
    assert_eq!(first.await.unwrap(), Ok(json!("a")));
    assert_eq!(second.await.unwrap(), Ok(json!("b")));
}

#[tokio::test]
async fn test_transport_loss_fails_pending_requests() {
    let mut h = Harness::paired().await;

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let wallet = h.wallet.clone();
            tokio::spawn(async move { wallet.send(&format!("call_{i}"), json!([])).await })
        })
        .collect();
    h.wait_pending(3).await;

    h.relay.shutdown("bridge went away");

    for call in calls {
        assert_eq!(call.await.unwrap(), Err(InteractorError::SessionClosed));
    }
    assert_eq!(h.wallet.pending_requests(), 0);
    assert_eq!(h.wallet.state(), SessionState::Disconnected);
    assert_eq!(
        h.next_event().await,
        InteractorEvent::Disconnected {
            cause: Some("bridge went away".to_string())
        }
    );
}

#[tokio::test]
async fn test_request_answered_at_most_once() {
    let mut h = Harness::paired().await;
    let id = h
        .dapp
        .call("personal_sign", json!(["0x68656c6c6f", ACCOUNT]))
        .await;
    assert!(matches!(
        h.next_event().await,
        InteractorEvent::Request { id: got, .. } if got == id
    ));
    let before = h.sent_to_dapp();

    h.wallet.approve_request(id, json!("0xsigned")).await.unwrap();
    assert!(matches!(
        h.wallet.approve_request(id, json!("0xagain")).await,
        Err(InteractorError::InvalidState(_))
    ));
    assert!(matches!(
        h.wallet.reject_request(id, "too late").await,
        Err(InteractorError::InvalidState(_))
    ));

    assert_eq!(h.sent_to_dapp(), before + 1);
    let response = h.dapp.recv_response().await;
    assert_eq!(response, Response::success(id, json!("0xsigned")));
    h.dapp.assert_silent().await;
}

#[tokio::test]
async fn test_answering_unknown_request_is_refused() {
    let h = Harness::paired().await;
    assert!(matches!(
        h.wallet.reject_request(4242, "never asked").await,
        Err(InteractorError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_unmatched_response_is_ignored() {
    let mut h = Harness::paired().await;

    h.dapp.respond(Response::success(999_999, json!("stray"))).await;

    let call = {
        let wallet = h.wallet.clone();
        tokio::spawn(async move { wallet.send("eth_chainId", json!([])).await })
    };
    let request = h.dapp.recv_request().await;
    assert_eq!(request.id, FIRST_WALLET_ID);
    h.dapp.respond(Response::success(request.id, json!("0x1"))).await;

    assert_eq!(call.await.unwrap(), Ok(json!("0x1")));
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_peer_error_response() {
    let mut h = Harness::paired().await;
    let call = {
        let wallet = h.wallet.clone();
        tokio::spawn(async move { wallet.send("wallet_switchEthereumChain", json!([])).await })
    };
    let request = h.dapp.recv_request().await;
    h.dapp
        .respond(Response::error(request.id, -32000, "nope"))
        .await;

    assert_eq!(
        call.await.unwrap(),
        Err(InteractorError::Rpc {
            code: -32000,
            message: "nope".to_string()
        })
    );
}

#[tokio::test]
async fn test_concurrent_sends_get_distinct_increasing_ids() {
    let mut h = Harness::paired().await;

    let calls: Vec<_> = (0..10)
        .map(|_| {
            let wallet = h.wallet.clone();
            tokio::spawn(async move { wallet.send("ping", json!([])).await })
        })
        .collect();

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(h.dapp.recv_request().await.id);
    }
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 10);
    assert_eq!(ids, sorted, "ids must reach the wire in increasing order");

    for id in &ids {
        h.dapp.respond(Response::success(*id, json!(id))).await;
    }
    let mut results = Vec::new();
    for call in calls {
        results.push(call.await.unwrap().unwrap().as_u64().unwrap());
    }
    results.sort_unstable();
    assert_eq!(results, sorted);
}

#[tokio::test]
async fn test_tampered_envelopes_are_dropped_then_fatal() {
    let mut h = Harness::paired().await;

    let forged = |n: u8| {
        let foreign = SymmetricKey::new([n; 32]);
        let sealed = wc_interactor::Cipher::encrypt(&foreign, b"{}").unwrap();
        sealed.to_json()
    };

    h.dapp.publish_raw(WALLET_PEER_ID, forged(1)).await;
    assert_eq!(
        h.next_event().await,
        InteractorEvent::Error(InteractorError::Decryption(CryptoError::DecryptionFailed))
    );
    assert_eq!(h.wallet.state(), SessionState::Connected);

    // flipping one ciphertext digit breaks the tag as well
    let sealed = wc_interactor::Cipher::encrypt(&h.dapp.descriptor.key, b"{}").unwrap();
    let mut data = sealed.data.into_bytes();
    data[0] = if data[0] == b'0' { b'1' } else { b'0' };
    let tampered = EncryptedPayload {
        data: String::from_utf8(data).unwrap(),
        iv: sealed.iv,
    };
    h.dapp.publish_raw(WALLET_PEER_ID, tampered.to_json()).await;
    assert!(matches!(
        h.next_event().await,
        InteractorEvent::Error(InteractorError::Decryption(_))
    ));

    h.dapp.publish_raw(WALLET_PEER_ID, forged(3)).await;
    assert!(matches!(
        h.next_event().await,
        InteractorEvent::Error(InteractorError::Decryption(_))
    ));
    assert!(matches!(
        h.next_event().await,
        InteractorEvent::Disconnected { cause: Some(_) }
    ));
    assert_eq!(h.wallet.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_valid_envelope_resets_decrypt_failures() {
    let config = InteractorConfig {
        max_decrypt_failures: 2,
        ..InteractorConfig::default()
    };
    let mut h = Harness::paired_with(config).await;
    let forged = wc_interactor::Cipher::encrypt(&SymmetricKey::generate(), b"{}")
        .unwrap()
        .to_json();

    h.dapp.publish_raw(WALLET_PEER_ID, forged.clone()).await;
    h.next_event().await;
    h.dapp.respond(Response::success(1, json!(null))).await;
    h.dapp.publish_raw(WALLET_PEER_ID, forged).await;
    h.next_event().await;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.wallet.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_garbage_frames_are_reported_not_fatal() {
    let mut h = Harness::paired().await;

    h.dapp.publish_raw(WALLET_PEER_ID, "not json".to_string()).await;
    assert!(matches!(
        h.next_event().await,
        InteractorEvent::Error(InteractorError::Protocol(_))
    ));
    assert_eq!(h.wallet.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_unsupported_method_is_rejected() {
    let mut h = Harness::paired().await;
    let id = h
        .dapp
        .call("wallet_addEthereumChain", json!([{"chainId": "0x38"}]))
        .await;

    assert_eq!(
        h.next_event().await,
        InteractorEvent::UnsupportedMethod {
            id,
            method: "wallet_addEthereumChain".to_string()
        }
    );
    let response = h.dapp.recv_response().await;
    assert_eq!(response.id, id);
    assert!(matches!(
        response.outcome,
        Outcome::Failure(ref err) if err.code == error_codes::METHOD_NOT_FOUND
    ));

    // already answered
    assert!(matches!(
        h.wallet.approve_request(id, json!(null)).await,
        Err(InteractorError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_invalid_params_are_rejected() {
    let mut h = Harness::paired().await;
    let id = h.dapp.call("personal_sign", json!([])).await;

    assert!(matches!(
        h.next_event().await,
        InteractorEvent::Error(InteractorError::Validation(_))
    ));
    let response = h.dapp.recv_response().await;
    assert_eq!(response.id, id);
    assert!(matches!(
        response.outcome,
        Outcome::Failure(ref err) if err.code == error_codes::INVALID_PARAMS
    ));
}

#[tokio::test]
async fn test_malformed_hex_is_rejected() {
    let mut h = Harness::paired().await;
    let id = h.dapp.call("eth_sign", json!([ACCOUNT, "0xzz"])).await;

    assert!(matches!(
        h.next_event().await,
        InteractorEvent::Error(InteractorError::Validation(_))
    ));
    let response = h.dapp.recv_response().await;
    assert_eq!(response.id, id);
    assert!(matches!(
        response.outcome,
        Outcome::Failure(ref err) if err.code == error_codes::INVALID_PARAMS
    ));
}

#[tokio::test]
async fn test_request_before_approval_is_rejected() {
    let mut h = Harness::connected().await;
    h.dapp.request_session().await;
    assert!(matches!(
        h.next_event().await,
        InteractorEvent::SessionRequest { .. }
    ));

    let id = h.dapp.call("eth_sign", json!([ACCOUNT, "0xdeadbeef"])).await;
    let response = h.dapp.recv_response().await;
    assert_eq!(response.id, id);
    assert!(matches!(
        response.outcome,
        Outcome::Failure(ref err) if err.code == error_codes::SERVER_ERROR
    ));
    assert!(h.events.try_recv().is_err());

    // the handshake is unaffected
    h.wallet
        .approve_session(vec![ACCOUNT.to_string()], 1)
        .await
        .unwrap();
    h.dapp.recv_response().await;
    assert_eq!(h.wallet.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_peer_update_changes_chain() {
    let mut h = Harness::paired().await;
    h.dapp
        .call("wc_sessionUpdate", json!([{"approved": true, "chainId": 56}]))
        .await;

    assert_eq!(
        h.next_event().await,
        InteractorEvent::SessionUpdated {
            accounts: vec![ACCOUNT.to_string()],
            chain_id: 56
        }
    );
    assert_eq!(h.wallet.chain_id(), 56);
}

#[tokio::test]
async fn test_peer_disconnect() {
    let mut h = Harness::paired().await;
    h.dapp
        .call(
            "wc_sessionUpdate",
            json!([{"approved": false, "chainId": null, "accounts": null}]),
        )
        .await;

    assert_eq!(
        h.next_event().await,
        InteractorEvent::Disconnected {
            cause: Some("peer disconnected".to_string())
        }
    );
    assert_eq!(h.wallet.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_kill_session_notifies_peer() {
    let mut h = Harness::paired().await;
    h.wallet.kill_session().await.unwrap();

    let update = h.dapp.recv_request().await;
    assert_eq!(update.method, "wc_sessionUpdate");
    assert_eq!(
        update.params,
        json!([{"approved": false, "chainId": null, "accounts": null}])
    );
    assert_eq!(
        h.next_event().await,
        InteractorEvent::Disconnected { cause: None }
    );
    assert!(matches!(h.wallet.pause(), Err(InteractorError::SessionClosed)));
}

#[tokio::test]
async fn test_update_session() {
    let mut h = Harness::paired().await;
    let other = "0x9431cf5da0ce60664661341db650763b08286b18".to_string();

    h.wallet.update_session(vec![other.clone()], 56).await.unwrap();

    let update = h.dapp.recv_request().await;
    assert_eq!(update.method, "wc_sessionUpdate");
    assert_eq!(
        update.params,
        json!([{"approved": true, "chainId": 56, "accounts": [other]}])
    );
    assert_eq!(h.wallet.accounts(), vec![other]);
    assert_eq!(h.wallet.chain_id(), 56);
    assert_eq!(h.wallet.pending_requests(), 0);
}

#[tokio::test]
async fn test_recover_stored_session() {
    let relay = MemoryRelay::new();
    let descriptor = wc_interactor::SessionDescriptor::generate("https://bridge.example");
    let record = SessionRecord {
        descriptor: descriptor.clone(),
        client_id: WALLET_PEER_ID.to_string(),
        peer_id: DAPP_PEER_ID.to_string(),
        peer_meta: dapp_meta(),
        accounts: vec![ACCOUNT.to_string()],
        chain_id: 1,
    };

    let (wallet, mut events) = Interactor::recover(
        record.clone(),
        InteractorConfig::default(),
        Arc::new(relay.endpoint()),
    );
    wallet.connect().await.unwrap();
    assert_eq!(wallet.state(), SessionState::Connected);
    assert_eq!(wallet.session_record(), Some(record));

    let mut dapp = DappPeer::join(&relay, descriptor).await;
    let id = dapp.call("eth_sign", json!([ACCOUNT, "0xdeadbeef"])).await;
    assert!(matches!(
        events.recv().await,
        Some(InteractorEvent::Request { id: got, .. }) if got == id
    ));

    wallet.approve_request(id, json!("0xsig")).await.unwrap();
    assert_eq!(
        dapp.recv_response().await,
        Response::success(id, json!("0xsig"))
    );
}
