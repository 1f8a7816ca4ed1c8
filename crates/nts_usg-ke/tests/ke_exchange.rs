// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! End-to-end NTS-KE exchanges over loopback TLS.

mod common;

use std::io::{Read, Write};
use std::time::Duration;

use common::{spawn_test_server, TestPki};
use nts_ke::client::NtsKeConnector;
use nts_ke::cookie::COOKIE_LENGTH;
use nts_ke::error::NtsKeError;
use nts_ke::record::{
    Message, MessageFormat, RECORD_AEAD_ALGORITHM, RECORD_END_OF_MESSAGE, RECORD_ERROR,
    RECORD_NEXT_PROTOCOL,
};
use nts_ke::tls_config::client_config;

#[tokio::test]
async fn test_exchange_issues_cookies_bound_to_exported_keys() {
    let pki = TestPki::generate();
    let server = spawn_test_server(&pki, |_| {}).await;

    let outcome = pki
        .connector()
        .exchange(server.addr, "localhost")
        .await
        .expect("exchange failed");

    assert_eq!(outcome.response.cookies.len(), 8);
    assert_eq!(outcome.response.ntp_port, None);
    assert_eq!(outcome.response.ntp_server, None);
    let ring = server.key_ring.read().unwrap();
    for cookie in &outcome.response.cookies {
        assert_eq!(cookie.len(), COOKIE_LENGTH);
        assert_eq!(ring.decode_cookie_bytes(cookie).unwrap(), outcome.keys);
    }
    drop(ring);
    assert!(server.stop().await.is_ok());
}

#[tokio::test]
async fn test_exchange_negotiates_ntp_server_and_port() {
    let pki = TestPki::generate();
    let server = spawn_test_server(&pki, |config| {
        config.ntp_server = Some("ntp.example.test".to_string());
        config.ntp_port = 1123;
        config.cookie_count = 3;
    })
    .await;

    let outcome = pki
        .connector()
        .exchange(server.addr, "localhost")
        .await
        .expect("exchange failed");
    assert_eq!(outcome.response.ntp_server.as_deref(), Some("ntp.example.test"));
    assert_eq!(outcome.response.ntp_port, Some(1123));
    assert_eq!(outcome.response.cookies.len(), 3);
}

#[tokio::test]
async fn test_sequential_exchanges_get_distinct_keys() {
    let pki = TestPki::generate();
    let server = spawn_test_server(&pki, |_| {}).await;
    let connector = pki.connector();

    let first = connector.exchange(server.addr, "localhost").await.unwrap();
    let second = connector.exchange(server.addr, "localhost").await.unwrap();
    assert_ne!(first.keys, second.keys);
    assert_ne!(first.response.cookies, second.response.cookies);
}

#[tokio::test]
async fn test_untrusted_certificate_fails() {
    let pki = TestPki::generate();
    let server = spawn_test_server(&pki, |_| {}).await;
    let connector = NtsKeConnector::new(std::sync::Arc::new(client_config(None).unwrap()));

    match connector.exchange(server.addr, "localhost").await {
        Err(NtsKeError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_unrecognized_critical_record_gets_error_response() {
    let pki = TestPki::generate();
    let server = spawn_test_server(&pki, |_| {}).await;
    let tls = pki.client_tls();
    let addr = server.addr;

    // A plain blocking rustls client lets the request carry any record.
    let response = tokio::task::spawn_blocking(move || {
        let name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let conn = rustls::ClientConnection::new(tls, name).unwrap();
        let sock = std::net::TcpStream::connect(addr).unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut stream = rustls::StreamOwned::new(conn, sock);

        let mut request = Message::new();
        request
            .append_u16_record(true, RECORD_NEXT_PROTOCOL, 0)
            .unwrap();
        request
            .append_u16_record(true, RECORD_AEAD_ALGORITHM, 15)
            .unwrap();
        request.append_record(true, 99, &[]).unwrap();
        request.append_end_of_message().unwrap();
        stream.write_all(request.as_bytes()).unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        response
    })
    .await
    .unwrap();

    let mut message = Message::new();
    message
        .receive_with(|buf| {
            buf[..response.len()].copy_from_slice(&response);
            Ok(response.len())
        })
        .unwrap();
    assert_eq!(message.validate(), MessageFormat::Ok);
    let records: Vec<_> = message.records().collect();
    assert_eq!(records.len(), 2);
    assert!(records[0].critical);
    assert_eq!(records[0].record_type, RECORD_ERROR);
    assert_eq!(records[0].body, &[0, 0]);
    assert_eq!(records[1].record_type, RECORD_END_OF_MESSAGE);
}

#[tokio::test]
async fn test_idle_connection_closed_after_timeout() {
    let pki = TestPki::generate();
    let server = spawn_test_server(&pki, |config| {
        config.session_timeout = Duration::from_millis(200);
    })
    .await;
    let addr = server.addr;

    let closed = tokio::task::spawn_blocking(move || {
        let mut sock = std::net::TcpStream::connect(addr).unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 16];
        match sock.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
        }
    })
    .await
    .unwrap();
    assert!(closed);

    // The slot is free again.
    pki.connector()
        .exchange(server.addr, "localhost")
        .await
        .expect("exchange after timeout failed");
}

#[tokio::test]
async fn test_poisoned_key_ring_keeps_server_running() {
    let pki = TestPki::generate();
    let server = spawn_test_server(&pki, |config| {
        config.rotation_interval = Duration::from_millis(20);
    })
    .await;

    let ring = server.key_ring.clone();
    let poisoner = std::thread::spawn(move || {
        let _guard = ring.write().unwrap();
        panic!("poison the key ring");
    });
    assert!(poisoner.join().is_err());

    // Several rotation ticks pass with the lock poisoned.
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.stop().await.expect("server stopped with an error");
}
