//! Integration tests for pesit-engine.
//!
//! The first group drives a `Session` frame by frame through the public API.
//! The rest run a real server on a loopback listener and talk to it with the
//! requester client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use pesit_engine::catalog::{pi, FpduKind};
use pesit_engine::directory::Partner;
use pesit_engine::journal::{
    Checkpoint, CheckpointStore, EventKind, Fanout, JsonLinesJournal, MemoryJournal,
};
use pesit_engine::protocol::{
    codec, AccessType, ConnectBuilder, CreateBuilder, Fpdu, Leaf, SelectBuilder,
};
use pesit_engine::{
    ClientBuilder, Config, Diagnostic, LocalFileStore, MemoryFileStore, PesitError, Server,
    Session, SessionEnv, SessionState, Step,
};
use tokio::net::TcpListener;

fn config() -> Config {
    Config {
        partners: vec![Partner::new("LOOP")],
        ..Default::default()
    }
}

fn reply(step: Step) -> Fpdu {
    match step {
        Step::Reply(mut frames) if frames.len() == 1 => frames.remove(0),
        other => panic!("expected one reply, got {other:?}"),
    }
}

fn closing(step: Step) -> Fpdu {
    match step {
        Step::Close(Some(frame)) => frame,
        other => panic!("expected a closing frame, got {other:?}"),
    }
}

fn with_diag(kind: FpduKind) -> Fpdu {
    Fpdu::new(kind).with_diagnostic(Diagnostic::SUCCESS)
}

fn dtf(data: &[u8]) -> Fpdu {
    Fpdu::data_frame(FpduKind::Dtf, Bytes::copy_from_slice(data))
}

/// Feed a session an encoded frame, the way the listener does.
fn feed(session: &mut Session, fpdu: &Fpdu) -> Step {
    let frame = codec::encode(fpdu).unwrap();
    session.process_frame(&frame)
}

/// Happy-path write: 25 + 26 bytes land in the store as one 51-byte file.
#[test]
fn test_write_transfer_happy_path() {
    let store = Arc::new(MemoryFileStore::new());
    let journal = Arc::new(MemoryJournal::new());
    let env = SessionEnv::new(&config(), store.clone()).with_sink(journal.clone());
    let mut session = Session::new(5, Arc::new(env));

    let connect = ConnectBuilder::new("LOOP", "PESIT_SERVER").access(AccessType::Write).build(1);
    let ack = reply(feed(&mut session, &connect));
    assert_eq!(ack.kind(), FpduKind::Aconnect);
    assert_eq!(ack.src(), 5);

    let create = CreateBuilder::new("FILE").transfer_id(1).max_entity_size(56).build();
    let ack = reply(feed(&mut session, &create));
    assert_eq!(ack.kind(), FpduKind::AckCreate);
    assert_eq!(ack.leaf(pi::DIAGNOSTIC).unwrap().value().as_ref(), &[0, 0, 0]);
    assert!(ack.number(pi::MAX_ENTITY_SIZE).unwrap() <= 56);

    assert_eq!(reply(feed(&mut session, &Fpdu::new(FpduKind::Open))).kind(), FpduKind::AckOpen);
    assert_eq!(reply(feed(&mut session, &Fpdu::new(FpduKind::Write))).kind(), FpduKind::AckWrite);
    assert!(matches!(feed(&mut session, &dtf(&[b'x'; 25])), Step::Await));
    assert!(matches!(feed(&mut session, &dtf(&[b'y'; 26])), Step::Await));
    assert!(matches!(feed(&mut session, &with_diag(FpduKind::DtfEnd)), Step::Await));
    assert_eq!(session.transfer().unwrap().bytes(), 51);

    let end = Fpdu::new(FpduKind::TransEnd).with(Leaf::numeric(pi::BYTE_COUNT, 51));
    assert_eq!(reply(feed(&mut session, &end)).kind(), FpduKind::AckTransEnd);
    assert_eq!(reply(feed(&mut session, &with_diag(FpduKind::Close))).kind(), FpduKind::AckClose);
    let ack = reply(feed(&mut session, &with_diag(FpduKind::Deselect)));
    assert_eq!(ack.kind(), FpduKind::AckDeselect);
    let relconf = closing(feed(&mut session, &with_diag(FpduKind::Release)));
    assert_eq!(relconf.kind(), FpduKind::Relconf);

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(store.get(Path::new("received/FILE")).unwrap().len(), 51);
    assert_eq!(journal.kinds(), vec![EventKind::Started, EventKind::Completed]);
}

/// A CONNECT naming another server gets RCONNECT (2,7) and nothing else.
#[test]
fn test_unknown_server_refused() {
    let env = SessionEnv::new(&config(), Arc::new(MemoryFileStore::new()));
    let mut session = Session::new(5, Arc::new(env));

    let connect = ConnectBuilder::new("LOOP", "ELSEWHERE").build(1);
    let refusal = closing(feed(&mut session, &connect));
    assert_eq!(refusal.kind(), FpduKind::Rconnect);
    let diag = refusal.diagnostic().unwrap();
    assert_eq!((diag.category(), diag.reason()), (2, 7));
    assert_eq!(session.state(), SessionState::Disconnected);
}

/// A 2048-byte article against a 1024-byte fixed record length aborts with (2,220).
#[test]
fn test_oversize_article_aborts() {
    let env = SessionEnv::new(&config(), Arc::new(MemoryFileStore::new()));
    let mut session = Session::new(5, Arc::new(env));

    reply(feed(&mut session, &ConnectBuilder::new("LOOP", "PESIT_SERVER").build(1)));
    reply(feed(&mut session, &CreateBuilder::new("FILE").fixed_records(1024).build()));
    reply(feed(&mut session, &Fpdu::new(FpduKind::Open)));
    reply(feed(&mut session, &Fpdu::new(FpduKind::Write)));

    let abort = closing(feed(&mut session, &dtf(&[0; 2048])));
    assert_eq!(abort.kind(), FpduKind::Abort);
    assert_eq!(abort.diagnostic(), Some(Diagnostic::D2_220));
    assert_eq!(session.state(), SessionState::Disconnected);
}

/// Interrupted transfer: checkpoint lands on disk, the restarted CREATE
/// resumes from it, and completion clears it again.
#[test]
fn test_checkpoint_survives_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = Arc::new(CheckpointStore::open(dir.path().join("checkpoints")).unwrap());
    let audit = Arc::new(JsonLinesJournal::open(dir.path().join("audit.jsonl")).unwrap());
    let sink = Fanout::new().with(audit.clone()).with(checkpoints.clone());
    let store = Arc::new(LocalFileStore::new(dir.path().join("spool")));

    let mut config = config();
    config.transfer.sync_interval_kb = 1;
    let env = Arc::new(SessionEnv::new(&config, store).with_sink(Arc::new(sink)));
    let connect = ConnectBuilder::new("LOOP", "PESIT_SERVER").sync_points(1, 4);

    let mut first = Session::new(1, env.clone());
    reply(first.process(connect.clone().build(1)));
    reply(first.process(CreateBuilder::new("LEDGER").transfer_id(42).build()));
    reply(first.process(Fpdu::new(FpduKind::Open)));
    reply(first.process(Fpdu::new(FpduKind::Write)));
    first.process(dtf(b"first-half|"));
    reply(first.process(Fpdu::new(FpduKind::Syn).with(Leaf::numeric(pi::SYNC_NUMBER, 1))));
    first.process(dtf(b"lost"));
    first.on_transport_fault();

    let saved = checkpoints.load("LOOP", 42).unwrap().unwrap();
    assert_eq!(saved.sync_point, 1);
    assert_eq!(&saved.data[..], b"first-half|");

    let mut second = Session::new(2, env);
    reply(second.process(connect.build(2)));
    reply(second.process(CreateBuilder::new("LEDGER").transfer_id(42).restarted(true).build()));
    reply(second.process(Fpdu::new(FpduKind::Open)));
    let ack = reply(second.process(Fpdu::new(FpduKind::Write)));
    assert_eq!(ack.number(pi::RESTART_POINT), Some(1));
    second.process(dtf(b"second-half"));
    second.process(with_diag(FpduKind::DtfEnd));
    let end = Fpdu::new(FpduKind::TransEnd).with(Leaf::numeric(pi::BYTE_COUNT, 22));
    let ack = reply(second.process(end));
    assert_eq!(ack.diagnostic(), Some(Diagnostic::SUCCESS));

    let written = std::fs::read(dir.path().join("spool/received/LEDGER")).unwrap();
    assert_eq!(written, b"first-half|second-half");
    assert!(checkpoints.load("LOOP", 42).unwrap().is_none());

    let audit = std::fs::read_to_string(audit.path()).unwrap();
    let kinds: Vec<String> = audit
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["kind"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(kinds, ["started", "progressed", "interrupted", "started", "completed"]);
}

/// Start a server on an ephemeral loopback port.
async fn start_server(env: SessionEnv) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(env);
    tokio::spawn(async move { server.serve(listener).await });
    addr
}

fn requester() -> ClientBuilder {
    ClientBuilder::new("LOOP", "PESIT_SERVER")
}

/// Client sends a file over TCP with sync points; the server stores it.
#[tokio::test]
async fn test_client_sends_file() {
    let store = Arc::new(MemoryFileStore::new());
    let journal = Arc::new(MemoryJournal::new());
    let env = SessionEnv::new(&config(), store.clone()).with_sink(journal.clone());
    let addr = start_server(env).await;

    let mut client = requester().sync_points(1, 4).connect_tcp(addr).await.unwrap();
    assert_eq!(client.sync_interval_kb(), 1);

    let content: Bytes = (0..5000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();
    let create = CreateBuilder::new("PAYROLL").transfer_id(3).max_entity_size(1030);
    let outcome = client.send_file(create, content.clone()).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.bytes, 5000);
    assert_eq!(outcome.records, 5);
    assert_eq!(outcome.diagnostic, Diagnostic::SUCCESS);
    client.release().await.unwrap();

    assert_eq!(store.get(Path::new("received/PAYROLL")).unwrap(), content);
    let kinds = journal.kinds();
    assert_eq!(kinds.first(), Some(&EventKind::Started));
    assert_eq!(kinds.last(), Some(&EventKind::Completed));
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Progressed).count(), 4);
}

/// Client fetches a file the server holds in its send directory.
#[tokio::test]
async fn test_client_receives_file() {
    let store = Arc::new(MemoryFileStore::new());
    let content = Bytes::from(vec![b'r'; 300]);
    store.insert("outgoing/REPORT", content.clone());
    let addr = start_server(SessionEnv::new(&config(), store)).await;

    let mut client = requester().connect_tcp(addr).await.unwrap();
    let (received, outcome) = client
        .receive_file(SelectBuilder::new("REPORT").max_entity_size(106))
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(received, content);
    assert_eq!(outcome.bytes, 300);
    assert_eq!(outcome.records, 3);
    client.release().await.unwrap();
}

/// Short and segmented messages both reach the sink whole.
#[tokio::test]
async fn test_client_sends_messages() {
    let journal = Arc::new(MemoryJournal::new());
    let env =
        SessionEnv::new(&config(), Arc::new(MemoryFileStore::new())).with_sink(journal.clone());
    let addr = start_server(env).await;

    let mut client = requester().connect_tcp(addr).await.unwrap();
    client.send_message(1, "batch ready").await.unwrap();
    let long = "0123456789".repeat(1000);
    client.send_message(2, &long).await.unwrap();
    client.release().await.unwrap();

    let messages = journal.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], ("LOOP".to_string(), "batch ready".to_string()));
    assert_eq!(messages[1].1, long);
}

/// A refused CONNECT surfaces the server's diagnostic.
#[tokio::test]
async fn test_client_connect_refused() {
    let addr = start_server(SessionEnv::new(&config(), Arc::new(MemoryFileStore::new()))).await;

    let result = ClientBuilder::new("NOBODY", "PESIT_SERVER").connect_tcp(addr).await;
    match result {
        Err(PesitError::Rejected(diag)) => assert_eq!(diag, Diagnostic::D2_001),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("connect should be refused"),
    }
}

/// A refused CREATE comes back as an unsuccessful outcome, not an error.
#[tokio::test]
async fn test_refused_transfer_outcome() {
    let store = Arc::new(MemoryFileStore::new());
    store.insert("received/TAKEN", Bytes::from_static(b"old"));
    let addr = start_server(SessionEnv::new(&config(), store.clone())).await;

    let mut client = requester().connect_tcp(addr).await.unwrap();
    let outcome = client
        .send_file(CreateBuilder::new("TAKEN"), Bytes::from_static(b"new"))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.diagnostic, Diagnostic::D2_204);
    assert_eq!(outcome.bytes, 0);
    assert_eq!(store.get(Path::new("received/TAKEN")).unwrap().as_ref(), b"old");
}

/// A restarted send skips what the server already holds at its checkpoint.
#[tokio::test]
async fn test_client_resumes_from_checkpoint() {
    let store = Arc::new(MemoryFileStore::new());
    let journal = Arc::new(MemoryJournal::new());
    let content: Bytes = (0..3000u32).map(|i| (i % 97) as u8).collect::<Vec<_>>().into();
    journal.save_checkpoint(Checkpoint {
        partner: "LOOP".into(),
        transfer_id: 8,
        filename: "BATCH".into(),
        sync_point: 1,
        bytes: 1024,
        records: 1,
        data: content.slice(..1024),
        saved_at: Utc::now(),
    });
    let env = SessionEnv::new(&config(), store.clone()).with_sink(journal.clone());
    let addr = start_server(env).await;

    let mut client = requester().sync_points(1, 4).connect_tcp(addr).await.unwrap();
    let create = CreateBuilder::new("BATCH")
        .transfer_id(8)
        .max_entity_size(1030)
        .restarted(true);
    let outcome = client.send_file(create, content.clone()).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.restart_point, 1);
    assert_eq!(outcome.bytes, 3000);
    assert_eq!(outcome.records, 3);
    client.release().await.unwrap();

    assert_eq!(store.get(Path::new("received/BATCH")).unwrap(), content);
}
