//! Integration tests for opcode dispatch and the control-stream read loop.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::sync::mpsc;
use zonelink::prelude::*;
use zonelink::protocol::{framed_len, marshal, unmarshal, write_stream_header, ProtocolError};
use zonelink::transport::Outbound;

// =========================================================================
// Test opcodes and handlers
// =========================================================================

const LOGIN: Opcode = Opcode(0x0001);
const LOGIN_ACK: Opcode = Opcode(0x0002);
const CHAT: Opcode = Opcode(0x0010);
const CHAT_ECHO: Opcode = Opcode(0x0011);
const FAILS: Opcode = Opcode(0x00ff);

const CLIENT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

type TestSession = Arc<Session<ChannelMessenger>>;

/// LOGIN carries an account id; CHAT carries text that is echoed back as
/// a datagram; FAILS always errors.
fn registry() -> HandlerRegistry<ChannelMessenger> {
    let mut registry = HandlerRegistry::new();

    registry.register_public(LOGIN, |session: TestSession, payload: Vec<u8>| async move {
        let message = unmarshal(&payload)?;
        let account = MessageReader::new(&message).read_i64()?;
        session.authenticate(account);
        session
            .queue_message(LOGIN_ACK, |m| {
                m.write_i64(account);
                Ok::<_, SessionError>(())
            })
            .await?;
        Ok::<(), ZonelinkError>(())
    });

    registry.register(CHAT, |session: TestSession, payload: Vec<u8>| async move {
        let text = session
            .read_message(&payload, |message| {
                MessageReader::new(&message).read_text().map(str::to_owned)
            })
            .await??;
        session
            .queue_datagram(CHAT_ECHO, |m| {
                m.write_text(&text);
                Ok::<_, SessionError>(())
            })
            .await?;
        Ok::<(), ZonelinkError>(())
    });

    registry.register_public(FAILS, |_: TestSession, _: Vec<u8>| async move {
        Err::<(), ZonelinkError>(ProtocolError::InvalidRecord("handler refused".into()).into())
    });

    registry
}

// =========================================================================
// Helpers
// =========================================================================

async fn setup(
    config: SessionConfig,
    control: Option<ChannelConnection>,
) -> (TestSession, mpsc::Receiver<Outbound>) {
    let (messenger, rx) = ChannelMessenger::new(64);
    let manager = SessionManager::new(config);
    let session = manager
        .create_session(Arc::new(messenger), SessionId(1), CLIENT_IP, control)
        .await;
    (session, rx)
}

fn framed(build: impl FnOnce(&mut MessageBuilder<'_>)) -> Vec<u8> {
    let mut message = Message::new();
    build(&mut message.reset());
    let mut buf = vec![0; framed_len(&message).unwrap()];
    marshal(&message, &mut buf).unwrap();
    buf
}

fn login_payload(account: i64) -> Vec<u8> {
    framed(|m| {
        m.write_i64(account);
    })
}

fn chat_payload(text: &str) -> Vec<u8> {
    framed(|m| {
        m.write_text(text);
    })
}

fn datagram(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut out = opcode.0.to_le_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

fn stream_record(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0; 6];
    write_stream_header(&mut out, opcode, payload.len()).unwrap();
    out.extend_from_slice(payload);
    out
}

fn read_text_reply(data: &[u8]) -> String {
    let message = Datagram::parse(data).unwrap().message().unwrap().unwrap();
    MessageReader::new(&message).read_text().unwrap().to_owned()
}

// =========================================================================
// HandlerRegistry::handle_datagram
// =========================================================================

#[tokio::test]
async fn test_handle_datagram_shorter_than_opcode_is_dropped() {
    let (session, _rx) = setup(SessionConfig::default(), None).await;

    let result = registry().handle_datagram(&session, &[0x01]).await.unwrap();

    assert_eq!(result, Dispatch::Dropped(DropReason::TooShort));
}

#[tokio::test]
async fn test_handle_datagram_bare_opcode_is_dropped() {
    let (session, _rx) = setup(SessionConfig::default(), None).await;

    let result = registry()
        .handle_datagram(&session, &datagram(LOGIN, &[]))
        .await
        .unwrap();

    assert_eq!(result, Dispatch::Dropped(DropReason::EmptyPayload));
}

#[tokio::test]
async fn test_handle_datagram_private_opcode_before_login_is_dropped() {
    let (session, mut rx) = setup(SessionConfig::default(), None).await;

    let result = registry()
        .handle_datagram(&session, &datagram(CHAT, &chat_payload("hi")))
        .await
        .unwrap();

    assert_eq!(result, Dispatch::Dropped(DropReason::Unauthenticated));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_handle_datagram_unknown_opcode_before_login_is_unauthenticated() {
    let (session, _rx) = setup(SessionConfig::default(), None).await;

    let result = registry()
        .handle_datagram(&session, &datagram(Opcode(0x7777), &chat_payload("x")))
        .await
        .unwrap();

    assert_eq!(result, Dispatch::Dropped(DropReason::Unauthenticated));
}

#[tokio::test]
async fn test_handle_datagram_login_then_chat_is_handled() {
    let (session, mut rx) = setup(SessionConfig::default(), None).await;
    let registry = registry();

    let login = registry
        .handle_datagram(&session, &datagram(LOGIN, &login_payload(99)))
        .await
        .unwrap();
    let chat = registry
        .handle_datagram(&session, &datagram(CHAT, &chat_payload("hello zone")))
        .await
        .unwrap();

    assert_eq!(login, Dispatch::Handled);
    assert_eq!(chat, Dispatch::Handled);
    assert!(session.is_authenticated());
    assert_eq!(session.info().account_id, Some(99));

    match rx.recv().await.unwrap() {
        Outbound::Stream { data, .. } => {
            let record = StreamRecord::parse(&data).unwrap();
            assert_eq!(record.opcode, LOGIN_ACK);
        }
        other => panic!("expected login ack, got {other:?}"),
    }
    match rx.recv().await.unwrap() {
        Outbound::Datagram { data, .. } => assert_eq!(read_text_reply(&data), "hello zone"),
        other => panic!("expected chat echo, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handle_datagram_unknown_opcode_after_login_is_dropped() {
    let (session, _rx) = setup(SessionConfig::default(), None).await;
    session.authenticate(1);

    let result = registry()
        .handle_datagram(&session, &datagram(Opcode(0x7777), &chat_payload("x")))
        .await
        .unwrap();

    assert_eq!(result, Dispatch::Dropped(DropReason::UnknownOpcode));
}

#[tokio::test]
async fn test_handle_datagram_handler_error_is_returned() {
    let (session, _rx) = setup(SessionConfig::default(), None).await;

    let result = registry()
        .handle_datagram(&session, &datagram(FAILS, &login_payload(0)))
        .await;

    assert!(matches!(
        result,
        Err(ZonelinkError::Protocol(ProtocolError::InvalidRecord(_)))
    ));
}

#[test]
fn test_registry_public_flags() {
    let registry = registry();

    assert_eq!(registry.len(), 3);
    assert!(registry.is_public(LOGIN));
    assert!(!registry.is_public(CHAT));
    assert!(!registry.is_public(Opcode(0x7777)));
}

// =========================================================================
// serve_control_stream
// =========================================================================

#[tokio::test]
async fn test_serve_control_stream_reassembles_split_records() {
    let (server, client) = ChannelConnection::pair(16);
    let (session, mut rx) = setup(SessionConfig::default(), Some(server)).await;
    let registry = Arc::new(registry());

    let mut wire = stream_record(LOGIN, &login_payload(7));
    wire.extend(stream_record(CHAT, &chat_payload("split me")));
    let cut = wire.len() - 5;

    let (served, ()) = tokio::join!(
        serve_control_stream(Arc::clone(&session), registry),
        async {
            client.send(&wire[..cut]).await.unwrap();
            client.send(&wire[cut..]).await.unwrap();
            client.close().await.unwrap();
        }
    );

    served.unwrap();
    assert!(session.is_authenticated());
    assert!(matches!(rx.recv().await, Some(Outbound::Stream { .. })));
    match rx.recv().await.unwrap() {
        Outbound::Datagram { data, .. } => assert_eq!(read_text_reply(&data), "split me"),
        other => panic!("expected chat echo, got {other:?}"),
    }
}

#[tokio::test]
async fn test_serve_control_stream_handler_error_keeps_serving() {
    let (server, client) = ChannelConnection::pair(16);
    let (session, _rx) = setup(SessionConfig::default(), Some(server)).await;
    let registry = Arc::new(registry());

    let mut wire = stream_record(FAILS, &login_payload(0));
    wire.extend(stream_record(LOGIN, &login_payload(3)));

    let (served, ()) = tokio::join!(
        serve_control_stream(Arc::clone(&session), registry),
        async {
            client.send(&wire).await.unwrap();
            client.close().await.unwrap();
        }
    );

    served.unwrap();
    assert_eq!(session.info().account_id, Some(3));
}

#[tokio::test]
async fn test_serve_control_stream_oversized_record_is_error() {
    let config = SessionConfig {
        max_record_bytes: 64,
        ..SessionConfig::default()
    };
    let (server, client) = ChannelConnection::pair(16);
    let (session, _rx) = setup(config, Some(server)).await;

    let (served, ()) = tokio::join!(
        serve_control_stream(session, Arc::new(registry())),
        async {
            client.send(&[0, 4, 0, 0, 1, 0]).await.unwrap();
        }
    );

    assert!(matches!(
        served,
        Err(ZonelinkError::Protocol(ProtocolError::RecordTooLarge { len: 1024, max: 64 }))
    ));
}

#[tokio::test]
async fn test_serve_control_stream_without_control_returns_immediately() {
    let (session, _rx) = setup(SessionConfig::default(), None).await;

    serve_control_stream(session, Arc::new(registry())).await.unwrap();
}

#[tokio::test]
async fn test_serve_control_stream_ends_when_session_closes() {
    let (server, client) = ChannelConnection::pair(16);
    let (session, _rx) = setup(SessionConfig::default(), Some(server)).await;

    let (served, ()) = tokio::join!(
        serve_control_stream(Arc::clone(&session), Arc::new(registry())),
        async {
            // Closing the session closes the server end; its read loop
            // sees end-of-stream once the client end is dropped too.
            session.close().await.unwrap();
            drop(client);
        }
    );

    served.unwrap();
    assert!(session.is_closed());
}
