//! Forward client over TCP against a fake collector, with and without
//! per-chunk acknowledgements.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use fluent_forward::client::{Client, ClientConfig};
use fluent_forward::protocol::{
    chunk_from_bytes, scan, Ack, EntryExt, EventTime, ForwardMessage, MessageExt, Record,
};
use fluent_forward::transport::ConnFactory;
use fluent_forward::Error;

fn record(fields: &[(&str, &str)]) -> Record {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), rmpv::Value::from(*v)))
        .collect()
}

/// Reads exactly one MessagePack value off the stream.
async fn read_value(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    loop {
        let n = stream.read_buf(&mut buf).await.unwrap();
        assert!(n > 0, "stream ended mid-value");
        if let Some(len) = scan::value_len(&buf).unwrap() {
            buf.truncate(len);
            return buf;
        }
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

#[tokio::test]
async fn ack_matches_assigned_chunk() {
    let (listener, addr) = bind().await;
    let collector = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let bytes = read_value(&mut stream).await;
        let chunk = chunk_from_bytes(&bytes).unwrap();
        let reply = Ack { ack: chunk.clone() }.encode().unwrap();
        stream.write_all(&reply).await.unwrap();
        (bytes, chunk)
    });

    let config = ClientConfig {
        require_ack: true,
        ..Default::default()
    };
    let client = Client::new(ConnFactory::tcp(&addr), config);
    client.connect().await.unwrap();

    let mut msg = MessageExt::new(
        "app.log",
        EventTime::new(1257894000, 0),
        record(&[("message", "oi")]),
    );
    client.send(&mut msg).await.unwrap();
    client.disconnect().await.unwrap();

    let (bytes, chunk) = collector.await.unwrap();
    // A chunk id is sixteen random bytes in base64.
    assert_eq!(chunk.len(), 24);
    let (decoded, rest) = MessageExt::unmarshal(&bytes).unwrap();
    assert!(rest.is_empty());
    assert_eq!(decoded.tag, "app.log");
    assert_eq!(decoded.options.unwrap().chunk.unwrap(), chunk);
}

#[tokio::test]
async fn mismatched_ack_fails_the_send() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_value(&mut stream).await;
        let reply = Ack { ack: "not-the-chunk".into() }.encode().unwrap();
        stream.write_all(&reply).await.unwrap();
    });

    let config = ClientConfig {
        require_ack: true,
        ..Default::default()
    };
    let client = Client::new(ConnFactory::tcp(&addr), config);
    client.connect().await.unwrap();

    let mut msg = MessageExt::new("app.log", EventTime::now(), record(&[("message", "oi")]));
    let err = client.send(&mut msg).await.unwrap_err();
    match err {
        Error::AckMismatch { expected, got } => {
            assert_eq!(got, "not-the-chunk");
            assert_eq!(expected.len(), 24);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_ack_times_out() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_value(&mut stream).await;
        // Hold the connection open without replying.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let config = ClientConfig {
        require_ack: true,
        ack_timeout: Duration::from_millis(100),
    };
    let client = Client::new(ConnFactory::tcp(&addr), config);
    client.connect().await.unwrap();

    let mut msg = MessageExt::new("app.log", EventTime::now(), record(&[("message", "oi")]));
    let err = client.send(&mut msg).await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
}

#[tokio::test]
async fn send_without_ack_does_not_wait() {
    let (listener, addr) = bind().await;
    let collector = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_value(&mut stream).await
    });

    let client = Client::new(ConnFactory::tcp(&addr), ClientConfig::default());
    client.connect().await.unwrap();

    let entries = vec![
        EntryExt::new(EventTime::new(1, 0), record(&[("message", "oi")])),
        EntryExt::new(EventTime::new(2, 0), record(&[("message", "koi")])),
    ];
    let mut msg = ForwardMessage::new("app.log", entries.clone());
    client.send(&mut msg).await.unwrap();
    client.disconnect().await.unwrap();

    let bytes = collector.await.unwrap();
    let (decoded, rest) = ForwardMessage::unmarshal(&bytes).unwrap();
    assert!(rest.is_empty());
    assert_eq!(decoded.tag, "app.log");
    assert_eq!(decoded.entries, entries);
    assert!(decoded.options.is_none(), "no options requested, none sent");
}

#[tokio::test]
async fn send_without_session_fails() {
    let client = Client::new(ConnFactory::tcp("127.0.0.1:9"), ClientConfig::default());
    let mut msg = MessageExt::new("app.log", EventTime::now(), record(&[]));
    let err = client.send(&mut msg).await.unwrap_err();
    assert!(matches!(err, Error::NoSession));
}
