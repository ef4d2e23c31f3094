#![cfg(feature = "ws")]

//! Frames written by one peer arrive at the other peer's read handler
//! in wire order.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream};

use fluent_forward::ws::{Connection, ConnectionOptions, FrameKind, ReadHandler};

async fn ws_pair() -> (Connection<MaybeTlsStream<TcpStream>>, Connection<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    });
    let (client_ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    let server_ws = accept.await.unwrap();
    let opts = ConnectionOptions {
        close_deadline: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    (
        Connection::new(client_ws, opts.clone()),
        Connection::new(server_ws, opts),
    )
}

#[tokio::test]
async fn frames_arrive_in_send_order() {
    let (client, server) = ws_pair().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: ReadHandler<TcpStream> = Arc::new(move |_conn, event| {
        let tx = tx.clone();
        async move {
            if let Ok(frame) = event {
                assert_eq!(frame.kind, FrameKind::Binary);
                tx.send(frame.payload).ok();
            }
            Ok(())
        }
        .boxed()
    });
    server.set_read_handler(handler);
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.listen().await })
    };

    assert_eq!(client.write(b"oi").await.unwrap(), 2);
    assert_eq!(client.write(b"koi").await.unwrap(), 3);

    assert_eq!(rx.recv().await.unwrap(), b"oi");
    assert_eq!(rx.recv().await.unwrap(), b"koi");

    client.close().await.unwrap();
    // A Normal Closure from the peer is not an error.
    server_task.await.unwrap().unwrap();
}
