//! End-to-end fan-out behaviour over real loopback sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use tcp_fanout::{RelayConfig, StreamEnd, Supervisor, UpstreamHandle, UpstreamReader};

const WAIT: Duration = Duration::from_secs(5);

fn config(publisher: SocketAddr, listen: SocketAddr) -> RelayConfig {
    RelayConfig::default()
        .publisher(publisher)
        .listen(listen)
        .connect_timeout(Duration::from_secs(1))
        .retry_backoff(Duration::from_millis(50))
}

/// A loopback address nothing is bound to right now
async fn free_addr() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
}

async fn connect_with_retry(addr: SocketAddr) -> TcpStream {
    timeout(WAIT, async {
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => return stream,
                Err(_) => sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .expect("listen socket never came up")
}

async fn wait_for_listeners(supervisor: &Supervisor, expected: usize) {
    timeout(WAIT, async {
        while supervisor.listener_count().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listener count not reached in time");
}

/// Connect a reader session and return it with the publisher's end of the socket
async fn start_session() -> (UpstreamHandle, TcpStream) {
    let publisher = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config(publisher.local_addr().unwrap(), "127.0.0.1:0".parse().unwrap());

    let reader = UpstreamReader::connect(&config, &CancellationToken::new())
        .await
        .unwrap();
    let (source, _) = publisher.accept().await.unwrap();

    (reader.spawn(), source)
}

async fn attach(handle: &UpstreamHandle, expected: usize) -> TcpStream {
    let stream = TcpStream::connect(handle.listen_addr()).await.unwrap();
    timeout(WAIT, async {
        while handle.listener_count().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listener was not registered in time");
    stream
}

fn read_all(mut stream: TcpStream) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    })
}

fn chunk(index: usize) -> Vec<u8> {
    let len = 1 + (index * 397) % 3000;
    (0..len).map(|i| ((index * 31 + i) % 251) as u8).collect()
}

#[tokio::test]
async fn late_listener_receives_only_later_chunks() {
    let (mut handle, mut source) = start_session().await;

    let mut l1 = attach(&handle, 1).await;

    source.write_all(b"AB").await.unwrap();
    let mut first = [0u8; 2];
    timeout(WAIT, l1.read_exact(&mut first)).await.unwrap().unwrap();
    assert_eq!(&first, b"AB");

    let l2 = attach(&handle, 2).await;

    source.write_all(b"CD").await.unwrap();
    drop(source);

    let end = timeout(WAIT, handle.join()).await.unwrap();
    assert_eq!(end, Some(StreamEnd::SourceClosed));

    let l1_rest = timeout(WAIT, read_all(l1)).await.unwrap().unwrap();
    let l2_all = timeout(WAIT, read_all(l2)).await.unwrap().unwrap();

    assert_eq!([&first[..], &l1_rest[..]].concat(), b"ABCD");
    assert_eq!(l2_all, b"CD");
}

#[tokio::test]
async fn every_listener_gets_the_exact_stream() {
    let (mut handle, mut source) = start_session().await;

    let mut readers = Vec::new();
    for expected in 1..=4 {
        readers.push(read_all(attach(&handle, expected).await));
    }

    let mut sent = Vec::new();
    for index in 0..50 {
        let data = chunk(index);
        source.write_all(&data).await.unwrap();
        sent.extend_from_slice(&data);
    }
    drop(source);

    timeout(WAIT, handle.join()).await.unwrap();

    for reader in readers {
        let received = timeout(WAIT, reader).await.unwrap().unwrap();
        assert_eq!(received.len(), sent.len());
        assert!(received == sent, "listener stream differs from publisher stream");
    }
}

#[tokio::test]
async fn dropping_one_listener_does_not_disturb_others() {
    let (mut handle, mut source) = start_session().await;

    let l1 = attach(&handle, 1).await;
    let mut l2 = attach(&handle, 2).await;
    let l3 = attach(&handle, 3).await;
    let r1 = read_all(l1);
    let r3 = read_all(l3);

    let mut sent = Vec::new();
    for index in 0..20 {
        if index == 5 {
            // Leave abruptly while data keeps flowing
            let mut scratch = [0u8; 1];
            let _ = l2.read(&mut scratch).await;
            drop(l2);
            l2 = TcpStream::connect(handle.listen_addr()).await.unwrap();
        }
        let data = chunk(index);
        source.write_all(&data).await.unwrap();
        sent.extend_from_slice(&data);
        sleep(Duration::from_millis(5)).await;
    }
    drop(source);

    timeout(WAIT, handle.join()).await.unwrap();
    drop(l2);

    assert!(timeout(WAIT, r1).await.unwrap().unwrap() == sent);
    assert!(timeout(WAIT, r3).await.unwrap().unwrap() == sent);
}

#[tokio::test]
async fn upstream_loss_disconnects_listeners_and_rebinds() {
    let publisher = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen = free_addr().await;
    let supervisor =
        Arc::new(Supervisor::new(config(publisher.local_addr().unwrap(), listen)).unwrap());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move {
            supervisor
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        }
    });

    let (first_source, _) = timeout(WAIT, publisher.accept()).await.unwrap().unwrap();

    let mut listeners = Vec::new();
    for _ in 0..3 {
        listeners.push(connect_with_retry(listen).await);
    }
    wait_for_listeners(&supervisor, 3).await;

    drop(first_source);

    for listener in listeners {
        let received = timeout(WAIT, read_all(listener)).await.unwrap().unwrap();
        assert!(received.is_empty());
    }

    // A fresh session comes up on the same endpoints
    let (mut second_source, _) = timeout(WAIT, publisher.accept()).await.unwrap().unwrap();
    let mut listener = connect_with_retry(listen).await;
    wait_for_listeners(&supervisor, 1).await;

    second_source.write_all(b"XY").await.unwrap();
    let mut buf = [0u8; 2];
    timeout(WAIT, listener.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"XY");

    stop_tx.send(()).unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();

    let rest = timeout(WAIT, read_all(listener)).await.unwrap().unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn refused_publisher_is_retried_until_reachable() {
    let publisher_addr = free_addr().await;
    let listen = free_addr().await;
    let supervisor = Arc::new(Supervisor::new(config(publisher_addr, listen)).unwrap());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move {
            supervisor
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
        }
    });

    // Several refused attempts go by; no acceptor exists yet
    sleep(Duration::from_millis(300)).await;
    assert!(!task.is_finished());
    assert!(TcpStream::connect(listen).await.is_err());

    let publisher = TcpListener::bind(publisher_addr).await.unwrap();
    let (_source, _) = timeout(WAIT, publisher.accept()).await.unwrap().unwrap();

    let _listener = connect_with_retry(listen).await;
    wait_for_listeners(&supervisor, 1).await;

    // Exactly one upstream connection was made
    assert!(timeout(Duration::from_millis(300), publisher.accept())
        .await
        .is_err());

    stop_tx.send(()).unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
}
