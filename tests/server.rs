use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rttp_cache::{
    Context, Response, Router, Server, StatusCode,
    cache::cache_page,
    middleware::{LoggerMiddleware, Pipeline},
    persistence::{StoreOptions, open_store},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
};

async fn fetch(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    String::from_utf8(raw).unwrap()
}

#[tokio::test]
async fn cached_route_over_tcp() {
    let store = open_store(&StoreOptions::default()).await.unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    let mut router = Router::new();
    router.get(
        "/cache_ping",
        cache_page(store, Duration::from_secs(60), move |_ctx: Context| {
            let hits = Arc::clone(&counter);
            async move {
                let call = hits.fetch_add(1, Ordering::SeqCst) + 1;
                Response::new(StatusCode::Ok).body(format!("pong {call}"))
            }
        }),
    );
    let pipeline = Arc::new(Pipeline::new(router).layer(LoggerMiddleware));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(server.run_with_shutdown(
        move |req| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.handle(req).await }
        },
        async {
            let _ = stopped.await;
        },
    ));

    let first = fetch(addr, "/cache_ping").await;
    let second = fetch(addr, "/cache_ping").await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(first.ends_with("\r\n\r\npong 1"));
    assert!(second.ends_with("\r\n\r\npong 1"));
    assert!(second.contains("Content-Length: 6\r\n"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /cache_ping HTTP/1.1\r\nHost: test\r\n\r\n\
              GET /cache_ping HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let pipelined = String::from_utf8(raw).unwrap();
    assert_eq!(pipelined.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    assert!(pipelined.ends_with("pong 1"));

    let missing = fetch(addr, "/nowhere").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));

    stop.send(()).unwrap();
    running.await.unwrap().unwrap();
}
