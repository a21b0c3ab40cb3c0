use common::protocol::{HeadlinesQuery, SourcesQuery, SubCommand};
use common::ServerConfig;
use newsdesk::cache::CacheStore;
use newsdesk::client::{load_result, NewsClient, Reply};
use newsdesk::gateway::{GatewayError, NewsGateway, ParamSet, Payload};
use newsdesk::persist::ResponsePersister;
use newsdesk::router::CommandRouter;
use newsdesk::server::{ConnectionRegistry, Server};
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Canned upstream that counts calls and can be made slow.
#[derive(Default)]
struct StubGateway {
    calls: AtomicUsize,
    delay: Duration,
}

impl StubGateway {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NewsGateway for StubGateway {
    async fn fetch_headlines(&self, params: &ParamSet) -> Result<Payload, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(json!({
            "status": "ok",
            "totalResults": 1,
            "articles": [{"title": format!("headline for {}", params.canonical())}]
        }))
    }

    async fn fetch_sources(&self, _params: &ParamSet) -> Result<Payload, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(json!({"status": "ok", "sources": [{"id": "bbc-news", "name": "BBC News"}]}))
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start(gateway: Arc<StubGateway>, dir: &Path, tweak: impl FnOnce(&mut ServerConfig)) -> Running {
    let mut settings = ServerConfig {
        port: 0,
        ..Default::default()
    };
    tweak(&mut settings);

    let router = Arc::new(CommandRouter::new(
        Arc::new(CacheStore::new(Duration::from_secs(300))),
        gateway,
        ResponsePersister::new(dir, "A12"),
    ));
    let shutdown = CancellationToken::new();
    let server = Server::bind(settings, router, shutdown.clone()).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let registry = server.registry();
    let handle = tokio::spawn(server.run());
    Running {
        addr,
        shutdown,
        registry,
        handle,
    }
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("server did not close the connection");
    assert!(matches!(read, Ok(0) | Err(_)), "expected EOF, got {:?}", read);
}

#[tokio::test]
async fn category_search_returns_file_with_articles() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(StubGateway::default());
    let server = start(gateway.clone(), dir.path(), |_| {}).await;

    let mut client = NewsClient::connect(&server.addr.to_string(), "alice").await.unwrap();
    let reply = client
        .request(SubCommand::Headlines(HeadlinesQuery::Category), Some("technology"))
        .await
        .unwrap();

    let Reply::File(name) = reply else {
        panic!("expected a file, got {:?}", reply);
    };
    assert!(name.starts_with("A12_alice_category_search_"), "{}", name);
    assert!(name.ends_with(".json"));

    let body = load_result(dir.path(), &name).await.unwrap();
    assert!(body.get("articles").is_some());
    assert_eq!(body["articles"][0]["title"], r#"headline for {"category":"technology"}"#);
    assert_eq!(gateway.calls(), 1);

    client.quit().await.unwrap();
    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unsupported_category_is_rejected_without_upstream_call() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(StubGateway::default());
    let server = start(gateway.clone(), dir.path(), |_| {}).await;

    let mut client = NewsClient::connect(&server.addr.to_string(), "bob").await.unwrap();
    let reply = client
        .request(SubCommand::Headlines(HeadlinesQuery::Category), Some("politics"))
        .await
        .unwrap();
    assert_eq!(reply, Reply::Error("Unsupported category: politics".into()));
    assert_eq!(gateway.calls(), 0);

    // The connection survives a rejected request.
    let reply = client
        .request(SubCommand::Sources(SourcesQuery::Language), Some("en"))
        .await
        .unwrap();
    assert!(matches!(reply, Reply::File(_)));
    assert_eq!(gateway.calls(), 1);

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_commands_are_handled_leniently() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(StubGateway::default());
    let server = start(gateway.clone(), dir.path(), |_| {}).await;

    let mut client = NewsClient::connect(&server.addr.to_string(), "carol").await.unwrap();

    // Unknown top-level command: silently ignored.
    client.send("Play Music").await.unwrap();

    // Unknown sub-command: error reply, back to idle.
    client.send("Search Headlines").await.unwrap();
    client.send("Search by language").await.unwrap();
    assert_eq!(client.receive().await.unwrap(), "error_Unknown search type: Search by language");

    let reply = client
        .request(SubCommand::Headlines(HeadlinesQuery::Latest), None)
        .await
        .unwrap();
    let Reply::File(name) = reply else {
        panic!("expected a file, got {:?}", reply);
    };
    assert!(name.contains("_all_headlines_"));
    let body = load_result(dir.path(), &name).await.unwrap();
    assert_eq!(body["articles"][0]["title"], r#"headline for {"country":"us"}"#);

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn quit_closes_connection_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(Arc::new(StubGateway::default()), dir.path(), |_| {}).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"dave\nQuit\n").await.unwrap();
    assert_closed(&mut stream).await;

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_name_drops_connection() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(Arc::new(StubGateway::default()), dir.path(), |_| {}).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    assert_closed(&mut stream).await;

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_identical_requests_fetch_upstream_once() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(StubGateway {
        delay: Duration::from_millis(200),
        ..Default::default()
    });
    let server = start(gateway.clone(), dir.path(), |_| {}).await;
    let addr = server.addr.to_string();

    let ask = |name: &'static str| {
        let addr = addr.clone();
        async move {
            let mut client = NewsClient::connect(&addr, name).await.unwrap();
            client
                .request(SubCommand::Sources(SourcesQuery::Country), Some("jp"))
                .await
                .unwrap()
        }
    };

    let (a, b) = tokio::join!(ask("erin"), ask("frank"));
    assert!(matches!(a, Reply::File(_)));
    assert!(matches!(b, Reply::File(_)));
    assert_eq!(gateway.calls(), 1);

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn late_parameter_gets_timeout_reply() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(StubGateway::default());
    let server = start(gateway.clone(), dir.path(), |s| {
        s.read_timeout_seconds = 1;
        s.max_idle_cycles = 5;
    })
    .await;

    let mut client = NewsClient::connect(&server.addr.to_string(), "gina")
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(3));
    let category = SubCommand::Headlines(HeadlinesQuery::Category);
    client.send("Search Headlines").await.unwrap();
    client.send(category.as_wire()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    client.send("technology").await.unwrap();

    assert_eq!(client.receive().await.unwrap(), "error_timed out waiting for parameter");
    assert_eq!(gateway.calls(), 0);

    // The late value landed in idle and was ignored; a fresh request works.
    let reply = client.request(category, Some("technology")).await.unwrap();
    assert!(matches!(reply, Reply::File(_)), "{:?}", reply);
    assert_eq!(gateway.calls(), 1);

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn timed_out_search_type_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(StubGateway::default());
    let server = start(gateway.clone(), dir.path(), |s| {
        s.read_timeout_seconds = 1;
        s.max_idle_cycles = 5;
    })
    .await;

    let mut client = NewsClient::connect(&server.addr.to_string(), "ivan")
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(3));
    client.send("List of Sources").await.unwrap();
    assert_eq!(client.receive().await.unwrap(), "error_timed out waiting for search type");

    let reply = client
        .request(SubCommand::Sources(SourcesQuery::All), None)
        .await
        .unwrap();
    assert!(matches!(reply, Reply::File(_)), "{:?}", reply);
    assert_eq!(gateway.calls(), 1);

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn non_ascii_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(StubGateway::default());
    let server = start(gateway.clone(), dir.path(), |_| {}).await;

    let mut client = NewsClient::connect(&server.addr.to_string(), "judy").await.unwrap();
    let reply = client
        .request(SubCommand::Headlines(HeadlinesQuery::Keywords), Some("café"))
        .await
        .unwrap();
    assert_eq!(reply, Reply::Error("message is not ASCII".into()));
    assert_eq!(gateway.calls(), 0);

    // Outside a request, non-ASCII input ends the connection.
    client.send("Séarch Headlines").await.unwrap();
    assert!(client.receive().await.is_err());

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn idle_connection_is_dropped_after_limit() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(Arc::new(StubGateway::default()), dir.path(), |s| {
        s.read_timeout_seconds = 1;
        s.max_idle_cycles = 2;
    })
    .await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"hank\n").await.unwrap();
    assert_closed(&mut stream).await;

    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_every_connection_and_releases_port() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(Arc::new(StubGateway::default()), dir.path(), |s| {
        s.shutdown_timeout_seconds = 2;
    })
    .await;

    let mut clients = Vec::new();
    for i in 0..3 {
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream.write_all(format!("client{}\n", i).as_bytes()).await.unwrap();
        clients.push(stream);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.registry.len(), 3);

    server.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(3), server.handle)
        .await
        .expect("server did not stop in time")
        .unwrap()
        .unwrap();

    assert!(server.registry.is_empty());
    for stream in &mut clients {
        assert_closed(stream).await;
    }
    TcpListener::bind(server.addr).await.expect("port released");
}
