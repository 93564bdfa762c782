use super::*;
use core::convert::Infallible;
use core::net::{IpAddr, Ipv4Addr};
use core::task::{Context, Poll};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_stream::StreamExt;
use tonic::Code;
use tonic::client::Grpc;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::server::NamedService;
use tonic::transport::{Channel, Endpoint};
use tonic_health::pb::HealthCheckResponse;
use tonic_health::pb::health_check_response::ServingStatus as PbStatus;
use tonic_health::pb::{HealthCheckRequest, health_client::HealthClient};

const WATCHED: &str = "shop.test.Probe";

fn options(grace: Duration) -> ServerOptions {
    ServerOptions {
        grace_period: grace,
        keepalive_interval: Duration::from_secs(300),
        keepalive_timeout: Duration::from_secs(1),
        max_connection_age: None,
        metrics: None,
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

async fn channel(addr: SocketAddr) -> Channel {
    Endpoint::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap()
}

async fn health_client(addr: SocketAddr) -> HealthClient<Channel> {
    HealthClient::new(channel(addr).await)
}

/// Service whose every call panics.
#[derive(Clone)]
struct Exploding;

impl NamedService for Exploding {
    const NAME: &'static str = "shop.test.Exploding";
}

impl tower::Service<http::Request<Body>> for Exploding {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = core::future::Ready<Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: http::Request<Body>) -> Self::Future {
        panic!("stock ledger corrupted");
    }
}

async fn status_of(client: &mut HealthClient<Channel>, service: &str) -> i32 {
    client
        .check(HealthCheckRequest {
            service: service.to_string(),
        })
        .await
        .unwrap()
        .into_inner()
        .status
}

#[tokio::test]
async fn reports_serving_once_started_on_bound_port() {
    let handle = ServerSet::new(Routes::default(), options(Duration::from_secs(1)))
        .watch_health(WATCHED)
        .start(loopback(0))
        .await
        .unwrap();

    let addr = handle.local_addr();
    assert_ne!(addr.port(), 0);
    assert!(handle.metrics_addr().is_none());

    let mut client = health_client(addr).await;
    assert_eq!(status_of(&mut client, "").await, PbStatus::Serving as i32);
    assert_eq!(status_of(&mut client, WATCHED).await, PbStatus::Serving as i32);

    handle.graceful_stop().await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn graceful_stop_publishes_not_serving_before_closing() {
    let handle = ServerSet::new(Routes::default(), options(Duration::from_millis(300)))
        .start(loopback(0))
        .await
        .unwrap();

    let mut client = health_client(handle.local_addr()).await;
    let mut updates = client
        .watch(HealthCheckRequest {
            service: String::new(),
        })
        .await
        .unwrap()
        .into_inner();
    let first = updates.next().await.unwrap().unwrap();
    assert_eq!(first.status, PbStatus::Serving as i32);

    // The watch stream is still in flight, so the stop has to wait out the
    // grace period and force the connection closed.
    let stopping = tokio::spawn(handle.graceful_stop());

    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(update.status, PbStatus::NotServing as i32);

    tokio::time::timeout(Duration::from_secs(5), stopping)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn occupied_port_is_a_bind_error() {
    let occupied = std::net::TcpListener::bind(loopback(0)).unwrap();
    let addr = occupied.local_addr().unwrap();

    let err = ServerSet::new(Routes::default(), options(Duration::from_secs(1)))
        .start(addr)
        .await
        .err()
        .unwrap();
    assert_eq!(err.addr, addr);
}

#[tokio::test]
async fn terminated_stays_pending_while_serving() {
    let mut handle = ServerSet::new(Routes::default(), options(Duration::from_secs(1)))
        .start(loopback(0))
        .await
        .unwrap();

    let waited = tokio::time::timeout(Duration::from_millis(100), handle.terminated()).await;
    assert!(waited.is_err());

    handle.graceful_stop().await;
}

#[tokio::test]
async fn terminated_reports_a_serve_loop_that_died() {
    let kill = CancellationToken::new();
    let mut handle = ServerSet::new(Routes::default(), options(Duration::from_secs(1)))
        .abort_serve_on(kill.clone())
        .start(loopback(0))
        .await
        .unwrap();

    kill.cancel();
    let err = tokio::time::timeout(Duration::from_secs(5), handle.terminated())
        .await
        .unwrap();
    assert!(matches!(err, Error::ServerTerminated { .. }), "{err}");

    // Stopping after the loop already died still completes.
    tokio::time::timeout(Duration::from_secs(5), handle.graceful_stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn panicking_handler_answers_internal_and_keeps_serving() {
    let handle = ServerSet::new(Routes::new(Exploding), options(Duration::from_secs(1)))
        .start(loopback(0))
        .await
        .unwrap();
    let addr = handle.local_addr();

    let mut grpc = Grpc::new(channel(addr).await);
    grpc.ready().await.unwrap();
    let status = grpc
        .unary::<_, HealthCheckResponse, _>(
            tonic::Request::new(HealthCheckRequest {
                service: String::new(),
            }),
            PathAndQuery::from_static("/shop.test.Exploding/Call"),
            tonic_prost::ProstCodec::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);

    let mut client = health_client(addr).await;
    assert_eq!(status_of(&mut client, "").await, PbStatus::Serving as i32);

    handle.graceful_stop().await;
}

#[tokio::test]
async fn graceful_stop_drains_listeners_within_one_grace_period() {
    let prometheus = PrometheusBuilder::new().build_recorder().handle();
    let metrics_port = std::net::TcpListener::bind(loopback(0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let grace = Duration::from_millis(400);
    let handle = ServerSet::new(
        Routes::default(),
        options(grace).with_metrics(Some(metrics_port), prometheus),
    )
    .start(loopback(0))
    .await
    .unwrap();

    // Hold a health watch open so the gRPC listener needs the full grace
    // period, and an idle HTTP connection on the metrics listener.
    let mut client = health_client(handle.local_addr()).await;
    let mut updates = client
        .watch(HealthCheckRequest {
            service: String::new(),
        })
        .await
        .unwrap()
        .into_inner();
    updates.next().await.unwrap().unwrap();
    let _idle = tokio::net::TcpStream::connect(handle.metrics_addr().unwrap())
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    handle.graceful_stop().await;
    assert!(started.elapsed() < grace * 2, "{:?}", started.elapsed());
}

#[tokio::test]
async fn metrics_listener_serves_prometheus_text() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let prometheus = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!("lifecycle_test_total").increment(3);
    });

    // Pick a free port for the metrics listener up front.
    let metrics_port = std::net::TcpListener::bind(loopback(0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let options =
        options(Duration::from_secs(1)).with_metrics(Some(metrics_port), prometheus);

    let handle = ServerSet::new(Routes::default(), options)
        .start(loopback(0))
        .await
        .unwrap();
    let metrics_addr = handle.metrics_addr().unwrap();
    assert_eq!(metrics_addr.port(), metrics_port);

    let body = reqwest::get(format!("http://{metrics_addr}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("lifecycle_test_total 3"));

    handle.graceful_stop().await;
    assert!(tokio::net::TcpStream::connect(metrics_addr).await.is_err());
}
