//! Integration tests for flow interception and forwarding.
//!
//! The virtual stack is replaced by in-memory requests whose endpoints are
//! duplex streams, and outbound dials are served by a recording dialer.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use tunmitm::forward::{Dial, Outbound};
use tunmitm::intercept::{InterceptorBuilder, TuningConfig};
use tunmitm::stack::{
    BufferSizeRange, SocketOptions, StackEndpoint, StackResult, TcpForwarderRequest,
    TransportOptions, UdpForwarderRequest,
};
use tunmitm::{EndpointId, Event, EventSink, Network, StackError};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Opt {
    Keepalive(bool),
    Idle(Duration),
    Interval(Duration),
    Count(u32),
    SendBuffer(usize),
    ReceiveBuffer(usize),
}

type OptLog = Arc<Mutex<Vec<Opt>>>;

struct MockEndpoint {
    conn: DuplexStream,
    options: OptLog,
    reject_keepalive: bool,
}

impl SocketOptions for MockEndpoint {
    fn set_keepalive(&mut self, enabled: bool) {
        self.options.lock().push(Opt::Keepalive(enabled));
    }

    fn set_keepalive_idle(&mut self, idle: Duration) -> StackResult<()> {
        if self.reject_keepalive {
            return Err(StackError::InvalidOptionValue("keepalive idle"));
        }
        self.options.lock().push(Opt::Idle(idle));
        Ok(())
    }

    fn set_keepalive_interval(&mut self, interval: Duration) -> StackResult<()> {
        self.options.lock().push(Opt::Interval(interval));
        Ok(())
    }

    fn set_keepalive_count(&mut self, count: u32) -> StackResult<()> {
        self.options.lock().push(Opt::Count(count));
        Ok(())
    }

    fn set_send_buffer_size(&mut self, size: usize) {
        self.options.lock().push(Opt::SendBuffer(size));
    }

    fn set_receive_buffer_size(&mut self, size: usize) {
        self.options.lock().push(Opt::ReceiveBuffer(size));
    }
}

impl StackEndpoint for MockEndpoint {
    type Conn = DuplexStream;

    fn into_conn(self) -> DuplexStream {
        self.conn
    }
}

struct MockTcpRequest {
    id: EndpointId,
    endpoint: Option<MockEndpoint>,
    completed: Arc<Mutex<Option<bool>>>,
}

impl TcpForwarderRequest for MockTcpRequest {
    type Endpoint = MockEndpoint;

    fn id(&self) -> EndpointId {
        self.id
    }

    fn create_endpoint(&mut self) -> StackResult<MockEndpoint> {
        self.endpoint.take().ok_or(StackError::ConnectionRefused)
    }

    fn complete(self, send_reset: bool) {
        *self.completed.lock() = Some(send_reset);
    }
}

struct MockUdpRequest {
    id: EndpointId,
    endpoint: StackResult<MockEndpoint>,
}

impl UdpForwarderRequest for MockUdpRequest {
    type Endpoint = MockEndpoint;

    fn id(&self) -> EndpointId {
        self.id
    }

    fn create_endpoint(self) -> StackResult<MockEndpoint> {
        self.endpoint
    }
}

struct StackDefaults;

impl TransportOptions for StackDefaults {
    fn tcp_send_buffer_size_range(&self) -> StackResult<BufferSizeRange> {
        Ok(BufferSizeRange {
            min: 4096,
            default: 1 << 20,
            max: 4 << 20,
        })
    }

    fn tcp_receive_buffer_size_range(&self) -> StackResult<BufferSizeRange> {
        Ok(BufferSizeRange {
            min: 4096,
            default: 1 << 19,
            max: 4 << 20,
        })
    }

    fn udp_send_buffer_size_range(&self) -> StackResult<BufferSizeRange> {
        Ok(BufferSizeRange {
            min: 4096,
            default: 208 << 10,
            max: 4 << 20,
        })
    }

    fn udp_receive_buffer_size_range(&self) -> StackResult<BufferSizeRange> {
        Ok(BufferSizeRange {
            min: 4096,
            default: 416 << 10,
            max: 4 << 20,
        })
    }
}

/// Dialer that records destinations and hands the far side of each
/// connection to the test.
struct MockDialer {
    dialed: Mutex<Vec<(Network, String)>>,
    remotes: mpsc::UnboundedSender<DuplexStream>,
    fail: bool,
}

impl MockDialer {
    fn new(fail: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            dialed: Mutex::new(Vec::new()),
            remotes: tx,
            fail,
        });
        (dialer, rx)
    }

    fn dialed(&self) -> Vec<(Network, String)> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl Dial for MockDialer {
    async fn dial(&self, network: Network, addr: &str) -> io::Result<Outbound> {
        self.dialed.lock().push((network, addr.to_string()));
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let (ours, theirs) = tokio::io::duplex(4096);
        let _ = self.remotes.send(theirs);
        Ok(Outbound::new("192.0.2.10:50000".parse().unwrap(), ours))
    }
}

fn flow(local: &str, remote: &str) -> EndpointId {
    EndpointId::new(local.parse().unwrap(), remote.parse().unwrap())
}

fn tcp_request(id: EndpointId) -> (MockTcpRequest, DuplexStream, OptLog, Arc<Mutex<Option<bool>>>) {
    let (app, stack_side) = tokio::io::duplex(4096);
    let options = OptLog::default();
    let completed = Arc::new(Mutex::new(None));
    let request = MockTcpRequest {
        id,
        endpoint: Some(MockEndpoint {
            conn: stack_side,
            options: Arc::clone(&options),
            reject_keepalive: false,
        }),
        completed: Arc::clone(&completed),
    };
    (request, app, options, completed)
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_tcp_flow_redirected_and_bridged() {
    let (dialer, mut remotes) = MockDialer::new(false);
    let events = EventSink::new(64);
    let mut rx = events.subscribe();
    let (est_tx, mut est_rx) = mpsc::unbounded_channel();

    let (tcp, _udp) = InterceptorBuilder::new()
        .dialer(dialer.clone())
        .redirector(|_: IpAddr, _: u16, _: IpAddr, _: u16| -> Option<String> {
            Some("203.0.113.9:9999".to_string())
        })
        .establish_handler(move |local: SocketAddr, original: &str| {
            let _ = est_tx.send((local, original.to_string()));
        })
        .transport_options(Arc::new(StackDefaults))
        .events(events.clone())
        .build()
        .unwrap();

    let (request, mut app, options, completed) =
        tcp_request(flow("198.51.100.1:443", "10.0.0.5:54321"));
    tcp.handle(request);

    // Handshake completed without reset and tuning applied before forwarding.
    assert_eq!(*completed.lock(), Some(false));
    let tuning = TuningConfig::default();
    assert_eq!(
        *options.lock(),
        vec![
            Opt::Keepalive(true),
            Opt::Idle(tuning.keepalive_idle),
            Opt::Interval(tuning.keepalive_interval),
            Opt::Count(tuning.keepalive_count),
            Opt::SendBuffer(1 << 20),
            Opt::ReceiveBuffer(1 << 19),
        ]
    );

    let mut remote = timeout(WAIT, remotes.recv()).await.unwrap().unwrap();
    assert_eq!(
        dialer.dialed(),
        vec![(Network::Tcp, "203.0.113.9:9999".to_string())]
    );

    let (local, original) = timeout(WAIT, est_rx.recv()).await.unwrap().unwrap();
    assert_eq!(local, "192.0.2.10:50000".parse::<SocketAddr>().unwrap());
    assert_eq!(original, "198.51.100.1:443");

    app.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut request_buf = [0u8; 18];
    timeout(WAIT, remote.read_exact(&mut request_buf)).await.unwrap().unwrap();
    assert_eq!(&request_buf, b"GET / HTTP/1.1\r\n\r\n");

    remote.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
    let mut response_buf = [0u8; 27];
    timeout(WAIT, app.read_exact(&mut response_buf)).await.unwrap().unwrap();
    assert_eq!(&response_buf, b"HTTP/1.1 204 No Content\r\n\r\n");

    // Closing the application side closes the remote side too.
    drop(app);
    let mut rest = Vec::new();
    timeout(WAIT, remote.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());

    let closed = next_matching(&mut rx, |e| matches!(e, Event::SessionClosed { .. })).await;
    assert_eq!(
        closed,
        Event::SessionClosed {
            network: Network::Tcp,
            destination: "203.0.113.9:9999".into(),
            sent: 18,
            received: 27,
            error: None,
        }
    );
}

#[tokio::test]
async fn test_remote_close_closes_application() {
    let (dialer, mut remotes) = MockDialer::new(false);
    let (tcp, _udp) = InterceptorBuilder::new()
        .dialer(dialer)
        .build()
        .unwrap();

    let (request, mut app, _options, _completed) =
        tcp_request(flow("198.51.100.7:22", "10.0.0.5:40001"));
    tcp.handle(request);

    let remote = timeout(WAIT, remotes.recv()).await.unwrap().unwrap();
    drop(remote);

    let mut rest = Vec::new();
    timeout(WAIT, app.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_dial_failure_closes_flow() {
    let (dialer, _remotes) = MockDialer::new(true);
    let events = EventSink::new(64);
    let mut rx = events.subscribe();

    let (tcp, _udp) = InterceptorBuilder::new()
        .dialer(dialer.clone())
        .events(events.clone())
        .build()
        .unwrap();

    let (request, mut app, _options, completed) =
        tcp_request(flow("198.51.100.1:443", "10.0.0.5:54321"));
    tcp.handle(request);
    assert_eq!(*completed.lock(), Some(false));

    let mut rest = Vec::new();
    let n = timeout(WAIT, app.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert_eq!(n, 0);

    let failed = next_matching(&mut rx, |e| matches!(e, Event::DialFailed { .. })).await;
    match failed {
        Event::DialFailed {
            network,
            destination,
            ..
        } => {
            assert_eq!(network, Network::Tcp);
            assert_eq!(destination, "198.51.100.1:443");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(dialer.dialed().len(), 1);
}

#[tokio::test]
async fn test_endpoint_failure_resets() {
    let (dialer, _remotes) = MockDialer::new(false);
    let events = EventSink::new(64);
    let mut rx = events.subscribe();

    let (tcp, _udp) = InterceptorBuilder::new()
        .dialer(dialer.clone())
        .events(events.clone())
        .build()
        .unwrap();

    let completed = Arc::new(Mutex::new(None));
    let id = flow("198.51.100.1:443", "10.0.0.5:54321");
    tcp.handle(MockTcpRequest {
        id,
        endpoint: None,
        completed: Arc::clone(&completed),
    });

    assert_eq!(*completed.lock(), Some(true));
    assert_eq!(
        rx.try_recv().unwrap(),
        Event::EndpointFailed {
            network: Network::Tcp,
            id,
            error: StackError::ConnectionRefused.to_string(),
        }
    );

    tokio::task::yield_now().await;
    assert!(dialer.dialed().is_empty());
}

#[tokio::test]
async fn test_tuning_failure_still_forwards() {
    let (dialer, mut remotes) = MockDialer::new(false);
    let events = EventSink::new(64);
    let mut rx = events.subscribe();

    let (tcp, _udp) = InterceptorBuilder::new()
        .dialer(dialer)
        .events(events.clone())
        .build()
        .unwrap();

    let (app, stack_side) = tokio::io::duplex(1024);
    let id = flow("198.51.100.1:443", "10.0.0.5:54321");
    tcp.handle(MockTcpRequest {
        id,
        endpoint: Some(MockEndpoint {
            conn: stack_side,
            options: OptLog::default(),
            reject_keepalive: true,
        }),
        completed: Arc::new(Mutex::new(None)),
    });

    assert!(matches!(
        rx.try_recv().unwrap(),
        Event::TuningFailed { id: failed, .. } if failed == id
    ));
    assert!(timeout(WAIT, remotes.recv()).await.unwrap().is_some());
    drop(app);
}

#[tokio::test]
async fn test_udp_ipv6_falls_back_to_original() {
    let (dialer, mut remotes) = MockDialer::new(false);
    let (_tcp, udp) = InterceptorBuilder::new()
        .dialer(dialer.clone())
        .redirector(|_: IpAddr, _: u16, _: IpAddr, _: u16| -> Option<String> { None })
        .transport_options(Arc::new(StackDefaults))
        .build()
        .unwrap();

    let (mut app, stack_side) = tokio::io::duplex(4096);
    let options = OptLog::default();
    let handler = udp.handler::<MockUdpRequest>();
    handler(MockUdpRequest {
        id: flow("[2001:db8::1]:53", "[fd00::2]:40000"),
        endpoint: Ok(MockEndpoint {
            conn: stack_side,
            options: Arc::clone(&options),
            reject_keepalive: false,
        }),
    });

    // UDP buffer defaults only, no keepalive and nothing from the TCP ranges.
    assert_eq!(
        *options.lock(),
        vec![Opt::SendBuffer(208 << 10), Opt::ReceiveBuffer(416 << 10)]
    );

    let mut remote = timeout(WAIT, remotes.recv()).await.unwrap().unwrap();
    assert_eq!(
        dialer.dialed(),
        vec![(Network::Udp, "[2001:db8::1]:53".to_string())]
    );

    app.write_all(b"query").await.unwrap();
    let mut buf = [0u8; 5];
    timeout(WAIT, remote.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"query");
}

#[tokio::test]
async fn test_udp_endpoint_failure_reported() {
    let (dialer, _remotes) = MockDialer::new(false);
    let events = EventSink::new(8);
    let mut rx = events.subscribe();
    let (_tcp, udp) = InterceptorBuilder::new()
        .dialer(dialer.clone())
        .events(events.clone())
        .build()
        .unwrap();

    let id = flow("192.0.2.53:53", "10.0.0.5:5353");
    udp.handle(MockUdpRequest {
        id,
        endpoint: Err(StackError::NoBufferSpace),
    });

    assert!(matches!(
        rx.try_recv().unwrap(),
        Event::EndpointFailed { network: Network::Udp, .. }
    ));
    assert!(dialer.dialed().is_empty());
}

#[tokio::test]
async fn test_real_dialer_tcp_loopback() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap().to_string();

    let (tcp, _udp) = InterceptorBuilder::new()
        .redirector(move |_: IpAddr, _: u16, _: IpAddr, _: u16| -> Option<String> {
            Some(target.clone())
        })
        .build()
        .unwrap();

    let (request, mut app, _options, _completed) =
        tcp_request(flow("198.51.100.1:80", "10.0.0.5:33333"));
    tcp.handle(request);

    let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    app.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    timeout(WAIT, server.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"ping");

    server.write_all(b"pong").await.unwrap();
    timeout(WAIT, app.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"pong");

    drop(server);
    let mut rest = Vec::new();
    timeout(WAIT, app.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_real_dialer_udp_echo() {
    let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = server.local_addr().unwrap().to_string();

    let (_tcp, udp) = InterceptorBuilder::new()
        .redirector(move |_: IpAddr, _: u16, _: IpAddr, _: u16| -> Option<String> {
            Some(target.clone())
        })
        .build()
        .unwrap();

    let (mut app, stack_side) = tokio::io::duplex(4096);
    udp.handle(MockUdpRequest {
        id: flow("192.0.2.53:53", "10.0.0.5:5353"),
        endpoint: Ok(MockEndpoint {
            conn: stack_side,
            options: OptLog::default(),
            reject_keepalive: false,
        }),
    });

    app.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 64];
    let (n, from) = timeout(WAIT, server.recv_from(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"hello");

    server.send_to(b"echo", from).await.unwrap();
    let mut reply = [0u8; 4];
    timeout(WAIT, app.read_exact(&mut reply)).await.unwrap().unwrap();
    assert_eq!(&reply, b"echo");
}
