use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::{DEFAULT_MAX_FRAME_SIZE, FrameCodec, Transmission};
use crate::error::StompError;
use crate::frame::{Command, Frame, Headers, header};
use crate::message::Message;
use crate::subscription::{AckMode, Subscription};

// ═══════════════════════════════════════════════════════════════
//  Connect options
// ═══════════════════════════════════════════════════════════════

/// Параметры CONNECT.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    login: Option<(String, String)>,
    host: Option<String>,
    send_heartbeat: Duration,
    recv_heartbeat: Duration,
    connect_timeout: Duration,
    receipt_timeout: Duration,
    headers: Headers,
    max_frame_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            login: None,
            host: None,
            send_heartbeat: Duration::ZERO,
            recv_heartbeat: Duration::ZERO,
            connect_timeout: Duration::from_secs(30),
            receipt_timeout: Duration::from_secs(30),
            headers: Headers::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some((user.into(), password.into()));
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// `send`: как часто клиент может слать heartbeat,
    /// `recv`: как часто клиент хочет получать heartbeat от брокера.
    pub fn heart_beat(mut self, send: Duration, recv: Duration) -> Self {
        self.send_heartbeat = send;
        self.recv_heartbeat = recv;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Дополнительный заголовок CONNECT (например `client-id`).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(key, value);
        self
    }

    pub fn max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header(header::ACCEPT_VERSION, "1.0,1.1,1.2")
            .header(header::HOST, self.host.as_deref().unwrap_or("/"))
            .header(
                header::HEART_BEAT,
                format!(
                    "{},{}",
                    self.send_heartbeat.as_millis(),
                    self.recv_heartbeat.as_millis()
                ),
            );
        if let Some((user, password)) = &self.login {
            frame = frame.header(header::LOGIN, user).header(header::PASSCODE, password);
        }
        frame.headers.extend(&self.headers);
        frame
    }
}

/// Согласование heartbeat: max из двух сторон, 0 если любая сторона отказалась.
fn negotiate(ours: Duration, theirs: Duration) -> Duration {
    if ours.is_zero() || theirs.is_zero() {
        Duration::ZERO
    } else {
        ours.max(theirs)
    }
}

fn parse_heart_beat(value: Option<&str>) -> Result<(Duration, Duration), StompError> {
    let Some(value) = value else {
        return Ok((Duration::ZERO, Duration::ZERO));
    };
    let (sx, sy) = value
        .split_once(',')
        .ok_or_else(|| StompError::Malformed(format!("invalid heart-beat {value:?}")))?;
    let ms = |s: &str| {
        s.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| StompError::Malformed(format!("invalid heart-beat {value:?}")))
    };
    Ok((ms(sx)?, ms(sy)?))
}

// ═══════════════════════════════════════════════════════════════
//  Connection
// ═══════════════════════════════════════════════════════════════

type ReceiptTx = oneshot::Sender<Result<(), StompError>>;

#[derive(Default)]
struct State {
    closed: bool,
    disconnecting: bool,
    subscriptions: HashMap<String, mpsc::UnboundedSender<Message>>,
    receipts: HashMap<String, ReceiptTx>,
}

struct Shared {
    state: Mutex<State>,
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    version: String,
    session: Option<String>,
    server: Option<String>,
    receipt_timeout: Duration,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Закрыть соединение. При `Some(err)` ошибка раздаётся
    /// всем подпискам и ожидающим receipt.
    fn close(&self, mut reason: Option<StompError>) {
        let (subscriptions, receipts) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            if state.disconnecting {
                reason = None;
            }
            (
                std::mem::take(&mut state.subscriptions),
                std::mem::take(&mut state.receipts),
            )
        };
        self.shutdown.cancel();

        let err = reason.clone().unwrap_or(StompError::ConnectionClosed);
        for (_, tx) in receipts {
            let _ = tx.send(Err(err.clone()));
        }
        if let Some(reason) = reason {
            tracing::debug!(error = %reason, "stomp connection failed");
            for (id, tx) in subscriptions {
                let _ = tx.send(Message::failed(&id, reason.clone()));
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        match frame.command {
            Command::Message => {
                let id = frame.get(header::SUBSCRIPTION).unwrap_or_default().to_string();
                let mut state = self.state();
                match state.subscriptions.get(&id) {
                    Some(tx) => {
                        if tx.send(Message::from_frame(frame)).is_err() {
                            state.subscriptions.remove(&id);
                        }
                    }
                    None => {
                        tracing::debug!(subscription = %id, "message for unknown subscription dropped")
                    }
                }
            }
            Command::Receipt => {
                let id = frame.get(header::RECEIPT_ID).unwrap_or_default();
                if let Some(tx) = self.state().receipts.remove(id) {
                    let _ = tx.send(Ok(()));
                }
            }
            Command::Error => {
                let pending = frame
                    .get(header::RECEIPT_ID)
                    .and_then(|id| self.state().receipts.remove(id));
                match pending {
                    Some(tx) => {
                        let _ = tx.send(Err(StompError::Broker(frame.error_text())));
                    }
                    None => self.close(Some(StompError::Broker(frame.error_text()))),
                }
            }
            other => tracing::warn!(command = %other, "unexpected frame from broker ignored"),
        }
    }
}

/// Открытое STOMP соединение.
///
/// Дешёвый `Clone`: все копии разделяют одно соединение
/// и пару фоновых задач (reader и writer).
#[derive(Clone)]
pub struct Conn {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("version", &self.shared.version)
            .field("session", &self.shared.session)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// CONNECT поверх готового потока (TCP или TLS) и запуск фоновых задач.
pub async fn connect<IO>(io: IO, options: ConnectOptions) -> Result<Conn, StompError>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut framed = Framed::new(io, FrameCodec::new(options.max_frame_size));
    framed.send(Transmission::Frame(options.connect_frame())).await?;

    let connected = tokio::time::timeout(options.connect_timeout, await_connected(&mut framed))
        .await
        .map_err(|_| StompError::HandshakeTimeout(options.connect_timeout))??;

    let (server_send, server_recv) = parse_heart_beat(connected.get(header::HEART_BEAT))?;
    let outgoing = negotiate(options.send_heartbeat, server_recv);
    let incoming = negotiate(options.recv_heartbeat, server_send);

    let version = connected.get(header::VERSION).unwrap_or("1.0").to_string();
    tracing::debug!(
        version = %version,
        server = connected.get(header::SERVER).unwrap_or("unknown"),
        outgoing_heartbeat = ?outgoing,
        incoming_heartbeat = ?incoming,
        "stomp session established"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        outbound: tx,
        shutdown: CancellationToken::new(),
        next_id: AtomicU64::new(1),
        version,
        session: connected.get(header::SESSION).map(str::to_string),
        server: connected.get(header::SERVER).map(str::to_string),
        receipt_timeout: options.receipt_timeout,
    });

    let (sink, stream) = framed.split();
    tokio::spawn(write_loop(sink, rx, outgoing, Arc::clone(&shared)));
    tokio::spawn(read_loop(stream, incoming, Arc::clone(&shared)));

    Ok(Conn { shared })
}

async fn await_connected<S>(framed: &mut S) -> Result<Frame, StompError>
where
    S: Stream<Item = Result<Transmission, StompError>> + Unpin,
{
    loop {
        match framed.next().await {
            None => return Err(StompError::ConnectionClosed),
            Some(Err(e)) => return Err(e),
            Some(Ok(Transmission::HeartBeat)) => continue,
            Some(Ok(Transmission::Frame(frame))) => {
                return match frame.command {
                    Command::Connected => Ok(frame),
                    Command::Error => Err(StompError::Broker(frame.error_text())),
                    other => Err(StompError::UnexpectedFrame {
                        expected: "CONNECTED",
                        got: other.to_string(),
                    }),
                };
            }
        }
    }
}

// ---- Background tasks ----

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    heartbeat: Duration,
    shared: Arc<Shared>,
) where
    S: Sink<Transmission, Error = StompError> + Unpin,
{
    let mut ticker = (!heartbeat.is_zero()).then(|| {
        let mut t = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        t
    });

    loop {
        let result = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Some(t) = ticker.as_mut() {
                        t.reset();
                    }
                    tracing::trace!(command = %frame.command, "stomp frame out");
                    sink.send(Transmission::Frame(frame)).await
                }
                None => break,
            },
            _ = tick(&mut ticker) => sink.send(Transmission::HeartBeat).await,
        };
        if let Err(e) = result {
            shared.close(Some(e));
            break;
        }
    }
    let _ = sink.close().await;
}

/// Закрывает соединение при любом выходе из reader, включая панику.
struct CloseOnExit(Arc<Shared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close(Some(StompError::ConnectionClosed));
    }
}

async fn read_loop<S>(mut stream: S, heartbeat: Duration, shared: Arc<Shared>)
where
    S: Stream<Item = Result<Transmission, StompError>> + Unpin,
{
    let _close = CloseOnExit(Arc::clone(&shared));
    let deadline = heartbeat * 2;
    loop {
        let next = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            next = async {
                if deadline.is_zero() {
                    Ok(stream.next().await)
                } else {
                    tokio::time::timeout(deadline, stream.next()).await
                }
            } => next,
        };

        match next {
            Err(_) => {
                shared.close(Some(StompError::HeartbeatTimeout(deadline)));
                return;
            }
            Ok(None) => {
                shared.close(Some(StompError::ConnectionClosed));
                return;
            }
            Ok(Some(Err(e))) => {
                shared.close(Some(e));
                return;
            }
            Ok(Some(Ok(Transmission::HeartBeat))) => {}
            Ok(Some(Ok(Transmission::Frame(frame)))) => {
                tracing::trace!(command = %frame.command, "stomp frame in");
                shared.dispatch(frame);
            }
        }
    }
}

// ---- Client operations ----

impl Conn {
    /// Согласованная версия протокола (`1.0`, `1.1`, `1.2`).
    pub fn version(&self) -> &str {
        &self.shared.version
    }

    pub fn session(&self) -> Option<&str> {
        self.shared.session.as_deref()
    }

    pub fn server(&self) -> Option<&str> {
        self.shared.server.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    /// Отправить фрейм с `receipt` и дождаться RECEIPT.
    async fn request(&self, frame: Frame) -> Result<(), StompError> {
        let command = frame.command.as_str();
        let id = self.shared.next_id("rcpt");
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state();
            if state.closed {
                return Err(StompError::ConnectionClosed);
            }
            state.receipts.insert(id.clone(), tx);
        }

        if self.shared.outbound.send(frame.header(header::RECEIPT, &id)).is_err() {
            self.shared.state().receipts.remove(&id);
            return Err(StompError::ConnectionClosed);
        }

        let timeout = self.shared.receipt_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StompError::ConnectionClosed),
            Err(_) => {
                self.shared.state().receipts.remove(&id);
                Err(StompError::ReceiptTimeout { command, timeout })
            }
        }
    }

    /// SUBSCRIBE с ожиданием receipt. `headers` добавляются к фрейму как есть.
    pub async fn subscribe(
        &self,
        destination: &str,
        ack: AckMode,
        headers: Headers,
    ) -> Result<Subscription, StompError> {
        let id = self.shared.next_id("sub");
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.shared.state();
            if state.closed {
                return Err(StompError::ConnectionClosed);
            }
            state.subscriptions.insert(id.clone(), tx);
        }

        let mut frame = Frame::new(Command::Subscribe)
            .header(header::ID, &id)
            .header(header::DESTINATION, destination)
            .header(header::ACK, ack.as_str());
        frame.headers.extend(&headers);

        if let Err(e) = self.request(frame).await {
            self.shared.state().subscriptions.remove(&id);
            return Err(e);
        }
        tracing::debug!(destination, subscription = %id, ack = ack.as_str(), "subscribed");
        Ok(Subscription::new(id, destination.to_string(), rx, self.clone()))
    }

    pub(crate) async fn unsubscribe(&self, id: &str) -> Result<(), StompError> {
        self.shared.state().subscriptions.remove(id);
        self.request(Frame::new(Command::Unsubscribe).header(header::ID, id)).await
    }

    fn ack_frame(&self, message: &Message) -> Result<Frame, StompError> {
        let frame = Frame::new(Command::Ack);
        if self.shared.version == "1.2" {
            let id = message
                .ack_id()
                .or_else(|| message.message_id())
                .ok_or(StompError::MissingHeader(header::ACK))?;
            return Ok(frame.header(header::ID, id));
        }
        let id = message.message_id().ok_or(StompError::MissingHeader(header::MESSAGE_ID))?;
        Ok(frame
            .header(header::MESSAGE_ID, id)
            .header(header::SUBSCRIPTION, &message.subscription))
    }

    pub async fn ack(&self, message: &Message) -> Result<(), StompError> {
        let frame = self.ack_frame(message)?;
        self.request(frame).await
    }

    /// SEND с ожиданием receipt: успешный возврат означает, что брокер принял сообщение.
    pub async fn send(
        &self,
        destination: &str,
        content_type: Option<&str>,
        body: impl Into<Bytes>,
        headers: Headers,
    ) -> Result<(), StompError> {
        let mut frame = Frame::new(Command::Send)
            .header(header::DESTINATION, destination)
            .body(body);
        if let Some(content_type) = content_type {
            frame = frame.header(header::CONTENT_TYPE, content_type);
        }
        frame.headers.extend(&headers);
        self.request(frame).await
    }

    /// Штатное закрытие: DISCONNECT с receipt, затем остановка фоновых задач.
    pub async fn disconnect(&self) -> Result<(), StompError> {
        {
            let mut state = self.shared.state();
            if state.closed {
                return Err(StompError::AlreadyClosed);
            }
            state.disconnecting = true;
        }
        let result = self.request(Frame::new(Command::Disconnect)).await;
        self.shared.close(None);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_negotiation() {
        let s = Duration::from_secs;
        assert_eq!(negotiate(s(2), s(5)), s(5));
        assert_eq!(negotiate(s(10), s(5)), s(10));
        assert_eq!(negotiate(Duration::ZERO, s(5)), Duration::ZERO);
        assert_eq!(negotiate(s(2), Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn parses_server_heart_beat() {
        assert_eq!(
            parse_heart_beat(Some("1000,0")).unwrap(),
            (Duration::from_secs(1), Duration::ZERO)
        );
        assert_eq!(parse_heart_beat(None).unwrap(), (Duration::ZERO, Duration::ZERO));
        assert!(parse_heart_beat(Some("fast")).is_err());
    }

    #[test]
    fn connect_frame_headers() {
        let frame = ConnectOptions::new()
            .login("admin", "secret")
            .host("broker.local")
            .heart_beat(Duration::from_secs(2), Duration::from_millis(2500))
            .header("client-id", "bridge-1")
            .connect_frame();
        assert_eq!(frame.command, Command::Connect);
        assert_eq!(frame.get(header::ACCEPT_VERSION), Some("1.0,1.1,1.2"));
        assert_eq!(frame.get(header::HOST), Some("broker.local"));
        assert_eq!(frame.get(header::HEART_BEAT), Some("2000,2500"));
        assert_eq!(frame.get(header::LOGIN), Some("admin"));
        assert_eq!(frame.get(header::PASSCODE), Some("secret"));
        assert_eq!(frame.get("client-id"), Some("bridge-1"));
    }

    use crate::testing::BrokerScript;

    async fn open(script: BrokerScript) -> (Conn, crate::testing::MockBroker) {
        let (io, broker) = script.spawn();
        let conn = connect(io, ConnectOptions::new().login("admin", "admin"))
            .await
            .expect("connect");
        (conn, broker)
    }

    #[tokio::test]
    async fn handshake_reports_session() {
        let (conn, broker) = open(BrokerScript::new()).await;
        assert_eq!(conn.version(), "1.2");
        assert_eq!(conn.session(), Some("session-1"));
        assert_eq!(conn.server(), Some("mock-broker/1.0"));

        let connect = &broker.frames_of(Command::Connect)[0];
        assert_eq!(connect.get(header::LOGIN), Some("admin"));
        assert_eq!(connect.get(header::HEART_BEAT), Some("0,0"));
    }

    #[tokio::test]
    async fn error_instead_of_connected_fails_handshake() {
        let (io, _broker) = BrokerScript::new().reject_connect("bad credentials").spawn();
        let err = connect(io, ConnectOptions::new()).await.unwrap_err();
        assert!(matches!(err, StompError::Broker(ref m) if m.contains("bad credentials")), "{err}");
    }

    #[tokio::test]
    async fn subscribe_receive_and_ack_by_ack_header() {
        let (conn, broker) = open(BrokerScript::new()).await;
        let mut sub = conn
            .subscribe("/queue/in", AckMode::ClientIndividual, Headers::new())
            .await
            .unwrap();

        let subscribe = &broker.frames_of(Command::Subscribe)[0];
        assert_eq!(subscribe.get(header::ACK), Some("client-individual"));
        assert_eq!(subscribe.get(header::DESTINATION), Some("/queue/in"));

        broker.deliver("m-1", "hello", &[("key", "v1"), ("key", "v2")]);
        let msg = sub.recv().await.unwrap();
        assert!(msg.err.is_none());
        assert_eq!(msg.message_id(), Some("m-1"));
        assert_eq!(msg.destination, "/queue/in");
        assert_eq!(msg.subscription, sub.id());
        assert_eq!(msg.headers.get_all("key").collect::<Vec<_>>(), ["v1", "v2"]);
        assert_eq!(&msg.body[..], b"hello");

        conn.ack(&msg).await.unwrap();
        let ack = &broker.frames_of(Command::Ack)[0];
        assert_eq!(ack.get(header::ID), Some("ack-m-1"));
    }

    #[tokio::test]
    async fn stomp_11_acks_by_message_id_and_subscription() {
        let (conn, broker) = open(BrokerScript::new().version("1.1")).await;
        let mut sub = conn.subscribe("/queue/in", AckMode::Client, Headers::new()).await.unwrap();
        broker.deliver("m-7", "x", &[]);
        let msg = sub.recv().await.unwrap();
        conn.ack(&msg).await.unwrap();

        let ack = &broker.frames_of(Command::Ack)[0];
        assert_eq!(ack.get(header::MESSAGE_ID), Some("m-7"));
        assert_eq!(ack.get(header::SUBSCRIPTION), Some(sub.id()));
    }

    #[tokio::test]
    async fn error_with_receipt_fails_only_that_request() {
        let (conn, broker) = open(BrokerScript::new().fail_send_at(0)).await;
        let err = conn.send("/queue/out", Some("text/plain"), "a", Headers::new()).await.unwrap_err();
        assert!(matches!(err, StompError::Broker(_)));
        conn.send("/queue/out", Some("text/plain"), "b", Headers::new()).await.unwrap();
        assert!(!conn.is_closed());

        let sent = broker.frames_of(Command::Send);
        assert_eq!(sent[1].get(header::CONTENT_TYPE), Some("text/plain"));
        assert_eq!(broker.sent(), [Bytes::from_static(b"b")]);
    }

    #[tokio::test]
    async fn unsubscribe_twice_reports_completed() {
        let (conn, broker) = open(BrokerScript::new()).await;
        let mut sub = conn.subscribe("/queue/in", AckMode::Auto, Headers::new()).await.unwrap();
        sub.unsubscribe().await.unwrap();
        assert!(broker.subscription().is_none());
        assert!(matches!(sub.unsubscribe().await, Err(StompError::CompletedSubscription)));
    }

    #[tokio::test]
    async fn disconnect_closes_and_second_disconnect_fails() {
        let (conn, broker) = open(BrokerScript::new()).await;
        let mut sub = conn.subscribe("/queue/in", AckMode::Auto, Headers::new()).await.unwrap();
        conn.disconnect().await.unwrap();
        assert!(conn.is_closed());
        assert_eq!(broker.frames_of(Command::Disconnect).len(), 1);
        assert!(sub.recv().await.is_none());
        assert!(matches!(conn.disconnect().await, Err(StompError::AlreadyClosed)));
        assert!(matches!(sub.unsubscribe().await, Err(StompError::CompletedSubscription)));
    }

    #[tokio::test]
    async fn fatal_error_reaches_every_subscription() {
        let (conn, broker) = open(BrokerScript::new()).await;
        let mut a = conn.subscribe("/queue/a", AckMode::Auto, Headers::new()).await.unwrap();
        let mut b = conn.subscribe("/queue/b", AckMode::Auto, Headers::new()).await.unwrap();

        broker.push(Frame::new(Command::Error).header(header::MESSAGE, "broker shutting down"));

        for sub in [&mut a, &mut b] {
            let msg = sub.recv().await.unwrap();
            assert!(matches!(msg.err, Some(StompError::Broker(ref m)) if m == "broker shutting down"));
            assert!(sub.recv().await.is_none());
        }
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn connection_loss_closes_subscription_channel() {
        let (conn, broker) = open(BrokerScript::new()).await;
        let mut sub = conn.subscribe("/queue/in", AckMode::Auto, Headers::new()).await.unwrap();
        broker.drop_connection();

        let msg = sub.recv().await.unwrap();
        assert!(matches!(msg.err, Some(StompError::ConnectionClosed)));
        assert!(sub.recv().await.is_none());
        assert!(matches!(
            conn.send("/queue/out", None, "x", Headers::new()).await,
            Err(StompError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_writer_sends_heartbeats() {
        let (io, broker) = BrokerScript::new().heart_beat("0,100").spawn();
        let options = ConnectOptions::new().heart_beat(Duration::from_millis(50), Duration::ZERO);
        let conn = connect(io, options).await.unwrap();

        // Исходящий интервал: max(50ms, 100ms).
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(broker.heartbeats() >= 2, "heartbeats: {}", broker.heartbeats());
        assert!(!conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn no_heartbeats_when_broker_declines() {
        let (io, broker) = BrokerScript::new().spawn();
        let options = ConnectOptions::new().heart_beat(Duration::from_millis(50), Duration::from_millis(50));
        let conn = connect(io, options).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(broker.heartbeats(), 0);
        assert!(!conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_fails_connection_with_heartbeat_timeout() {
        let (io, _broker) = BrokerScript::new().heart_beat("100,0").spawn();
        let options = ConnectOptions::new().heart_beat(Duration::ZERO, Duration::from_millis(50));
        let conn = connect(io, options).await.unwrap();
        let mut sub = conn.subscribe("/queue/in", AckMode::Auto, Headers::new()).await.unwrap();

        // Входящий интервал max(50ms, 100ms), таймаут вдвое больше.
        let msg = sub.recv().await.unwrap();
        assert!(
            matches!(msg.err, Some(StompError::HeartbeatTimeout(d)) if d == Duration::from_millis(200)),
            "{:?}",
            msg.err
        );
        assert!(sub.recv().await.is_none());
        assert!(conn.is_closed());
    }
}
