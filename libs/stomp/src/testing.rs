//! Scripted in-memory брокер для тестов.
//!
//! Работает поверх `tokio::io::duplex`, поэтому тесты проходят через
//! настоящий codec и настоящее соединение без сетевого брокера.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::codec::{FrameCodec, Transmission};
use crate::frame::{Command, Frame, header};

/// Сценарий поведения брокера.
#[derive(Debug, Clone)]
pub struct BrokerScript {
    version: String,
    heart_beat: String,
    reject_connect: Option<String>,
    reject_subscribe: Option<String>,
    fail_send_at: Option<usize>,
    fail_acks: bool,
}

impl Default for BrokerScript {
    fn default() -> Self {
        Self {
            version: "1.2".into(),
            heart_beat: "0,0".into(),
            reject_connect: None,
            reject_subscribe: None,
            fail_send_at: None,
            fail_acks: false,
        }
    }
}

impl BrokerScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// `heart-beat` в CONNECTED. Сам брокер heartbeat'ы не шлёт.
    pub fn heart_beat(mut self, value: impl Into<String>) -> Self {
        self.heart_beat = value.into();
        self
    }

    /// Ответить на CONNECT фреймом ERROR.
    pub fn reject_connect(mut self, message: impl Into<String>) -> Self {
        self.reject_connect = Some(message.into());
        self
    }

    /// Ответить на SUBSCRIBE фреймом ERROR с `receipt-id`.
    pub fn reject_subscribe(mut self, message: impl Into<String>) -> Self {
        self.reject_subscribe = Some(message.into());
        self
    }

    /// Отклонить SEND с указанным порядковым номером (с нуля).
    pub fn fail_send_at(mut self, index: usize) -> Self {
        self.fail_send_at = Some(index);
        self
    }

    pub fn fail_acks(mut self, fail: bool) -> Self {
        self.fail_acks = fail;
        self
    }

    /// Запустить брокер. Возвращает клиентский конец потока и handle.
    pub fn spawn(self) -> (DuplexStream, MockBroker) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(BrokerState {
            script: self,
            received: Vec::new(),
            sends: 0,
            heartbeats: 0,
            subscription: None,
        }));
        tokio::spawn(run(server, Arc::clone(&state), control_rx));
        (client, MockBroker { state, control: control_tx })
    }
}

#[derive(Debug)]
struct BrokerState {
    script: BrokerScript,
    received: Vec<Frame>,
    sends: usize,
    heartbeats: usize,
    /// (id, destination) активной подписки.
    subscription: Option<(String, String)>,
}

enum Control {
    Deliver(Frame),
    Raw(Frame),
    Drop,
}

/// Handle запущенного брокера. Drop закрывает соединение.
#[derive(Debug)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    control: mpsc::UnboundedSender<Control>,
}

impl MockBroker {
    /// Доставить MESSAGE в текущую подписку. Для 1.2 добавляется `ack: ack-<id>`.
    pub fn deliver(&self, message_id: &str, body: impl Into<Bytes>, headers: &[(&str, &str)]) {
        let mut frame = Frame::new(Command::Message)
            .header(header::MESSAGE_ID, message_id)
            .body(body);
        for (k, v) in headers {
            frame = frame.header(*k, *v);
        }
        let _ = self.control.send(Control::Deliver(frame));
    }

    /// Отправить клиенту произвольный фрейм как есть.
    pub fn push(&self, frame: Frame) {
        let _ = self.control.send(Control::Raw(frame));
    }

    /// Оборвать соединение без DISCONNECT.
    pub fn drop_connection(&self) {
        let _ = self.control.send(Control::Drop);
    }

    pub fn set_fail_acks(&self, fail: bool) {
        self.state.lock().unwrap().script.fail_acks = fail;
    }

    /// Все фреймы, полученные от клиента.
    pub fn frames(&self) -> Vec<Frame> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn frames_of(&self, command: Command) -> Vec<Frame> {
        self.frames().into_iter().filter(|f| f.command == command).collect()
    }

    /// Тела успешно принятых SEND фреймов.
    pub fn sent(&self) -> Vec<Bytes> {
        let state = self.state.lock().unwrap();
        state
            .received
            .iter()
            .filter(|f| f.command == Command::Send)
            .enumerate()
            .filter(|(i, _)| state.script.fail_send_at != Some(*i))
            .map(|(_, f)| f.body.clone())
            .collect()
    }

    /// Сколько heartbeat'ов пришло от клиента.
    pub fn heartbeats(&self) -> usize {
        self.state.lock().unwrap().heartbeats
    }

    pub fn subscription(&self) -> Option<String> {
        self.state.lock().unwrap().subscription.as_ref().map(|(id, _)| id.clone())
    }
}

async fn run(
    io: DuplexStream,
    state: Arc<Mutex<BrokerState>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut framed = Framed::new(io, FrameCodec::default());
    loop {
        let outgoing = tokio::select! {
            ctl = control.recv() => match ctl {
                Some(Control::Deliver(frame)) => Some(addressed(&state, frame)),
                Some(Control::Raw(frame)) => Some(frame),
                Some(Control::Drop) | None => return,
            },
            next = framed.next() => match next {
                Some(Ok(Transmission::Frame(frame))) => {
                    let (reply, keep_open) = respond(&state, frame);
                    if let Some(reply) = reply {
                        if framed.send(Transmission::Frame(reply)).await.is_err() {
                            return;
                        }
                    }
                    if !keep_open {
                        return;
                    }
                    None
                }
                Some(Ok(Transmission::HeartBeat)) => {
                    state.lock().unwrap().heartbeats += 1;
                    None
                }
                Some(Err(_)) | None => return,
            },
        };
        if let Some(frame) = outgoing {
            if framed.send(Transmission::Frame(frame)).await.is_err() {
                return;
            }
        }
    }
}

fn addressed(state: &Mutex<BrokerState>, mut frame: Frame) -> Frame {
    let state = state.lock().unwrap();
    if let Some((id, destination)) = &state.subscription {
        frame.headers.set(header::SUBSCRIPTION, id.as_str());
        frame.headers.set(header::DESTINATION, destination.as_str());
    }
    if state.script.version == "1.2" {
        if let Some(id) = frame.get(header::MESSAGE_ID) {
            let ack = format!("ack-{id}");
            frame.headers.set(header::ACK, ack);
        }
    }
    frame
}

fn receipt(frame: &Frame) -> Option<Frame> {
    frame
        .get(header::RECEIPT)
        .map(|id| Frame::new(Command::Receipt).header(header::RECEIPT_ID, id))
}

fn error(frame: &Frame, message: &str) -> Frame {
    let mut reply = Frame::new(Command::Error).header(header::MESSAGE, message);
    if let Some(id) = frame.get(header::RECEIPT) {
        reply = reply.header(header::RECEIPT_ID, id);
    }
    reply
}

/// Ответ на фрейм клиента и признак, что соединение остаётся открытым.
fn respond(state: &Mutex<BrokerState>, frame: Frame) -> (Option<Frame>, bool) {
    let mut state = state.lock().unwrap();
    state.received.push(frame.clone());

    match frame.command {
        Command::Connect | Command::Stomp => match state.script.reject_connect.clone() {
            Some(message) => (Some(error(&frame, &message)), false),
            None => {
                let connected = Frame::new(Command::Connected)
                    .header(header::VERSION, state.script.version.as_str())
                    .header(header::HEART_BEAT, state.script.heart_beat.as_str())
                    .header(header::SERVER, "mock-broker/1.0")
                    .header(header::SESSION, "session-1");
                (Some(connected), true)
            }
        },
        Command::Subscribe => match state.script.reject_subscribe.clone() {
            Some(message) => (Some(error(&frame, &message)), true),
            None => {
                let id = frame.get(header::ID).unwrap_or_default().to_string();
                let destination = frame.get(header::DESTINATION).unwrap_or_default().to_string();
                state.subscription = Some((id, destination));
                (receipt(&frame), true)
            }
        },
        Command::Send => {
            let index = state.sends;
            state.sends += 1;
            if state.script.fail_send_at == Some(index) {
                (Some(error(&frame, "send rejected")), true)
            } else {
                (receipt(&frame), true)
            }
        }
        Command::Ack | Command::Nack if state.script.fail_acks => {
            (Some(error(&frame, "ack rejected")), true)
        }
        Command::Unsubscribe => {
            state.subscription = None;
            (receipt(&frame), true)
        }
        Command::Disconnect => (receipt(&frame), false),
        _ => (receipt(&frame), true),
    }
}
