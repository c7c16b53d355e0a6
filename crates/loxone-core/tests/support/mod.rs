// In-process Miniserver for controller tests.
//
// Speaks the real wire protocol: RSA key exchange, AES-encrypted token
// commands, the structure file, binary event tables and keepalives.
#![allow(clippy::unwrap_used, dead_code)]

use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use aes::Aes256;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use data_encoding::HEXLOWER_PERMISSIVE;
use futures_util::{SinkExt, StreamExt};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

use loxone_api::auth::to_loxone_seconds;
use loxone_api::codec::encode_value_events;
use loxone_api::{Frame, FrameKind, Identifier};
use loxone_core::{ControllerConfig, Credentials, ReconnectConfig, Timeouts};

// HMAC-SHA256("ABCD", "admin:" + upper_hex(SHA256("secret:a1b2c3"))).
pub const CREDENTIAL_HASH: &str =
    "b1ffc55152251fde7ae4ddf2ffece00e14685c68e8ead52e181c6db354d3fcac";
// HMAC-SHA256("ABCD", "jwt-token").
pub const TOKEN_HASH: &str = "2f718b70add4435ffcff24eeaf5b35d9f4f31a21f41b1452c5d98b3d354c4586";
pub const ONE_TIME_KEY: &str = "3431343234333434";

pub const KITCHEN: &str = "0f1e2d3c-0000-0001-ffff000000000001";
pub const KITCHEN_VALUE: &str = "0f1e2d3c-0000-0002-ffff000000000002";
pub const STRUCTURE_VERSION: &str = "2024-03-01 10:00:00";

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type ServerWs = WebSocketStream<TcpStream>;

pub fn id(raw: &str) -> Identifier {
    raw.parse().unwrap()
}

pub fn structure_json() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "lastModified": STRUCTURE_VERSION,
        "rooms": {},
        "cats": {},
        "controls": {
            KITCHEN: {
                "name": "Kitchen Light",
                "type": "Dimmer",
                "uuidAction": KITCHEN,
                "states": { "value": KITCHEN_VALUE }
            }
        }
    }))
    .unwrap()
}

// ── Mock ────────────────────────────────────────────────────────────

pub struct MockState {
    private_key: RsaPrivateKey,
    structure: Vec<u8>,
    pub ack_keepalive: AtomicBool,
    pub connections: AtomicUsize,
    pub structure_downloads: AtomicUsize,
    pub token_logins: AtomicUsize,
    /// Plaintext controls in arrival order, across connections.
    pub log: Mutex<Vec<String>>,
    events: broadcast::Sender<Frame>,
    kill: broadcast::Sender<()>,
}

pub struct MockMiniserver {
    pub port: u16,
    pub state: Arc<MockState>,
}

impl MockMiniserver {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events, _) = broadcast::channel(64);
        let (kill, _) = broadcast::channel(4);
        let state = Arc::new(MockState {
            private_key: RsaPrivateKey::from_pkcs8_pem(include_str!("../fixtures/test_key.pem"))
                .unwrap(),
            structure: structure_json(),
            ack_keepalive: AtomicBool::new(true),
            connections: AtomicUsize::new(0),
            structure_downloads: AtomicUsize::new(0),
            token_logins: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            events,
            kill,
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let Ok(ws) = accept_hdr_async(tcp, |_req: &Request, mut resp: Response| {
                        resp.headers_mut().insert(
                            "Sec-WebSocket-Protocol",
                            HeaderValue::from_static("remotecontrol"),
                        );
                        Ok::<_, ErrorResponse>(resp)
                    })
                    .await
                    else {
                        return;
                    };
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    serve(ws, &state).await;
                });
            }
        });

        Self { port, state }
    }

    pub fn config(&self, password: &str) -> ControllerConfig {
        let mut config = ControllerConfig::new("127.0.0.1", Credentials::new("admin", password));
        config.port = self.port;
        config.reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            max_retries: None,
        };
        config.timeouts = Timeouts {
            handshake: Duration::from_secs(2),
            token: Duration::from_secs(2),
            structure: Duration::from_secs(2),
            command: Duration::from_secs(2),
        };
        config
    }

    /// Send a value event table on every open connection.
    pub fn push_values(&self, records: &[(Identifier, f64)]) {
        let frame = Frame::new(FrameKind::EventTableValues, encode_value_events(records));
        let _ = self.state.events.send(frame);
    }

    /// Drop every open connection without a close handshake.
    pub fn kill_connections(&self) {
        let _ = self.state.kill.send(());
    }

    pub fn requested(&self, prefix: &str) -> usize {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

// ── Connection handling ─────────────────────────────────────────────

struct Connection {
    key: Option<([u8; 32], [u8; 16])>,
}

async fn serve(mut ws: ServerWs, state: &MockState) {
    let mut events = state.events.subscribe();
    let mut kill = state.kill.subscribe();
    let mut conn = Connection { key: None };

    loop {
        tokio::select! {
            _ = kill.recv() => return,
            frame = events.recv() => {
                let Ok(frame) = frame else { continue };
                if send_frame(&mut ws, &frame).await.is_err() {
                    return;
                }
            }
            message = ws.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                if handle(&mut ws, state, &mut conn, &text).await.is_err() {
                    return;
                }
            }
        }
    }
}

type SendResult = Result<(), tokio_tungstenite::tungstenite::Error>;

async fn handle(ws: &mut ServerWs, state: &MockState, conn: &mut Connection, text: &str) -> SendResult {
    if text == "keepalive" {
        if state.ack_keepalive.load(Ordering::SeqCst) {
            return send_frame(ws, &Frame::keepalive()).await;
        }
        return Ok(());
    }

    let control = match text.strip_prefix("jdev/sys/enc/") {
        Some(sealed) => decrypt(conn, sealed),
        None => text.to_owned(),
    };
    state.log.lock().unwrap().push(control.clone());
    let valid_until = to_loxone_seconds(Utc::now()) + 3600;

    if control == "data/LoxAPP3.json" {
        state.structure_downloads.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(FrameKind::BinaryFile, state.structure.clone());
        return send_frame(ws, &frame).await;
    }

    let (value, code) = if control == "jdev/sys/getPublicKey" {
        (json!(include_str!("../fixtures/test_key.pub.pem")), 200)
    } else if let Some(payload) = control.strip_prefix("jdev/sys/keyexchange/") {
        conn.key = Some(unseal_session_key(&state.private_key, payload));
        (json!(""), 200)
    } else if control.starts_with("jdev/sys/getkey2/") {
        (json!({ "key": ONE_TIME_KEY, "salt": "a1b2c3", "hashAlg": "SHA256" }), 200)
    } else if control == "jdev/sys/getkey" {
        (json!(ONE_TIME_KEY), 200)
    } else if control.starts_with("jdev/sys/getjwt/") {
        if control.contains(CREDENTIAL_HASH) {
            let token = json!({
                "token": "jwt-token",
                "key": "0011",
                "validUntil": valid_until,
                "tokenRights": 4,
                "unsecurePass": false
            });
            (token, 200)
        } else {
            (json!(""), 401)
        }
    } else if control.starts_with("jdev/sys/refreshjwt/") {
        (json!({ "validUntil": valid_until, "tokenRights": 4 }), 200)
    } else if control.starts_with("authwithtoken/") {
        if control.contains(TOKEN_HASH) {
            state.token_logins.fetch_add(1, Ordering::SeqCst);
            (json!({ "validUntil": valid_until, "tokenRights": 4, "unsecurePass": false }), 200)
        } else {
            (json!(""), 401)
        }
    } else if control == "jdev/sps/LoxAPPversion3" {
        (json!(STRUCTURE_VERSION), 200)
    } else if control == "jdev/sps/enablebinstatusupdate" || control.starts_with("jdev/sps/io/") {
        (json!("1"), 200)
    } else {
        (json!(""), 404)
    };
    reply(ws, &control, value, code).await
}

async fn reply(ws: &mut ServerWs, control: &str, value: Value, code: u16) -> SendResult {
    let body = json!({ "LL": { "control": control, "value": value, "Code": code.to_string() } });
    send_frame(ws, &Frame::new(FrameKind::Text, body.to_string().into_bytes())).await
}

async fn send_frame(ws: &mut ServerWs, frame: &Frame) -> SendResult {
    ws.send(Message::binary(frame.encode_header())).await?;
    if frame.kind.is_header_only() {
        return Ok(());
    }
    let message = match frame.kind {
        FrameKind::Text => Message::text(String::from_utf8(frame.payload.to_vec()).unwrap()),
        _ => Message::binary(frame.payload.clone()),
    };
    ws.send(message).await
}

// ── Crypto ──────────────────────────────────────────────────────────

fn unseal_session_key(private_key: &RsaPrivateKey, payload: &str) -> ([u8; 32], [u8; 16]) {
    let sealed = BASE64.decode(payload).unwrap();
    let plain = String::from_utf8(private_key.decrypt(Pkcs1v15Encrypt, &sealed).unwrap()).unwrap();
    let (key_hex, iv_hex) = plain.split_once(':').unwrap();
    let key = HEXLOWER_PERMISSIVE.decode(key_hex.as_bytes()).unwrap();
    let iv = HEXLOWER_PERMISSIVE.decode(iv_hex.as_bytes()).unwrap();
    (key.try_into().unwrap(), iv.try_into().unwrap())
}

/// Recover the inner command of a `jdev/sys/enc/..` path.
fn decrypt(conn: &Connection, sealed: &str) -> String {
    let (key, iv) = conn.key.expect("encrypted command before key exchange");
    let encoded = sealed
        .replace("%2B", "+")
        .replace("%2F", "/")
        .replace("%3D", "=");
    let data = BASE64.decode(encoded).unwrap();
    let mut plain = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(&data)
        .unwrap();
    while plain.last() == Some(&0) {
        plain.pop();
    }
    let plain = String::from_utf8(plain).unwrap();

    if let Some(rest) = plain.strip_prefix("salt/") {
        rest.split_once('/').unwrap().1.to_owned()
    } else if let Some(rest) = plain.strip_prefix("nextSalt/") {
        let mut parts = rest.splitn(3, '/');
        parts.nth(2).unwrap().to_owned()
    } else {
        panic!("unsalted encrypted command: {plain}");
    }
}
