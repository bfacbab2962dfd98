use backend_link::LinkConfig;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::AppState;
use crate::config::BridgeConfig;

/// Read timeout used by test links; every persistent round waits this long.
pub const TEST_READ_TIMEOUT: Duration = Duration::from_millis(150);

#[derive(Default)]
struct Recorded {
    connections: usize,
    disconnects: usize,
    commands: Vec<String>,
    stored: Vec<(String, String)>,
}

/// In-process stand-in for the message backend.
///
/// First chunk on a connection is the role tag. Readers get every stored
/// message as `[timestamp] message\n` and the connection is closed. Writers
/// then send one command per chunk and get one line back per command.
#[derive(Clone)]
pub struct FakeBackend {
    addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
}

#[derive(Default)]
pub struct FakeBackendBuilder {
    reject_start: bool,
    reject_messages: bool,
    reader_delay: Option<Duration>,
}

impl FakeBackendBuilder {
    /// Answer every `start` with an error (lock held elsewhere)
    pub fn reject_start(mut self) -> Self {
        self.reject_start = true;
        self
    }

    /// Answer every message with an insert error
    pub fn reject_messages(mut self) -> Self {
        self.reject_messages = true;
        self
    }

    /// Hold every reader connection silent for `delay` before dumping
    pub fn stall_readers(mut self, delay: Duration) -> Self {
        self.reader_delay = Some(delay);
        self
    }

    pub async fn start(self) -> FakeBackend {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let behaviour = Arc::new(self);

        let rec = recorded.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                rec.lock().unwrap().connections += 1;
                let rec = rec.clone();
                let behaviour = behaviour.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, &rec, &behaviour).await;
                    rec.lock().unwrap().disconnects += 1;
                });
            }
        });

        FakeBackend { addr, recorded }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    rec: &Mutex<Recorded>,
    behaviour: &FakeBackendBuilder,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let initial = String::from_utf8_lossy(&buf[..n]).to_string();

    if initial.starts_with("reader") {
        if let Some(delay) = behaviour.reader_delay {
            tokio::time::sleep(delay).await;
        }
        let dump: String = rec
            .lock()
            .unwrap()
            .stored
            .iter()
            .map(|(ts, msg)| format!("[{}] {}\n", ts, msg))
            .collect();
        stream.write_all(dump.as_bytes()).await?;
        return stream.shutdown().await;
    }
    if !initial.starts_with("writer") {
        return Ok(());
    }

    let mut active = false;
    let mut pending = initial["writer".len()..].to_string();
    loop {
        if !pending.is_empty() {
            let reply = writer_command(pending.trim(), &mut active, rec, behaviour);
            stream.write_all(reply.as_bytes()).await?;
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        pending = String::from_utf8_lossy(&buf[..n]).to_string();
    }
}

fn writer_command(
    command: &str,
    active: &mut bool,
    rec: &Mutex<Recorded>,
    behaviour: &FakeBackendBuilder,
) -> String {
    let mut rec = rec.lock().unwrap();
    rec.commands.push(command.to_string());
    match command {
        "start" if behaviour.reject_start => "ERROR: writer lock held by another session\n".into(),
        "start" => {
            *active = true;
            "OK: writer session started\n".into()
        }
        "stop" if *active => {
            *active = false;
            "OK: writer session stopped\n".into()
        }
        "stop" => "ERROR: no active writer session\n".into(),
        _ if !*active => "ERROR: You must start writing first\n".into(),
        _ if behaviour.reject_messages => "ERROR: insert failed\n".into(),
        message => {
            let ts = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
            rec.stored.push((ts, message.to_string()));
            "OK: message stored\n".into()
        }
    }
}

impl FakeBackend {
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn builder() -> FakeBackendBuilder {
        FakeBackendBuilder::default()
    }

    /// An address with nothing listening on it
    pub fn unreachable() -> Self {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = probe.local_addr().expect("local addr");
        drop(probe);
        Self {
            addr,
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            addr: self.addr.to_string(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: TEST_READ_TIMEOUT,
            max_in_flight: 8,
        }
    }

    /// Pre-populate the message store
    pub fn seed(&self, timestamp: &str, message: &str) {
        self.recorded
            .lock()
            .unwrap()
            .stored
            .push((timestamp.to_string(), message.to_string()));
    }

    pub fn connections(&self) -> usize {
        self.recorded.lock().unwrap().connections
    }

    /// How many times a writer sent exactly `command`
    pub fn commands(&self, command: &str) -> usize {
        self.recorded
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    /// Messages stored so far, oldest first
    pub fn messages(&self) -> Vec<String> {
        self.recorded
            .lock()
            .unwrap()
            .stored
            .iter()
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Wait until at least `n` backend connections have been closed by the peer
    pub async fn wait_for_disconnects(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.recorded.lock().unwrap().disconnects < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("backend connections were not closed");
    }
}

/// Bridge config pointed at `backend`, everything else default
pub fn test_config(backend: &FakeBackend) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.backend = backend.link_config();
    config
}

/// Fully wired `AppState` talking to `backend`
pub fn test_app_state(backend: &FakeBackend) -> AppState {
    AppState::new(test_config(backend))
}
