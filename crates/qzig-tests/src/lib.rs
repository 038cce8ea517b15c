//! End-to-end tests for the qzig bridge
//!
//! The tests wire the real bridge, the real RPC multiplexer and the mock
//! radio together. The remote server is played by the test itself through
//! the other end of an in-memory duplex stream, reading and writing JSON
//! lines.
//!
//! # Test Structure
//!
//! - `startup_test.rs` - loading, snapshot, reconciliation, persistence
//! - `control_test.rs` - inbound requests against states and devices
//! - `radio_test.rs` - radio callbacks once the bridge is live

use std::sync::Arc;
use std::time::Duration;

use qzig_bridge::{Bridge, BridgeConfig};
use qzig_core::radio::mock::{MockDevice, MockRadio};
use qzig_core::{Store, ValueRegistry};
use qzig_rpc::{outbound_queue, ConnectionOptions, RpcConnection};
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};

pub const NETWORK_ID: &str = "2b9e4f4c-5d4a-4c71-8d8e-3f0a6c1b7e21";

/// How long to wait for a frame the bridge should send
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(3);

/// The remote server's end of the connection
pub struct RemoteServer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    next_id: u64,
}

impl RemoteServer {
    /// Next frame from the bridge
    pub async fn recv(&mut self) -> JsonValue {
        let line = tokio::time::timeout(FRAME_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed")
            .expect("bridge closed the connection");
        serde_json::from_str(&line).expect("bridge sent invalid JSON")
    }

    /// Next frame, which must be a request with `method`
    pub async fn expect(&mut self, method: &str) -> JsonValue {
        let frame = self.recv().await;
        assert_eq!(frame["method"], method, "unexpected frame {}", frame);
        frame
    }

    /// Nothing arrives for a short while
    pub async fn is_silent(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(100), self.lines.next_line())
            .await
            .is_err()
    }

    pub async fn reply(&mut self, request: &JsonValue, result: JsonValue) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
            .await;
    }

    /// Send a request to the bridge; returns its id
    pub async fn request(&mut self, method: &str, url: &str, data: Option<JsonValue>) -> u64 {
        self.next_id += 1;
        let mut params = json!({ "url": url });
        if let Some(data) = data {
            params["data"] = data;
        }
        self.send(json!({
            "jsonrpc": "2.0",
            "id": self.next_id,
            "method": method,
            "params": params,
        }))
        .await;
        self.next_id
    }

    /// Read frames until the reply to `id` arrives; returns it with the
    /// frames that came before it
    pub async fn reply_to(&mut self, id: u64) -> (JsonValue, Vec<JsonValue>) {
        let mut before = Vec::new();
        loop {
            let frame = self.recv().await;
            if frame.get("method").is_none() && frame["id"] == id {
                return (frame, before);
            }
            before.push(frame);
        }
    }

    async fn send(&mut self, frame: JsonValue) {
        let mut line = frame.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write failed");
    }
}

/// A bridge connected to a scripted remote server
pub struct TestBridge {
    pub bridge: Bridge,
    pub radio: Arc<MockRadio>,
    pub server: RemoteServer,
    pub conn: RpcConnection,
    pub dir: TempDir,
}

impl TestBridge {
    pub fn new(radio: MockRadio) -> Self {
        Self::build(radio, TempDir::new().expect("temp dir"), ValueRegistry::standard())
    }

    /// Reuse a store directory from an earlier run
    pub fn with_dir(radio: MockRadio, dir: TempDir) -> Self {
        Self::build(radio, dir, ValueRegistry::standard())
    }

    pub fn with_registry(radio: MockRadio, registry: ValueRegistry) -> Self {
        Self::build(radio, TempDir::new().expect("temp dir"), registry)
    }

    fn build(radio: MockRadio, dir: TempDir, registry: ValueRegistry) -> Self {
        let radio = Arc::new(radio);
        let (client, queue) = outbound_queue();
        let mut config = BridgeConfig::new(NETWORK_ID);
        config.command_timeout = Some(Duration::from_secs(2));
        config.ota_dir = dir.path().join("ota");
        let bridge = Bridge::new(
            config,
            Store::new(dir.path()),
            radio.clone(),
            registry,
            client,
        );

        let (local, remote) = tokio::io::duplex(1024 * 1024);
        let conn = RpcConnection::open(
            local,
            queue,
            bridge.handler(),
            ConnectionOptions {
                request_timeout: Some(Duration::from_secs(2)),
            },
        );
        let (read, writer) = tokio::io::split(remote);
        Self {
            bridge,
            radio,
            server: RemoteServer {
                lines: BufReader::new(read).lines(),
                writer,
                next_id: 1000,
            },
            conn,
            dir,
        }
    }

    /// Run startup, answering the device listing with `remote_ids`
    ///
    /// Returns every frame sent before the listing request; the snapshot
    /// POST is the last of them.
    pub async fn start(&mut self, remote_ids: JsonValue) -> Vec<JsonValue> {
        let bridge = &self.bridge;
        let server = &mut self.server;
        let (started, frames) = tokio::join!(bridge.start(), async {
            let mut frames = Vec::new();
            loop {
                let frame = server.recv().await;
                if frame["method"] == "GET" {
                    server.reply(&frame, remote_ids).await;
                    return frames;
                }
                frames.push(frame);
            }
        });
        started.expect("startup failed");
        frames
    }

    pub fn store_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("store")
    }

    /// Where the bridge looks for upgrade images
    pub fn ota_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("ota")
    }

    /// Give the bridge back its directory for a second run
    pub fn into_dir(self) -> TempDir {
        self.bridge.shutdown();
        self.conn.close();
        self.dir
    }
}

/// A mains powered switch with the basic and on/off clusters on endpoint 1
pub fn on_off_switch(ieee: &str) -> MockDevice {
    MockDevice::new(ieee)
        .with_endpoint(1, &[0x0000, 0x0006], &[])
        .with_basic_info("Acme", "Switch", "SN-0001")
}

/// A battery sensor reporting temperature and humidity
pub fn climate_sensor(ieee: &str) -> MockDevice {
    MockDevice::new(ieee)
        .with_endpoint(1, &[0x0000, 0x0001, 0x0402, 0x0405], &[])
        .with_basic_info("Acme", "Climate", "SN-0002")
}

/// Find the state id of `value_name`'s REPORT or CONTROL state in a snapshot device
pub fn state_id(device: &JsonValue, value_name: &str, state_type: &str) -> String {
    device["value"]
        .as_array()
        .and_then(|values| values.iter().find(|v| v["name"] == value_name))
        .and_then(|value| value["state"].as_array())
        .and_then(|states| states.iter().find(|s| s["type"] == state_type))
        .and_then(|state| state[":id"].as_str())
        .unwrap_or_else(|| panic!("no {} state on {}", state_type, value_name))
        .to_string()
}

/// The device with `product` in a snapshot
pub fn snapshot_device<'a>(snapshot: &'a JsonValue, product: &str) -> &'a JsonValue {
    snapshot["params"]["data"]["device"]
        .as_array()
        .and_then(|devices| devices.iter().find(|d| d["product"] == product))
        .unwrap_or_else(|| panic!("no {} in snapshot", product))
}
