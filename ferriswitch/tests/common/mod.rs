//! A scripted fake switch speaking a small line-mode CLI.
//!
//! State lives behind an `Arc<Mutex<_>>` so it survives between sessions,
//! which is what idempotence tests need. Every transport close is counted.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferriswitch::dialect::{Dialect, DialectSpec};
use ferriswitch::error::{ConnectError, ConnectErrorKind, TransportError};
use ferriswitch::transport::{Connector, DeviceTarget, Transport};

/// A flat dialect: every template is one line.
pub const FLAT_DIALECT: &str = r#"{
    "name": "flat",
    "prompts": [
        {"kind": "login", "matcher": {"suffix": "User:"}},
        {"kind": "password", "matcher": {"suffix": "Password:"}},
        {"kind": "user", "matcher": {"suffix": "sw>"}},
        {"kind": "privileged", "matcher": {"suffix": "sw#"}},
        {"kind": "config", "matcher": {"suffix": "sw(config)#"}},
        {"kind": "error", "matcher": {"contains": "Error"}}
    ],
    "commands": {
        "escalate": [{"text": "enable", "expect": "privileged"}],
        "deescalate": [{"text": "disable", "expect": "user"}],
        "logout": [{"text": "exit", "expect": "user"}],
        "session_setup": [{"text": "terminal length 0", "expect": "privileged"}],
        "enter_config": [{"text": "configure"}],
        "exit_config": [{"text": "end", "expect": "privileged"}],
        "save": [{"text": "write", "expect": "privileged", "require_any": ["Saved OK"]}],
        "show_vlan": [{"text": "show vlan", "expect": "privileged"}],
        "show_running_config": [{"text": "show running-config", "expect": "privileged"}],
        "create_vlan": [{"text": "create vlan {vlan}"}],
        "name_vlan": [{"text": "name vlan {vlan} {name}"}],
        "delete_vlan": [{"text": "no vlan {vlan}"}],
        "port_reset": [{"text": "reset port {port}"}],
        "port_untagged": [{"text": "untagged vlan {vlan} port {port}"}]
    },
    "tolerate_exists": ["already exist", "already a member"],
    "tolerate_absent": ["not found"],
    "observation": {
        "vlan": "^(\\d+)[ \\t]+(.+?)[ \\t]+active(?:[ \\t]+(.*?))?[ \\t\\r]*$",
        "ports": "Gi1/0/(\\d+)(?:-(\\d+))?"
    }
}"#;

pub fn flat_dialect() -> Dialect {
    let spec: DialectSpec = serde_json::from_str(FLAT_DIALECT).unwrap();
    spec.compile().unwrap()
}

pub fn target() -> DeviceTarget {
    target_for("fake-sw")
}

pub fn target_for(host: &str) -> DeviceTarget {
    DeviceTarget::builder(host)
        .username("admin")
        .password("pw1")
        .dialect("flat")
        .connect_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// Device-side configuration and a log of received lines.
#[derive(Debug, Default)]
pub struct SwitchState {
    pub vlans: BTreeMap<u16, String>,
    pub untagged: BTreeMap<u16, BTreeSet<u16>>,
    /// Command -> error line printed instead of executing it.
    pub rejects: HashMap<String, String>,
    /// Commands that are echoed and then never answered.
    pub hang_on: HashSet<String>,
    pub received: Vec<String>,
}

/// How the fake behaves when a session opens.
#[derive(Clone)]
pub struct FakeSwitch {
    pub state: Arc<Mutex<SwitchState>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub username: String,
    pub password: String,
    pub enable_secret: Option<String>,
    /// Fail `open` with this kind instead of connecting.
    pub refuse: Option<ConnectErrorKind>,
    /// Never finish `open`.
    pub blackhole: bool,
    /// Split every read into chunks of this many bytes.
    pub chunk: Option<usize>,
}

impl FakeSwitch {
    pub fn new() -> Self {
        let mut state = SwitchState::default();
        state.vlans.insert(1, "default".into());
        Self {
            state: Arc::new(Mutex::new(state)),
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            username: "admin".into(),
            password: "pw1".into(),
            enable_secret: None,
            refuse: None,
            blackhole: false,
            chunk: None,
        }
    }

    pub fn reject(self, command: &str, error: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejects
            .insert(command.into(), error.into());
        self
    }

    pub fn hang_on(self, command: &str) -> Self {
        self.state.lock().unwrap().hang_on.insert(command.into());
        self
    }

    pub fn with_vlan(self, id: u16, name: &str) -> Self {
        self.state.lock().unwrap().vlans.insert(id, name.into());
        self
    }

    /// Put `port` on VLAN `id` untagged.
    pub fn with_member(self, id: u16, port: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .untagged
            .entry(id)
            .or_default()
            .insert(port);
        self
    }

    pub fn members(&self, id: u16) -> BTreeSet<u16> {
        self.state
            .lock()
            .unwrap()
            .untagged
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn received(&self) -> Vec<String> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn vlans(&self) -> BTreeMap<u16, String> {
        self.state.lock().unwrap().vlans.clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Connector for FakeSwitch {
    type Transport = FakeTransport;

    async fn open(&self, target: &DeviceTarget) -> Result<FakeTransport, ConnectError> {
        if self.blackhole {
            std::future::pending::<()>().await;
        }
        if let Some(kind) = self.refuse {
            return Err(ConnectError::new(kind, target.socket_addr(), "scripted failure"));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(FakeTransport::new(self.clone()))
    }
}

/// Several fake switches addressed by host name. Unknown hosts are
/// unreachable.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    pub devices: HashMap<String, FakeSwitch>,
}

impl FakeNetwork {
    pub fn with_device(mut self, host: &str, switch: FakeSwitch) -> Self {
        self.devices.insert(host.into(), switch);
        self
    }
}

impl Connector for FakeNetwork {
    type Transport = FakeTransport;

    async fn open(&self, target: &DeviceTarget) -> Result<FakeTransport, ConnectError> {
        match self.devices.get(&target.host) {
            Some(switch) => switch.open(target).await,
            None => Err(ConnectError::new(
                ConnectErrorKind::Unreachable,
                target.socket_addr(),
                "no route to host",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Login,
    Password,
    EnablePassword,
    User,
    Privileged,
    Config,
}

impl CliMode {
    fn prompt(self) -> &'static str {
        match self {
            Self::Login => "User:",
            Self::Password | Self::EnablePassword => "Password:",
            Self::User => "sw>",
            Self::Privileged => "sw#",
            Self::Config => "sw(config)#",
        }
    }
}

pub struct FakeTransport {
    device: FakeSwitch,
    mode: CliMode,
    pending: Vec<u8>,
    remote_closed: bool,
    closed: bool,
}

impl FakeTransport {
    fn new(device: FakeSwitch) -> Self {
        let mut transport = Self {
            device,
            mode: CliMode::Login,
            pending: Vec::new(),
            remote_closed: false,
            closed: false,
        };
        transport.write("Fake switch CLI\r\n\r\n");
        transport.prompt();
        transport
    }

    fn write(&mut self, text: &str) {
        self.pending.extend_from_slice(text.as_bytes());
    }

    fn prompt(&mut self) {
        let prompt = self.mode.prompt();
        self.write(prompt);
    }

    fn handle(&mut self, line: &str) {
        let hidden = matches!(self.mode, CliMode::Password | CliMode::EnablePassword);
        if !hidden {
            self.write(&format!("{}\r\n", line));
        }

        let state = Arc::clone(&self.device.state);
        let mut state = state.lock().unwrap();
        if !hidden {
            state.received.push(line.to_string());
        }
        if state.hang_on.contains(line) {
            return;
        }
        if let Some(error) = state.rejects.get(line).cloned() {
            self.write(&format!("{}\r\n", error));
            self.prompt();
            return;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        match (self.mode, words.as_slice()) {
            (CliMode::Login, _) => {
                self.mode = CliMode::Password;
            }
            (CliMode::Password, _) => {
                if line == self.device.password {
                    self.write("\r\n");
                    self.mode = CliMode::User;
                } else {
                    self.write("\r\nLogin incorrect\r\n");
                    self.mode = CliMode::Login;
                }
            }
            (CliMode::EnablePassword, _) => {
                if Some(line) == self.device.enable_secret.as_deref() {
                    self.write("\r\n");
                    self.mode = CliMode::Privileged;
                } else {
                    self.write("\r\nError: Access denied\r\n");
                    self.mode = CliMode::User;
                }
            }
            (CliMode::User, ["enable"]) => {
                self.mode = if self.device.enable_secret.is_some() {
                    CliMode::EnablePassword
                } else {
                    CliMode::Privileged
                };
            }
            (CliMode::User | CliMode::Privileged, ["exit"]) => {
                self.remote_closed = true;
                return;
            }
            (CliMode::Privileged, ["disable"]) => self.mode = CliMode::User,
            (CliMode::Privileged, ["terminal", "length", "0"]) => {}
            (CliMode::Privileged, ["configure"]) => self.mode = CliMode::Config,
            (CliMode::Privileged, ["write"]) => self.write("Saved OK\r\n"),
            (CliMode::Privileged, ["show", "vlan"]) => {
                let mut table = String::from("VLAN  Name                 Status    Ports\r\n");
                for (id, name) in &state.vlans {
                    let ports: Vec<String> = state
                        .untagged
                        .get(id)
                        .into_iter()
                        .flatten()
                        .map(|port| format!("Gi1/0/{}", port))
                        .collect();
                    let row = format!("{:<5} {:<20} active    {}", id, name, ports.join(","));
                    table.push_str(row.trim_end());
                    table.push_str("\r\n");
                }
                self.write(&table);
            }
            (CliMode::Privileged, ["show", "running-config"]) => {
                let mut config = String::from("hostname sw\r\n!\r\n");
                for (id, name) in &state.vlans {
                    config.push_str(&format!("create vlan {}\r\nname vlan {} {}\r\n", id, id, name));
                }
                for (id, ports) in &state.untagged {
                    for port in ports {
                        config.push_str(&format!("untagged vlan {} port {}\r\n", id, port));
                    }
                }
                config.push_str("!\r\n");
                self.write(&config);
            }
            (CliMode::Config, ["end"] | ["exit"]) => self.mode = CliMode::Privileged,
            (CliMode::Config, ["create", "vlan", id]) => {
                let id: u16 = id.parse().unwrap();
                if state.vlans.contains_key(&id) {
                    self.write(&format!("Error: VLAN {} already exists\r\n", id));
                } else {
                    state.vlans.insert(id, format!("VLAN{:04}", id));
                }
            }
            (CliMode::Config, ["name", "vlan", id, name]) => {
                let id: u16 = id.parse().unwrap();
                match state.vlans.get_mut(&id) {
                    None => self.write(&format!("Error: VLAN {} not found\r\n", id)),
                    Some(current) if current.as_str() == *name => {
                        self.write(&format!("Error: VLAN {} name already exists\r\n", id));
                    }
                    Some(current) => *current = name.to_string(),
                }
            }
            (CliMode::Config, ["no", "vlan", id]) => {
                let id: u16 = id.parse().unwrap();
                if state.untagged.get(&id).is_some_and(|m| !m.is_empty()) {
                    self.write(&format!("Error: VLAN {} is in use\r\n", id));
                } else if state.vlans.remove(&id).is_none() {
                    self.write(&format!("Error: VLAN {} not found\r\n", id));
                }
            }
            (CliMode::Config, ["reset", "port", port]) => {
                let port: u16 = port.parse().unwrap();
                for members in state.untagged.values_mut() {
                    members.remove(&port);
                }
            }
            (CliMode::Config, ["untagged", "vlan", id, "port", port]) => {
                let id: u16 = id.parse().unwrap();
                let port: u16 = port.parse().unwrap();
                if !state.vlans.contains_key(&id) {
                    self.write(&format!("Error: VLAN {} not found\r\n", id));
                } else if !state.untagged.entry(id).or_default().insert(port) {
                    self.write(&format!(
                        "Error: port {} already a member of VLAN {}\r\n",
                        port, id
                    ));
                }
            }
            _ => self.write("Error: Invalid command\r\n"),
        }
        drop(state);
        self.prompt();
    }
}

impl Transport for FakeTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed || self.remote_closed {
            return Err(TransportError::NotOpen);
        }
        let text = String::from_utf8_lossy(data).into_owned();
        self.handle(text.trim_end_matches(['\r', '\n']));
        Ok(())
    }

    async fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.pending.is_empty() {
            let take = self
                .device
                .chunk
                .map_or(self.pending.len(), |c| c.min(self.pending.len()));
            return Ok(self.pending.drain(..take).collect());
        }
        if self.remote_closed || self.closed {
            return Err(TransportError::Closed);
        }
        tokio::time::sleep(timeout).await;
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.device.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
