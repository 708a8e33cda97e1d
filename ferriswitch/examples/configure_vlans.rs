//! Configure VLANs on a switch
//!
//! Builds a plan from a desired VLAN layout, prints it, and runs it against
//! one device. In replace mode the device is observed first so only VLANs
//! that actually exist are deleted.
//!
//! # Usage
//!
//! Print the plan without connecting:
//! ```bash
//! cargo run --example configure_vlans -- --dialect tplink_sg --dry-run
//! ```
//!
//! Apply a layout from a JSON file:
//! ```bash
//! cargo run --example configure_vlans -- --host 192.168.0.1 --user admin --password admin \
//!     --desired vlans.json
//! ```
//!
//! where `vlans.json` looks like:
//! ```json
//! {
//!   "vlans": [
//!     {"id": 10, "name": "Mgmt", "untagged": [1, 2]},
//!     {"id": 20, "name": "Clients", "tagged": [8]}
//!   ]
//! }
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use ferriswitch::dialect::DialectRegistry;
use ferriswitch::plan::{DesiredState, Mode, PlanRequest, Protected, Vlan, build_plan};
use ferriswitch::session::{SessionConfig, observe_vlans, run_plan};
use ferriswitch::transport::{DeviceConnector, DeviceTarget, Protocol};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let desired = match &args.desired {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => DesiredState::new()
            .with_vlan(Vlan::new(10, "Mgmt").with_untagged([1, 2]))
            .with_vlan(Vlan::new(20, "Clients").with_untagged([3, 4]).with_tagged([8])),
    };
    let mode = if args.replace { Mode::Replace } else { Mode::Add };

    let mut protected = Protected::new();
    for vlan in &args.protect {
        protected = protected.vlan(*vlan);
    }

    let target = DeviceTarget::builder(&args.host)
        .port(args.port.unwrap_or(args.protocol.default_port()))
        .protocol(args.protocol)
        .username(&args.user)
        .password(&args.password)
        .dialect(&args.dialect)
        .connect_timeout(Duration::from_secs(args.timeout))
        .build()?;
    let dialect = DialectRegistry::builtin()?.for_target(&target)?;
    let config = SessionConfig::default();
    let cancel = CancellationToken::new();

    let mut request = PlanRequest::new(desired, mode).protected(protected);
    if mode == Mode::Replace && !args.dry_run {
        println!("Observing {}...", target.socket_addr());
        let observed =
            observe_vlans(&DeviceConnector, &target, &dialect, &config, &cancel).await?;
        println!("Device has VLANs {:?}", observed.vlans.keys().collect::<Vec<_>>());
        request = request.observed(observed);
    }

    let plan = build_plan(&dialect, &request)?;
    println!("Plan ({} steps):", plan.len());
    println!("{}", "-".repeat(50));
    for step in &plan {
        let marker = if step.best_effort { "~" } else { " " };
        println!("{} {:<40} [{:?}]", marker, step.command, step.section);
    }
    println!("{}", "-".repeat(50));

    if args.dry_run || plan.is_empty() {
        return Ok(());
    }

    // Ctrl-C aborts the session cleanly
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = run_plan(&DeviceConnector, &target, &dialect, &plan, &config, &cancel).await;

    for step in &outcome.steps {
        match &step.message {
            Some(message) => println!("{:<9} {} ({})", step.status, step.command, message),
            None => println!("{:<9} {}", step.status, step.command),
        }
    }
    println!(
        "\n{}: changed={} state={} in {:?}",
        outcome.device, outcome.changed, outcome.final_state, outcome.elapsed
    );
    if let Some(err) = &outcome.error {
        eprintln!("Error: {}", err);
        if outcome.is_partial() {
            eprintln!("Some changes were applied before the failure");
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    host: String,
    port: Option<u16>,
    protocol: Protocol,
    user: String,
    password: String,
    dialect: String,
    desired: Option<PathBuf>,
    protect: Vec<u16>,
    replace: bool,
    dry_run: bool,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut parsed = Self {
            host: "192.168.0.1".to_string(),
            port: None,
            protocol: Protocol::Ssh,
            user: "admin".to_string(),
            password: String::new(),
            dialect: "tplink_sg".to_string(),
            desired: None,
            protect: Vec::new(),
            replace: false,
            dry_run: false,
            timeout: 20,
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--host" | "-h" => {
                    parsed.host = value.unwrap_or(parsed.host);
                    i += 1;
                }
                "--port" | "-p" => {
                    parsed.port = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                "--telnet" => parsed.protocol = Protocol::Telnet,
                "--user" | "-u" => {
                    parsed.user = value.unwrap_or(parsed.user);
                    i += 1;
                }
                "--password" | "-P" => {
                    parsed.password = value.unwrap_or_default();
                    i += 1;
                }
                "--dialect" | "-d" => {
                    parsed.dialect = value.unwrap_or(parsed.dialect);
                    i += 1;
                }
                "--desired" => {
                    parsed.desired = value.map(PathBuf::from);
                    i += 1;
                }
                "--protect" => {
                    if let Some(vlan) = value.and_then(|v| v.parse().ok()) {
                        parsed.protect.push(vlan);
                    }
                    i += 1;
                }
                "--replace" => parsed.replace = true,
                "--dry-run" => parsed.dry_run = true,
                "--timeout" | "-t" => {
                    parsed.timeout = value.and_then(|v| v.parse().ok()).unwrap_or(20);
                    i += 1;
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                other => eprintln!("Unknown argument: {}", other),
            }
            i += 1;
        }
        parsed
    }

    fn print_help() {
        println!(
            r#"ferriswitch configure_vlans example

USAGE:
    cargo run --example configure_vlans -- [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Switch address [default: 192.168.0.1]
    -p, --port <PORT>        Port [default: 22, or 23 with --telnet]
        --telnet             Use Telnet instead of SSH
    -u, --user <USER>        Username [default: admin]
    -P, --password <PASS>    Password
    -d, --dialect <NAME>     tplink_sg or cisco_ios [default: tplink_sg]
        --desired <FILE>     Desired state as JSON
        --protect <VLAN>     Never delete this VLAN (repeatable)
        --replace            Delete VLANs not in the desired state
        --dry-run            Print the plan and exit
    -t, --timeout <SECS>     Connect timeout [default: 20]
    --help                   Print this help message
"#
        );
    }
}
