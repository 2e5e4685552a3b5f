//! pollcore CLI entry point.
//!
//! Small inspection tool: lists the channel-class presets and generates
//! example device-list configuration. To run a full engine against a
//! simulated transport, use `demos/poll_demo.rs`:
//! ```bash
//! cargo run --example poll_demo
//! ```

use clap::{Parser, Subcommand};

use pollcore::core::metadata::{preset, ENGINE_PRESETS};

/// Poll Core - device poll-scheduling engine for industrial gateways
#[derive(Parser, Debug)]
#[command(name = "pollcore", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List engine presets per channel class
    ListPresets,

    /// Generate an example device-list configuration
    Example {
        /// Preset to generate an example for
        #[arg(default_value = "network")]
        preset: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::ListPresets => {
            list_presets();
        }
        Commands::Example { preset } => {
            generate_example(&preset);
        }
    }
}

fn list_presets() {
    println!("Engine presets:");
    println!();

    for p in ENGINE_PRESETS.iter() {
        println!("  {} ({})", p.name, p.display_name);
        println!("    {}", p.description);
        println!(
            "    backoff: base {}ms, cap {}ms; scan pause {}ms; read timeout {}ms",
            p.backoff_base_ms, p.backoff_max_ms, p.scan_pause_ms, p.transport_timeout_ms
        );
        match p.pool_capacity {
            Some(cap) => println!("    pool: {} connections", cap),
            None => println!("    pool: none (shared bus)"),
        }
        println!();
    }

    println!("For a runnable engine demo:");
    println!("  cargo run --example poll_demo");
}

fn generate_example(name: &str) {
    if preset(name).is_none() {
        eprintln!("Unknown preset: {}", name);
        eprintln!("Available: serial, network");
        return;
    }

    // Use eq_ignore_ascii_case to avoid String allocation from to_lowercase()
    let example = if name.eq_ignore_ascii_case("serial") {
        r#"# pollcore device list - serial bus example

[engine]
name = "plant-bus"
class = "serial_bus"
scan_pause_ms = 100
transport_timeout_ms = 3000
backoff_base_ms = 250
backoff_max_ms = 10000

[[devices]]
id = 11
name = "FlowMeter"
interval_ms = 1000
enabled = true

[devices.channel]
type = "serial"
port = "/dev/ttyS0"
baud = 9600
address = 3

[[devices.registers]]
function = 3
start = 0
count = 4

[[devices.registers]]
function = 3
start = 100
count = 2
"#
    } else {
        r#"# pollcore device list - network example

[engine]
name = "plant-lan"
class = "network"
scan_pause_ms = 100
transport_timeout_ms = 3000
backoff_base_ms = 1000
backoff_max_ms = 60000
pool_capacity = 10

[[devices]]
id = 21
name = "Inverter_A"
interval_ms = 1000
enabled = true

[devices.channel]
type = "network"
host = "192.168.1.100"
port = 502

[[devices.registers]]
function = 3
start = 0
count = 8

[[devices]]
id = 22
name = "Inverter_B"
interval_ms = 5000
enabled = true

[devices.channel]
type = "network"
host = "192.168.1.101"
port = 502

[[devices.registers]]
function = 4
start = 0
count = 16
"#
    };

    println!("{}", example);
}
