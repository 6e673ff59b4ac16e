//! Demo slave: serves a small register map over a serial port.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use log::{debug, info, warn};

use modslave::{
    Activity, BankKind, Parity, RegisterStore, RtuSlave, SerialConfig, SerialTransport,
    StoreError, StoreSetup,
};

#[derive(Parser, Debug)]
#[command(name = "modslave", about = "Modbus RTU slave serving a demo register map")]
struct Cli {
    /// Serial port (e.g. /dev/ttyUSB0, COM3)
    #[arg(long, required_unless_present = "list_ports")]
    port: Option<String>,

    /// Baud rate
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    #[arg(long, value_enum, default_value_t = ParityArg::None)]
    parity: ParityArg,

    /// Stop bits per character
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    stop_bits: u8,

    /// Data bits per character
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(7..=8))]
    data_bits: u8,

    /// Slave address(es) to answer on; repeat for more than one
    #[arg(long = "slave", default_values_t = [1u8])]
    slaves: Vec<u8>,

    /// JSON bank-setup description (values and lengths only; hooks are code)
    #[arg(long)]
    setup: Option<PathBuf>,

    /// Initialize setup cells with bank defaults instead of listed values
    #[arg(long)]
    use_defaults: bool,

    /// Receive timeout per poll, in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ParityArg {
    None,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(p: ParityArg) -> Self {
        match p {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.list_ports {
        print_ports()?;
        return Ok(());
    }

    let Some(port) = cli.port else {
        return Err("--port is required unless --list-ports is given".into());
    };

    let config = SerialConfig {
        port,
        baud_rate: cli.baud,
        parity: cli.parity.into(),
        stop_bits: cli.stop_bits,
        data_bits: cli.data_bits,
    };

    let transport = SerialTransport::open(&config)?;
    let mut slave = RtuSlave::new(transport, cli.slaves.clone());

    if let Some(path) = &cli.setup {
        let text = std::fs::read_to_string(path)?;
        let setup: StoreSetup = serde_json::from_str(&text)?;
        slave.setup_registers(&setup, cli.use_defaults)?;
        info!("applied bank setup from {}", path.display());
    } else {
        install_demo_map(slave.store_mut())?;
        info!("serving built-in demo register map");
    }

    info!(
        "slave address(es) {:?} on {} at {} baud",
        cli.slaves, config.port, config.baud_rate
    );

    let poll = Duration::from_millis(cli.poll_ms);
    loop {
        match slave.process_one(poll).await {
            Ok(Activity::Handled) => drain_changes(&mut slave),
            Ok(Activity::Idle) => {}
            Err(err) => {
                warn!("serial link error: {err}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Print the host's serial ports, one per line with a short provenance tag.
fn print_ports() -> Result<(), Box<dyn std::error::Error>> {
    let mut ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
        return Ok(());
    }
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));

    for port in ports {
        let origin = match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                let mut tag = format!("usb {:04x}:{:04x}", usb.vid, usb.pid);
                if let Some(product) = &usb.product {
                    tag.push(' ');
                    tag.push_str(product);
                }
                tag
            }
            serialport::SerialPortType::BluetoothPort => "bluetooth".to_string(),
            serialport::SerialPortType::PciPort => "pci".to_string(),
            serialport::SerialPortType::Unknown => "unknown".to_string(),
        };
        println!("{:<20} {origin}", port.port_name);
    }
    Ok(())
}

/// A small map in the spirit of the classic slave demos: a few coils and
/// registers, an input register refreshed on read, a logged coil.
fn install_demo_map(store: &mut RegisterStore) -> Result<(), StoreError> {
    store.add_coils(0, &[true, false, true])?;
    store.add_coils_with_hooks(
        3,
        &[false],
        None,
        Some(Arc::new(|_, address, value| {
            info!("coil {address} driven to {value} by master");
            Ok(())
        })),
    )?;

    store.add_discrete_inputs(0, &[true, false, true, true, false])?;
    store.add_holding_registers(0, &[321, 123])?;

    // uptime in seconds, refreshed whenever the master reads it
    let started = Instant::now();
    store.add_input_registers_with_hooks(
        0,
        &[0],
        Some(Arc::new(move |_, _, value| {
            *value = started.elapsed().as_secs() as u16;
            Ok(())
        })),
    )?;

    Ok(())
}

/// Report externally driven writes and acknowledge them out of the log.
fn drain_changes(slave: &mut RtuSlave<SerialTransport>) {
    let coil_changes: Vec<_> = slave
        .store()
        .changed_coils()
        .iter()
        .map(|(&address, &change)| (address, change))
        .collect();
    for (address, change) in coil_changes {
        info!(
            "coil {address} changed to {} (tick {})",
            change.value, change.timestamp
        );
        match slave
            .store_mut()
            .acknowledge_change(BankKind::Coil, address, change.timestamp)
        {
            Ok(true) => {}
            Ok(false) => debug!("coil {address} changed again before acknowledgement"),
            Err(err) => warn!("{err}"),
        }
    }

    let register_changes: Vec<_> = slave
        .store()
        .changed_holding_registers()
        .iter()
        .map(|(&address, &change)| (address, change))
        .collect();
    for (address, change) in register_changes {
        info!(
            "holding register {address} changed to {} (tick {})",
            change.value, change.timestamp
        );
        match slave
            .store_mut()
            .acknowledge_change(BankKind::Holding, address, change.timestamp)
        {
            Ok(true) => {}
            Ok(false) => debug!("holding register {address} changed again before acknowledgement"),
            Err(err) => warn!("{err}"),
        }
    }
}
