use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use modbus_gateway::bank::RegisterBank;
use modbus_gateway::broker::Broker;
use modbus_gateway::serial::{RtuLink, SerialSettings};
use modbus_gateway::tcp::ServerTask;
use modbus_gateway::types::UnitId;

#[derive(Parser, Debug)]
#[command(about = "Modbus TCP to Modbus RTU gateway")]
struct Args {
    /// address to listen on
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// port to listen on
    #[arg(short, long, default_value_t = 502)]
    port: u16,

    /// path of the serial port the device sits behind
    #[arg(long, default_value = "/dev/ttyAMA0")]
    serial: String,

    /// modbus address of the device
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=247))]
    slave_id: u8,

    /// baud rate of the serial port
    #[arg(long, default_value_t = 9600)]
    baudrate: u32,

    /// serial response timeout in milliseconds
    #[arg(long, default_value_t = 400)]
    timeout_ms: u64,

    /// depth of the transaction queue
    #[arg(long, default_value_t = 16)]
    queue_size: usize,

    /// log at DEBUG level instead of INFO
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    tracing::info!(
        "forwarding to unit {} on {} at {} baud",
        args.slave_id,
        args.serial,
        args.baudrate
    );

    let settings = SerialSettings {
        baud_rate: args.baudrate,
        ..Default::default()
    };

    let link = RtuLink::new(
        args.serial,
        settings,
        UnitId::new(args.slave_id),
        Duration::from_millis(args.timeout_ms),
    );
    let (broker, _broker_task) = Broker::spawn(link, args.queue_size);

    let server = ServerTask::new(
        SocketAddr::new(args.host, args.port),
        RegisterBank::new(broker),
    );

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}
