use dfu_race::{DfuTarget, SerialInfo, find_dfu_targets, is_exploited};

use crate::CliError;

pub(crate) fn list_dfu_devices(
    vid: Option<u16>,
    pid: Option<u16>,
) -> Result<(), CliError> {
    let targets = find_dfu_targets(vid, pid)?;
    if targets.is_empty() {
        println!("No DFU device found");
    } else {
        print_targets(&targets);
    }
    Ok(())
}

fn print_targets(targets: &[DfuTarget]) {
    for target in targets {
        let serial = target.serial_number().unwrap_or("");
        println!(
            "Bus {} Device {:03}: ID {:04x}:{:04x} (exploited={})",
            target.bus_id(),
            target.device_address(),
            target.vendor_id(),
            target.product_id(),
            is_exploited(serial),
        );
        if let Some(info) = SerialInfo::parse(serial) {
            print_serial("  ", &info);
        }
    }
}

pub(crate) fn print_serial(prefix: &str, info: &SerialInfo) {
    for (key, value) in info.fields() {
        println!("{prefix}{key:<5} {value}");
    }
}
