use std::io::{self, Write};

use dfu_race::{DfuSession, MAX_PACKET_SIZE};

use crate::CliError;

pub(crate) fn send_file(
    session: &DfuSession,
    data: &[u8],
) -> Result<(), CliError> {
    let mut bytes_sent: usize = 0;
    for chunk in data.chunks(MAX_PACKET_SIZE) {
        session.send_data(chunk)?;
        bytes_sent += chunk.len();

        let percentage = (100 * bytes_sent) / data.len();
        let filled = (60 * bytes_sent) / data.len();
        print!(
            "\r  Sending {:3}% [{}]",
            percentage,
            "#".repeat(filled) + &" ".repeat(60 - filled)
        );
        let _ = io::stdout().flush();
    }
    println!();
    Ok(())
}
