use std::time::Duration;

use dfu_race::{ControlRequest, DfuSession, to_hex};

use crate::CliError;

pub(crate) struct CtrlArgs {
    pub request: ControlRequest,
    pub length: u16,
    pub data: Option<String>,
    pub no_buffer: bool,
    pub timeout: Duration,
}

pub(crate) fn control_transfer(
    session: &DfuSession,
    args: CtrlArgs,
) -> Result<(), CliError> {
    let is_in = args.request.request_type & 0x80 != 0;
    let mut buffer = match &args.data {
        Some(data) => Some(parse_hex(data)?),
        None if is_in && !args.no_buffer => {
            Some(vec![0u8; args.length as usize])
        }
        None => None,
    };
    let length = match &buffer {
        Some(data) if !is_in => u16::try_from(data.len())
            .map_err(|_| CliError::InvalidHex("data too long".into()))?,
        _ => args.length,
    };
    if let Some(data) = &mut buffer {
        data.resize(data.len().max(length as usize), 0);
    }

    let n = session.synchronous_transfer(
        args.request,
        buffer.as_deref_mut(),
        length,
        args.timeout,
    )?;
    println!("Transferred {n} bytes");
    if let (true, Some(data)) = (is_in, &buffer) {
        println!("{}", to_hex(&data[..n.min(data.len())]));
    }
    Ok(())
}

fn parse_hex(s: &str) -> Result<Vec<u8>, CliError> {
    let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if s.len() % 2 != 0 {
        return Err(CliError::InvalidHex(s));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|b| u8::from_str_radix(b, 16).ok())
                .ok_or_else(|| CliError::InvalidHex(s.clone()))
        })
        .collect()
}
