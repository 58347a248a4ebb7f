use std::{fmt::Display, io};

use dfu_race::{HostError, RaceError};

pub enum CliError {
    IO(io::Error),
    Race(RaceError),
    Transfer(HostError),
    NoDFUDevice,
    ManyDFUDevices,
    InvalidHex(String),
}

impl CliError {
    /// Device may be mid-race: nothing else should be attempted on it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CliError::Race(err) if err.is_fatal())
    }
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        CliError::IO(value)
    }
}

impl From<RaceError> for CliError {
    fn from(value: RaceError) -> Self {
        CliError::Race(value)
    }
}

impl From<HostError> for CliError {
    fn from(value: HostError) -> Self {
        CliError::Transfer(value)
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::IO(err) => write!(f, "IO error: {err}"),
            CliError::Race(err) => write!(f, "{err}"),
            CliError::Transfer(err) => {
                write!(f, "Control transfer failed: {err}")
            }
            CliError::NoDFUDevice => write!(f, "No device found in DFU mode"),
            CliError::ManyDFUDevices => write!(f, "More than one DFU devices"),
            CliError::InvalidHex(s) => write!(f, "Invalid hex data: {s}"),
        }
    }
}
