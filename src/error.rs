use std::num::ParseIntError;
use thiserror::Error;

use crate::format::ts::types::BitRate;

#[derive(Error, Debug)]
pub enum TsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("input bitrate unknown or too low: {actual} b/s, {required} b/s required, specify an inter-packet interval instead of a bitrate")]
    BitrateUnderflow { required: BitRate, actual: BitRate },

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

pub type Result<T> = std::result::Result<T, TsError>;
