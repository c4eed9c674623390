use std::fmt;

use shmlink_frame::FrameError;
use shmlink_link::LinkError;
use shmlink_shmem::ShmemError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const LINK_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
#[allow(dead_code)]
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn shmem_error(context: &str, err: ShmemError) -> CliError {
    let code = match err {
        ShmemError::PeerNotReady { .. } => LINK_ERROR,
        ShmemError::RingCorrupt { .. } => LINK_ERROR,
        ShmemError::WriteOverrun { .. } | ShmemError::ReadOverrun { .. } => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    let code = match err {
        FrameError::PayloadTooLarge { .. } => DATA_INVALID,
        FrameError::BadMagic { .. } | FrameError::BadLength { .. } => LINK_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Shmem(err) => shmem_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::NotOnline { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        LinkError::DispatchClosed => CliError::new(INTERNAL, format!("{context}: {err}")),
        LinkError::Io(err) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}
