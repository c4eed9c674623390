use crate::link::LinkState;

/// Errors that can occur in channel and link-device operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Shared-memory level error (ring corruption, peer not ready).
    #[error("shared-memory error: {0}")]
    Shmem(#[from] shmlink_shmem::ShmemError),

    /// Frame codec error.
    #[error("frame error: {0}")]
    Frame(#[from] shmlink_frame::FrameError),

    /// Operation requires the link to be online.
    #[error("link not online (state {state:?})")]
    NotOnline { state: LinkState },

    /// The dispatch worker is gone; decoded frames have nowhere to go.
    #[error("dispatch queue closed")]
    DispatchClosed,

    /// Worker thread could not be spawned.
    #[error("worker thread error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
