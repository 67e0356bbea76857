//! The datastream engine's public surface: an open file list and cursor (C4), the object
//! lifecycle it drives (C5), the file lifecycle it drives (C6), and the operations that
//! coordinate them (C7).

mod file;
mod object;
mod ops;
mod state;

pub use file::{recovery_state, RecoveryState};
pub use ops::read_rebuild_tag;
pub use state::{mint_streamid, OpenKind, Stream, StreamKind, Whence};
