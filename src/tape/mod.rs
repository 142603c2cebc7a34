//! Fingerprint and tape store: deterministic record & replay.
//!
//! Requests are normalized into [`fingerprint::RequestFingerprint`]s; the
//! [`recorder::TapeRecorder`] snapshots responses and chaos context against
//! those fingerprints, and the [`player::TapePlayer`] serves them back FIFO
//! in playback mode with no upstream traffic.

pub mod crypto;
pub mod fingerprint;
pub mod model;
pub mod player;
pub mod recorder;

pub use fingerprint::{Normalization, RequestFingerprint};
pub use model::{ChaosContext, ResponseSnapshot, Tape, TapeEntry};
pub use player::TapePlayer;
pub use recorder::TapeRecorder;
