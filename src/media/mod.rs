//! Simulated collaborators of the transfer engines:
//!
//! ```text
//! Producer ──► PacketStorage ──► EsStream (audio) ──┐
//!     │                      └─► EsStream (video) ──┴─► SimulatedSink
//!     └─ XorDecryptor::encrypt            ▲
//!                                         └─ XorDecryptor::decrypt
//! ```

pub mod drm;
pub mod playback;
pub mod producer;
pub mod sink;
