//! Workspace facade crate.
//!
//! Re-exports the workspace crates behind feature flags so host applications
//! can depend on `pcm-stream-workspace` alone:
//!
//! - `decode`: the streaming PCM decode driver (`core-decode`)
//! - `mpeg-engine`: the symphonia-backed MPEG audio engine
//! - `runtime`: logging infrastructure (`core-runtime`)

#[cfg(feature = "decode")]
pub use core_decode as decode;

#[cfg(feature = "runtime")]
pub use core_runtime as runtime;
