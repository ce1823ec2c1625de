//! Pipeline stages for making an HTML document self-contained.
//!
//! Each submodule implements exactly one step and is independently
//! testable. None of them touch the network or shared state; the only I/O is
//! the bounded file read in [`resolve`].
//!
//! ## Data Flow
//!
//! ```text
//!                 ┌── decode ◀── sniff     (caller-supplied images)
//! html ──▶ rewrite┤
//!                 └── resolve ──▶ sniff    (local files under the base dir)
//! ```
//!
//! 1. [`sniff`]:   media type from magic bytes or file extension
//! 2. [`decode`]:  turn an ambiguous [`decode::ImageValue`] into bytes
//! 3. [`resolve`]: read a local file, confined to a [`resolve::TrustedBaseDir`]
//! 4. [`rewrite`]: swap image references for `data:` URLs

pub mod decode;
pub mod resolve;
pub mod rewrite;
pub mod sniff;
