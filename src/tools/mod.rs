//! Wrappers around the external binaries the fetcher shells out to.

pub mod cookies;
pub mod ffmpeg;
pub mod process;
pub mod ytdlp;
