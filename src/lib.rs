//! Downloads videos and subtitles from arbitrary pages through yt-dlp, with
//! local manifest extraction for MissAV pages.

pub mod api;
pub mod classify;
pub mod config;
pub mod delegate;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod missav;
pub mod progress;
pub mod scratch;
pub mod subtitles;
