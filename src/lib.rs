//! Web archive screenshot collector library.
//!
//! A worker that discovers Wayback Machine snapshots of a set of URLs,
//! replays each selected snapshot in a headless browser, and captures a
//! time-ordered series of screenshots per URL. Partial results (missing
//! snapshots, slow replays, crashed browser sessions) are recorded rather
//! than aborting the run, and an interrupted run resumes where it stopped.

pub mod archiver;
pub mod config;
pub mod constants;
pub mod progress;
pub mod recorder;
pub mod selection;
pub mod wayback;
