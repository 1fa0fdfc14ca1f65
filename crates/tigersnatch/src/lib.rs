//! Seat-opening notifier for waitlisted class sections.
//!
//! A [`schedule::NotifScheduler`] runs [`dispatch::CycleRunner`] cycles
//! inside notification windows. Each cycle asks the [`monitor::Monitor`] how
//! many seats opened, lets the [`notify::Throttle`] pick who to tell, and
//! sends email and SMS concurrently.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod schedule;
pub mod server;
pub mod source;
pub mod types;
