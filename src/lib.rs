#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! upkwatch library: the watchdog's building blocks.
//!
//! - `trigger`: growth and periodic restart triggers (pure state machines)
//! - `escalator`: device reboot with a bounded retry budget
//! - `restart`: the stop / reboot / refresh / start routine
//! - `supervisor`: the one-second loop tying triggers to restarts
//! - `device`, `relay`, `service`, `measurement`: collaborator traits and
//!   their production bindings
//! - `config`, `descriptor`, `logging`: startup plumbing

pub mod clock;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod escalator;
pub mod exec;
pub mod logging;
pub mod measurement;
pub mod relay;
pub mod restart;
pub mod service;
pub mod snapshot;
pub mod supervisor;
pub mod trigger;

#[cfg(test)]
mod fakes;

pub use config::Config;
pub use supervisor::Supervisor;
