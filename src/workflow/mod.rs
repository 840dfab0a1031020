//! Upload-submit-result workflow.
//!
//! `session` holds the state machine, `selection` turns user input into files and
//! previews, and `controller` drives both from UI commands and emits snapshots for
//! presentation layers.

mod controller;
pub(crate) mod selection;
pub(crate) mod session;

pub(crate) use controller::{run_controller, UiCommand};
