//! Home-automation hub endpoints served over the connection layer.

pub mod handler;

pub use handler::{device_event, HubHandler, HUB_PROTOCOL};
