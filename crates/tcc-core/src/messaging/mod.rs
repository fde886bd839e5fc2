//! Outbound bot messaging: the port and its rate-limiting decorator.

pub mod port;
pub mod throttled;
