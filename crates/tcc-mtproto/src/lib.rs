//! MTProto user-account adapter.
//!
//! Implements the login and channel transport ports from `tcc-core` on top of
//! `layer-client`.

pub mod errors;
pub mod login;
pub mod transport;

pub use login::{MtprotoConnector, MtprotoLogin};
pub use transport::MtprotoTransport;
