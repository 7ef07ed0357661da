//! Endpoint Pool
//!
//! Every chain call goes through an `EndpointPool`, which owns the ordered
//! endpoint list of one network, rotates on connection-class failures and
//! persists per-endpoint outcomes so the next run starts from the endpoint
//! that worked last.
//!
//! - `connector`: how a session is opened for one URL (alloy providers in
//!   production, scripted sessions in tests)
//! - `pool`: rotation, backoff, exhaustion and `acquire_fresh_session`
//!
//! Author: AI-Generated
//! Created: 2026-10-16

pub mod connector;
pub mod pool;

pub use connector::{AlloyConnector, Connector};
pub use pool::{EndpointPool, WireValue};
