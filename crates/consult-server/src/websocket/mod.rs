//! Observer connections, registry, fan-out, liveness, and the socket session.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod registry;
pub mod session;
pub mod supervisor;
