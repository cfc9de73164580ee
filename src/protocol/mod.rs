//! RakNet wire-protocol primitives, control packets, and related state.
//!
//! Constants, packet definitions, encoding helpers and connection state
//! shared by the session reliability engine and the transport layer.

pub mod ack;
pub mod constants;
pub mod packet;
pub mod reliability;
pub mod state;
pub mod types;
