//! Shared types for the veil oblivious round-coordination engine:
//! identifiers, the RPC error taxonomy, the coordination service's
//! `#[tarpc::service]` definition, and a small sled persistence helper.

pub mod db;
pub mod rpc;
pub mod state;
