//! The wire-level RPC surface: the error taxonomy (§7) and the
//! `#[tarpc::service]` definition for the five coordination operations
//! (§4.5/§6). Grounded on `common/src/rpc/{error,control/agent}.rs`'s
//! split of "one small enum per failure family" plus a single
//! `#[tarpc::service] trait ...Service`.

pub mod error;
pub mod service;

pub use error::*;
pub use service::*;
