//! Networking: the link abstraction and RESP reply encoding.

pub mod link;
pub mod resp;

pub use link::Link;
