//! Request interception: network access and the fetch policy.

pub(crate) mod network;
mod policy;

pub use network::{HttpNetwork, Network};
pub use policy::{FetchPolicy, Interception, ResponseSource, Served};
