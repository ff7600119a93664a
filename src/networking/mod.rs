//! Connectivity between topology nodes, expressed as NetworkPolicies

mod manager;
pub mod policies;

pub use manager::ConnectivityManager;
