pub mod calculator;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod energies;
pub mod error;
pub mod finalizer;
pub mod npy;
pub mod output;
pub mod sidecar;
pub mod store;
