//! Upstream provider adapters

pub mod kobold;

pub use kobold::KoboldBackend;
