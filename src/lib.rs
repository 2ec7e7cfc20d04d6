pub mod audit;
pub mod cli;
pub mod config;
pub mod counter;
pub mod crypto;
pub mod derive;
pub mod engine;
pub mod errors;
pub mod keystore;
pub mod ksn;

pub use engine::{DerivationEngine, DeriveRequest, DeriveResponse};
pub use errors::{DeriveStatus, DukptError, Result};
