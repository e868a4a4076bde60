//! Citation inventory and verification tooling for LaTeX manuscripts.
//!
//! The library reads a BibTeX bibliography, a directory of source documents
//! and a LaTeX manuscript, records which sources back every citation group,
//! and can ask a language model whether cited claims are supported.

pub mod analysis;
pub mod config;
pub mod error;
pub mod inventory;
pub mod latex;
pub mod pipeline;
pub mod sources;
pub mod verification;

pub use config::Config;
pub use error::CiteError;
pub use pipeline::{fetch_url_sources, generate_inventory, run_analysis, run_verification};
