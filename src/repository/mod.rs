// src/repository/mod.rs

//! Remote genepool repositories
//!
//! The [`GeneRepository`] trait is the seam between the resolver and the
//! network. [`HttpGeneRepository`] implements it over the genepool HTTP API;
//! tests substitute in-memory repositories.

mod client;
mod http;
mod part;
pub mod wire;

pub use client::{GeneRepository, PartStream};
pub use http::{classify_status, HttpGeneRepository, DEFAULT_REQUEST_TIMEOUT};
pub use part::{download_part, PartDownloadOptions, DEFAULT_IDLE_TIMEOUT, DEFAULT_URL_EXPIRY_MARGIN};
