// src/identity/mod.rs

//! Gene and geneset identity
//!
//! Pure value types with validation; nothing in here performs I/O.

mod architecture;
mod gene;
mod geneset;

pub use architecture::{Architecture, ANY};
pub use gene::{GeneIdentifier, GeneKind, UniqueGeneIdentifier, CATLET_GENE_NAME};
pub use geneset::{GeneSetIdentifier, DEFAULT_TAG};
