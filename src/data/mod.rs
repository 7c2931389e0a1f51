//! Data layer for offline work: dataset types, loading, and filtering.
//!
//! Architecture:
//! ```text
//!  .parquet / .json / .csv
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  parse file → SpectralDataset
//!   └──────────┘
//!        │
//!        ▼
//!   ┌────────────────┐
//!   │ SpectralDataset │  Vec<SpectrumRecord>, column index
//!   └────────────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  filter   │  metadata predicates (e.g. split=reference) → record indices
//!   └──────────┘
//! ```
//!
//! The loader also parses the single-spectrum CSV files that are classified online.

pub mod filter;
pub mod loader;
pub mod model;
