//! Photon detection probability tables.
//!
//! A table pairs a 4-D histogram (`values` plus the accumulated squared
//! weights used as a variance estimate) with its bin edges and a metadata
//! header.

pub mod binning;
pub mod error;
pub mod header;
#[allow(clippy::module_inception)]
pub mod table;

pub use binning::{Axis, BinEdges, BinIndex, NUM_DIMS};
pub use error::{Operand, TableError};
pub use header::{Efficiency, Geometry, Header, HeaderValue, Parity};
pub use table::PhotoTable;
