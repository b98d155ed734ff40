//! File I/O for photon tables.
//!
//! Tables are stored as FITS images, see [`fits`].

pub mod fits;

pub use fits::{CardValue, ImageHdu, read_fits, write_fits};
