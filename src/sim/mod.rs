pub mod acceptance;
pub mod photon;
pub mod residual;
pub mod tabulator;
