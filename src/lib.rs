pub mod geom;
pub mod io;
pub mod sim;
pub mod table;
pub mod vecutils;

// Prelude
pub use geom::point::Point;
pub use geom::vector::Vector;
pub use sim::photon::{PhotonPath, Source};
pub use sim::tabulator::{Tabulator, TabulatorConfig};
pub use table::{BinEdges, Header, PhotoTable, TableError};
