//! Chessboard point detector for `videocal`.
//!
//! 1. ChESS corners from `chess-corners`, strength filtered.
//! 2. A 4-connected graph links corners whose bright diagonals are swapped
//!    and whose edge runs at 45 degrees to both diagonals.
//! 3. Each connected component gets BFS grid coordinates.
//! 4. The component covering exactly the configured `cols x rows` inner
//!    corners (in either orientation) becomes the detection.

mod corner;
mod detector;
mod draw;
mod geom;
mod gridgraph;
mod params;

pub use corner::Corner;
pub use detector::ChessboardPointDetector;
pub use draw::draw_chessboard_corners;
pub use gridgraph::{fit_to_board, GridGraph, GridNode, NeighborDirection, NodeNeighbor};
pub use params::{ChessboardParams, GridGraphParams};
