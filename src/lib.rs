///! Brush BSP, portal and visibility compiler core

// Pipeline:
// MAP -> brushes -> BSP tree -> portals -> outside fill -> PRT -> vis -> PVS rows
//
// MAP - Quake map text, entities with brushes
// PRT - portal file, leaf adjacency graph for vis
// PVS - potentially visible set, one compressed row per cluster

/// Basic math utility
pub mod math;

/// Basic geometry
pub mod geom;

/// Convex polygon
pub mod winding;

/// Brush and leaf contents
pub mod contents;

/// Compile settings
pub mod config;

/// Errors
pub mod error;

/// Per-stage statistics
pub mod stats;

/// BSP tree building, portals and outside fill
pub mod bsp;

/// Portal file format
pub mod prt;

/// Potentially visible set solver
pub mod vis;

/// Map format implementation
pub mod map;

pub use error::{Error, GeometryError, Result};
