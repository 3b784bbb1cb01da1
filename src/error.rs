//! Crate error types

use thiserror::Error;

use crate::math::Vec3d;

/// Fatal geometry problem. Any of these means the input can't be compiled.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// Winding grew over the point limit
    #[error("winding has {count} points, limit is {limit}")]
    WindingOverflow {
        count: usize,
        limit: usize,
    },

    #[error("winding has only {0} points")]
    TooFewPoints(usize),

    /// Coordinate magnitude reached world extent
    #[error("point {point:?} is outside of world extent {extent}")]
    OutOfRange {
        point: Vec3d,
        extent: f64,
    },

    #[error("winding point is {0} units off its plane")]
    PointOffPlane(f64),

    #[error("winding has a degenerate edge at point {0}")]
    DegenerateEdge(usize),

    #[error("winding is not convex at point {0}")]
    NonConvex(usize),

    /// Brush lost its sides during loading
    #[error("brush {brush} has {sides} valid sides, at least 3 required")]
    DegenerateBrush {
        brush: usize,
        sides: usize,
    },

    #[error("invalid plane normal {0:?}")]
    InvalidNormal(Vec3d),

    /// Split plane selection produced a plane some ancestor already split with
    #[error("plane {0} was already used by an ancestor node")]
    PlaneReused(usize),

    #[error("tree depth limit {0} exceeded")]
    TreeTooDeep(usize),
}

/// Any error this crate produces
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("portal file: {0}")]
    Prt(#[from] crate::prt::PrtError),

    #[error("vis state: {0}")]
    State(#[from] crate::vis::state::StateError),

    #[error("map: {0}")]
    Map(#[from] crate::map::q1::MapParseError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
