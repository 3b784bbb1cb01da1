//! Portal file text format.
//!
//! Three flavours are understood:
//! * `PRT1` - leaf count, portal count, portals between leaves
//! * `PRT2` - leaf count, cluster count, portal count, portals between
//!   clusters, then leaf lists of every cluster, each closed by `-1`
//! * `PRT1-AM` - cluster count, portal count, leaf count, portals between
//!   clusters, then cluster number of every leaf

use std::fmt::{self, Display, Write as _};

use thiserror::Error;

use crate::{math::Vec3d, winding::Winding};

/// Point limit of portal windings in portal files
pub const PRT_MAX_WINDING: usize = 64;

/// Coordinates closer than this to an integer are written as integers
const ZERO_EPSILON: f64 = 0.0001;

/// Portal file parsing error
#[derive(Debug, Error)]
pub enum PrtError {
    #[error("unknown header \"{0}\"")]
    UnknownHeader(String),

    #[error("unexpected end of file while reading {0}")]
    UnexpectedEnd(&'static str),

    #[error("invalid number \"{0}\"")]
    InvalidNumber(String),

    #[error("expected \"{expected}\", got \"{got}\"")]
    UnexpectedToken {
        expected: &'static str,
        got: String,
    },

    #[error("portal {portal} has {count} points, limit is {PRT_MAX_WINDING}")]
    TooManyPoints {
        portal: usize,
        count: usize,
    },

    #[error("portal {portal} references leaf {leaf}, only {count} exist")]
    LeafOutOfRange {
        portal: usize,
        leaf: usize,
        count: usize,
    },

    #[error("portal {0} winding is degenerate")]
    DegeneratePortal(usize),

    #[error("invalid leaf {leaf} in cluster map, {count} leaves exist")]
    InvalidClusterLeaf {
        leaf: i64,
        count: usize,
    },

    #[error("leaf {0} is missing from cluster map")]
    UnmappedLeaf(usize),

    #[error("invalid cluster {cluster} in cluster map, {count} clusters exist")]
    InvalidCluster {
        cluster: i64,
        count: usize,
    },
}

/// Portal file flavour
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrtFormat {
    Prt1,
    Prt2,
    Prt1Am,
}

impl PrtFormat {
    fn header(self) -> &'static str {
        match self {
            Self::Prt1 => "PRT1",
            Self::Prt2 => "PRT2",
            Self::Prt1Am => "PRT1-AM",
        }
    }
}

/// Portal between two vis units
#[derive(Clone, Debug, PartialEq)]
pub struct PrtPortal {
    /// Front and back cluster. Winding normal points from `clusters[1]` to `clusters[0]`.
    pub clusters: [usize; 2],
    pub winding: Winding,
}

/// Portal file contents
#[derive(Clone, Debug, PartialEq)]
pub struct PrtFile {
    pub format: PrtFormat,

    /// Vis units portals connect. Equals `num_leafs` if the map has no detail clusters.
    pub num_clusters: usize,

    /// Real (non-solid) leaves
    pub num_leafs: usize,

    pub portals: Vec<PrtPortal>,

    /// Cluster of every leaf
    pub leaf_clusters: Vec<usize>,
}

/// Write coordinate, integers without fraction
fn write_float(f: &mut impl fmt::Write, value: f64) -> fmt::Result {
    let rounded = value.round();

    if (value - rounded).abs() < ZERO_EPSILON {
        write!(f, "{} ", rounded as i64)
    } else {
        write!(f, "{} ", value)
    }
}

impl Display for PrtFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.format.header())?;

        match self.format {
            PrtFormat::Prt1 => {
                writeln!(f, "{}", self.num_clusters)?;
                writeln!(f, "{}", self.portals.len())?;
            }
            PrtFormat::Prt2 => {
                writeln!(f, "{}", self.num_leafs)?;
                writeln!(f, "{}", self.num_clusters)?;
                writeln!(f, "{}", self.portals.len())?;
            }
            PrtFormat::Prt1Am => {
                writeln!(f, "{}", self.num_clusters)?;
                writeln!(f, "{}", self.portals.len())?;
                writeln!(f, "{}", self.num_leafs)?;
            }
        }

        let mut line = String::new();
        for portal in &self.portals {
            line.clear();
            write!(line, "{} {} {} ", portal.winding.len(), portal.clusters[0], portal.clusters[1])?;

            for point in portal.winding.iter() {
                line.push('(');
                write_float(&mut line, point.x)?;
                write_float(&mut line, point.y)?;
                write_float(&mut line, point.z)?;
                line.push_str(") ");
            }
            writeln!(f, "{line}")?;
        }

        match self.format {
            PrtFormat::Prt1 => {}
            PrtFormat::Prt2 => {
                for cluster in 0..self.num_clusters {
                    for (leaf, _) in self.leaf_clusters.iter().enumerate().filter(|(_, c)| **c == cluster) {
                        write!(f, "{leaf} ")?;
                    }
                    writeln!(f, "-1")?;
                }
            }
            PrtFormat::Prt1Am => {
                for cluster in &self.leaf_clusters {
                    writeln!(f, "{cluster}")?;
                }
            }
        }

        Ok(())
    }
}

/// Whitespace separated tokens, parentheses are tokens on their own
struct Tokens<'t> {
    rest: &'t str,
}

impl<'t> Tokens<'t> {
    fn new(text: &'t str) -> Self {
        Self { rest: text }
    }

    fn next_token(&mut self) -> Option<&'t str> {
        self.rest = self.rest.trim_start();

        let first = self.rest.chars().next()?;
        let len = if first == '(' || first == ')' {
            1
        } else {
            self.rest
                .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
                .unwrap_or(self.rest.len())
        };

        let (token, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(token)
    }

    fn expect(&mut self, expected: &'static str, what: &'static str) -> Result<(), PrtError> {
        let token = self.next_token().ok_or(PrtError::UnexpectedEnd(what))?;
        if token != expected {
            return Err(PrtError::UnexpectedToken { expected, got: token.to_string() });
        }
        Ok(())
    }

    fn number<T: std::str::FromStr>(&mut self, what: &'static str) -> Result<T, PrtError> {
        let token = self.next_token().ok_or(PrtError::UnexpectedEnd(what))?;
        token.parse::<T>().map_err(|_| PrtError::InvalidNumber(token.to_string()))
    }

    fn try_number<T: std::str::FromStr>(&mut self) -> Result<Option<T>, PrtError> {
        match self.next_token() {
            None => Ok(None),
            Some(token) => token.parse::<T>().map(Some).map_err(|_| PrtError::InvalidNumber(token.to_string())),
        }
    }
}

impl PrtFile {
    /// Parse portal file text
    pub fn parse(text: &str) -> Result<Self, PrtError> {
        let (header, body) = text.split_once('\n').unwrap_or((text, ""));

        let format = match header.trim() {
            "PRT1" => PrtFormat::Prt1,
            "PRT2" => PrtFormat::Prt2,
            "PRT1-AM" => PrtFormat::Prt1Am,
            other => return Err(PrtError::UnknownHeader(other.to_string())),
        };

        let mut tokens = Tokens::new(body);

        let (num_clusters, num_leafs, num_portals) = match format {
            PrtFormat::Prt1 => {
                let clusters = tokens.number("header")?;
                let portals = tokens.number("header")?;
                (clusters, clusters, portals)
            }
            PrtFormat::Prt2 => {
                let leafs = tokens.number("header")?;
                let clusters = tokens.number("header")?;
                let portals = tokens.number("header")?;
                (clusters, leafs, portals)
            }
            PrtFormat::Prt1Am => {
                let clusters = tokens.number("header")?;
                let portals = tokens.number("header")?;
                let leafs = tokens.number("header")?;
                (clusters, leafs, portals)
            }
        };

        let mut portals = Vec::with_capacity(num_portals);

        for index in 0..num_portals {
            let num_points: usize = tokens.number("portal")?;
            let clusters: [usize; 2] = [tokens.number("portal")?, tokens.number("portal")?];

            if num_points > PRT_MAX_WINDING {
                return Err(PrtError::TooManyPoints { portal: index, count: num_points });
            }
            if let Some(leaf) = clusters.iter().copied().find(|c| *c >= num_clusters) {
                return Err(PrtError::LeafOutOfRange { portal: index, leaf, count: num_clusters });
            }

            let mut points = Vec::with_capacity(num_points);
            for _ in 0..num_points {
                tokens.expect("(", "portal point")?;
                let x = tokens.number("portal point")?;
                let y = tokens.number("portal point")?;
                let z = tokens.number("portal point")?;
                tokens.expect(")", "portal point")?;

                points.push(Vec3d::new(x, y, z));
            }

            portals.push(PrtPortal { clusters, winding: Winding::new(points) });
        }

        let leaf_clusters = match format {
            PrtFormat::Prt1 => (0..num_leafs).collect(),
            PrtFormat::Prt2 => {
                let mut leaf_clusters = vec![None; num_leafs];

                for cluster in 0..num_clusters {
                    loop {
                        let leaf: i64 = tokens.try_number()?.ok_or(PrtError::UnexpectedEnd("cluster map"))?;
                        if leaf < 0 {
                            break;
                        }
                        if leaf as usize >= num_leafs {
                            return Err(PrtError::InvalidClusterLeaf { leaf, count: num_leafs });
                        }
                        leaf_clusters[leaf as usize] = Some(cluster);
                    }
                }

                leaf_clusters
                    .into_iter()
                    .enumerate()
                    .map(|(leaf, cluster)| cluster.ok_or(PrtError::UnmappedLeaf(leaf)))
                    .collect::<Result<Vec<_>, _>>()?
            }
            PrtFormat::Prt1Am => {
                let mut leaf_clusters = Vec::with_capacity(num_leafs);

                for _ in 0..num_leafs {
                    let cluster: i64 = tokens.number("cluster map")?;
                    if cluster < 0 || cluster as usize >= num_clusters {
                        return Err(PrtError::InvalidCluster { cluster, count: num_clusters });
                    }
                    leaf_clusters.push(cluster as usize);
                }

                leaf_clusters
            }
        };

        Ok(Self { format, num_clusters, num_leafs, portals, leaf_clusters })
    }

    /// Load portal file from disk
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text)?)
    }

    /// Write portal file to disk
    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        std::fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Check if map has clusters made of several leaves
    pub fn uses_clusters(&self) -> bool {
        self.num_clusters != self.num_leafs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64) -> Winding {
        Winding::new(vec![
            Vec3d::new(x, 0.0, 0.0),
            Vec3d::new(x, 16.0, 0.0),
            Vec3d::new(x, 16.0, 16.5),
            Vec3d::new(x, 0.0, 16.5),
        ])
    }

    #[test]
    fn prt1_text_layout() {
        let file = PrtFile {
            format: PrtFormat::Prt1,
            num_clusters: 2,
            num_leafs: 2,
            portals: vec![PrtPortal { clusters: [0, 1], winding: square(8.0) }],
            leaf_clusters: vec![0, 1],
        };

        let text = file.to_string();
        assert_eq!(text, "PRT1\n2\n1\n4 0 1 (8 0 0 ) (8 16 0 ) (8 16 16.5 ) (8 0 16.5 ) \n");
        assert_eq!(PrtFile::parse(&text).unwrap(), file);
    }

    #[test]
    fn prt2_cluster_map() {
        let file = PrtFile {
            format: PrtFormat::Prt2,
            num_clusters: 2,
            num_leafs: 3,
            portals: vec![PrtPortal { clusters: [1, 0], winding: square(-4.0) }],
            leaf_clusters: vec![0, 0, 1],
        };

        let text = file.to_string();
        assert!(text.starts_with("PRT2\n3\n2\n1\n"));
        assert!(text.ends_with("0 1 -1\n2 -1\n"));

        let parsed = PrtFile::parse(&text).unwrap();
        assert_eq!(parsed, file);
        assert!(parsed.uses_clusters());
    }

    #[test]
    fn prt1_am_cluster_map() {
        let text = "PRT1-AM\n2\n0\n3\n0\n1\n1\n";
        let file = PrtFile::parse(text).unwrap();

        assert_eq!(file.format, PrtFormat::Prt1Am);
        assert_eq!(file.leaf_clusters, vec![0, 1, 1]);
        assert_eq!(file.to_string(), text);
    }

    #[test]
    fn malformed_files() {
        assert!(matches!(PrtFile::parse("PRT9\n1\n0\n"), Err(PrtError::UnknownHeader(_))));
        assert!(matches!(PrtFile::parse("PRT1\n1\n1\n3 0 4 (0 0 0) (1 0 0) (1 1 0)\n"), Err(PrtError::LeafOutOfRange { .. })));
        assert!(matches!(PrtFile::parse("PRT1\n2\n1\n3 0 1 (0 0 0) (1 0 0)\n"), Err(PrtError::UnexpectedEnd(_))));
        assert!(matches!(PrtFile::parse("PRT1\n2\nx\n"), Err(PrtError::InvalidNumber(_))));
    }

    #[test]
    fn prt2_leaf_without_cluster() {
        assert!(matches!(PrtFile::parse("PRT2\n3\n2\n0\n0 -1\n2 -1\n"), Err(PrtError::UnmappedLeaf(1))));
        assert!(PrtFile::parse("PRT2\n3\n2\n0\n0 1 -1\n2 -1\n").is_ok());
    }
}
