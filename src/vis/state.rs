//! Vis progress checkpoint file.
//!
//! Layout, little endian: `StateHeader`, then for every portal a
//! `PortalRecord` followed by compressed mightsee and visbits strings.

use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use bytemuck::{AnyBitPattern, NoUninit, Zeroable};
use thiserror::Error;

use super::{leafbits::LeafBits, PortalGraph, PortalState, PortalStatus};

/// State file version tag
pub const VIS_STATE_VERSION: u32 = u32::from_be_bytes(*b"TYR1");

macro_rules! bin_format {
    ($name: ident) => {
        unsafe impl Zeroable for $name {}
        unsafe impl AnyBitPattern for $name {}
        unsafe impl NoUninit for $name {}
    };

    ($head: ident, $($tail: ident),* $(,)?) => {
        bin_format!($head);

        bin_format!($($tail),*);
    };
}

/// File header
#[repr(C, packed)]
#[derive(Copy, Clone, Debug)]
pub struct StateHeader {
    pub version: u32,
    pub numportals: u32,
    pub numleafs: u32,
    pub testlevel: u32,

    /// Seconds spent on vis so far
    pub time_elapsed: u32,
}

/// Per portal record
#[repr(C, packed)]
#[derive(Copy, Clone, Debug)]
pub struct PortalRecord {
    pub status: u32,

    /// Length of compressed mightsee
    pub might: u32,

    /// Length of compressed visbits, zero unless portal is done
    pub vis: u32,
    pub nummightsee: u32,
    pub numcansee: u32,
}

bin_format!(StateHeader, PortalRecord);

impl StateHeader {
    fn to_le(self) -> Self {
        Self {
            version: self.version.to_le(),
            numportals: self.numportals.to_le(),
            numleafs: self.numleafs.to_le(),
            testlevel: self.testlevel.to_le(),
            time_elapsed: self.time_elapsed.to_le(),
        }
    }

    fn from_le(self) -> Self {
        self.to_le()
    }
}

impl PortalRecord {
    fn to_le(self) -> Self {
        Self {
            status: self.status.to_le(),
            might: self.might.to_le(),
            vis: self.vis.to_le(),
            nummightsee: self.nummightsee.to_le(),
            numcansee: self.numcansee.to_le(),
        }
    }

    fn from_le(self) -> Self {
        self.to_le()
    }
}

/// State file problem. Any of these discards the state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state version {found:#010x} does not match {expected:#010x}", expected = VIS_STATE_VERSION)]
    VersionMismatch {
        found: u32,
    },

    #[error("state has {portals} portals and {leafs} leafs, portal file has {expected_portals} and {expected_leafs}")]
    SizeMismatch {
        portals: u32,
        leafs: u32,
        expected_portals: usize,
        expected_leafs: usize,
    },

    #[error("invalid portal status {0}")]
    InvalidStatus(u32),

    #[error("compressed bits overflow")]
    Overflow,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Files used by vis checkpoints
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateFiles {
    /// Portal file the state was computed for
    pub portal: PathBuf,
    pub state: PathBuf,

    /// State being written, renamed to `state` when complete
    pub temp: PathBuf,
}

impl StateFiles {
    /// `.vis` and `.vi0` files next to the portal file
    pub fn for_portal_file(portal: &Path) -> Self {
        Self {
            portal: portal.to_path_buf(),
            state: portal.with_extension("vis"),
            temp: portal.with_extension("vi0"),
        }
    }
}

fn bytes_len(numleafs: usize) -> usize {
    (numleafs + 7) >> 3
}

/// Run-length compress 0x00 and 0xFF runs of the bit string. Returns the
/// raw string if compression doesn't make it shorter.
pub fn compress_bits(bits: &LeafBits) -> Vec<u8> {
    let numbytes = bits.byte_len();
    let mut out = Vec::with_capacity(numbytes);
    let mut i = 0;

    while i < numbytes && out.len() < numbytes {
        let value = bits.byte(i);
        out.push(value);
        i += 1;

        if value != 0 && value != 0xFF {
            continue;
        }

        let mut rep = 1;
        while i < numbytes && bits.byte(i) == value && rep < 255 {
            rep += 1;
            i += 1;
        }
        out.push(rep as u8);
    }

    if out.len() < numbytes {
        out
    } else {
        bits.to_bytes()
    }
}

/// Expand bit string written by `compress_bits`
pub fn decompress_bits(data: &[u8], numleafs: usize) -> Result<LeafBits, StateError> {
    let numbytes = bytes_len(numleafs);
    let mut bits = LeafBits::new(numleafs);

    if data.len() >= numbytes {
        for (i, value) in data.iter().take(numbytes).enumerate() {
            bits.or_byte(i, *value);
        }
        return Ok(bits);
    }

    let mut src = data.iter().copied();
    let mut i = 0;

    while i < numbytes {
        let value = src.next().ok_or(StateError::Overflow)?;
        bits.or_byte(i, value);
        i += 1;

        if value != 0 && value != 0xFF {
            continue;
        }

        let rep = src.next().ok_or(StateError::Overflow)? as usize;
        if rep == 0 || i - 1 + rep > numbytes {
            return Err(StateError::Overflow);
        }
        for _ in 1..rep {
            bits.or_byte(i, value);
            i += 1;
        }
    }

    Ok(bits)
}

/// Write state to the temporary file, then move it over the state file
pub fn save(files: &StateFiles, graph: &PortalGraph, level: u32, elapsed: Duration) -> Result<(), StateError> {
    let numleafs = graph.num_leafs();
    let mut out = Vec::new();

    let header = StateHeader {
        version: VIS_STATE_VERSION,
        numportals: graph.portals.len() as u32,
        numleafs: numleafs as u32,
        testlevel: level,
        time_elapsed: elapsed.as_secs() as u32,
    };
    out.extend_from_slice(bytemuck::bytes_of(&header.to_le()));

    for portal in &graph.portals {
        let state = portal.state.read();

        let might = compress_bits(&state.mightsee);
        let vis = if state.status == PortalStatus::Done { compress_bits(&state.visbits) } else { Vec::new() };

        let record = PortalRecord {
            status: state.status as u32,
            might: might.len() as u32,
            vis: vis.len() as u32,
            nummightsee: state.nummightsee as u32,
            numcansee: state.numcansee as u32,
        };
        out.extend_from_slice(bytemuck::bytes_of(&record.to_le()));
        out.extend_from_slice(&might);
        out.extend_from_slice(&vis);
    }

    fs::File::create(&files.temp)?.write_all(&out)?;

    match fs::remove_file(&files.state) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
        _ => {}
    }
    fs::rename(&files.temp, &files.state)?;

    Ok(())
}

fn read_record<T: AnyBitPattern>(input: &mut impl Read) -> io::Result<T> {
    let mut buffer = vec![0u8; std::mem::size_of::<T>()];
    input.read_exact(&mut buffer)?;
    Ok(bytemuck::pod_read_unaligned(&buffer))
}

fn read_bytes(input: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; len];
    input.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Parse state file into portal states and elapsed time
fn read_state(path: &Path, graph: &PortalGraph) -> Result<(Vec<PortalState>, Duration), StateError> {
    let mut input = io::BufReader::new(fs::File::open(path)?);
    let numleafs = graph.num_leafs();

    let header = read_record::<StateHeader>(&mut input)?.from_le();
    let version = header.version;
    if version != VIS_STATE_VERSION {
        return Err(StateError::VersionMismatch { found: version });
    }

    let (portals, leafs) = (header.numportals, header.numleafs);
    if portals as usize != graph.portals.len() || leafs as usize != numleafs {
        return Err(StateError::SizeMismatch {
            portals,
            leafs,
            expected_portals: graph.portals.len(),
            expected_leafs: numleafs,
        });
    }

    let mut states = Vec::with_capacity(graph.portals.len());

    for _ in 0..graph.portals.len() {
        let record = read_record::<PortalRecord>(&mut input)?.from_le();

        let status = PortalStatus::try_from(record.status).map_err(StateError::InvalidStatus)?;
        let mightsee = decompress_bits(&read_bytes(&mut input, record.might as usize)?, numleafs)?;
        let visbits = if record.vis > 0 {
            decompress_bits(&read_bytes(&mut input, record.vis as usize)?, numleafs)?
        } else {
            LeafBits::new(numleafs)
        };

        states.push(PortalState {
            // portals in progress are started again
            status: if status == PortalStatus::Working { PortalStatus::None } else { status },
            mightsee,
            visbits,
            nummightsee: record.nummightsee as usize,
            numcansee: record.numcansee as usize,
        });
    }

    Ok((states, Duration::from_secs(header.time_elapsed as u64)))
}

/// Restore portal states from the state file. Returns time spent by
/// earlier runs, None if there is no usable state.
pub fn load(files: &StateFiles, graph: &mut PortalGraph) -> Option<Duration> {
    if !files.state.exists() {
        // interrupted during save
        if !files.temp.exists() || fs::rename(&files.temp, &files.state).is_err() {
            return None;
        }
    }

    let modified = |path: &Path| fs::metadata(path).and_then(|m| m.modified()).ok();
    if let (Some(portal_time), Some(state_time)) = (modified(&files.portal), modified(&files.state)) {
        if portal_time > state_time {
            log::info!("state file is out of date, will be overwritten");
            return None;
        }
    }

    match read_state(&files.state, graph) {
        Ok((states, elapsed)) => {
            for (portal, state) in graph.portals.iter_mut().zip(states) {
                *portal.state.get_mut() = state;
            }
            Some(elapsed)
        }
        Err(err) => {
            log::warn!("discarding vis state {}: {err}", files.state.display());
            None
        }
    }
}

/// Remove the state file
pub fn clean(files: &StateFiles) -> io::Result<()> {
    match fs::remove_file(&files.state) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_runs() {
        let mut bits = LeafBits::new(64);
        for leaf in 8..40 {
            bits.set(leaf, true);
        }

        // 00 | ff ff ff ff | 00 00 00
        let compressed = compress_bits(&bits);
        assert_eq!(compressed, vec![0x00, 1, 0xFF, 4, 0x00, 3]);
        assert_eq!(decompress_bits(&compressed, 64).unwrap(), bits);
    }

    #[test]
    fn incompressible_bits_stay_raw() {
        let mut bits = LeafBits::new(24);
        for leaf in [0, 9, 17] {
            bits.set(leaf, true);
        }

        let compressed = compress_bits(&bits);
        assert_eq!(compressed, bits.to_bytes());
        assert_eq!(decompress_bits(&compressed, 24).unwrap(), bits);
    }

    #[test]
    fn bad_run_is_rejected() {
        assert!(matches!(decompress_bits(&[0x00, 9], 32), Err(StateError::Overflow)));
        assert!(matches!(decompress_bits(&[0xFF], 32), Err(StateError::Overflow)));
    }

    #[test]
    fn version_tag() {
        assert_eq!(VIS_STATE_VERSION, ('T' as u32) << 24 | ('Y' as u32) << 16 | ('R' as u32) << 8 | '1' as u32);
    }
}
