use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use nalgebra::DMatrix;

use crate::error::EnsembleError;
use crate::structure::{Atom, Coordinate, Structure};

/// One conformation: the atoms of a single model/time step
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub model: i32,
    atoms: Vec<Atom>,
}

impl Frame {
    pub fn new(model: i32, atoms: Vec<Atom>) -> Self {
        Self { model, atoms }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Coordinates as an (atom count x 3) matrix, one atom per row
    pub fn get_coords(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.atoms.len(), 3, |atom, axis| {
            self.atoms[atom].coords().as_array()[axis]
        })
    }

    /// Independent snapshot of this frame
    pub fn copy(&self) -> Structure {
        Structure::new(self.atoms.clone())
    }
}

/// Capabilities the ensemble routines need from a trajectory.
///
/// Iteration is restartable: [`Trajectory::rewind`] resets the cursor so the
/// next call to [`Trajectory::next_frame`] yields frame 0 again.
pub trait Trajectory {
    /// Number of frames in the trajectory
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame under the iteration cursor
    ///
    /// # Returns
    /// The frame most recently returned by `next_frame`, or frame 0 before any
    /// iteration (and after `rewind`). `None` only for an empty trajectory.
    fn current_frame(&self) -> Option<&Frame>;

    /// Random access by index, independent of the iteration cursor
    ///
    /// # Arguments
    /// * `index` - Frame position, `0 <= index < len()`
    ///
    /// # Returns
    /// The frame at `index`, or `None` when out of range
    fn frame(&self, index: usize) -> Option<&Frame>;

    /// Reset the iteration cursor to the first frame
    fn rewind(&mut self);

    /// Advance the cursor and return the next frame in index order
    ///
    /// # Returns
    /// Each frame exactly once per pass, then `None` until `rewind` is called
    fn next_frame(&mut self) -> Option<&Frame>;
}

/// Trajectory held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTrajectory {
    frames: Vec<Frame>,
    cursor: usize,
    current: usize,
}

impl MemoryTrajectory {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            cursor: 0,
            current: 0,
        }
    }
}

impl Trajectory for MemoryTrajectory {
    fn len(&self) -> usize {
        self.frames.len()
    }

    fn current_frame(&self) -> Option<&Frame> {
        self.frames.get(self.current)
    }

    fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.current = 0;
    }

    fn next_frame(&mut self) -> Option<&Frame> {
        if self.cursor >= self.frames.len() {
            return None;
        }
        self.current = self.cursor;
        self.cursor += 1;
        self.frames.get(self.current)
    }
}

/// Which atoms of each model end up in a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AtomFilter {
    #[default]
    All,
    /// Keep atoms whose name matches one of these (e.g. "CA")
    Names(Vec<String>),
}

impl AtomFilter {
    /// Parse a comma-separated list of atom names; empty input means all atoms
    pub fn from_names(list: &str) -> Self {
        let names: Vec<String> = list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            AtomFilter::All
        } else {
            AtomFilter::Names(names)
        }
    }

    pub fn matches(&self, atom_name: &str) -> bool {
        match self {
            AtomFilter::All => true,
            AtomFilter::Names(names) => names.iter().any(|n| n == atom_name),
        }
    }
}

/// Options controlling how a trajectory file is loaded
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Maximum number of frames to read (None for all frames)
    pub max_frames: Option<usize>,
    pub atoms: AtomFilter,
}

/// Multi-model PDB trajectory file
pub struct PdbTrajectory {
    file_path: PathBuf,
}

impl PdbTrajectory {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    /// Load every (selected) frame of the file into memory
    pub fn read(&self, options: &ReadOptions) -> Result<MemoryTrajectory, EnsembleError> {
        let file = File::open(&self.file_path)?;
        debug!("Reading PDB trajectory {}", self.file_path.display());
        parse_pdb(BufReader::new(file), options)
    }
}

/// Parse MODEL/ENDMDL blocks from any buffered reader.
///
/// A file without MODEL records is read as a single frame.
pub fn parse_pdb<R: BufRead>(reader: R, options: &ReadOptions) -> Result<MemoryTrajectory, EnsembleError> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} frames read") {
        pb.set_style(style);
    }

    let mut frames: Vec<Frame> = Vec::new();
    let mut current_model: Option<i32> = None;
    let mut atoms: Vec<Atom> = Vec::new();
    let mut model_found = false;
    let limit_reached = |frames: &Vec<Frame>| options.max_frames.is_some_and(|max| frames.len() >= max);

    for (idx, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line_no = idx + 1;

        if line.starts_with("MODEL") {
            model_found = true;

            // MODEL without a preceding ENDMDL closes the previous model
            if let Some(model) = current_model.take() {
                frames.push(Frame::new(model, std::mem::take(&mut atoms)));
                pb.inc(1);
            }
            if limit_reached(&frames) {
                break;
            }

            let model = line
                .split_whitespace()
                .nth(1)
                .map(|s| s.parse::<i32>())
                .unwrap_or(Ok(frames.len() as i32 + 1))
                .map_err(|e| EnsembleError::Parse {
                    line: line_no,
                    message: format!("Invalid MODEL number: {}", e),
                })?;
            current_model = Some(model);
            atoms.clear();
        } else if line.starts_with("ATOM") || line.starts_with("HETATM") {
            let atom = parse_atom_record(&line, line_no)?;
            if options.atoms.matches(&atom.name) {
                atoms.push(atom);
            }
        } else if line.starts_with("ENDMDL") {
            if let Some(model) = current_model.take() {
                frames.push(Frame::new(model, std::mem::take(&mut atoms)));
                pb.inc(1);
            }
            if limit_reached(&frames) {
                break;
            }
        }
    }

    if !limit_reached(&frames) {
        if let Some(model) = current_model {
            if !atoms.is_empty() {
                frames.push(Frame::new(model, atoms));
            }
        } else if !model_found && !atoms.is_empty() {
            frames.push(Frame::new(1, atoms));
        }
    }

    pb.finish_and_clear();
    debug!("Read {} frames", frames.len());
    Ok(MemoryTrajectory::new(frames))
}

/// Parse one ATOM/HETATM record using the fixed PDB columns
fn parse_atom_record(line: &str, line_no: usize) -> Result<Atom, EnsembleError> {
    if line.len() < 54 {
        return Err(EnsembleError::Parse {
            line: line_no,
            message: "Truncated atom record".to_string(),
        });
    }

    let field = |start: usize, end: usize| line.get(start..end.min(line.len())).unwrap_or("").trim();
    let coord = |start: usize, end: usize, axis: &str| {
        field(start, end).parse::<f64>().map_err(|e| EnsembleError::Parse {
            line: line_no,
            message: format!("Invalid {} coordinate '{}': {}", axis, field(start, end), e),
        })
    };

    let x = coord(30, 38, "x")?;
    let y = coord(38, 46, "y")?;
    let z = coord(46, 54, "z")?;

    let serial = field(6, 11).parse::<i32>().unwrap_or(0);
    let residue_number = field(22, 26).parse::<i32>().unwrap_or(0);
    let chain = line.get(21..22).and_then(|s| s.chars().next()).unwrap_or(' ');

    let mut atom = Atom::new(serial, field(12, 16), Coordinate::new(x, y, z))
        .with_residue(field(17, 20), residue_number, chain);
    atom.hetero = line.starts_with("HETATM");
    Ok(atom)
}
