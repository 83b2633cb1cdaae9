use thiserror::Error;

/// Errors produced while reading trajectories or computing ensemble statistics
#[derive(Error, Debug)]
pub enum EnsembleError {
    /// Trajectory has no frames, or its frames have no atoms
    #[error("Empty trajectory: {frames} frames, {atoms} atoms")]
    EmptyTrajectory { frames: usize, atoms: usize },

    /// A frame's atom count differs from the first/current frame
    #[error("Frame {frame} has {found} atoms, expected {expected}")]
    AtomCountMismatch {
        frame: usize,
        expected: usize,
        found: usize,
    },

    /// NaN or infinite coordinate found before decomposition
    #[error("Non-finite coordinate in frame {frame}, atom {atom}")]
    NonFinite { frame: usize, atom: usize },

    /// Finite input whose per-atom average (or centered value) is not finite
    #[error("Coordinate average overflowed for atom {atom}")]
    Overflow { atom: usize },

    /// Singular value decomposition did not converge
    #[error("SVD failed to converge (max iterations: {max_iterations})")]
    NoConvergence { max_iterations: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Parse error with location information (1-based line)
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl EnsembleError {
    /// True for failures of the numeric stage (bad input values or no convergence)
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            EnsembleError::NonFinite { .. }
                | EnsembleError::Overflow { .. }
                | EnsembleError::NoConvergence { .. }
        )
    }
}
