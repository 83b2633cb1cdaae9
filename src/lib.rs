pub mod ensemble;
pub mod error;
pub mod output;
pub mod structure;
pub mod trajectory;

#[cfg(feature = "python")]
pub mod python_bindings;

// Re-export commonly used types and functions
pub use ensemble::{average_structure, extract_coords, svd, EnsembleSvd, SvdEngine};
pub use error::EnsembleError;
pub use output::{
    read_matrix_csv, read_singular_values_csv, write_matrix_csv, write_singular_values_csv,
    write_structure_pdb, SingularValueRow,
};
pub use structure::{Atom, Coordinate, Structure};
pub use trajectory::{AtomFilter, Frame, MemoryTrajectory, PdbTrajectory, ReadOptions, Trajectory};
