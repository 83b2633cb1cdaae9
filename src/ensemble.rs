//! Ensemble statistics over a trajectory: the mean structure, the flattened
//! coordinate matrix and an SVD of the mean-centered coordinates.
//!
//! The coordinate matrix is `3 * atoms` rows by `frames` columns. Column `j`
//! is frame `j`; atom `i` occupies rows `3i`, `3i + 1` and `3i + 2` (x, y, z).

use log::debug;
use nalgebra::{DMatrix, DVector, SVD};

use crate::error::EnsembleError;
use crate::structure::{Coordinate, Structure};
use crate::trajectory::Trajectory;

pub type Result<T> = std::result::Result<T, EnsembleError>;

/// Numeric settings for the decomposition, passed explicitly to [`svd`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvdEngine {
    /// Convergence tolerance of the bidiagonal iteration
    pub epsilon: f64,
    /// Iteration limit; 0 means no limit
    pub max_iterations: usize,
}

impl Default for SvdEngine {
    fn default() -> Self {
        Self {
            epsilon: f64::EPSILON,
            max_iterations: 0,
        }
    }
}

/// Result of [`svd`]: economy-size decomposition `A = U * diag(s) * V^T` of the
/// mean-centered coordinate matrix, plus the average structure.
#[derive(Debug, Clone)]
pub struct EnsembleSvd {
    /// Left singular vectors, `3 * atoms` x k
    pub u: DMatrix<f64>,
    /// Singular values, length k, non-increasing
    pub s: DVector<f64>,
    /// Right singular vectors as rows, k x frames
    pub v_t: DMatrix<f64>,
    pub average: Structure,
}

impl EnsembleSvd {
    /// Rebuild the mean-centered matrix from the factors
    pub fn reconstruct(&self) -> DMatrix<f64> {
        &self.u * DMatrix::from_diagonal(&self.s) * &self.v_t
    }

    /// Fraction of total variance carried by each mode
    pub fn explained_variance(&self) -> Vec<f64> {
        let total: f64 = self.s.iter().map(|v| v * v).sum();
        if total == 0.0 {
            return vec![0.0; self.s.len()];
        }
        self.s.iter().map(|v| v * v / total).collect()
    }

    /// Column `index` of U folded back into one displacement vector per atom
    pub fn mode(&self, index: usize) -> Option<Vec<Coordinate>> {
        if index >= self.u.ncols() {
            return None;
        }
        let column: Vec<f64> = self.u.column(index).iter().copied().collect();
        Some(
            column
                .chunks_exact(3)
                .map(|c| Coordinate::new(c[0], c[1], c[2]))
                .collect(),
        )
    }
}

/// Atom count of the current frame, failing on an empty trajectory
fn template_atom_count<T: Trajectory + ?Sized>(traj: &T) -> Result<usize> {
    let frames = traj.len();
    let atoms = traj.current_frame().map(|f| f.len()).unwrap_or(0);
    if frames == 0 || atoms == 0 {
        return Err(EnsembleError::EmptyTrajectory { frames, atoms });
    }
    Ok(atoms)
}

/// Mean structure over all frames.
///
/// Streams the frames (after rewinding the trajectory), so only one
/// `atoms x 3` accumulator is kept.
///
/// # Arguments
/// * `traj` - Trajectory to average; its cursor is rewound and then consumed
///
/// # Returns
/// A copy of the current frame (the last one read) with every atom moved to
/// its average position. Fails with `EmptyTrajectory` for zero frames or
/// atoms, `AtomCountMismatch` if a frame differs in size, `NonFinite` for NaN
/// or infinite input and `Overflow` if an average is not representable.
pub fn average_structure<T: Trajectory + ?Sized>(traj: &mut T) -> Result<Structure> {
    traj.rewind();
    let atoms = template_atom_count(&*traj)?;

    let mut sum = DMatrix::<f64>::zeros(atoms, 3);
    let mut frames = 0usize;
    while let Some(frame) = traj.next_frame() {
        if frame.len() != atoms {
            return Err(EnsembleError::AtomCountMismatch {
                frame: frames,
                expected: atoms,
                found: frame.len(),
            });
        }
        if let Some(atom) = frame.atoms().iter().position(|a| !a.coords().is_finite()) {
            return Err(EnsembleError::NonFinite { frame: frames, atom });
        }
        sum += frame.get_coords();
        frames += 1;
    }
    sum /= frames as f64;
    debug!("Averaged {} frames of {} atoms", frames, atoms);

    let averages: Vec<Coordinate> = (0..atoms)
        .map(|i| Coordinate::new(sum[(i, 0)], sum[(i, 1)], sum[(i, 2)]))
        .collect();
    if let Some(atom) = averages.iter().position(|c| !c.is_finite()) {
        return Err(EnsembleError::Overflow { atom });
    }

    let mut structure = match traj.current_frame() {
        Some(frame) => frame.copy(),
        None => return Err(EnsembleError::EmptyTrajectory { frames, atoms }),
    };
    for (i, coords) in averages.into_iter().enumerate() {
        structure[i].set_coords(coords);
    }
    Ok(structure)
}

/// Flatten every frame into one `3 * atoms` x `frames` matrix.
///
/// Frames are fetched by index, so the iteration cursor is left untouched.
///
/// # Arguments
/// * `traj` - Trajectory whose current frame fixes the atom count
///
/// # Returns
/// The coordinate matrix, column `j` holding frame `j` as x, y, z per atom.
/// Fails with `EmptyTrajectory` or `AtomCountMismatch`.
pub fn extract_coords<T: Trajectory + ?Sized>(traj: &T) -> Result<DMatrix<f64>> {
    let atoms = template_atom_count(traj)?;
    let m = atoms * 3;
    let n = traj.len();

    let mut matrix = DMatrix::<f64>::zeros(m, n);
    for j in 0..n {
        let frame = traj.frame(j).ok_or(EnsembleError::EmptyTrajectory { frames: j, atoms })?;
        if frame.len() != atoms {
            return Err(EnsembleError::AtomCountMismatch {
                frame: j,
                expected: atoms,
                found: frame.len(),
            });
        }
        let coords = frame.get_coords();
        for atom in 0..atoms {
            for axis in 0..3 {
                matrix[(3 * atom + axis, j)] = coords[(atom, axis)];
            }
        }
    }
    debug!("Extracted {}x{} coordinate matrix", m, n);
    Ok(matrix)
}

/// Per-row mean, summing columns in frame order before dividing
fn row_means(matrix: &DMatrix<f64>) -> DVector<f64> {
    let mut sum = DVector::<f64>::zeros(matrix.nrows());
    for column in matrix.column_iter() {
        sum += column;
    }
    sum /= matrix.ncols() as f64;
    sum
}

/// Index of the first atom in a flattened column with a non-finite coordinate
fn first_non_finite_atom<'a>(values: impl Iterator<Item = &'a f64>) -> Option<usize> {
    let values: Vec<f64> = values.copied().collect();
    values
        .chunks_exact(3)
        .position(|c| !Coordinate::new(c[0], c[1], c[2]).is_finite())
}

/// SVD of the mean-centered coordinate matrix.
///
/// The average structure comes from the same extracted matrix (the row means
/// before centering), not from a second pass over the frames. Every value is
/// checked before it reaches the decomposition.
///
/// # Arguments
/// * `traj` - Trajectory to decompose; only random access is used
/// * `engine` - Tolerance and iteration limit for the decomposition
///
/// # Returns
/// `EnsembleSvd` with U, s (non-increasing), V^T and the average structure.
/// Fails with `EmptyTrajectory`, `AtomCountMismatch`, `NonFinite` (NaN or
/// infinite input), `Overflow` (average or centered value not representable)
/// or `NoConvergence`.
pub fn svd<T: Trajectory + ?Sized>(traj: &T, engine: &SvdEngine) -> Result<EnsembleSvd> {
    let mut a = extract_coords(traj)?;
    for (frame, column) in a.column_iter().enumerate() {
        if let Some(atom) = first_non_finite_atom(column.iter()) {
            return Err(EnsembleError::NonFinite { frame, atom });
        }
    }

    let avg = row_means(&a);
    if let Some(atom) = first_non_finite_atom(avg.iter()) {
        return Err(EnsembleError::Overflow { atom });
    }
    for mut column in a.column_iter_mut() {
        column -= &avg;
    }
    for column in a.column_iter() {
        if let Some(atom) = first_non_finite_atom(column.iter()) {
            return Err(EnsembleError::Overflow { atom });
        }
    }

    let decomposition = SVD::try_new(a, true, true, engine.epsilon, engine.max_iterations)
        .ok_or(EnsembleError::NoConvergence {
            max_iterations: engine.max_iterations,
        })?;
    let (u, v_t) = match (decomposition.u, decomposition.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(EnsembleError::NoConvergence {
                max_iterations: engine.max_iterations,
            })
        }
    };
    let s = decomposition.singular_values;
    debug!(
        "SVD: U {}x{}, {} singular values, leading {:.4}",
        u.nrows(),
        u.ncols(),
        s.len(),
        s.get(0).copied().unwrap_or(0.0)
    );

    let mut average = match traj.current_frame() {
        Some(frame) => frame.copy(),
        None => return Err(EnsembleError::EmptyTrajectory { frames: 0, atoms: 0 }),
    };
    for i in 0..average.len() {
        average[i].set_coords(Coordinate::new(avg[i * 3], avg[i * 3 + 1], avg[i * 3 + 2]));
    }

    Ok(EnsembleSvd { u, s, v_t, average })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::Atom;
    use crate::trajectory::{Frame, MemoryTrajectory};

    fn frame(coords: &[[f64; 3]]) -> Frame {
        let atoms = coords
            .iter()
            .enumerate()
            .map(|(i, c)| Atom::new(i as i32 + 1, "CA", Coordinate::from(*c)))
            .collect();
        Frame::new(1, atoms)
    }

    fn linear_trajectory() -> MemoryTrajectory {
        MemoryTrajectory::new(vec![
            frame(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]]),
            frame(&[[2.0, 0.0, 0.0], [4.0, 0.0, 0.0]]),
            frame(&[[4.0, 0.0, 0.0], [6.0, 0.0, 0.0]]),
        ])
    }

    fn wobbly_trajectory() -> MemoryTrajectory {
        MemoryTrajectory::new(vec![
            frame(&[[0.1, 1.3, -0.4], [2.2, 0.7, 0.3], [1.0, -1.1, 0.9]]),
            frame(&[[0.4, 1.1, -0.2], [2.0, 0.9, 0.1], [1.3, -0.8, 1.2]]),
            frame(&[[-0.3, 1.6, -0.5], [2.5, 0.4, 0.6], [0.8, -1.4, 0.7]]),
            frame(&[[0.2, 1.2, -0.1], [1.9, 1.0, 0.2], [1.1, -0.9, 1.0]]),
        ])
    }

    #[test]
    fn test_average_structure_linear() {
        let mut traj = linear_trajectory();
        let avg = average_structure(&mut traj).unwrap();
        assert_eq!(avg.len(), 2);
        assert_eq!(avg[0].coords(), Coordinate::new(2.0, 0.0, 0.0));
        assert_eq!(avg[1].coords(), Coordinate::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn test_average_structure_is_repeatable() {
        let mut traj = wobbly_trajectory();
        let first = average_structure(&mut traj).unwrap();
        let second = average_structure(&mut traj).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_average_structure_empty() {
        let mut traj = MemoryTrajectory::new(Vec::new());
        let err = average_structure(&mut traj).unwrap_err();
        assert!(matches!(err, EnsembleError::EmptyTrajectory { frames: 0, .. }));
    }

    #[test]
    fn test_average_structure_atom_mismatch() {
        let mut traj = MemoryTrajectory::new(vec![
            frame(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]),
            frame(&[[0.0, 0.0, 0.0]]),
        ]);
        let err = average_structure(&mut traj).unwrap_err();
        assert!(matches!(
            err,
            EnsembleError::AtomCountMismatch { frame: 1, expected: 2, found: 1 }
        ));
    }

    #[test]
    fn test_extract_coords_layout() {
        let traj = wobbly_trajectory();
        let a = extract_coords(&traj).unwrap();
        assert_eq!(a.shape(), (9, 4));
        for j in 0..traj.len() {
            let raw = traj.frame(j).unwrap().get_coords();
            for atom in 0..3 {
                for axis in 0..3 {
                    assert_eq!(a[(3 * atom + axis, j)], raw[(atom, axis)]);
                }
            }
        }
    }

    #[test]
    fn test_extract_coords_empty_atoms() {
        let traj = MemoryTrajectory::new(vec![Frame::new(1, Vec::new())]);
        let err = extract_coords(&traj).unwrap_err();
        assert!(matches!(err, EnsembleError::EmptyTrajectory { frames: 1, atoms: 0 }));
    }

    #[test]
    fn test_extract_coords_atom_mismatch() {
        let traj = MemoryTrajectory::new(vec![
            frame(&[[0.0, 0.0, 0.0]]),
            frame(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]),
        ]);
        let err = extract_coords(&traj).unwrap_err();
        assert!(matches!(err, EnsembleError::AtomCountMismatch { frame: 1, .. }));
    }

    #[test]
    fn test_svd_reconstructs_centered_matrix() {
        let traj = wobbly_trajectory();
        let result = svd(&traj, &SvdEngine::default()).unwrap();

        let mut centered = extract_coords(&traj).unwrap();
        let avg = row_means(&centered);
        for mut column in centered.column_iter_mut() {
            column -= &avg;
        }

        assert_eq!(result.u.shape(), (9, 4));
        assert_eq!(result.s.len(), 4);
        assert_eq!(result.v_t.shape(), (4, 4));
        let diff = (result.reconstruct() - centered).abs().max();
        assert!(diff < 1e-10, "reconstruction error {}", diff);
    }

    #[test]
    fn test_svd_singular_values_sorted() {
        let traj = wobbly_trajectory();
        let result = svd(&traj, &SvdEngine::default()).unwrap();
        assert!(result.s.iter().all(|v| *v >= 0.0));
        for pair in result.s.as_slice().windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        // centering removes one degree of freedom
        assert!(result.s[3] < 1e-10);
    }

    #[test]
    fn test_svd_average_matches_average_structure() {
        let mut traj = wobbly_trajectory();
        let result = svd(&traj, &SvdEngine::default()).unwrap();
        let streamed = average_structure(&mut traj).unwrap();
        assert_eq!(result.average.coordinates(), streamed.coordinates());

        let mut linear = linear_trajectory();
        let result = svd(&linear, &SvdEngine::default()).unwrap();
        assert_eq!(result.average.coordinates(), average_structure(&mut linear).unwrap().coordinates());
        assert_eq!(result.average[1].coords(), Coordinate::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn test_svd_rejects_non_finite() {
        let traj = MemoryTrajectory::new(vec![
            frame(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]),
            frame(&[[0.0, 0.0, 0.0], [1.0, f64::NAN, 0.0]]),
        ]);
        let err = svd(&traj, &SvdEngine::default()).unwrap_err();
        assert!(err.is_numeric());
        assert!(matches!(err, EnsembleError::NonFinite { frame: 1, atom: 1 }));
    }

    fn overflowing_trajectory() -> MemoryTrajectory {
        MemoryTrajectory::new(vec![
            frame(&[[1e308, 0.0, 0.0], [1.0, 0.0, 0.0]]),
            frame(&[[1e308, 0.0, 0.0], [2.0, 0.0, 0.0]]),
        ])
    }

    #[test]
    fn test_svd_rejects_overflowing_average() {
        let traj = overflowing_trajectory();
        let engine = SvdEngine {
            epsilon: f64::EPSILON,
            max_iterations: 1000,
        };
        let err = svd(&traj, &engine).unwrap_err();
        assert!(err.is_numeric());
        assert!(matches!(err, EnsembleError::Overflow { atom: 0 }));
    }

    #[test]
    fn test_svd_rejects_overflowing_centered_value() {
        // the mean is finite but x - mean is not
        let traj = MemoryTrajectory::new(vec![
            frame(&[[1.7e308, 0.0, 0.0]]),
            frame(&[[-1.7e308, 0.0, 0.0]]),
            frame(&[[-1.7e308, 0.0, 0.0]]),
            frame(&[[1.7e308, 0.0, 0.0]]),
            frame(&[[-1.7e308, 0.0, 0.0]]),
        ]);
        let err = svd(&traj, &SvdEngine::default()).unwrap_err();
        assert!(matches!(err, EnsembleError::Overflow { atom: 0 }));
    }

    #[test]
    fn test_average_structure_rejects_overflowing_sum() {
        let mut traj = overflowing_trajectory();
        let err = average_structure(&mut traj).unwrap_err();
        assert!(matches!(err, EnsembleError::Overflow { atom: 0 }));
    }

    #[test]
    fn test_average_structure_rejects_non_finite() {
        let mut traj = MemoryTrajectory::new(vec![
            frame(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]),
            frame(&[[0.0, 0.0, 0.0], [1.0, 0.0, f64::INFINITY]]),
        ]);
        let err = average_structure(&mut traj).unwrap_err();
        assert!(matches!(err, EnsembleError::NonFinite { frame: 1, atom: 1 }));
    }

    #[test]
    fn test_svd_iteration_limit() {
        let traj = MemoryTrajectory::new(vec![
            frame(&[[0.3, -1.2, 2.7], [4.1, 0.6, -0.9]]),
            frame(&[[1.8, 0.4, -2.2], [-3.3, 2.9, 1.1]]),
            frame(&[[-2.6, 3.1, 0.8], [0.7, -4.4, 2.5]]),
            frame(&[[3.9, -0.5, -1.7], [2.2, 1.3, -3.8]]),
            frame(&[[-0.9, 2.2, 3.6], [-1.5, -2.7, 0.2]]),
            frame(&[[2.4, -3.8, 1.9], [3.6, 0.1, -2.6]]),
        ]);
        let engine = SvdEngine {
            epsilon: f64::EPSILON,
            max_iterations: 1,
        };
        let err = svd(&traj, &engine).unwrap_err();
        assert!(err.is_numeric());
        assert!(matches!(err, EnsembleError::NoConvergence { max_iterations: 1 }));
    }

    #[test]
    fn test_svd_empty() {
        let traj = MemoryTrajectory::new(Vec::new());
        let err = svd(&traj, &SvdEngine::default()).unwrap_err();
        assert!(matches!(err, EnsembleError::EmptyTrajectory { .. }));
    }

    #[test]
    fn test_linear_motion_single_mode() {
        let traj = linear_trajectory();
        let result = svd(&traj, &SvdEngine::default()).unwrap();
        let variance = result.explained_variance();
        assert!((variance[0] - 1.0).abs() < 1e-10);

        // both atoms move together along x
        let mode = result.mode(0).unwrap();
        assert_eq!(mode.len(), 2);
        assert!((mode[0].x.abs() - 0.5f64.sqrt()).abs() < 1e-10);
        assert!((mode[0].x - mode[1].x).abs() < 1e-10);
        assert!(mode[0].y.abs() < 1e-10);
        assert!(result.mode(result.u.ncols()).is_none());
    }

    #[test]
    fn test_single_frame_has_zero_variance() {
        let traj = MemoryTrajectory::new(vec![frame(&[[1.0, 2.0, 3.0]])]);
        let result = svd(&traj, &SvdEngine::default()).unwrap();
        assert_eq!(result.s.len(), 1);
        assert_eq!(result.s[0], 0.0);
        assert_eq!(result.explained_variance(), vec![0.0]);
        assert_eq!(result.average[0].coords(), Coordinate::new(1.0, 2.0, 3.0));
    }
}
