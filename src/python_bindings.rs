use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyTuple};

use crate::ensemble::{self, SvdEngine};
use crate::error::EnsembleError;
use crate::structure::Structure;
use crate::trajectory::{AtomFilter, MemoryTrajectory, PdbTrajectory, ReadOptions};
use nalgebra::DMatrix;

fn to_py_err(e: EnsembleError) -> PyErr {
    match e {
        EnsembleError::Io(_) => PyErr::new::<pyo3::exceptions::PyIOError, _>(e.to_string()),
        EnsembleError::NoConvergence { .. } => {
            PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string())
        }
        _ => PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()),
    }
}

fn load(trajectory_file: &str, atoms: Option<&str>, max_frames: Option<usize>) -> PyResult<MemoryTrajectory> {
    let options = ReadOptions {
        max_frames,
        atoms: atoms.map(AtomFilter::from_names).unwrap_or_default(),
    };
    PdbTrajectory::new(trajectory_file)
        .read(&options)
        .map_err(to_py_err)
}

/// Structure as a list of (x, y, z) tuples
fn structure_to_py(py: Python<'_>, structure: &Structure) -> PyResult<Py<PyList>> {
    let py_coords = PyList::empty_bound(py);
    for atom in structure.iter() {
        let c = atom.coords();
        py_coords.append(PyTuple::new_bound(py, &[c.x, c.y, c.z]))?;
    }
    Ok(py_coords.unbind())
}

/// Matrix as a list of rows
fn matrix_to_py(py: Python<'_>, matrix: &DMatrix<f64>) -> PyResult<Py<PyList>> {
    let py_rows = PyList::empty_bound(py);
    for row in matrix.row_iter() {
        let values: Vec<f64> = row.iter().copied().collect();
        py_rows.append(PyList::new_bound(py, values))?;
    }
    Ok(py_rows.unbind())
}

/// Python binding for average_structure
#[pyfunction]
#[pyo3(signature = (trajectory_file, atoms=None, max_frames=None))]
fn average_structure(
    py: Python<'_>,
    trajectory_file: &str,
    atoms: Option<&str>,
    max_frames: Option<usize>,
) -> PyResult<PyObject> {
    let mut traj = load(trajectory_file, atoms, max_frames)?;
    let avg = ensemble::average_structure(&mut traj).map_err(to_py_err)?;
    Ok(structure_to_py(py, &avg)?.into_any())
}

/// Python binding for extract_coords
#[pyfunction]
#[pyo3(signature = (trajectory_file, atoms=None, max_frames=None))]
fn extract_coords(
    py: Python<'_>,
    trajectory_file: &str,
    atoms: Option<&str>,
    max_frames: Option<usize>,
) -> PyResult<PyObject> {
    let traj = load(trajectory_file, atoms, max_frames)?;
    let matrix = ensemble::extract_coords(&traj).map_err(to_py_err)?;
    Ok(matrix_to_py(py, &matrix)?.into_any())
}

/// Python binding for svd; returns a dict with U, s, V, variance and average
#[pyfunction]
#[pyo3(signature = (trajectory_file, atoms=None, max_frames=None, epsilon=f64::EPSILON, max_iterations=0))]
fn svd(
    py: Python<'_>,
    trajectory_file: &str,
    atoms: Option<&str>,
    max_frames: Option<usize>,
    epsilon: f64,
    max_iterations: usize,
) -> PyResult<PyObject> {
    let traj = load(trajectory_file, atoms, max_frames)?;
    let engine = SvdEngine {
        epsilon,
        max_iterations,
    };
    let result = ensemble::svd(&traj, &engine).map_err(to_py_err)?;

    let py_dict = PyDict::new_bound(py);
    py_dict.set_item("U", matrix_to_py(py, &result.u)?)?;
    py_dict.set_item("s", result.s.iter().copied().collect::<Vec<f64>>())?;
    py_dict.set_item("V", matrix_to_py(py, &result.v_t)?)?;
    py_dict.set_item("variance", result.explained_variance())?;
    py_dict.set_item("average", structure_to_py(py, &result.average)?)?;

    Ok(py_dict.into())
}

/// Python module definition
#[pymodule]
fn ensemble_analysis_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(average_structure, m)?)?;
    m.add_function(wrap_pyfunction!(extract_coords, m)?)?;
    m.add_function(wrap_pyfunction!(svd, m)?)?;
    m.add("__doc__", "Ensemble analysis Rust library with Python bindings")?;
    Ok(())
}
