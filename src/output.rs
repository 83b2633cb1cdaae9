use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::ensemble::{EnsembleSvd, Result};
use crate::error::EnsembleError;
use crate::structure::Structure;

/// One row of the singular value table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingularValueRow {
    pub mode: usize,
    pub value: f64,
    pub variance_fraction: f64,
}

/// Save a matrix as headerless CSV, one matrix row per line
pub fn write_matrix_csv(matrix: &DMatrix<f64>, output_path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(output_path)?;

    for row in matrix.row_iter() {
        let record: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        "Wrote {}x{} matrix to {}",
        matrix.nrows(),
        matrix.ncols(),
        output_path.display()
    );
    Ok(())
}

/// Load a matrix written by [`write_matrix_csv`]
pub fn read_matrix_csv(csv_path: &Path) -> Result<DMatrix<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(csv_path)?;

    let mut values = Vec::new();
    let mut ncols: Option<usize> = None;
    let mut nrows = 0;

    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        match ncols {
            None => ncols = Some(record.len()),
            Some(n) if n != record.len() => {
                return Err(EnsembleError::Parse {
                    line: idx + 1,
                    message: format!("Expected {} columns, found {}", n, record.len()),
                });
            }
            Some(_) => {}
        }
        for field in record.iter() {
            let value = field.trim().parse::<f64>().map_err(|e| EnsembleError::Parse {
                line: idx + 1,
                message: format!("Failed to parse value '{}': {}", field, e),
            })?;
            values.push(value);
        }
        nrows += 1;
    }

    Ok(DMatrix::from_row_slice(nrows, ncols.unwrap_or(0), &values))
}

/// Save singular values with the fraction of variance each one explains
pub fn write_singular_values_csv(result: &EnsembleSvd, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    let variance = result.explained_variance();

    for (mode, (value, fraction)) in result.s.iter().zip(variance).enumerate() {
        writer.serialize(SingularValueRow {
            mode,
            value: *value,
            variance_fraction: fraction,
        })?;
    }
    writer.flush()?;

    info!("Wrote {} singular values to {}", result.s.len(), output_path.display());
    Ok(())
}

pub fn read_singular_values_csv(csv_path: &Path) -> Result<Vec<SingularValueRow>> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

/// PDB atom name field: names shorter than four characters start in column 14
fn pdb_atom_name(name: &str) -> String {
    if name.len() >= 4 {
        name.chars().take(4).collect()
    } else {
        format!(" {:<3}", name)
    }
}

/// Save a structure as fixed-column ATOM/HETATM records
pub fn write_structure_pdb(structure: &Structure, output_path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(output_path)?);

    for atom in structure.iter() {
        let c = atom.coords();
        let record = if atom.hetero { "HETATM" } else { "ATOM  " };
        writeln!(
            out,
            "{}{:>5} {} {:>3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}",
            record,
            atom.serial,
            pdb_atom_name(&atom.name),
            atom.residue_name,
            atom.chain,
            atom.residue_number,
            c.x,
            c.y,
            c.z,
            1.0,
            0.0
        )?;
    }
    writeln!(out, "END")?;
    out.flush()?;

    info!("Wrote {} atoms to {}", structure.len(), output_path.display());
    Ok(())
}
