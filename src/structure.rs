use std::ops::{Index, IndexMut};

/// 3D coordinate vector
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Calculate Euclidean distance to another coordinate
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Coordinate {
    fn from(c: [f64; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

/// A single atom record as read from a PDB ATOM/HETATM line
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub serial: i32,
    pub name: String,
    pub residue_name: String,
    pub residue_number: i32,
    pub chain: char,
    pub hetero: bool,
    coords: Coordinate,
}

impl Atom {
    pub fn new(serial: i32, name: impl Into<String>, coords: Coordinate) -> Self {
        Self {
            serial,
            name: name.into(),
            residue_name: "UNK".to_string(),
            residue_number: 1,
            chain: 'A',
            hetero: false,
            coords,
        }
    }

    pub fn with_residue(mut self, residue_name: impl Into<String>, residue_number: i32, chain: char) -> Self {
        self.residue_name = residue_name.into();
        self.residue_number = residue_number;
        self.chain = chain;
        self
    }

    pub fn coords(&self) -> Coordinate {
        self.coords
    }

    pub fn set_coords(&mut self, coords: Coordinate) {
        self.coords = coords;
    }
}

/// Standalone snapshot of atoms, owned by whoever took it.
///
/// Produced by [`crate::trajectory::Frame::copy`]; editing it never touches the
/// trajectory it came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Structure {
    atoms: Vec<Atom>,
}

impl Structure {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self { atoms }
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

    pub fn iter(&self) -> std::slice::Iter<'_, Atom> {
        self.atoms.iter()
    }

    /// All atom coordinates in atom order
    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.atoms.iter().map(Atom::coords).collect()
    }
}

impl Index<usize> for Structure {
    type Output = Atom;

    fn index(&self, index: usize) -> &Atom {
        &self.atoms[index]
    }
}

impl IndexMut<usize> for Structure {
    fn index_mut(&mut self, index: usize) -> &mut Atom {
        &mut self.atoms[index]
    }
}
