//! The registry of solution fields of a simulation.
use crate::mesh::UniformGrid;
use eyre::eyre;
use nalgebra::{DVector, SVector};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    /// One component per spatial dimension.
    Vector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

/// Global nodal vectors of all fields, addressable by name or by index.
///
/// Vectors are replicated on every worker.
#[derive(Debug, Clone)]
pub struct SolutionSet<const D: usize> {
    num_vertices: usize,
    descriptors: Vec<FieldDescriptor>,
    vectors: Vec<DVector<f64>>,
}

impl<const D: usize> SolutionSet<D> {
    pub fn new(num_vertices: usize) -> Self {
        Self {
            num_vertices,
            descriptors: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Registers a new zero-initialized field and returns its index.
    pub fn add_field(&mut self, name: impl Into<String>, kind: FieldKind) -> eyre::Result<usize> {
        let name = name.into();
        if self.field_index(&name).is_some() {
            return Err(eyre!("field {name} is already registered"));
        }
        let len = match kind {
            FieldKind::Scalar => self.num_vertices,
            FieldKind::Vector => D * self.num_vertices,
        };
        self.descriptors.push(FieldDescriptor { name, kind });
        self.vectors.push(DVector::zeros(len));
        Ok(self.vectors.len() - 1)
    }

    /// Creates the fields of the coupled model: `c`, the given order parameters and `u`.
    pub fn for_model<S: AsRef<str>>(num_vertices: usize, order_parameter_names: &[S]) -> eyre::Result<Self> {
        let mut solution = Self::new(num_vertices);
        solution.add_field("c", FieldKind::Scalar)?;
        for name in order_parameter_names {
            solution.add_field(name.as_ref(), FieldKind::Scalar)?;
        }
        solution.add_field("u", FieldKind::Vector)?;
        Ok(solution)
    }

    pub fn num_fields(&self) -> usize {
        self.vectors.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.name == name)
    }

    pub fn descriptor(&self, index: usize) -> &FieldDescriptor {
        &self.descriptors[index]
    }

    pub fn field(&self, index: usize) -> &DVector<f64> {
        &self.vectors[index]
    }

    pub fn field_mut(&mut self, index: usize) -> &mut DVector<f64> {
        &mut self.vectors[index]
    }

    /// Mutable access to several consecutive fields at once.
    pub fn fields_mut(&mut self, indices: Range<usize>) -> &mut [DVector<f64>] {
        &mut self.vectors[indices]
    }

    pub fn field_by_name(&self, name: &str) -> eyre::Result<&DVector<f64>> {
        let index = self
            .field_index(name)
            .ok_or_else(|| eyre!("no field named {name}"))?;
        Ok(self.field(index))
    }

    pub fn field_by_name_mut(&mut self, name: &str) -> eyre::Result<&mut DVector<f64>> {
        let index = self
            .field_index(name)
            .ok_or_else(|| eyre!("no field named {name}"))?;
        Ok(self.field_mut(index))
    }

    /// Interpolates a function into a scalar field by evaluating it at the vertices.
    pub fn fill_scalar_with(
        &mut self,
        index: usize,
        grid: &UniformGrid<D>,
        f: impl Fn(&SVector<f64, D>) -> f64,
    ) -> eyre::Result<()> {
        self.check_field(index, FieldKind::Scalar, grid)?;
        for (v, value) in self.vectors[index].iter_mut().enumerate() {
            *value = f(&grid.vertex_position(v));
        }
        Ok(())
    }

    /// Interpolates a function into a vector field by evaluating it at the vertices.
    pub fn fill_vector_with(
        &mut self,
        index: usize,
        grid: &UniformGrid<D>,
        f: impl Fn(&SVector<f64, D>) -> SVector<f64, D>,
    ) -> eyre::Result<()> {
        self.check_field(index, FieldKind::Vector, grid)?;
        let vector = &mut self.vectors[index];
        for v in 0..grid.num_vertices() {
            let value = f(&grid.vertex_position(v));
            for i in 0..D {
                vector[D * v + i] = value[i];
            }
        }
        Ok(())
    }

    fn check_field(&self, index: usize, kind: FieldKind, grid: &UniformGrid<D>) -> eyre::Result<()> {
        let descriptor = self
            .descriptors
            .get(index)
            .ok_or_else(|| eyre!("no field with index {index}"))?;
        if descriptor.kind != kind {
            return Err(eyre!("field {} is not a {kind:?} field", descriptor.name));
        }
        if grid.num_vertices() != self.num_vertices {
            return Err(eyre!(
                "grid has {} vertices, but the solution was created for {}",
                grid.num_vertices(),
                self.num_vertices
            ));
        }
        Ok(())
    }
}

/// Positions of the fields of the coupled model in a [`SolutionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub num_order_parameters: usize,
}

impl FieldLayout {
    pub fn concentration(&self) -> usize {
        0
    }

    pub fn order_parameter(&self, p: usize) -> usize {
        assert!(p < self.num_order_parameters, "order parameter index out of bounds");
        1 + p
    }

    pub fn order_parameters(&self) -> Range<usize> {
        1..1 + self.num_order_parameters
    }

    pub fn displacement(&self) -> usize {
        1 + self.num_order_parameters
    }

    pub fn num_fields(&self) -> usize {
        2 + self.num_order_parameters
    }
}
