//! Preconditioned Conjugate Gradient for matrix-free symmetric positive definite operators.
use core::fmt;
use nalgebra::{DMatrix, DVector};
use std::ops::{Deref, DerefMut};

pub trait LinearOperator {
    /// Computes `y = A x`.
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> eyre::Result<()>;
}

impl<'a, A> LinearOperator for &'a A
where
    A: ?Sized + LinearOperator,
{
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> eyre::Result<()> {
        <A as LinearOperator>::apply(self, y, x)
    }
}

impl LinearOperator for DMatrix<f64> {
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> eyre::Result<()> {
        y.gemv(1.0, self, x, 0.0);
        Ok(())
    }
}

pub struct IdentityOperator;

impl LinearOperator for IdentityOperator {
    fn apply(&self, y: &mut DVector<f64>, x: &DVector<f64>) -> eyre::Result<()> {
        y.copy_from(x);
        Ok(())
    }
}

pub trait CgStoppingCriterion {
    fn has_converged(&self, b_norm: f64, iteration: usize, approx_residual: &DVector<f64>) -> bool;
}

/// Stops once `||r|| <= max(rel_tol * ||b||, abs_tol)`.
///
/// The residual is the recursively updated residual of CG, which may drift from the true
/// residual for ill-conditioned operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualCriterion {
    pub rel_tol: f64,
    pub abs_tol: f64,
}

impl ResidualCriterion {
    pub fn new(rel_tol: f64, abs_tol: f64) -> Self {
        Self { rel_tol, abs_tol }
    }
}

impl Default for ResidualCriterion {
    fn default() -> Self {
        Self::new(1e-8, 0.0)
    }
}

impl CgStoppingCriterion for ResidualCriterion {
    fn has_converged(&self, b_norm: f64, _iteration: usize, approx_residual: &DVector<f64>) -> bool {
        approx_residual.norm() <= (self.rel_tol * b_norm).max(self.abs_tol)
    }
}

#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct CgWorkspace {
    r: DVector<f64>,
    z: DVector<f64>,
    p: DVector<f64>,
    Ap: DVector<f64>,
}

impl Default for CgWorkspace {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            z: DVector::zeros(0),
            p: DVector::zeros(0),
            Ap: DVector::zeros(0),
        }
    }
}

#[allow(non_snake_case)]
struct Buffers<'a> {
    r: &'a mut DVector<f64>,
    z: &'a mut DVector<f64>,
    p: &'a mut DVector<f64>,
    Ap: &'a mut DVector<f64>,
}

impl CgWorkspace {
    fn prepare_buffers(&mut self, dim: usize) -> Buffers {
        for buffer in [&mut self.r, &mut self.z, &mut self.p, &mut self.Ap] {
            if buffer.len() != dim {
                *buffer = DVector::zeros(dim);
            }
        }
        Buffers {
            r: &mut self.r,
            z: &mut self.z,
            p: &mut self.p,
            Ap: &mut self.Ap,
        }
    }
}

#[derive(Debug)]
enum OwnedOrMutRef<'a, T> {
    Owned(T),
    MutRef(&'a mut T),
}

impl<'a, T> Deref for OwnedOrMutRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

impl<'a, T> DerefMut for OwnedOrMutRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

/// Builder-style Conjugate Gradient solver.
///
/// ```ignore
/// let output = ConjugateGradient::new()
///     .with_operator(&operator)
///     .with_stopping_criterion(ResidualCriterion::new(1e-10, 0.0))
///     .with_max_iter(1000)
///     .solve_with_guess(&b, &mut x)?;
/// ```
#[derive(Debug)]
pub struct ConjugateGradient<'a, A, P, Criterion> {
    workspace: OwnedOrMutRef<'a, CgWorkspace>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: Option<usize>,
}

impl<'a> ConjugateGradient<'a, (), IdentityOperator, ResidualCriterion> {
    pub fn new() -> Self {
        Self {
            workspace: OwnedOrMutRef::Owned(CgWorkspace::default()),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: ResidualCriterion::default(),
            max_iter: None,
        }
    }

    pub fn with_workspace(workspace: &'a mut CgWorkspace) -> Self {
        Self {
            workspace: OwnedOrMutRef::MutRef(workspace),
            ..Self::new()
        }
    }
}

impl<'a> Default for ConjugateGradient<'a, (), IdentityOperator, ResidualCriterion> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, P, Criterion> ConjugateGradient<'a, (), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<'a, A, P, Criterion> {
        ConjugateGradient {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

impl<'a, A, P, Criterion> ConjugateGradient<'a, A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<'a, A, P2, Criterion> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_stopping_criterion<C2>(self, stopping_criterion: C2) -> ConjugateGradient<'a, A, P, C2> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(eyre::Report),
    PreconditionerError(eyre::Report),
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "error applying operator: {err}"),
            Self::PreconditionerError(err) => write!(f, "error applying preconditioner: {err}"),
            Self::IndefiniteOperator => write!(f, "operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "indefinite preconditioner"),
            Self::MaxIterationsReached { max_iter } => write!(f, "max iterations ({max_iter}) reached"),
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError {
    pub output: CgOutput,
    pub kind: SolveErrorKind,
}

impl SolveError {
    fn new(output: CgOutput, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CG solve failed after {} iterations: {}", self.output.num_iterations, self.kind)
    }
}

impl std::error::Error for SolveError {}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct CgOutput {
    /// Number of updates made to the initial guess.
    pub num_iterations: usize,
    /// Norm of the recursively updated residual at termination.
    pub residual_norm: f64,
}

impl<'a, A, P, Criterion> ConjugateGradient<'a, A, P, Criterion>
where
    A: LinearOperator,
    P: LinearOperator,
    Criterion: CgStoppingCriterion,
{
    /// Solves `A x = b`, using the current content of `x` as the initial guess.
    #[allow(non_snake_case)]
    pub fn solve_with_guess(&mut self, b: &DVector<f64>, x: &mut DVector<f64>) -> Result<CgOutput, SolveError> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let mut output = CgOutput {
            num_iterations: 0,
            residual_norm: 0.0,
        };

        let Buffers { r, z, p, Ap } = self.workspace.prepare_buffers(x.len());

        let b_norm = b.norm();
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok(output);
        }

        // r = b - Ax
        if let Err(err) = self.operator.apply(r, x) {
            return Err(SolveError::new(output, OperatorError(err)));
        }
        r.axpy(1.0, b, -1.0);

        // z = Pr
        if let Err(err) = self.preconditioner.apply(z, r) {
            return Err(SolveError::new(output, PreconditionerError(err)));
        }
        p.copy_from(z);
        let mut zTr = z.dot(r);

        loop {
            output.residual_norm = r.norm();
            if self
                .stopping_criterion
                .has_converged(b_norm, output.num_iterations, r)
            {
                break;
            } else if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
                }
            }

            // Ap = A * p
            if let Err(err) = self.operator.apply(Ap, p) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            let pAp = p.dot(Ap);
            if pAp <= 0.0 {
                return Err(SolveError::new(output, IndefiniteOperator));
            }
            if zTr <= 0.0 {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }

            let alpha = zTr / pAp;
            x.axpy(alpha, p, 1.0);
            r.axpy(-alpha, Ap, 1.0);
            output.num_iterations += 1;

            // z <- P r
            if let Err(err) = self.preconditioner.apply(z, r) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            let zTr_next = z.dot(r);
            let beta = zTr_next / zTr;

            // p <- z + beta * p
            p.axpy(1.0, z, beta);
            zTr = zTr_next;
        }

        Ok(output)
    }
}
