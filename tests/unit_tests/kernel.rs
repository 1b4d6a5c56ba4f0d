use super::model_parameters;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DVector, Matrix2, Vector2};
use phasefield::cg::LinearOperator;
use phasefield::comm::SelfCommunicator;
use phasefield::config::DisplacementConstraint;
use phasefield::discretization::Discretization;
use phasefield::driver::{constrained_displacement_dofs, lumped_mass};
use phasefield::element::QuadratureKind;
use phasefield::fields::SolutionSet;
use phasefield::interpolation::InterpolationFunction;
use phasefield::kernel::{
    elastic_coupling, explicit_point_residual, explicit_residual, implicit_residual, ElasticCoupling,
    ImplicitElasticOperator, PointResidual, PointState,
};
use phasefield::mesh::UniformGrid;
use phasefield::model::CoupledModel;
use phasefield::solid::MaterialModel;

/// Two order parameters with concentration dependent misfit and a stiffer precipitate.
fn misfit_model() -> CoupledModel<2> {
    let mut params = model_parameters(&["n1", "n2"]);
    params.concentration_dependent_misfit = true;
    params.elasticity.precipitate = Some(MaterialModel::isotropic(45.0, 0.25));

    let first = &mut params.order_parameters[0];
    first.misfit_interpolation = Some(InterpolationFunction::CubicPower { exponent: 3 });
    first.eigenstrain_slope = [[0.1568, 0.02, 0.0], [0.02, 0.6548, 0.0], [0.0; 3]];
    first.eigenstrain_intercept = [[-0.02756, 0.0, 0.0], [0.0, -0.09584, 0.0], [0.0; 3]];

    let second = &mut params.order_parameters[1];
    second.eigenstrain_slope = [[0.05, -0.03, 0.0], [-0.03, 0.1, 0.0], [0.0; 3]];
    second.eigenstrain_intercept = [[0.0212, 0.0631, 0.0], [0.0631, 0.0941, 0.0], [0.0; 3]];

    CoupledModel::new(&params).unwrap()
}

/// Linear concentration and order parameters and a quadratic displacement.
struct SmoothFields {
    concentration: (f64, Vector2<f64>),
    order_parameters: [(f64, Vector2<f64>); 2],
    displacement_gradient: Matrix2<f64>,
    displacement_hessian: [Matrix2<f64>; 2],
}

struct SampledFields {
    concentration: f64,
    concentration_gradient: Vector2<f64>,
    order_parameters: Vec<f64>,
    order_parameter_gradients: Vec<Vector2<f64>>,
    displacement_gradient: Matrix2<f64>,
    displacement_hessian: [Matrix2<f64>; 2],
}

impl SampledFields {
    fn state(&self) -> PointState<2> {
        PointState {
            concentration: self.concentration,
            concentration_gradient: self.concentration_gradient,
            order_parameters: &self.order_parameters,
            order_parameter_gradients: &self.order_parameter_gradients,
            displacement_gradient: self.displacement_gradient,
            displacement_hessian: Some(self.displacement_hessian),
        }
    }
}

impl SmoothFields {
    fn new() -> Self {
        Self {
            concentration: (0.1, Vector2::new(0.05, 0.1)),
            order_parameters: [(0.2, Vector2::new(0.3, -0.2)), (0.5, Vector2::new(0.1, 0.25))],
            displacement_gradient: Matrix2::new(0.01, 0.02, -0.01, 0.03),
            displacement_hessian: [Matrix2::new(0.2, 0.1, 0.1, -0.3), Matrix2::new(0.05, -0.15, -0.15, 0.4)],
        }
    }

    fn sample(&self, x: &Vector2<f64>) -> SampledFields {
        let (c0, grad_c) = self.concentration;
        let hessian = self.displacement_hessian;
        let displacement_gradient =
            self.displacement_gradient + Matrix2::from_fn(|i, j| (hessian[i] * x)[j]);
        SampledFields {
            concentration: c0 + grad_c.dot(x),
            concentration_gradient: grad_c,
            order_parameters: self
                .order_parameters
                .iter()
                .map(|(n0, grad_n)| n0 + grad_n.dot(x))
                .collect(),
            order_parameter_gradients: self.order_parameters.iter().map(|(_, g)| *g).collect(),
            displacement_gradient,
            displacement_hessian: hessian,
        }
    }
}

/// The elastic contribution `-S : sum_p hm(n_p) d eps0_p / dc` to the chemical potential.
fn elastic_chemical_potential(model: &CoupledModel<2>, sampled: &SampledFields) -> f64 {
    let mut coupling = ElasticCoupling::new(2);
    elastic_coupling(model, &sampled.state(), &mut coupling);
    let eigenstrain_c: Matrix2<f64> = model
        .order_parameters
        .iter()
        .zip(&sampled.order_parameters)
        .map(|(op, &n)| {
            op.eigenstrain
                .evaluate(sampled.concentration)
                .concentration_derivative
                * op.misfit_interpolation.value(n)
        })
        .sum();
    -coupling.stress.dot(&eigenstrain_c)
}

#[test]
fn chemical_potential_gradient_matches_finite_differences() {
    let model = misfit_model();
    let fields = SmoothFields::new();
    let x = Vector2::new(0.3, 0.7);

    let mut coupling = ElasticCoupling::new(2);
    elastic_coupling(&model, &fields.sample(&x).state(), &mut coupling);

    let eps = 1e-6;
    let fd = Vector2::from_fn(|k, _| {
        let dx = Vector2::from_fn(|i, _| if i == k { eps } else { 0.0 });
        let forward = elastic_chemical_potential(&model, &fields.sample(&(x + dx)));
        let backward = elastic_chemical_potential(&model, &fields.sample(&(x - dx)));
        (forward - backward) / (2.0 * eps)
    });
    assert!(coupling.chemical_potential_gradient.norm() > 1e-3);
    assert_matrix_eq!(coupling.chemical_potential_gradient, fd, comp = abs, tol = 1e-6);
}

#[test]
fn chemical_potential_gradient_vanishes_without_concentration_dependent_misfit() {
    let mut params = model_parameters(&["n1", "n2"]);
    params.order_parameters[0].eigenstrain = [[0.01, 0.0, 0.0], [0.0, 0.02, 0.0], [0.0; 3]];
    let model = CoupledModel::<2>::new(&params).unwrap();
    let sampled = SmoothFields::new().sample(&Vector2::new(0.3, 0.7));

    let mut coupling = ElasticCoupling::new(2);
    elastic_coupling(&model, &sampled.state(), &mut coupling);
    assert_eq!(coupling.chemical_potential_gradient, Vector2::zeros());
    assert_eq!(coupling.heterogeneous, vec![0.0, 0.0]);
    assert!(coupling.misfit[0] != 0.0);
    // The second order parameter has no eigenstrain
    assert_eq!(coupling.misfit[1], 0.0);
}

#[test]
fn heterogeneous_modulus_term_is_energy_derivative() {
    let mut params = model_parameters(&["n1", "n2"]);
    params.elasticity.precipitate = Some(MaterialModel::isotropic(45.0, 0.25));
    let model = CoupledModel::<2>::new(&params).unwrap();

    let gradients = [Vector2::zeros(); 2];
    let strain = Matrix2::new(0.01, 0.004, 0.006, -0.02);
    let energy = |order_parameters: &[f64]| {
        let state = PointState {
            concentration: 0.1,
            concentration_gradient: Vector2::zeros(),
            order_parameters,
            order_parameter_gradients: &gradients,
            displacement_gradient: strain,
            displacement_hessian: None,
        };
        let mut coupling = ElasticCoupling::new(2);
        elastic_coupling(&model, &state, &mut coupling);
        coupling
    };

    let n = [0.3, 0.45];
    let coupling = energy(&n);
    let symmetric_strain = 0.5 * (strain + strain.transpose());
    let s2 = model.stiffness.difference().unwrap().compute_stress(&symmetric_strain);
    for p in 0..2 {
        let h_prime = model.order_parameters[p].interpolation.derivative(n[p]);
        let expected = 0.5 * h_prime * s2.dot(&symmetric_strain);
        assert!(expected.abs() > 1e-4);
        assert_scalar_eq!(coupling.heterogeneous[p], expected, comp = abs, tol = 1e-14);

        // Without eigenstrain the term is the derivative of the elastic energy density
        let eps = 1e-6;
        let (mut forward, mut backward) = (n, n);
        forward[p] += eps;
        backward[p] -= eps;
        let fd = (energy(&forward).energy_density() - energy(&backward).energy_density()) / (2.0 * eps);
        assert_scalar_eq!(coupling.heterogeneous[p], fd, comp = abs, tol = 1e-8);
    }
    assert_eq!(coupling.misfit, vec![0.0, 0.0]);
}

#[test]
fn elastic_strain_subtracts_interpolated_eigenstrain() {
    let mut params = model_parameters(&["n1"]);
    params.order_parameters[0].eigenstrain = [[0.01, 0.005, 0.0], [0.005, 0.02, 0.0], [0.0; 3]];
    let model = CoupledModel::<2>::new(&params).unwrap();

    let gradients = [Vector2::zeros()];
    let state = PointState {
        concentration: 0.2,
        concentration_gradient: Vector2::zeros(),
        order_parameters: &[1.0],
        order_parameter_gradients: &gradients,
        displacement_gradient: Matrix2::new(0.01, 0.01, 0.0, 0.02),
        displacement_hessian: None,
    };
    let mut coupling = ElasticCoupling::new(1);
    elastic_coupling(&model, &state, &mut coupling);

    // sym(grad u) equals the eigenstrain, so the precipitate is stress free
    assert_matrix_eq!(coupling.elastic_strain, Matrix2::zeros(), comp = abs, tol = 1e-15);
    assert_matrix_eq!(coupling.stress, Matrix2::zeros(), comp = abs, tol = 1e-14);
    assert_eq!(coupling.interpolation_sum, 1.0);
    assert_eq!(coupling.energy_density(), 0.0);
}

#[test]
fn point_residual_of_parent_phase() {
    let model = CoupledModel::<2>::new(&model_parameters(&["n1"])).unwrap();
    let gradients = [Vector2::zeros()];
    let grad_c = Vector2::new(0.5, -1.0);
    let grad_u = Matrix2::new(0.01, 0.0, 0.0, -0.01);
    let state = PointState {
        concentration: 0.2,
        concentration_gradient: grad_c,
        order_parameters: &[0.0],
        order_parameter_gradients: &gradients,
        displacement_gradient: grad_u,
        displacement_hessian: None,
    };
    let mut coupling = ElasticCoupling::new(1);
    let mut residual = PointResidual::new(1);
    explicit_point_residual(&model, &state, &mut coupling, &mut residual);

    let dt = model.time_step;
    assert_eq!(residual.concentration_value, 0.2);
    let expected_flux = grad_c * (2.0 * 46.599);
    assert_matrix_eq!(residual.concentration_gradient, -expected_flux * dt, comp = abs, tol = 1e-14);
    // h'(0) = 0, so the parent phase is stationary
    assert_eq!(residual.order_parameter_values, vec![0.0]);
    assert_eq!(residual.order_parameter_gradients, vec![Vector2::zeros()]);

    let stress = model.stiffness_at(&[0.0]).compute_stress(&grad_u);
    assert_matrix_eq!(residual.displacement_gradient, -stress, comp = abs, tol = 1e-14);
}

#[test]
fn point_residual_drives_order_parameter_towards_lower_free_energy() {
    let mut params = model_parameters(&["n1"]);
    params.order_parameters[0].barrier_height = 0.5;
    let model = CoupledModel::<2>::new(&params).unwrap();
    let gradient = [Vector2::new(1.0, 2.0)];
    let state = PointState {
        concentration: 0.5,
        concentration_gradient: Vector2::zeros(),
        order_parameters: &[0.5],
        order_parameter_gradients: &gradient,
        displacement_gradient: Matrix2::zeros(),
        displacement_hessian: None,
    };
    let mut coupling = ElasticCoupling::new(1);
    let mut residual = PointResidual::new(1);
    explicit_point_residual(&model, &state, &mut coupling, &mut residual);

    let (f_alpha, f_beta) = (&model.free_energy_alpha, &model.free_energy_beta);
    let dt_l = model.time_step * 100.0;
    // g'(1/2) = 0 and h'(1/2) = 3/2
    let driving_force = (f_beta.value(0.5) - f_alpha.value(0.5)) * 1.5;
    assert!(driving_force < 0.0);
    assert_scalar_eq!(residual.order_parameter_values[0], 0.5 - dt_l * driving_force, comp = abs, tol = 1e-14);
    assert_matrix_eq!(
        residual.order_parameter_gradients[0],
        -gradient[0] * (0.035 * dt_l),
        comp = abs,
        tol = 1e-15
    );
}

fn discretization() -> Discretization<2> {
    let grid = UniformGrid::from_extents([3.0, 2.0], [6, 4]).unwrap();
    Discretization::serial(grid, QuadratureKind::GaussLobatto, 2).unwrap()
}

#[test]
fn explicit_residual_of_uniform_parent_phase() {
    let discretization = discretization();
    let grid = discretization.grid();
    let model = CoupledModel::<2>::new(&model_parameters(&["n1", "n2"])).unwrap();
    let mut solution = SolutionSet::for_model(grid.num_vertices(), model.order_parameter_names().as_slice()).unwrap();
    solution.field_mut(0).fill(0.2);

    let comm = SelfCommunicator;
    let residual = explicit_residual(&discretization, &model, &solution, &comm).unwrap();
    let mass = lumped_mass(&discretization, &comm).unwrap();

    assert_matrix_eq!(residual.concentration, mass * 0.2, comp = abs, tol = 1e-14);
    assert_eq!(residual.order_parameters.len(), 2);
    for r in &residual.order_parameters {
        assert_matrix_eq!(r.clone(), DVector::zeros(grid.num_vertices()), comp = abs, tol = 1e-15);
    }
    assert_matrix_eq!(residual.displacement, DVector::zeros(2 * grid.num_vertices()), comp = abs, tol = 1e-15);
}

#[test]
fn uniform_misfit_only_loads_the_boundary() {
    let discretization = discretization();
    let grid = discretization.grid();
    let mut params = model_parameters(&["n1"]);
    params.order_parameters[0].eigenstrain = [[0.01, 0.0, 0.0], [0.0, 0.02, 0.0], [0.0; 3]];
    let model = CoupledModel::<2>::new(&params).unwrap();
    let mut solution = SolutionSet::for_model(grid.num_vertices(), model.order_parameter_names().as_slice()).unwrap();
    solution.field_mut(0).fill(0.1);
    solution.field_mut(1).fill(1.0);

    let residual = explicit_residual(&discretization, &model, &solution, &SelfCommunicator).unwrap();
    let displacement = &residual.displacement;
    for v in 0..grid.num_vertices() {
        if !grid.is_boundary_vertex(v) {
            assert_scalar_eq!(displacement[2 * v], 0.0, comp = abs, tol = 1e-14);
            assert_scalar_eq!(displacement[2 * v + 1], 0.0, comp = abs, tol = 1e-14);
        }
    }
    assert!(displacement.norm() > 1e-3);
    // The load is self-equilibrated
    let total: f64 = displacement.iter().step_by(2).sum();
    assert_scalar_eq!(total, 0.0, comp = abs, tol = 1e-13);
}

#[test]
fn explicit_and_implicit_residuals_agree_without_misfit() {
    let discretization = discretization();
    let grid = discretization.grid();
    let mut params = model_parameters(&["n1"]);
    params.elasticity.precipitate = Some(MaterialModel::isotropic(45.0, 0.3));
    let model = CoupledModel::<2>::new(&params).unwrap();

    let mut solution = SolutionSet::for_model(grid.num_vertices(), model.order_parameter_names().as_slice()).unwrap();
    solution
        .fill_scalar_with(1, grid, |x| 0.5 + 0.4 * (x[0] - x[1]).sin())
        .unwrap();
    solution
        .fill_vector_with(2, grid, |x| Vector2::new(0.01 * x[0] * x[1], -0.02 * x[1] * x[1]))
        .unwrap();

    let comm = SelfCommunicator;
    let explicit = explicit_residual(&discretization, &model, &solution, &comm).unwrap();
    let implicit = implicit_residual(&discretization, &model, &[solution.field(1)], solution.field(2), &comm).unwrap();
    assert!(implicit.norm() > 1e-4);
    assert_matrix_eq!(explicit.displacement, -implicit, comp = abs, tol = 1e-13);
}

#[test]
fn rigid_motions_are_stress_free() {
    let discretization = discretization();
    let grid = discretization.grid();
    let model = CoupledModel::<2>::new(&model_parameters(&["n1"])).unwrap();
    let n = DVector::from_element(grid.num_vertices(), 0.3);

    let mut solution = SolutionSet::<2>::for_model(grid.num_vertices(), &["n1"]).unwrap();
    // Translation plus infinitesimal rotation
    solution
        .fill_vector_with(2, grid, |x| Vector2::new(0.5 - 0.1 * x[1], -0.25 + 0.1 * x[0]))
        .unwrap();
    let residual = implicit_residual(&discretization, &model, &[&n], solution.field(2), &SelfCommunicator).unwrap();
    assert_matrix_eq!(residual, DVector::zeros(2 * grid.num_vertices()), comp = abs, tol = 1e-13);
}

#[test]
fn elastic_operator_is_symmetric_positive_definite() {
    let discretization = discretization();
    let grid = discretization.grid();
    let mut params = model_parameters(&["n1"]);
    params.elasticity.precipitate = Some(MaterialModel::isotropic(45.0, 0.3));
    let model = CoupledModel::<2>::new(&params).unwrap();
    let n = DVector::from_fn(grid.num_vertices(), |v, _| (v as f64 * 0.37).sin().abs());
    let constrained = constrained_displacement_dofs(grid, DisplacementConstraint::ClampedBoundary);
    let comm = SelfCommunicator;
    let operator = ImplicitElasticOperator::new(&discretization, &model, vec![&n], &constrained, &comm);

    let len = 2 * grid.num_vertices();
    let x = DVector::from_fn(len, |i, _| (i as f64 * 0.71).cos());
    let y = DVector::from_fn(len, |i, _| (i as f64 * 1.3).sin());
    let mut ax = DVector::zeros(len);
    let mut ay = DVector::zeros(len);
    operator.apply(&mut ax, &x).unwrap();
    operator.apply(&mut ay, &y).unwrap();

    assert_scalar_eq!(y.dot(&ax), x.dot(&ay), comp = abs, tol = 1e-10);
    assert!(x.dot(&ax) > 0.0);
    // Identity on the constrained dofs
    for &dof in &constrained {
        assert_eq!(ax[dof], x[dof]);
    }
}
