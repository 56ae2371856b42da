use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_abs_diff_eq;
use structadd_mcmc::models::predictor::{IwlsTerm, Observations};
use structadd_mcmc::utils::{
    RANK_TOLERANCE, cholesky_lower, design_times, max_abs_diff, solve_with_root,
    transpose_times, weighted_cross_product,
};
use structadd_mcmc::{
    BinomialProbit, DesignMatrix, Equation, EquationId, FullConditional, Gaussian,
    GaussianLocation, GaussianLogVariance, McmcConfig, PeerPredictors, PredictorSurface,
    RandomSource, RegressionBlock, RegressionOptions, ResponseFamily, Sampler, SimulateOptions,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn idx_to_f64(idx: usize) -> f64 {
    f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
}

fn schedule(iterations: usize, burn_in: usize, step: usize) -> McmcConfig {
    McmcConfig {
        iterations,
        burn_in,
        step,
        seed: Some(2024),
        ..McmcConfig::default()
    }
}

fn covariates(n: usize) -> (Vec<f64>, Vec<f64>) {
    let x = (0..n).map(|i| idx_to_f64(i) / idx_to_f64(n) - 0.5).collect();
    let z = (0..n)
        .map(|i| idx_to_f64((i * 37) % n) / idx_to_f64(n) - 0.5)
        .collect();
    (x, z)
}

fn linear_design(n: usize) -> DesignMatrix {
    let (x, z) = covariates(n);
    DesignMatrix::from_columns(
        vec![
            ("const".to_owned(), vec![1.0; n]),
            ("x".to_owned(), x),
            ("z".to_owned(), z),
        ],
        false,
    )
    .expect("design")
}

fn linear_response(n: usize) -> Vec<f64> {
    let (x, z) = covariates(n);
    (0..n)
        .map(|i| 1.0 + 2.0 * x[i] - z[i] + 0.3 * (idx_to_f64(i) * 1.3).sin())
        .collect()
}

fn regression_equation(label: &str, design: DesignMatrix) -> Equation {
    let mut equation = Equation::new(label, "mean");
    equation.add_block(
        RegressionBlock::new("linear", design, RegressionOptions::default()).expect("block"),
    );
    equation
}

/// Gaussian family that records the order in which surfaces are refreshed.
#[derive(Debug)]
struct OrderRecorder {
    label: &'static str,
    calls: Rc<RefCell<Vec<&'static str>>>,
}

impl ResponseFamily for OrderRecorder {
    fn name(&self) -> &str {
        self.label
    }

    fn uses_iwls(&self) -> bool {
        false
    }

    fn working_weights_change(&self) -> bool {
        false
    }

    fn loglikelihood(&self, _obs: usize, response: f64, linpred: f64, weight: f64) -> f64 {
        -0.5 * weight * (response - linpred).powi(2)
    }

    fn iwls(&self, obs: usize, response: f64, linpred: f64, weight: f64) -> IwlsTerm {
        IwlsTerm {
            weight,
            working_response: response,
            loglikelihood: self.loglikelihood(obs, response, linpred, weight),
        }
    }

    fn inverse_link(&self, _obs: usize, linpred: f64) -> f64 {
        linpred
    }

    fn update(
        &mut self,
        _data: &mut Observations,
        _peers: &PeerPredictors<'_>,
        _rng: &mut dyn RandomSource,
    ) {
        self.calls.borrow_mut().push(self.label);
    }
}

#[test]
fn equations_are_visited_last_registered_first() {
    init_logging();
    let n = 20;
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut sampler = Sampler::new(schedule(3, 0, 1)).expect("schedule");
    for label in ["first", "second"] {
        let surface = PredictorSurface::new(
            label,
            linear_response(n),
            None,
            Box::new(OrderRecorder {
                label,
                calls: Rc::clone(&calls),
            }),
        )
        .expect("surface");
        sampler.add_equation(surface, regression_equation(label, linear_design(n)));
    }

    let report = sampler
        .simulate(&SimulateOptions::default())
        .expect("simulation");

    assert_eq!(
        *calls.borrow(),
        vec!["second", "first", "second", "first", "second", "first"]
    );
    assert_eq!(report.equations[0].label, "second");
    assert_eq!(report.equations[1].label, "first");
}

#[test]
fn gaussian_gibbs_draws_match_least_squares_moments() {
    init_logging();
    let n = 100;
    let draws = 10_000;
    let mut sampler = Sampler::new(schedule(draws, 0, 1)).expect("schedule");
    let surface = PredictorSurface::new(
        "y",
        linear_response(n),
        None,
        Box::new(Gaussian::with_fixed_scale(1.0)),
    )
    .expect("surface");
    let id = sampler.add_equation(surface, regression_equation("y", linear_design(n)));
    let report = sampler
        .simulate(&SimulateOptions::default())
        .expect("simulation");

    let design = linear_design(n);
    let cross = weighted_cross_product(design.matrix(), &vec![1.0; n]);
    let root = cholesky_lower(&cross, RANK_TOLERANCE).expect("full rank");
    let mean = solve_with_root(&root, &transpose_times(design.matrix(), &linear_response(n)));
    let covariance: Vec<Vec<f64>> = (0..3)
        .map(|col| {
            let basis: Vec<f64> = (0..3).map(|row| if row == col { 1.0 } else { 0.0 }).collect();
            solve_with_root(&root, &basis)
        })
        .collect();

    let block = report.block("y", "linear").expect("block report");
    assert_eq!(block.acceptance_rate, 1.0);
    for k in 0..3 {
        let sd = covariance[k][k].sqrt();
        assert_abs_diff_eq!(block.summaries[k].mean, mean[k], epsilon = 0.05 * sd);
        assert_abs_diff_eq!(block.summaries[k].std_dev, sd, epsilon = 0.05 * sd);
    }

    let trace = sampler.equation(id).expect("equation").blocks()[0].trace();
    let (first, second) = (trace.column(1), trace.column(2));
    let count = idx_to_f64(first.len());
    let mean_first = first.iter().sum::<f64>() / count;
    let mean_second = second.iter().sum::<f64>() / count;
    let empirical = first
        .iter()
        .zip(&second)
        .map(|(a, b)| (a - mean_first) * (b - mean_second))
        .sum::<f64>()
        / count;
    let scale = (covariance[1][1] * covariance[2][2]).sqrt();
    assert_abs_diff_eq!(empirical / scale, covariance[2][1] / scale, epsilon = 0.05);
}

#[test]
fn posterior_mode_reaches_least_squares_in_two_passes() {
    init_logging();
    let n = 60;
    let mut sampler = Sampler::new(schedule(10, 0, 1)).expect("schedule");
    let surface = PredictorSurface::new("y", linear_response(n), None, Box::new(Gaussian::default()))
        .expect("surface");
    let id = sampler.add_equation(surface, regression_equation("y", linear_design(n)));

    let mode = sampler.posterior_mode(false).expect("mode");
    assert!(mode.converged);
    assert_eq!(mode.iterations, 2);

    let design = linear_design(n);
    let cross = weighted_cross_product(design.matrix(), &vec![1.0; n]);
    let root = cholesky_lower(&cross, RANK_TOLERANCE).expect("full rank");
    let expected = solve_with_root(&root, &transpose_times(design.matrix(), &linear_response(n)));
    let block = sampler.equation(id).expect("equation").blocks()[0]
        .as_regression()
        .expect("regression");
    assert!(max_abs_diff(block.beta(), &expected) < 1.0e-8);
}

#[test]
fn duplicated_column_disables_block_without_moving_coefficients() {
    init_logging();
    let n = 40;
    let (x, _) = covariates(n);
    let design = DesignMatrix::from_columns(
        vec![("x".to_owned(), x.clone()), ("x_again".to_owned(), x)],
        false,
    )
    .expect("design");
    let mut sampler = Sampler::new(schedule(20, 0, 1)).expect("schedule");
    let surface = PredictorSurface::new(
        "y",
        linear_response(n),
        None,
        Box::new(Gaussian::with_fixed_scale(1.0)),
    )
    .expect("surface");
    let id = sampler.add_equation(surface, regression_equation("y", design));

    let report = sampler
        .simulate(&SimulateOptions {
            compute_mode: true,
            ..SimulateOptions::default()
        })
        .expect("rank deficiency is not fatal");

    let block = report.block("y", "linear").expect("block report");
    assert!(block.disabled);
    let regression = sampler.equation(id).expect("equation").blocks()[0]
        .as_regression()
        .expect("regression");
    assert_eq!(regression.beta(), &[0.0, 0.0]);
    assert!(sampler.surface(id).expect("surface").linpred().iter().all(|eta| *eta == 0.0));
}

#[test]
fn probit_latent_utilities_recover_slope_sign() {
    init_logging();
    let n = 200;
    let (x, _) = covariates(n);
    let response: Vec<f64> = (0..n)
        .map(|i| {
            let noise = (idx_to_f64(i) * 2.7).sin();
            if 3.0 * x[i] + noise > 0.0 { 1.0 } else { 0.0 }
        })
        .collect();
    let design = DesignMatrix::from_columns(
        vec![("const".to_owned(), vec![1.0; n]), ("x".to_owned(), x)],
        false,
    )
    .expect("design");
    let mut sampler = Sampler::new(schedule(600, 100, 5)).expect("schedule");
    let surface =
        PredictorSurface::new("y", response, None, Box::new(BinomialProbit)).expect("surface");
    sampler.add_equation(surface, regression_equation("y", design));

    let report = sampler
        .simulate(&SimulateOptions::default())
        .expect("simulation");
    let block = report.block("y", "linear").expect("block report");
    assert_eq!(block.summaries.len(), 2);
    assert!(block.summaries[1].mean > 1.0);
}

#[test]
fn location_and_log_variance_equations_run_together() {
    init_logging();
    let n = 120;
    let (x, _) = covariates(n);
    let response: Vec<f64> = (0..n)
        .map(|i| x[i] + (0.5 + x[i]).max(0.1) * (idx_to_f64(i) * 1.9).sin())
        .collect();
    let design = || {
        DesignMatrix::from_columns(
            vec![("const".to_owned(), vec![1.0; n]), ("x".to_owned(), x.clone())],
            false,
        )
        .expect("design")
    };

    let mut sampler = Sampler::new(schedule(400, 100, 2)).expect("schedule");
    let location = PredictorSurface::new(
        "mu",
        response.clone(),
        None,
        Box::new(GaussianLocation::new(EquationId::new(1), n)),
    )
    .expect("surface");
    let log_variance = PredictorSurface::new(
        "sigma2",
        response,
        None,
        Box::new(GaussianLogVariance::new(EquationId::new(0), n)),
    )
    .expect("surface");
    let mu = sampler.add_equation(location, regression_equation("mu", design()));
    let sigma = sampler.add_equation(log_variance, regression_equation("sigma2", design()));

    let report = sampler
        .simulate(&SimulateOptions {
            compute_mode: true,
            ..SimulateOptions::default()
        })
        .expect("simulation");

    for id in [mu, sigma] {
        let surface = sampler.surface(id).expect("surface");
        assert!(surface.linpred().iter().all(|eta| eta.is_finite()));
        let regression = sampler.equation(id).expect("equation").blocks()[0]
            .as_regression()
            .expect("regression");
        let expected = design_times(regression.design().matrix(), regression.beta());
        assert!(max_abs_diff(surface.linpred(), &expected) < 1.0e-8);
    }
    let slope = report.block("mu", "linear").expect("block report").summaries[1].mean;
    assert!(slope > 0.0 && slope < 2.0);
    assert!(report.mode.is_some());
}

#[test]
fn change_variable_and_reset_keep_predictor_consistent() {
    init_logging();
    let n = 30;
    let mut sampler = Sampler::new(schedule(50, 10, 1)).expect("schedule");
    let surface = PredictorSurface::new(
        "y",
        linear_response(n),
        None,
        Box::new(Gaussian::with_fixed_scale(0.5)),
    )
    .expect("surface");
    let id = sampler.add_equation(surface, regression_equation("y", linear_design(n)));
    sampler
        .simulate(&SimulateOptions::default())
        .expect("simulation");

    let replacement: Vec<f64> = (0..n).map(|i| idx_to_f64(i % 3)).collect();
    sampler
        .change_variable(id, structadd_mcmc::BlockId::new(0), 2, &replacement)
        .expect("change variable");
    let regression = sampler.equation(id).expect("equation").blocks()[0]
        .as_regression()
        .expect("regression");
    let expected = design_times(regression.design().matrix(), regression.beta());
    assert!(max_abs_diff(sampler.surface(id).expect("surface").linpred(), &expected) < 1.0e-10);

    let autocorrelations = sampler.autocorrelations(5);
    assert_eq!(autocorrelations.len(), 3);
    assert!(autocorrelations.iter().all(|acf| acf.values.len() == 5));

    sampler.reset();
    assert!(sampler.surface(id).expect("surface").linpred().iter().all(|eta| *eta == 0.0));
    let block = &sampler.equation(id).expect("equation").blocks()[0];
    assert!(block.trace().samples().is_empty());
    assert_eq!(block.acceptance().proposed, 0);
}

#[test]
fn results_file_ends_with_mean_effect_row() {
    init_logging();
    let n = 40;
    let mut sampler = Sampler::new(schedule(300, 100, 2)).expect("schedule");
    let surface = PredictorSurface::new(
        "y",
        linear_response(n),
        None,
        Box::new(Gaussian::with_fixed_scale(0.5)),
    )
    .expect("surface");
    let id = sampler.add_equation(surface, regression_equation("y", linear_design(n)));
    let prefix = std::env::temp_dir().join(format!("structadd_mean_effect_{}", std::process::id()));
    let report = sampler
        .simulate(&SimulateOptions {
            output_prefix: Some(prefix),
            ..SimulateOptions::default()
        })
        .expect("simulation");

    let regression = sampler.equation(id).expect("equation").blocks()[0]
        .as_regression()
        .expect("regression");
    let row = regression.design().mean_effect_row();
    let draws: Vec<f64> = regression
        .trace()
        .samples()
        .iter()
        .map(|beta| row.iter().zip(beta).map(|(x, b)| x * b).sum())
        .collect();
    let expected = draws.iter().sum::<f64>() / idx_to_f64(draws.len());

    let effect = report
        .block("y", "linear")
        .and_then(|block| block.mean_effect)
        .expect("mean effect");
    assert_abs_diff_eq!(effect.summary.mean, expected, epsilon = 1.0e-10);
    assert_abs_diff_eq!(effect.current, regression.mean_effect(), epsilon = 1.0e-12);

    let results = report
        .files
        .iter()
        .find(|path| path.to_string_lossy().ends_with("_y_linear.res"))
        .expect("results file");
    let content = std::fs::read_to_string(results).expect("readable");
    let last = content.lines().last().expect("rows");
    let fields: Vec<&str> = last.split('\t').collect();
    assert_eq!(fields[0], "4");
    assert_eq!(fields[1], "mean_effect");
    let written: f64 = fields[2].parse().expect("numeric mean");
    assert_abs_diff_eq!(written, expected, epsilon = 1.0e-10);
    for path in &report.files {
        let _ = std::fs::remove_file(path);
    }
}
