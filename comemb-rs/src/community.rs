//! Gaussian mixture over the node embedding space.
//!
//! The mixture is fit by EM with full covariance matrices. Every M-step adds
//! a fixed diagonal loading (`reg_covar`) to each covariance and recomputes
//! the cached precision matrices and log-determinants immediately, so the
//! cached values never disagree with the covariances.
//!
//! The per-node responsibilities of the last sweep are kept and feed the
//! regularization gradient of the embedding trainers:
//!
//! ```text
//! R(x_i)  = ½ Σ_k γ_ik (x_i - μ_k)ᵀ Σ_k⁻¹ (x_i - μ_k)
//! ∇R(x_i) =   Σ_k γ_ik Σ_k⁻¹ (x_i - μ_k)
//! ```

use crate::distances::centered;
use crate::distances::mahalanobis_sq;
use crate::error::Error;
use crate::error::Result;
use crate::linalg::symmetrize;
use crate::linalg::SpdFactor;
use crate::model::Model;
use crate::utils::ensure_finite;
use crate::utils::seed::derive_seed;
use ndarray::s;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Array3;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::ArrayView3;
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Deserialize;
use serde::Serialize;
use std::f64::consts::PI;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::debug;
use tracing::info;

/// Mixture parameters: weights, centroids, covariances and their cached
/// inverses, plus the responsibilities of the most recent fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Communities {
  k: usize,
  dim: usize,
  reg_covar: f64,
  weights: Array1<f64>,
  centroids: Array2<f64>,
  covariances: Array3<f64>,
  precisions: Array3<f64>,
  log_dets: Array1<f64>,
  responsibilities: Array2<f64>,
  fitted: bool,
}

impl Communities {
  /// Uniform weights, zero centroids and `(1 + reg_covar) I` covariances.
  pub fn new(k: usize, dim: usize, reg_covar: f64) -> Self {
    let variance = 1.0 + reg_covar;
    let mut covariances = Array3::<f64>::zeros((k, dim, dim));
    let mut precisions = Array3::<f64>::zeros((k, dim, dim));
    for c in 0..k {
      for d in 0..dim {
        covariances[(c, d, d)] = variance;
        precisions[(c, d, d)] = 1.0 / variance;
      }
    }

    Self {
      k,
      dim,
      reg_covar,
      weights: Array1::from_elem(k, 1.0 / k as f64),
      centroids: Array2::zeros((k, dim)),
      covariances,
      precisions,
      log_dets: Array1::from_elem(k, dim as f64 * variance.ln()),
      responsibilities: Array2::zeros((0, k)),
      fitted: false,
    }
  }

  pub fn k(&self) -> usize {
    self.k
  }

  pub fn dim(&self) -> usize {
    self.dim
  }

  pub fn reg_covar(&self) -> f64 {
    self.reg_covar
  }

  /// Mixture weights (π), summing to 1.
  pub fn weights(&self) -> ArrayView1<'_, f64> {
    self.weights.view()
  }

  pub fn centroids(&self) -> ArrayView2<'_, f64> {
    self.centroids.view()
  }

  pub fn covariances(&self) -> ArrayView3<'_, f64> {
    self.covariances.view()
  }

  pub fn precisions(&self) -> ArrayView3<'_, f64> {
    self.precisions.view()
  }

  /// Posterior responsibilities (num_nodes × k) under the current
  /// parameters. Empty until the first fit.
  pub fn responsibilities(&self) -> ArrayView2<'_, f64> {
    self.responsibilities.view()
  }

  /// Whether at least one EM sweep has run.
  pub fn is_fitted(&self) -> bool {
    self.fitted
  }

  /// Most responsible component for every node.
  pub fn assignments(&self) -> Vec<usize> {
    self
      .responsibilities
      .outer_iter()
      .map(|row| {
        row
          .iter()
          .enumerate()
          .fold((0, f64::NEG_INFINITY), |best, (c, &r)| {
            if r > best.1 {
              (c, r)
            } else {
              best
            }
          })
          .0
      })
      .collect()
  }

  fn refresh_precisions(&mut self) -> Result<()> {
    for c in 0..self.k {
      let covariance = self.covariances.slice(s![c, .., ..]);
      let factor = SpdFactor::new(&covariance).ok_or_else(|| Error::NumericalInstability {
        stage: "community M-step",
        detail: format!("covariance of component {c} is not positive definite"),
      })?;
      let precision = factor.inverse();
      if precision.iter().any(|v| !v.is_finite()) {
        return Err(Error::NumericalInstability {
          stage: "community M-step",
          detail: format!("precision of component {c} is not finite"),
        });
      }
      self.precisions.slice_mut(s![c, .., ..]).assign(&precision);
      self.log_dets[c] = factor.log_det();
    }
    Ok(())
  }

  /// k-means++ style centroid seeding, data covariance for every component
  /// and uniform weights.
  fn seed_from_data<R: Rng>(&mut self, data: &Array2<f64>, rng: &mut R) -> Result<()> {
    let n = data.nrows();
    let sq_dist = |a: ArrayView1<f64>, b: ArrayView1<f64>| -> f64 {
      a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
    };

    let first = rng.random_range(0..n);
    self.centroids.row_mut(0).assign(&data.row(first));
    let mut closest: Vec<f64> = data
      .outer_iter()
      .map(|row| sq_dist(row, self.centroids.row(0)))
      .collect();

    for c in 1..self.k {
      let total: f64 = closest.iter().sum();
      let pick = if total > 0.0 {
        let mut target = rng.random::<f64>() * total;
        let mut chosen = n - 1;
        for (i, &d) in closest.iter().enumerate() {
          if target < d {
            chosen = i;
            break;
          }
          target -= d;
        }
        chosen
      } else {
        rng.random_range(0..n)
      };
      self.centroids.row_mut(c).assign(&data.row(pick));
      for (i, row) in data.outer_iter().enumerate() {
        closest[i] = closest[i].min(sq_dist(row, self.centroids.row(c)));
      }
    }

    let mean = data.sum_axis(Axis(0)) / n as f64;
    let diff = data - &mean;
    let mut covariance = symmetrize(&(diff.t().dot(&diff) / n as f64).view());
    for v in covariance.diag_mut() {
      *v += self.reg_covar;
    }
    for c in 0..self.k {
      self.covariances.slice_mut(s![c, .., ..]).assign(&covariance);
    }
    self.weights.fill(1.0 / self.k as f64);
    self.refresh_precisions()
  }

  /// `log π_k + log N(x | μ_k, Σ_k)` for every component.
  fn weighted_log_probs(&self, x: &[f32], out: &mut [f64], diff: &mut [f64]) {
    let norm = self.dim as f64 * (2.0 * PI).ln();
    for (c, lp) in out.iter_mut().enumerate() {
      centered(x, &self.centroids.row(c), diff);
      let maha = mahalanobis_sq(diff, &self.precisions.slice(s![c, .., ..]));
      *lp = self.weights[c].ln() - 0.5 * (norm + self.log_dets[c] + maha);
    }
  }

  /// Responsibilities of every node and the total log-likelihood. Rows are
  /// evaluated in parallel on the caller's pool; the likelihood is summed in
  /// row order so repeated calls agree bit for bit.
  fn e_step(&self, embedding: &ArrayView2<f32>) -> Result<(Array2<f64>, f64)> {
    let n = embedding.nrows();
    let rows: Vec<(Vec<f64>, f64)> = (0..n)
      .into_par_iter()
      .map(|i| {
        let x = embedding.row(i).to_vec();
        let mut diff = vec![0.0; self.dim];
        let mut log_probs = vec![0.0; self.k];
        self.weighted_log_probs(&x, &mut log_probs, &mut diff);
        let lse = log_sum_exp(&log_probs);
        for lp in log_probs.iter_mut() {
          *lp = (*lp - lse).exp();
        }
        (log_probs, lse)
      })
      .collect();

    let mut responsibilities = Array2::<f64>::zeros((n, self.k));
    let mut log_likelihood = 0.0;
    for (i, (resp, lse)) in rows.into_iter().enumerate() {
      if !lse.is_finite() {
        return Err(Error::NumericalInstability {
          stage: "community E-step",
          detail: format!("log-likelihood of node row {i} is {lse}"),
        });
      }
      log_likelihood += lse;
      responsibilities
        .row_mut(i)
        .assign(&ArrayView1::from(resp.as_slice()));
    }
    Ok((responsibilities, log_likelihood))
  }

  fn m_step(&mut self, data: &Array2<f64>, responsibilities: &Array2<f64>) -> Result<()> {
    let mut nk = responsibilities.sum_axis(Axis(0));
    nk += 10.0 * f64::EPSILON;
    self.weights = &nk / nk.sum();
    self.centroids = responsibilities.t().dot(data) / &nk.view().insert_axis(Axis(1));

    for c in 0..self.k {
      let diff = data - &self.centroids.row(c);
      let weighted = &diff * &responsibilities.column(c).insert_axis(Axis(1));
      let mut covariance = symmetrize(&(weighted.t().dot(&diff) / nk[c]).view());
      for v in covariance.diag_mut() {
        *v += self.reg_covar;
      }
      self.covariances.slice_mut(s![c, .., ..]).assign(&covariance);
    }

    self.refresh_precisions()
  }

  /// Gradient of the regularizer at embedding `x` of node row `node`,
  /// written to `out`. Returns false (and zeroes `out`) when no
  /// responsibilities are available for that row.
  pub(crate) fn gradient(&self, node: usize, x: &[f32], out: &mut [f32], diff: &mut [f64]) -> bool {
    out.fill(0.0);
    if !self.fitted || node >= self.responsibilities.nrows() {
      return false;
    }
    for c in 0..self.k {
      let gamma = self.responsibilities[(node, c)];
      if gamma <= 0.0 {
        continue;
      }
      centered(x, &self.centroids.row(c), diff);
      let precision = self.precisions.slice(s![c, .., ..]);
      for (o, row) in out.iter_mut().zip(precision.outer_iter()) {
        let projected: f64 = row.iter().zip(diff.iter()).map(|(p, d)| p * d).sum();
        *o += (gamma * projected) as f32;
      }
    }
    true
  }

  /// `Σ_i R(x_i)` under the cached responsibilities. Zero before the first
  /// fit.
  pub fn regularization_loss(&self, embedding: &ArrayView2<f32>) -> f64 {
    if !self.fitted || self.responsibilities.nrows() != embedding.nrows() {
      return 0.0;
    }
    let mut diff = vec![0.0; self.dim];
    let mut total = 0.0;
    for (i, row) in embedding.outer_iter().enumerate() {
      let x = row.to_vec();
      for c in 0..self.k {
        let gamma = self.responsibilities[(i, c)];
        if gamma <= 0.0 {
          continue;
        }
        centered(&x, &self.centroids.row(c), &mut diff);
        total += 0.5 * gamma * mahalanobis_sq(&diff, &self.precisions.slice(s![c, .., ..]));
      }
    }
    total
  }
}

fn log_sum_exp(values: &[f64]) -> f64 {
  let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  if !max.is_finite() {
    return max;
  }
  max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Fits the Gaussian mixture to the node embeddings, one or more EM sweeps
/// per call.
pub struct CommunityTrainer {
  em_sweeps: usize,
  seed: u64,
  calls: AtomicU64,
  pool: ThreadPool,
}

impl CommunityTrainer {
  pub fn new(workers: usize, em_sweeps: usize, seed: u64) -> Result<Self> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    Ok(Self {
      em_sweeps: em_sweeps.max(1),
      seed,
      calls: AtomicU64::new(0),
      pool,
    })
  }

  /// Run the configured EM sweeps on the current node embeddings, then
  /// refresh the cached responsibilities under the new parameters.
  ///
  /// On the first call the parameters are seeded from the data.
  pub fn train(&self, model: &mut Model) -> Result<()> {
    let call = self.calls.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let (embedding, communities) = model.community_parts_mut();
    ensure_finite(&embedding.view(), "community E-step")?;
    let data = embedding.mapv(f64::from);

    if !communities.fitted {
      let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, &[call]));
      communities.seed_from_data(&data, &mut rng)?;
      debug!(k = communities.k, "community parameters seeded from embeddings");
    }

    let view = embedding.view();
    for sweep in 0..self.em_sweeps {
      let (responsibilities, log_likelihood) = self.pool.install(|| communities.e_step(&view))?;
      communities.m_step(&data, &responsibilities)?;
      debug!(sweep, log_likelihood, "EM sweep");
    }

    let (responsibilities, log_likelihood) = self.pool.install(|| communities.e_step(&view))?;
    communities.responsibilities = responsibilities;
    communities.fitted = true;

    info!(
      duration_ms = started.elapsed().as_millis(),
      k = communities.k,
      negative_log_likelihood = -log_likelihood,
      "community training complete"
    );
    Ok(())
  }

  /// Negative log-likelihood of the node embeddings under the current
  /// mixture. Does not modify the model.
  pub fn loss(&self, model: &Model) -> Result<f64> {
    let embedding = model.node_embedding();
    ensure_finite(&embedding, "community loss")?;
    let communities = model.communities();
    let (_, log_likelihood) = self.pool.install(|| communities.e_step(&embedding))?;
    Ok(-log_likelihood)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::InitModel;
  use ndarray::array;
  use proptest::prelude::*;
  use rand::rngs::StdRng;
  use rand::Rng;
  use std::collections::HashMap;

  fn ring_model() -> Model {
    let counts: HashMap<u32, u64> = (0..6).map(|n| (n, 2)).collect();
    InitModel::builder()
      .counts(&counts)
      .representation_size(2)
      .k(2)
      .table_size(64)
      .reg_covar(0.001)
      .build()
      .exec()
      .unwrap()
  }

  fn two_clusters(n_per: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((2 * n_per, 2), |(i, _)| {
      let base = if i < n_per { -2.0 } else { 2.0 };
      base + rng.random_range(-0.3..0.3)
    })
  }

  fn fit(embedding: &Array2<f32>, k: usize, sweeps: usize) -> Communities {
    let data = embedding.mapv(f64::from);
    let mut communities = Communities::new(k, embedding.ncols(), 1e-4);
    let mut rng = StdRng::seed_from_u64(3);
    communities.seed_from_data(&data, &mut rng).unwrap();
    for _ in 0..sweeps {
      let (resp, _) = communities.e_step(&embedding.view()).unwrap();
      communities.m_step(&data, &resp).unwrap();
    }
    let (resp, _) = communities.e_step(&embedding.view()).unwrap();
    communities.responsibilities = resp;
    communities.fitted = true;
    communities
  }

  #[test]
  fn initial_precisions_invert_covariances() {
    let communities = Communities::new(3, 4, 0.01);
    let product = communities
      .covariances()
      .slice(s![1usize, .., ..])
      .dot(&communities.precisions().slice(s![1usize, .., ..]));
    for i in 0..4 {
      for j in 0..4 {
        let expected = if i == j { 1.0 } else { 0.0 };
        assert!((product[(i, j)] - expected).abs() < 1e-12);
      }
    }
    assert!((communities.weights().sum() - 1.0).abs() < 1e-12);
  }

  #[test]
  fn separates_two_clusters() {
    let embedding = two_clusters(20, 5);
    let communities = fit(&embedding, 2, 10);
    let assignments = communities.assignments();
    assert!(assignments[..20].iter().all(|&a| a == assignments[0]));
    assert!(assignments[20..].iter().all(|&a| a == assignments[20]));
    assert_ne!(assignments[0], assignments[20]);
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn m_step_invariants_hold(k in 1usize..=4, seed in 0u64..1000, sweeps in 1usize..4) {
      let embedding = two_clusters(15, seed);
      let communities = fit(&embedding, k, sweeps);

      prop_assert!((communities.weights().sum() - 1.0).abs() < 1e-9);
      prop_assert!(communities.weights().iter().all(|&w| w >= 0.0));
      for c in 0..k {
        let cov = communities.covariances().slice(s![c, .., ..]).to_owned();
        prop_assert_eq!(&cov, &cov.t());
        prop_assert!(cov.diag().iter().all(|&v| v >= communities.reg_covar()));

        let product = cov.dot(&communities.precisions().slice(s![c, .., ..]));
        for i in 0..2 {
          for j in 0..2 {
            let expected = if i == j { 1.0 } else { 0.0 };
            prop_assert!((product[(i, j)] - expected).abs() < 1e-6);
          }
        }
      }
      for row in communities.responsibilities().outer_iter() {
        prop_assert!((row.sum() - 1.0).abs() < 1e-9);
      }
    }
  }

  #[test]
  fn single_point_cluster_stays_invertible() {
    let embedding = array![[0.5f32, 0.5], [0.5, 0.5], [0.5, 0.5]];
    let communities = fit(&embedding, 2, 2);
    for c in 0..2 {
      let cov = communities.covariances().slice(s![c, .., ..]).to_owned();
      assert!(cov.diag().iter().all(|&v| v >= 1e-4));
    }
  }

  #[test]
  fn gradient_points_away_from_centroid() {
    let embedding = two_clusters(10, 9);
    let communities = fit(&embedding, 2, 5);
    let x = embedding.row(0).to_vec();
    let mut out = vec![0.0f32; 2];
    let mut diff = vec![0.0f64; 2];
    assert!(communities.gradient(0, &x, &mut out, &mut diff));

    // A small step against the gradient lowers the regularizer.
    let before = communities.regularization_loss(&embedding.view());
    let mut moved = embedding.clone();
    for d in 0..2 {
      moved[(0, d)] -= 1e-4 * out[d];
    }
    let after = communities.regularization_loss(&moved.view());
    assert!(after <= before);
  }

  #[test]
  fn unfitted_gradient_is_zero() {
    let communities = Communities::new(2, 3, 1e-3);
    let mut out = vec![1.0f32; 3];
    let mut diff = vec![0.0f64; 3];
    assert!(!communities.gradient(0, &[1.0, 2.0, 3.0], &mut out, &mut diff));
    assert!(out.iter().all(|&v| v == 0.0));
  }

  #[test]
  fn indefinite_covariance_is_reported() {
    let mut communities = Communities::new(2, 2, 1e-3);
    communities
      .covariances
      .slice_mut(s![1, .., ..])
      .assign(&array![[1.0, 2.0], [2.0, 1.0]]);
    assert!(matches!(
      communities.refresh_precisions(),
      Err(Error::NumericalInstability { stage: "community M-step", .. })
    ));
  }

  #[test]
  fn loss_is_pure() {
    let mut model = ring_model();
    let trainer = CommunityTrainer::new(1, 2, 7).unwrap();
    trainer.train(&mut model).unwrap();

    let snapshot = model.clone();
    let a = trainer.loss(&model).unwrap();
    let b = trainer.loss(&model).unwrap();
    assert!(a.is_finite());
    assert_eq!(a, b);
    assert_eq!(model, snapshot);
  }

  #[test]
  fn non_finite_embedding_is_rejected() {
    let trainer = CommunityTrainer::new(1, 1, 7).unwrap();

    let mut model = ring_model();
    model.embedding_parts_mut().node_embedding[(0, 0)] = f32::NAN;
    let untouched = model.communities().clone();
    assert!(matches!(
      trainer.train(&mut model),
      Err(Error::NumericalInstability { stage: "community E-step", .. })
    ));
    assert_eq!(model.communities(), &untouched);

    let mut model = ring_model();
    model.embedding_parts_mut().node_embedding[(2, 1)] = f32::INFINITY;
    assert!(matches!(
      trainer.loss(&model),
      Err(Error::NumericalInstability { stage: "community loss", .. })
    ));
  }

  #[test]
  fn log_sum_exp_is_stable() {
    let value = log_sum_exp(&[-1000.0, -1000.0]);
    assert!((value - (-1000.0 + 2.0f64.ln())).abs() < 1e-9);
  }
}
