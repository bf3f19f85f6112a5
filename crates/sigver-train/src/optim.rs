//! AdamW with inspectable moment state, plus global-norm gradient clipping.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, Var};
use candle_nn::{Optimizer, VarMap};
use serde::{Deserialize, Serialize};
use sigver_model::is_buffer;

/// AdamW hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamWParams {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamWParams {
    fn default() -> Self {
        Self {
            lr: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        }
    }
}

#[derive(Debug)]
struct ParamState {
    name: String,
    var: Var,
    m: Var,
    v: Var,
}

/// Decoupled-weight-decay Adam.
///
/// Parameters are kept by name so the first and second moments can be
/// written into a checkpoint and restored later.
#[derive(Debug)]
pub struct AdamW {
    params: Vec<ParamState>,
    config: AdamWParams,
    step: usize,
}

impl AdamW {
    /// Tracks every trainable variable of `var_map`, in name order.
    /// Batch-norm running statistics are skipped.
    pub fn from_var_map(var_map: &VarMap, config: AdamWParams) -> Result<Self> {
        let data = match var_map.data().lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut named: Vec<(String, Var)> = data
            .iter()
            .filter(|(name, _)| !is_buffer(name))
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        drop(data);
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Self::with_names(named, config)
    }

    fn with_names(named: Vec<(String, Var)>, config: AdamWParams) -> Result<Self> {
        let params = named
            .into_iter()
            .filter(|(_, var)| var.dtype().is_float())
            .map(|(name, var)| {
                let m = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let v = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(ParamState { name, var, m, v })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            params,
            config,
            step: 0,
        })
    }

    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn params(&self) -> &AdamWParams {
        &self.config
    }

    pub fn num_tracked(&self) -> usize {
        self.params.len()
    }

    /// Tracked variables, for gradient clipping.
    pub fn vars(&self) -> Vec<&Var> {
        self.params.iter().map(|p| &p.var).collect()
    }

    /// First and second moments keyed by parameter name.
    pub fn state_tensors(&self) -> (HashMap<String, Tensor>, HashMap<String, Tensor>) {
        let m = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.m.as_tensor().clone()))
            .collect();
        let v = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.v.as_tensor().clone()))
            .collect();
        (m, v)
    }

    /// Restores moments and step count. Parameters absent from `m`/`v` keep
    /// zero moments; a shape mismatch is an error.
    pub fn load_state(
        &mut self,
        step: usize,
        m: &HashMap<String, Tensor>,
        v: &HashMap<String, Tensor>,
    ) -> Result<()> {
        for p in &self.params {
            if let Some(t) = m.get(&p.name) {
                p.m.set(&t.to_device(p.var.device())?)?;
            }
            if let Some(t) = v.get(&p.name) {
                p.v.set(&t.to_device(p.var.device())?)?;
            }
        }
        self.step = step;
        Ok(())
    }
}

impl Optimizer for AdamW {
    type Config = AdamWParams;

    /// Unnamed variables are keyed by position.
    fn new(vars: Vec<Var>, config: AdamWParams) -> Result<Self> {
        let named = vars
            .into_iter()
            .enumerate()
            .map(|(i, var)| (i.to_string(), var))
            .collect();
        Self::with_names(named, config)
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step += 1;
        let c = &self.config;
        let lr = c.lr;
        let scale_m = 1.0 / (1.0 - c.beta1.powi(self.step as i32));
        let scale_v = 1.0 / (1.0 - c.beta2.powi(self.step as i32));
        for p in &self.params {
            let Some(g) = grads.get(p.var.as_tensor()) else {
                continue;
            };
            let next_m = ((p.m.as_tensor() * c.beta1)? + (g * (1.0 - c.beta1))?)?;
            let next_v = ((p.v.as_tensor() * c.beta2)? + (g.sqr()? * (1.0 - c.beta2))?)?;
            let m_hat = (&next_m * scale_m)?;
            let v_hat = (&next_v * scale_v)?;
            let decayed = (p.var.as_tensor() * (1.0 - lr * c.weight_decay))?;
            let update = (m_hat / (v_hat.sqrt()? + c.eps)?)?;
            let next = (decayed - (update * lr)?)?;
            p.m.set(&next_m)?;
            p.v.set(&next_v)?;
            p.var.set(&next)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

/// Scales every gradient so their global L2 norm is at most `max_norm`.
///
/// Returns the norm measured before clipping. A non-finite norm is an error,
/// so a NaN gradient never reaches the optimizer.
pub fn clip_grad_norm(vars: &[&Var], grads: &mut GradStore, max_norm: f64) -> Result<f64> {
    let mut sq_sum = 0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            sq_sum += g.sqr()?.sum_all()?.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?;
        }
    }
    let norm = sq_sum.sqrt();
    if !norm.is_finite() {
        candle_core::bail!("non-finite gradient norm {norm}");
    }
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars {
            if let Some(g) = grads.get(var.as_tensor()) {
                let clipped = (g * scale)?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }
    Ok(norm)
}
