use ndarray::ArrayD;

use crate::error::{Result, TrainError};
use crate::optim::optimizer::{Optimizer, OptimizerState};
use crate::tensor::Tensor;

/// Adam with bias correction and optional decoupled weight decay.
pub struct AdamOptimizer {
    lr: f32,
    current_beta1: f32,
    beta1: f32,
    current_beta2: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    parameters: Vec<Tensor>,
    m: Vec<ArrayD<f32>>, // First moment vector
    v: Vec<ArrayD<f32>>, // Second moment vector
    t: u32,              // Time step
}

impl AdamOptimizer {
    pub fn new(
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
        parameters: Vec<Tensor>,
    ) -> AdamOptimizer {
        let m = parameters.iter().map(|p| ArrayD::zeros(p.shape())).collect();
        let v = parameters.iter().map(|p| ArrayD::zeros(p.shape())).collect();
        AdamOptimizer {
            lr,
            current_beta1: 1.0,
            beta1,
            current_beta2: 1.0,
            beta2,
            epsilon,
            weight_decay,
            parameters,
            m,
            v,
            t: 0,
        }
    }

    pub fn new_with_defaults(lr: f32, parameters: Vec<Tensor>) -> AdamOptimizer {
        AdamOptimizer::new(lr, 0.9, 0.999, 1e-8, 0.0, parameters)
    }

    pub fn steps(&self) -> u32 {
        self.t
    }
}

impl Optimizer for AdamOptimizer {
    fn step(&mut self) {
        self.t += 1;
        self.current_beta1 *= self.beta1;
        self.current_beta2 *= self.beta2;
        for (idx, param) in self.parameters.iter().enumerate() {
            let Some(grad) = param.grad() else {
                continue;
            };
            self.m[idx] = self.beta1 * &self.m[idx] + (1.0 - self.beta1) * &grad;
            self.v[idx] = self.beta2 * &self.v[idx] + (1.0 - self.beta2) * grad.mapv(|g| g * g);

            let m_hat = &self.m[idx] / (1.0 - self.current_beta1);
            let v_hat = &self.v[idx] / (1.0 - self.current_beta2);

            let mut update = -self.lr * m_hat / (v_hat.mapv(f32::sqrt) + self.epsilon);
            if self.weight_decay > 0.0 {
                update = update - self.lr * self.weight_decay * &param.data();
            }
            param.add_value(&update);
        }
    }

    fn zero_grad(&self) {
        for param in self.parameters.iter() {
            param.zero_grad();
        }
    }

    fn parameters(&self) -> &[Tensor] {
        &self.parameters
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Adam {
            t: self.t,
            current_beta1: self.current_beta1,
            current_beta2: self.current_beta2,
            m: self.m.clone(),
            v: self.v.clone(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        let OptimizerState::Adam {
            t,
            current_beta1,
            current_beta2,
            m,
            v,
        } = state
        else {
            return Err(TrainError::configuration("cannot load SGD state into Adam"));
        };
        let shapes_match = m.len() == self.parameters.len()
            && v.len() == self.parameters.len()
            && self
                .parameters
                .iter()
                .zip(m.iter().zip(v.iter()))
                .all(|(p, (m, v))| p.shape() == m.shape() && p.shape() == v.shape());
        if !shapes_match {
            return Err(TrainError::configuration(
                "Adam moments do not match the parameter list",
            ));
        }
        self.t = t;
        self.current_beta1 = current_beta1;
        self.current_beta2 = current_beta2;
        self.m = m;
        self.v = v;
        Ok(())
    }
}
