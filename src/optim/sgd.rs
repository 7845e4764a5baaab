use crate::error::{Result, TrainError};
use crate::optim::optimizer::{Optimizer, OptimizerState};
use crate::tensor::Tensor;

pub struct SGDOptimizer {
    lr: f32,
    parameters: Vec<Tensor>,
}

impl SGDOptimizer {
    pub fn new(lr: f32, parameters: Vec<Tensor>) -> SGDOptimizer {
        SGDOptimizer { lr, parameters }
    }

    pub fn update_lr(&mut self, new_lr: f32) {
        self.lr = new_lr;
    }
}

impl Optimizer for SGDOptimizer {
    fn step(&mut self) {
        for param in self.parameters.iter() {
            if let Some(grad) = param.grad() {
                param.add_value(&(grad * -self.lr));
            }
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
        OptimizerState::Sgd
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Sgd => Ok(()),
            other => Err(TrainError::configuration(format!(
                "cannot load {other:?} into SGD"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_sgd_step() {
        let param = Tensor::new(array![1.0, 2.0].into_dyn());
        let untouched = Tensor::new(array![5.0].into_dyn());
        let mut optimiser = SGDOptimizer::new(0.1, vec![param.clone(), untouched.clone()]);

        (param.clone() * param.clone()).sum().backward();
        optimiser.step();
        // p - lr * 2p
        let data = param.data();
        assert!((data[0] - 0.8).abs() < 1e-6);
        assert!((data[1] - 1.6).abs() < 1e-6);
        assert_eq!(untouched.data(), array![5.0].into_dyn());

        optimiser.zero_grad();
        assert!(param.grad().is_none());
    }

    #[test]
    fn test_sgd_fits_line() {
        let weight = Tensor::new(array![0.0].into_dyn());
        let mut optimiser = SGDOptimizer::new(0.05, vec![weight.clone()]);
        let x = Tensor::constant(array![1.0, 2.0, 3.0].into_dyn());
        let y = Tensor::constant(array![2.0, 4.0, 6.0].into_dyn());
        for _ in 0..200 {
            optimiser.zero_grad();
            let error = x.clone() * weight.clone() - y.clone();
            (error.clone() * error).mean().backward();
            optimiser.step();
        }
        assert!((weight.data()[0] - 2.0).abs() < 1e-3);
        optimiser.update_lr(0.01);
        assert_eq!(optimiser.learning_rate(), 0.01);
    }
}
