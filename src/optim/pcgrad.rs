//! Gradient surgery for multi-task training.
//!
//! Each task loss is backpropagated on its own. Whenever two task gradients
//! conflict (negative dot product), the conflicting component of one is
//! projected away along the other before the per-parameter sum is handed to
//! the wrapped optimizer.

use ndarray::{Array1, ArrayD};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TrainError};
use crate::optim::optimizer::{Optimizer, OptimizerState};
use crate::random::TensorRng;
use crate::tensor::Tensor;

/// Gradients of one task loss over the optimizer's parameters, in canonical
/// order. `None` marks a parameter the loss never reached.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskGradient {
    pub grads: Vec<Option<ArrayD<f32>>>,
}

impl TaskGradient {
    fn capture(parameters: &[Tensor]) -> TaskGradient {
        TaskGradient {
            grads: parameters.iter().map(Tensor::grad).collect(),
        }
    }

    pub fn touches(&self, index: usize) -> bool {
        self.grads.get(index).is_some_and(Option::is_some)
    }

    pub fn touches_any(&self) -> bool {
        self.grads.iter().any(Option::is_some)
    }

    /// Concatenation of every gradient, zeros for untouched parameters.
    pub fn flatten(&self, parameters: &[Tensor]) -> Array1<f32> {
        let mut flat = Vec::new();
        for (grad, param) in self.grads.iter().zip(parameters) {
            match grad {
                Some(grad) => flat.extend(grad.iter().copied()),
                None => flat.extend(std::iter::repeat(0.0).take(param.len())),
            }
        }
        Array1::from_vec(flat)
    }
}

/// Outcome of projecting a set of flattened task gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub projected: Vec<Array1<f32>>,
    /// `(task, reference)` pairs whose conflict was projected away.
    pub conflicts: Vec<(usize, usize)>,
    /// `(task, reference)` pairs skipped because the reference had zero norm.
    pub degenerate: Vec<(usize, usize)>,
}

/// Projects each gradient away from every other gradient it conflicts with.
///
/// For task `i` the other tasks are visited in an order shuffled with `rng`.
/// Projections always use the original, unprojected reference gradient.
pub fn project_conflicting<R: Rng + ?Sized>(grads: &[Array1<f32>], rng: &mut R) -> Projection {
    let norms_sq: Vec<f32> = grads.iter().map(|g| g.dot(g)).collect();
    let mut projection = Projection {
        projected: Vec::with_capacity(grads.len()),
        conflicts: Vec::new(),
        degenerate: Vec::new(),
    };

    for (i, grad) in grads.iter().enumerate() {
        let mut pg = grad.clone();
        let mut order: Vec<usize> = (0..grads.len()).filter(|&j| j != i).collect();
        order.shuffle(rng);

        for j in order {
            if norms_sq[j] == 0.0 {
                warn!("{}", TrainError::DegenerateGradient { task: i, reference: j });
                projection.degenerate.push((i, j));
                continue;
            }
            let dot = pg.dot(&grads[j]);
            if dot < 0.0 {
                pg.scaled_add(-dot / norms_sq[j], &grads[j]);
                projection.conflicts.push((i, j));
            }
        }
        projection.projected.push(pg);
    }
    projection
}

/// What one call to `compute_combined_gradients` did.
#[derive(Debug, Clone, PartialEq)]
pub struct SurgeryReport {
    pub task_losses: Vec<f32>,
    pub conflicts: Vec<(usize, usize)>,
    pub degenerate: Vec<(usize, usize)>,
}

impl SurgeryReport {
    /// Unweighted sum of the task losses.
    pub fn total_loss(&self) -> f32 {
        self.task_losses.iter().sum()
    }

    pub fn degenerate_errors(&self) -> Vec<TrainError> {
        self.degenerate
            .iter()
            .map(|&(task, reference)| TrainError::DegenerateGradient { task, reference })
            .collect()
    }
}

/// Serializable state of a [`PcGrad`] optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcGradState {
    pub base: OptimizerState,
    pub rng: TensorRng,
}

/// Gradient surgery wrapper around a base optimizer.
pub struct PcGrad<O: Optimizer> {
    optimizer: O,
    rng: TensorRng,
}

impl<O: Optimizer> PcGrad<O> {
    pub fn new(optimizer: O, seed: u64) -> PcGrad<O> {
        PcGrad {
            optimizer,
            rng: TensorRng::seed_from_u64(seed),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = TensorRng::seed_from_u64(seed);
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    /// Resets every parameter gradient and opens a surgery step.
    ///
    /// The step keeps the optimizer borrowed until `apply_update` consumes it.
    /// Dropping it earlier clears the gradients again, so an aborted step never
    /// leaves partial gradients behind.
    pub fn clear_gradients(&mut self) -> SurgeryStep<'_, O> {
        self.optimizer.zero_grad();
        SurgeryStep {
            pcgrad: self,
            applied: false,
        }
    }

    pub fn state(&self) -> PcGradState {
        PcGradState {
            base: self.optimizer.state(),
            rng: self.rng.clone(),
        }
    }

    pub fn load_state(&mut self, state: PcGradState) -> Result<()> {
        self.optimizer.load_state(state.base)?;
        self.rng = state.rng;
        Ok(())
    }
}

/// One gradient surgery step, from cleared gradients to the parameter update.
pub struct SurgeryStep<'a, O: Optimizer> {
    pcgrad: &'a mut PcGrad<O>,
    applied: bool,
}

impl<O: Optimizer> SurgeryStep<'_, O> {
    /// Backpropagates every loss on its own, projects conflicting task
    /// gradients and writes their per-parameter sum into the gradient buffers.
    ///
    /// All losses must come from the same forward pass; the graph is traversed
    /// once per loss.
    pub fn compute_combined_gradients(&mut self, losses: &[Tensor]) -> Result<SurgeryReport> {
        if losses.is_empty() {
            return Err(TrainError::configuration("no task losses given"));
        }
        let mut task_losses = Vec::with_capacity(losses.len());
        for (task, loss) in losses.iter().enumerate() {
            let value = loss.item().ok_or_else(|| {
                TrainError::configuration(format!(
                    "loss of task {task} is not a scalar (shape {:?})",
                    loss.shape()
                ))
            })?;
            if !value.is_finite() {
                return Err(TrainError::NonFiniteLoss { task, value });
            }
            task_losses.push(value);
        }

        let optimizer = &self.pcgrad.optimizer;
        let parameters: Vec<Tensor> = optimizer
            .parameters()
            .iter()
            .filter(|p| p.requires_grad())
            .cloned()
            .collect();
        if parameters.is_empty() {
            return Err(TrainError::configuration("optimizer has no trainable parameters"));
        }

        let mut snapshots = Vec::with_capacity(losses.len());
        for (task, loss) in losses.iter().enumerate() {
            optimizer.zero_grad();
            loss.backward();
            let snapshot = TaskGradient::capture(&parameters);
            if !snapshot.touches_any() {
                optimizer.zero_grad();
                return Err(TrainError::configuration(format!(
                    "loss of task {task} reaches none of the trainable parameters"
                )));
            }
            snapshots.push(snapshot);
        }

        let flat: Vec<Array1<f32>> = snapshots.iter().map(|s| s.flatten(&parameters)).collect();
        let projection = project_conflicting(&flat, &mut self.pcgrad.rng);

        let mut offset = 0;
        for (index, param) in parameters.iter().enumerate() {
            let len = param.len();
            let mut combined: Option<Array1<f32>> = None;
            for (snapshot, projected) in snapshots.iter().zip(&projection.projected) {
                if !snapshot.touches(index) {
                    continue;
                }
                let part = projected.slice(ndarray::s![offset..offset + len]);
                match combined.as_mut() {
                    Some(sum) => *sum += &part,
                    None => combined = Some(part.to_owned()),
                }
            }
            let grad = match combined {
                Some(sum) => Some(sum.into_shape_with_order(param.shape())?),
                None => None,
            };
            param.set_grad(grad);
            offset += len;
        }

        debug!(
            tasks = losses.len(),
            conflicts = projection.conflicts.len(),
            degenerate = projection.degenerate.len(),
            "combined task gradients"
        );
        Ok(SurgeryReport {
            task_losses,
            conflicts: projection.conflicts,
            degenerate: projection.degenerate,
        })
    }

    /// Applies one update of the base optimizer with the combined gradients.
    pub fn apply_update(mut self) {
        self.pcgrad.optimizer.step();
        self.applied = true;
    }
}

impl<O: Optimizer> Drop for SurgeryStep<'_, O> {
    fn drop(&mut self) {
        if !self.applied {
            self.pcgrad.optimizer.zero_grad();
        }
    }
}
