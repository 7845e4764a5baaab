use ndarray::{Array, ArrayD, IxDyn};
use ndarray_rand::rand_distr::Distribution;
use ndarray_rand::RandomExt;
use std::{
    cell::RefCell,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::ops::Operation;
use crate::random::TensorRng;

static BACKWARD_PASSES: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug)]
pub struct DataContainer {
    pub array: ArrayD<f32>,
    pub grad: Option<ArrayD<f32>>,
    pub requires_grad: bool,

    pub num_consumers: usize,
    last_pass: usize,
}

impl DataContainer {
    fn new(array: ArrayD<f32>, requires_grad: bool) -> DataContainer {
        DataContainer {
            array,
            grad: None,
            requires_grad,
            num_consumers: 0,
            last_pass: 0,
        }
    }
    fn add_value(&mut self, value: &ArrayD<f32>) {
        self.array += value;
    }
}

/// A node of the computation graph.
///
/// Cloning a tensor clones the handle, not the data: both clones share the
/// value and the gradient buffer. Graph edges point from outputs to inputs only,
/// so dropping the loss tensors of a step releases the whole graph.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub container: Rc<RefCell<DataContainer>>,
    prev_op: Option<Rc<dyn Operation>>,
}

impl Tensor {
    /// Leaf tensor that accumulates gradients.
    pub fn new(data: ArrayD<f32>) -> Tensor {
        Tensor {
            container: Rc::new(RefCell::new(DataContainer::new(data, true))),
            prev_op: None,
        }
    }
    /// Leaf tensor that never stores a gradient (inputs, labels, masks).
    pub fn constant(data: ArrayD<f32>) -> Tensor {
        Tensor {
            container: Rc::new(RefCell::new(DataContainer::new(data, false))),
            prev_op: None,
        }
    }
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor::new(Array::zeros(IxDyn(shape)))
    }
    pub fn new_random<D: Distribution<f32>>(
        shape: &[usize],
        distribution: D,
        rng: &mut TensorRng,
    ) -> Tensor {
        Tensor::new(Array::random_using(IxDyn(shape), distribution, rng))
    }
    pub fn new_with_prev(data: ArrayD<f32>, prev_op: Rc<dyn Operation>) -> Tensor {
        Tensor {
            container: Rc::new(RefCell::new(DataContainer::new(data, false))),
            prev_op: Some(prev_op),
        }
    }

    /// Backpropagates from this tensor with a seed gradient of ones.
    ///
    /// The graph may be traversed again from another output: every pass first
    /// clears the gradients of intermediate nodes it can reach, while leaf
    /// gradients keep accumulating until `zero_grad`.
    pub fn backward(&self) {
        let pass = BACKWARD_PASSES.fetch_add(1, Ordering::SeqCst);
        self.zero_graph(pass);
        self.build_graph();

        let start_grad = Array::ones(self.shape());
        self.backward_internal(start_grad);
    }

    pub fn backward_internal(&self, grad: ArrayD<f32>) {
        let ready = {
            let mut container = self.container.borrow_mut();
            assert_eq!(
                container.array.shape(),
                grad.shape(),
                "gradient shape does not match tensor shape"
            );
            if container.requires_grad || self.prev_op.is_some() {
                let new_grad = match container.grad.take() {
                    Some(existing) => existing + &grad,
                    None => grad,
                };
                container.grad = Some(new_grad);
            }
            container.num_consumers = container.num_consumers.saturating_sub(1);
            container.num_consumers == 0
        };
        if ready {
            if let Some(op) = &self.prev_op {
                op.backward(self);
            }
        }
    }

    pub fn zero_graph(&self, pass: usize) {
        {
            let mut container = self.container.borrow_mut();
            if container.last_pass == pass {
                return;
            }
            container.last_pass = pass;
            container.num_consumers = 0;
            if self.prev_op.is_some() {
                container.grad = None;
            }
        }
        if let Some(op) = &self.prev_op {
            op.zero_graph(pass);
        }
    }

    pub fn build_graph(&self) {
        let first_visit = {
            let mut container = self.container.borrow_mut();
            container.num_consumers += 1;
            container.num_consumers == 1
        };
        if first_visit {
            if let Some(op) = &self.prev_op {
                op.build_graph();
            }
        }
    }

    pub fn requires_grad(&self) -> bool {
        self.container.borrow().requires_grad
    }
    pub fn set_requires_grad(&self, requires_grad: bool) {
        let mut container = self.container.borrow_mut();
        container.requires_grad = requires_grad;
        if !requires_grad {
            container.grad = None;
        }
    }
    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.container.borrow().grad.clone()
    }
    pub fn set_grad(&self, grad: Option<ArrayD<f32>>) {
        self.container.borrow_mut().grad = grad;
    }
    pub fn zero_grad(&self) {
        self.container.borrow_mut().grad = None;
    }
    pub fn data(&self) -> ArrayD<f32> {
        self.container.borrow().array.clone()
    }
    pub fn update_data(&self, data: ArrayD<f32>) {
        self.container.borrow_mut().array = data;
    }
    pub fn add_value(&self, value: &ArrayD<f32>) {
        self.container.borrow_mut().add_value(value);
    }
    pub fn shape(&self) -> Vec<usize> {
        self.container.borrow().array.shape().to_vec()
    }
    pub fn len(&self) -> usize {
        self.container.borrow().array.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Value of a single-element tensor.
    pub fn item(&self) -> Option<f32> {
        let container = self.container.borrow();
        if container.array.len() == 1 {
            container.array.iter().next().copied()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn it_works() {
        let test_0 = Tensor::new(array![[1.0, 2.0, 3.0, 4.0]].into_dyn()); // grad = 8 * test_0
        let test_1 = test_0.clone() + test_0.clone(); // grad_2 = 2 * test_1
        let test_2 = test_1.clone() * test_1.clone();
        test_2.backward();

        assert_eq!(
            test_0.grad(),
            Some(array![[8.0, 16.0, 24.0, 32.0]].into_dyn())
        );
        assert_eq!(
            test_1.grad(),
            Some(array![[4.0, 8.0, 12.0, 16.0]].into_dyn())
        );
        assert_eq!(test_2.grad(), Some(array![[1.0, 1.0, 1.0, 1.0]].into_dyn()));
    }

    #[test]
    fn test_second_backward_on_shared_graph() {
        let param = Tensor::new(array![1.0, 2.0].into_dyn());
        let hidden = param.clone() * param.clone();
        let first = hidden.sum();
        let second = hidden.mul_scalar(3.0).sum();

        first.backward();
        assert_eq!(param.grad(), Some(array![2.0, 4.0].into_dyn()));

        param.zero_grad();
        second.backward();
        // the intermediate gradient of the first pass must not leak into the second
        assert_eq!(param.grad(), Some(array![6.0, 12.0].into_dyn()));
    }

    #[test]
    fn test_leaf_gradients_accumulate_across_passes() {
        let param = Tensor::new(array![1.0, -1.0].into_dyn());
        let loss = param.sum();
        loss.backward();
        loss.backward();
        assert_eq!(param.grad(), Some(array![2.0, 2.0].into_dyn()));
    }

    #[test]
    fn test_constant_has_no_grad() {
        let input = Tensor::constant(array![1.0, 2.0].into_dyn());
        let weight = Tensor::new(array![3.0, 4.0].into_dyn());
        let loss = (input.clone() * weight.clone()).sum();
        loss.backward();
        assert!(input.grad().is_none());
        assert_eq!(weight.grad(), Some(array![1.0, 2.0].into_dyn()));
    }

    #[test]
    fn test_frozen_parameter_has_no_grad() {
        let weight = Tensor::new(array![3.0, 4.0].into_dyn());
        weight.set_requires_grad(false);
        weight.sum().backward();
        assert!(weight.grad().is_none());
    }

    #[test]
    fn test_item() {
        let scalar = Tensor::constant(array![2.5].into_dyn());
        assert_eq!(scalar.item(), Some(2.5));
        assert_eq!(Tensor::zeros(&[2]).item(), None);
    }
}
