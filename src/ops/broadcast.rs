use itertools::{
    EitherOrBoth::{Both, Left, Right},
    Itertools,
};
use ndarray::{ArrayD, Axis};

/// Sums `grad` over every axis that broadcasting expanded so that the result
/// has exactly `shape`.
///
/// Axes are aligned from the trailing end, following numpy broadcasting rules.
pub fn reduce_to_shape(grad: ArrayD<f32>, shape: &[usize]) -> ArrayD<f32> {
    if grad.shape() == shape {
        return grad;
    }
    let output_shape = grad.shape().to_vec();
    let num_axes = output_shape.len();
    let mut reduced = grad;
    for (inverted_axis, dims) in output_shape
        .iter()
        .rev()
        .zip_longest(shape.iter().rev())
        .enumerate()
    {
        let axis = num_axes - 1 - inverted_axis;
        match dims {
            Both(output_dim, input_dim) => {
                if input_dim == output_dim {
                    continue;
                }
                assert_eq!(*input_dim, 1, "input dimension is not broadcastable");
                reduced = reduced.sum_axis(Axis(axis)).insert_axis(Axis(axis));
            }
            Left(_) => {
                reduced = reduced.sum_axis(Axis(axis)).insert_axis(Axis(axis));
            }
            Right(_) => panic!("input has more dimensions than the broadcast output"),
        }
    }
    while reduced.ndim() > shape.len() {
        reduced = reduced.index_axis_move(Axis(0), 0);
    }
    reduced
}
