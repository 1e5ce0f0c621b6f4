//! Optimizer integration: projecting constrained parameters after a step.

use candle_core::Tensor;
use candle_nn::Optimizer;

use crate::error::Result;

/// Parameters with an admissible range that the optimizer does not know about.
///
/// Call [`Constrain::constrain`] after every parameter update; the forward
/// pass never clamps on its own.
pub trait Constrain {
    fn constrain(&self) -> Result<()>;
}

impl<T: Constrain> Constrain for [T] {
    fn constrain(&self) -> Result<()> {
        self.iter().try_for_each(Constrain::constrain)
    }
}

/// One optimizer step followed by the constraint projection.
pub fn step_constrained<O, C>(optimizer: &mut O, loss: &Tensor, model: &C) -> Result<()>
where
    O: Optimizer,
    C: Constrain + ?Sized,
{
    optimizer.backward_step(loss)?;
    model.constrain()
}
