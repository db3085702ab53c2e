//! Communication seam for the collective reductions performed by the Krylov
//! solvers.
//!
//! Every norm and dot product taken during an iteration is a synchronisation
//! point: the local kernel runs first, then the partial result is combined
//! through [`Comm`]. `SerialComm` is the identity; `RayonComm` additionally
//! sizes the global thread pool that the local kernels run on.

use crate::core::traits::InnerProduct;
use std::rc::Rc;

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    /// Sum of `x` over all ranks.
    fn all_reduce_sum(&self, x: f64) -> f64;
    /// Maximum of `x` over all ranks.
    fn all_reduce_max(&self, x: f64) -> f64;
}

/// Single-process communicator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn all_reduce_sum(&self, x: f64) -> f64 {
        x
    }
    fn all_reduce_max(&self, x: f64) -> f64 {
        x
    }
}

#[cfg(feature = "rayon")]
pub mod rayon_comm;
#[cfg(feature = "rayon")]
pub use rayon_comm::RayonComm;

/// Inner product that reduces locally and then across the communicator.
#[derive(Clone)]
pub struct Reduction {
    comm: Rc<dyn Comm>,
}

impl Reduction {
    pub fn new(comm: Rc<dyn Comm>) -> Self {
        Self { comm }
    }

    pub fn comm(&self) -> &dyn Comm {
        self.comm.as_ref()
    }
}

impl Default for Reduction {
    fn default() -> Self {
        Self::new(Rc::new(SerialComm))
    }
}

impl std::fmt::Debug for Reduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reduction(rank {} of {})", self.comm.rank(), self.comm.size())
    }
}

impl InnerProduct for Reduction {
    fn dot(&self, x: &[f64], y: &[f64]) -> f64 {
        self.comm.all_reduce_sum(().dot(x, y))
    }
    fn norm_inf(&self, x: &[f64]) -> f64 {
        self.comm.all_reduce_max(().norm_inf(x))
    }
    fn sum(&self, x: &[f64]) -> f64 {
        self.comm.all_reduce_sum(().sum(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Pretends to be one of `size` identical ranks and counts reductions.
    struct ReplicatedComm {
        size: usize,
        calls: Cell<usize>,
    }

    impl Comm for ReplicatedComm {
        fn rank(&self) -> usize {
            0
        }
        fn size(&self) -> usize {
            self.size
        }
        fn barrier(&self) {}
        fn all_reduce_sum(&self, x: f64) -> f64 {
            self.calls.set(self.calls.get() + 1);
            x * self.size as f64
        }
        fn all_reduce_max(&self, x: f64) -> f64 {
            self.calls.set(self.calls.get() + 1);
            x
        }
    }

    #[test]
    fn reduction_goes_through_the_communicator() {
        let comm = Rc::new(ReplicatedComm { size: 4, calls: Cell::new(0) });
        let ip = Reduction::new(comm.clone());
        assert_eq!(ip.dot(&[1.0, 2.0], &[1.0, 1.0]), 12.0);
        assert_eq!(ip.norm(&[1.0, 0.0]), 2.0);
        assert_eq!(ip.norm_inf(&[-3.0, 1.0]), 3.0);
        assert_eq!(comm.calls.get(), 3);
    }

    #[test]
    fn serial_reduction_is_local() {
        let ip = Reduction::default();
        assert_eq!(ip.sum(&[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(ip.comm().size(), 1);
    }
}
