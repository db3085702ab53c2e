//! Local vector kernels shared by the solvers, preconditioners and the Stokes
//! driver. With the `rayon` feature the reductions and element-wise updates
//! run on the global thread pool.

use num_traits::Float;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

pub fn dot<T: Float + Send + Sync>(x: &[T], y: &[T]) -> T {
    assert_eq!(x.len(), y.len(), "dot: length mismatch");
    #[cfg(feature = "rayon")]
    let result = x
        .par_iter()
        .zip(y.par_iter())
        .map(|(&a, &b)| a * b)
        .reduce(T::zero, |a, b| a + b);
    #[cfg(not(feature = "rayon"))]
    let result = x.iter().zip(y).fold(T::zero(), |acc, (&a, &b)| acc + a * b);
    result
}

pub fn norm2<T: Float + Send + Sync>(x: &[T]) -> T {
    dot(x, x).sqrt()
}

pub fn norm_inf<T: Float + Send + Sync>(x: &[T]) -> T {
    x.iter().fold(T::zero(), |acc, &v| acc.max(v.abs()))
}

pub fn sum<T: Float + Send + Sync>(x: &[T]) -> T {
    x.iter().fold(T::zero(), |acc, &v| acc + v)
}

/// y ← y + a·x
pub fn axpy<T: Float + Send + Sync>(a: T, x: &[T], y: &mut [T]) {
    assert_eq!(x.len(), y.len(), "axpy: length mismatch");
    #[cfg(feature = "rayon")]
    y.par_iter_mut().zip(x.par_iter()).for_each(|(yi, &xi)| *yi = *yi + a * xi);
    #[cfg(not(feature = "rayon"))]
    y.iter_mut().zip(x).for_each(|(yi, &xi)| *yi = *yi + a * xi);
}

/// y ← x + b·y
pub fn aypx<T: Float + Send + Sync>(b: T, x: &[T], y: &mut [T]) {
    assert_eq!(x.len(), y.len(), "aypx: length mismatch");
    y.iter_mut().zip(x).for_each(|(yi, &xi)| *yi = xi + b * *yi);
}

/// w ← x − y
pub fn waxmy<T: Float>(x: &[T], y: &[T], w: &mut [T]) {
    assert_eq!(x.len(), y.len(), "waxmy: length mismatch");
    assert_eq!(x.len(), w.len(), "waxmy: length mismatch");
    for ((wi, &xi), &yi) in w.iter_mut().zip(x).zip(y) {
        *wi = xi - yi;
    }
}

pub fn scale<T: Float>(a: T, x: &mut [T]) {
    x.iter_mut().for_each(|v| *v = *v * a);
}

/// x ← x ∘ w
pub fn pointwise_mult<T: Float>(x: &mut [T], w: &[T]) {
    assert_eq!(x.len(), w.len(), "pointwise_mult: length mismatch");
    x.iter_mut().zip(w).for_each(|(xi, &wi)| *xi = *xi * wi);
}

/// x ← x / w
pub fn pointwise_divide<T: Float>(x: &mut [T], w: &[T]) {
    assert_eq!(x.len(), w.len(), "pointwise_divide: length mismatch");
    x.iter_mut().zip(w).for_each(|(xi, &wi)| *xi = *xi / wi);
}

/// Reciprocal of every entry; zeros map to zero.
pub fn reciprocal<T: Float>(x: &mut [T]) {
    x.iter_mut().for_each(|v| {
        *v = if *v == T::zero() { T::zero() } else { T::one() / *v };
    });
}

/// Index and value of the smallest entry. `None` for an empty slice.
pub fn min_with_index<T: Float>(x: &[T]) -> Option<(usize, T)> {
    x.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })
}

/// Index and value of the largest entry. `None` for an empty slice.
pub fn max_with_index<T: Float>(x: &[T]) -> Option<(usize, T)> {
    x.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

/// Root-mean-square of the entries, zero for an empty slice.
pub fn rms<T: Float + Send + Sync>(x: &[T]) -> T {
    match T::from(x.len()) {
        Some(n) if !x.is_empty() => (dot(x, x) / n).sqrt(),
        _ => T::zero(),
    }
}
