// src/math.rs

//! Shared linear-algebra primitives.

use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_linalg::{Eigh, Lapack, Scalar, SVD, UPLO};

use crate::error::{OjobError, Result};

/// Conjugate transpose. Reduces to the plain transpose for real scalars.
pub fn adjoint<A, S>(a: &ArrayBase<S, Ix2>) -> Array2<A>
where
    A: Scalar,
    S: Data<Elem = A>,
{
    a.t().mapv(|x| x.conj())
}

/// Projects `a` onto the nearest orthogonal (unitary, in the complex case)
/// matrix in Frobenius norm.
///
/// Uses the polar factorization: if `a = W Σ V^H` is the singular value
/// decomposition, the nearest orthogonal matrix is `W V^H`, obtained by
/// discarding the singular values.
pub fn nearest_orthogonal<A: Scalar + Lapack>(a: &Array2<A>) -> Result<Array2<A>> {
    let (u, _sigma, vt) = a.svd(true, true)?;
    match (u, vt) {
        (Some(u), Some(vt)) => Ok(u.dot(&vt)),
        _ => Err(OjobError::MalformedInput(
            "singular value decomposition returned no factors".into(),
        )),
    }
}

/// Hermitian eigendecomposition with eigenvalues (and matching eigenvectors)
/// reordered descending. LAPACK hands the spectrum back ascending; dominant
/// subspace selection wants it the other way around.
pub fn eigh_descending<A: Scalar + Lapack>(
    a: &Array2<A>,
) -> Result<(Array1<A::Real>, Array2<A>)> {
    let (values, vectors) = a.eigh(UPLO::Upper)?;
    let order: Vec<usize> = (0..values.len()).rev().collect();
    Ok((values.select(Axis(0), &order), vectors.select(Axis(1), &order)))
}
