// Row-major reference matmul used by CpuBackend::matmul.

/// C[m, n] = A[m, k] @ B[k, n]. Lengths are checked by the caller.
pub(crate) fn matmul_naive(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut c = vec![0.0f64; m * n];
    for i in 0..m {
        let row = &a[i * k..(i + 1) * k];
        for (p, &a_ip) in row.iter().enumerate() {
            let b_row = &b[p * n..(p + 1) * n];
            let c_row = &mut c[i * n..(i + 1) * n];
            for (c_ij, &b_pj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_ip * b_pj;
            }
        }
    }
    c
}
