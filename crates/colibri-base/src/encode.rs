use ndarray::{Array2, ArrayD};

/// Encode a string array as a fixed-width integer matrix.
///
/// Every string becomes one row of `width` Unicode code points, truncated
/// past the width and zero-padded below it. Strings are taken in row-major
/// order, so an `(n, 1)` column encodes to `(n, width)`.
pub fn encode_strings(values: &ArrayD<String>, width: usize) -> ArrayD<i64> {
    let rows = values.len();
    let mut out = Array2::<i64>::zeros((rows, width));
    for (mut row, s) in out.rows_mut().into_iter().zip(values.iter()) {
        for (slot, ch) in row.iter_mut().zip(s.chars()) {
            *slot = ch as i64;
        }
    }
    out.into_dyn()
}
