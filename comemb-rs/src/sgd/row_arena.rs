use ndarray::Array2;
use ndarray::ArrayViewMut1;
use ndarray::Axis;
use parking_lot::Mutex;

/// Row-exclusive view of an embedding matrix for parallel SGD.
///
/// Every row is guarded by its own lock, so concurrent workers may update
/// different rows freely while a single row is never observed half
/// written. A worker must hold at most one row lock at a time; all
/// operations here release the lock before returning, which rules out
/// lock-order deadlocks.
pub struct RowArena<'a> {
  rows: Vec<Mutex<ArrayViewMut1<'a, f32>>>,
}

impl<'a> RowArena<'a> {
  pub fn new(matrix: &'a mut Array2<f32>) -> Self {
    let rows = matrix.axis_iter_mut(Axis(0)).map(Mutex::new).collect();
    Self { rows }
  }

  /// Copy row `index` into `out`.
  #[inline]
  pub fn read(&self, index: usize, out: &mut [f32]) {
    let row = self.rows[index].lock();
    for (o, &v) in out.iter_mut().zip(row.iter()) {
      *o = v;
    }
  }

  /// Run `f` with exclusive access to row `index`.
  #[inline]
  pub fn update<R>(&self, index: usize, f: impl FnOnce(&mut ArrayViewMut1<'a, f32>) -> R) -> R {
    let mut row = self.rows[index].lock();
    f(&mut row)
  }
}
