// Systolic Array for Matrix Multiplication
// Output-stationary 8x8 grid following the classic Kung-Leiserson design

use crate::isa::{LANES, TILE};

// ===========================================
// Operand Buffer Module
// ===========================================

/// On-chip slot buffer holding one K-slice per slot.
///
/// The X buffer stores slot `k` = column k of the left operand (one lane per
/// output row), the W buffer stores slot `k` = row k of the right operand
/// (one lane per output column).
#[derive(Debug, Clone)]
pub struct OperandBuffer {
  slots: [[i64; LANES]; TILE],
}

impl Default for OperandBuffer {
  fn default() -> Self {
    Self {
      slots: [[0; LANES]; TILE],
    }
  }
}

impl OperandBuffer {
  /// Store a slice at `idx`. Returns false if the slot does not exist.
  pub fn write(&mut self, idx: usize, lanes: [i64; LANES]) -> bool {
    match self.slots.get_mut(idx) {
      Some(slot) => {
        *slot = lanes;
        true
      },
      None => false,
    }
  }

  /// Get a value from the buffer, or 0 if out of bounds
  pub fn get(&self, idx: usize, lane: usize) -> i64 {
    self.slots.get(idx).and_then(|s| s.get(lane)).copied().unwrap_or(0)
  }
}

// ===========================================
// Output Buffer Module
// ===========================================

/// Result rows latched when a computation completes
#[derive(Debug, Clone)]
pub struct OutputBuffer {
  data: [[i64; LANES]; TILE],
  is_ready: bool,
}

impl Default for OutputBuffer {
  fn default() -> Self {
    Self {
      data: [[0; LANES]; TILE],
      is_ready: false,
    }
  }
}

impl OutputBuffer {
  pub fn set(&mut self, row: usize, col: usize, value: i64) {
    if row < TILE && col < LANES {
      self.data[row][col] = value;
    }
  }

  pub fn row(&self, row: usize) -> Option<[i64; LANES]> {
    self.data.get(row).copied()
  }

  pub fn set_ready(&mut self) {
    self.is_ready = true;
  }

  pub fn is_ready(&self) -> bool {
    self.is_ready
  }

  pub fn clear(&mut self) {
    self.data = [[0; LANES]; TILE];
    self.is_ready = false;
  }
}

// ===========================================
// Processing Element (PE) Module
// ===========================================

/// Processing Element (PE) - performs multiply-accumulate operations
#[derive(Debug, Clone, Default)]
pub struct ProcessingElement {
  /// Value received from the left neighbour (X operand)
  a_in: i64,
  /// Value received from the top neighbour (W operand)
  b_in: i64,
  /// Resident partial sum
  acc: i64,
}

impl ProcessingElement {
  pub fn set_inputs(&mut self, a: i64, b: i64) {
    self.a_in = a;
    self.b_in = b;
  }

  /// acc = acc + a_in * b_in
  pub fn compute(&mut self) {
    self.acc = self.acc.wrapping_add(self.a_in.wrapping_mul(self.b_in));
  }

  pub fn get_result(&self) -> i64 {
    self.acc
  }

  /// Clear the operand latches, keep the partial sum
  pub fn flush_inputs(&mut self) {
    self.a_in = 0;
    self.b_in = 0;
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }
}

/// Coprocessor-visible array state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystolicState {
  Idle,
  Configured,
  Loading,
  Running,
  Done,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingParams {
  /// Extra drain/writeback cycles after the last PE step
  pub overhead: u64,
  /// Lower `done` when a new computation starts
  pub clear_done_on_start: bool,
  /// Fault injection: the array never completes
  pub stall: bool,
}

impl Default for TimingParams {
  fn default() -> Self {
    Self {
      overhead: 4,
      clear_done_on_start: true,
      stall: false,
    }
  }
}

// ===========================================
// Systolic Array Main Module
// ===========================================

/// 8x8 output-stationary systolic array
///
/// A[i][k] enters row i at step k+i and B[k][j] enters column j at step k+j,
/// so PE[i][j] multiplies the matching pair at step i+j+k. An MxNxK tile
/// needs M+N+K-2 steps.
#[derive(Debug, Clone)]
pub struct SystolicArray {
  pe_grid: Vec<Vec<ProcessingElement>>,
  x_buf: OperandBuffer,
  w_buf: OperandBuffer,
  output: OutputBuffer,

  m_dim: usize,
  n_dim: usize,
  k_dim: usize,

  state: SystolicState,
  busy: bool,
  done: bool,
  /// PE steps taken in the current computation
  cycle_count: usize,
  /// Cycles left before busy falls
  remaining: u64,
  total_cycles: u64,
  timing: TimingParams,
}

impl Default for SystolicArray {
  fn default() -> Self {
    Self::new(TimingParams::default())
  }
}

impl SystolicArray {
  pub fn new(timing: TimingParams) -> Self {
    let pe_grid = (0..TILE).map(|_| vec![ProcessingElement::default(); LANES]).collect();
    Self {
      pe_grid,
      x_buf: OperandBuffer::default(),
      w_buf: OperandBuffer::default(),
      output: OutputBuffer::default(),
      m_dim: 0,
      n_dim: 0,
      k_dim: 0,
      state: SystolicState::Idle,
      busy: false,
      done: false,
      cycle_count: 0,
      remaining: 0,
      total_cycles: 0,
      timing,
    }
  }

  pub fn set_timing(&mut self, timing: TimingParams) {
    self.timing = timing;
  }

  /// Record the logical shape. Values beyond the physical tile are clamped.
  /// Partial sums survive a reconfigure that only changes K.
  pub fn configure(&mut self, m: usize, n: usize, k: usize) {
    let (m, n, k) = (m.min(TILE), n.min(LANES), k.min(TILE));
    if self.busy {
      log::warn!("systolic: configure while busy");
    }
    if (m, n) != (self.m_dim, self.n_dim) {
      self.clear_partial_sums();
    }
    self.m_dim = m;
    self.n_dim = n;
    self.k_dim = k;
    self.state = SystolicState::Configured;
  }

  pub fn load_x(&mut self, idx: usize, lanes: [i64; LANES]) {
    if !self.x_buf.write(idx, lanes) {
      log::warn!("systolic: load_x index {} outside the {}-slot buffer", idx, TILE);
    }
    self.state = SystolicState::Loading;
  }

  pub fn load_w(&mut self, idx: usize, lanes: [i64; LANES]) {
    if !self.w_buf.write(idx, lanes) {
      log::warn!("systolic: load_w index {} outside the {}-slot buffer", idx, TILE);
    }
    self.state = SystolicState::Loading;
  }

  fn clear_partial_sums(&mut self) {
    for row in &mut self.pe_grid {
      for pe in row {
        pe.reset();
      }
    }
  }

  /// Steps an MxNxK tile takes on the grid
  pub fn steps_for(m: usize, n: usize, k: usize) -> usize {
    (m + n + k).saturating_sub(2).max(1)
  }

  /// Start the matrix multiplication computation
  pub fn start(&mut self, accumulate: bool) {
    if self.busy {
      log::warn!("systolic: start while busy, restarting");
    }
    if !accumulate {
      self.clear_partial_sums();
    }
    for row in &mut self.pe_grid {
      for pe in row {
        pe.flush_inputs();
      }
    }
    self.cycle_count = 0;
    self.remaining = Self::steps_for(self.m_dim, self.n_dim, self.k_dim) as u64 + self.timing.overhead;
    self.busy = true;
    if self.timing.clear_done_on_start {
      self.done = false;
    }
    self.state = SystolicState::Running;
  }

  /// Advance one PE step
  ///
  /// Each step first moves operands one PE right/down and injects the
  /// skewed boundary values, then every PE performs its MAC.
  fn step(&mut self) {
    let (m, n, k) = (self.m_dim, self.n_dim, self.k_dim);
    let t = self.cycle_count;

    // Walk bottom-right to top-left so each PE reads its neighbour's old value
    for i in (0..TILE).rev() {
      for j in (0..LANES).rev() {
        let new_a = if j == 0 {
          match t.checked_sub(i) {
            Some(kk) if kk < k && i < m => self.x_buf.get(kk, i),
            _ => 0,
          }
        } else {
          self.pe_grid[i][j - 1].a_in
        };
        let new_b = if i == 0 {
          match t.checked_sub(j) {
            Some(kk) if kk < k && j < n => self.w_buf.get(kk, j),
            _ => 0,
          }
        } else {
          self.pe_grid[i - 1][j].b_in
        };
        self.pe_grid[i][j].set_inputs(new_a, new_b);
      }
    }

    for row in &mut self.pe_grid {
      for pe in row {
        pe.compute();
      }
    }
    self.cycle_count += 1;
  }

  /// Advance the array by `cycles` device cycles
  pub fn tick(&mut self, cycles: u64) {
    if !self.busy || self.timing.stall {
      return;
    }
    let steps = Self::steps_for(self.m_dim, self.n_dim, self.k_dim);
    for _ in 0..cycles {
      if self.cycle_count < steps {
        self.step();
      }
      self.remaining -= 1;
      self.total_cycles += 1;
      if self.remaining == 0 {
        self.complete();
        return;
      }
    }
  }

  fn complete(&mut self) {
    for i in 0..TILE {
      for j in 0..LANES {
        self.output.set(i, j, self.pe_grid[i][j].get_result());
      }
    }
    self.output.set_ready();
    // busy falls and done rises on the same cycle
    self.busy = false;
    self.done = true;
    self.state = SystolicState::Done;
  }

  /// One result row. Rows at or beyond N columns read back as computed,
  /// columns beyond the configured N are zero.
  pub fn read_row(&self, row: usize) -> [i64; LANES] {
    if self.busy || !self.output.is_ready() {
      log::warn!("systolic: read_y row {} before done", row);
    }
    match self.output.row(row) {
      Some(mut lanes) => {
        for lane in lanes.iter_mut().skip(self.n_dim) {
          *lane = 0;
        }
        lanes
      },
      None => {
        log::warn!("systolic: read_y row {} outside the {}-row tile", row, TILE);
        [0; LANES]
      },
    }
  }

  /// (busy, done)
  pub fn status(&self) -> (bool, bool) {
    (self.busy, self.done)
  }

  pub fn state(&self) -> SystolicState {
    self.state
  }

  pub fn shape(&self) -> (usize, usize, usize) {
    (self.m_dim, self.n_dim, self.k_dim)
  }

  /// Cycles spent computing since power-on
  pub fn total_cycles(&self) -> u64 {
    self.total_cycles
  }

  pub fn partial_sum(&self, row: usize, col: usize) -> i64 {
    self.pe_grid[row][col].get_result()
  }

  /// Power-on reset
  pub fn reset(&mut self) {
    *self = Self::new(self.timing);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn run_to_completion(array: &mut SystolicArray) {
    let mut guard = 0;
    while array.status().0 {
      array.tick(1);
      guard += 1;
      assert!(guard < 1000, "array never completed");
    }
  }

  fn load(array: &mut SystolicArray, a: &[Vec<i64>], b: &[Vec<i64>]) {
    let (m, k, n) = (a.len(), b.len(), b[0].len());
    array.configure(m, n, k);
    for kk in 0..k {
      let mut x = [0; LANES];
      for (i, row) in a.iter().enumerate() {
        x[i] = row[kk];
      }
      let mut w = [0; LANES];
      w[..n].copy_from_slice(&b[kk]);
      array.load_x(kk, x);
      array.load_w(kk, w);
    }
  }

  /// Test the processing element functionality
  #[test]
  fn test_processing_element() {
    let mut pe = ProcessingElement::default();
    pe.set_inputs(3, 4);
    pe.compute();
    assert_eq!(pe.get_result(), 12);

    pe.set_inputs(5, -6);
    pe.compute();
    assert_eq!(pe.get_result(), 12 - 30);

    pe.flush_inputs();
    pe.compute();
    assert_eq!(pe.get_result(), -18);

    pe.reset();
    assert_eq!(pe.get_result(), 0);
  }

  #[test]
  fn test_operand_buffer_bounds() {
    let mut buf = OperandBuffer::default();
    assert!(buf.write(7, [1; LANES]));
    assert!(!buf.write(8, [1; LANES]));
    assert_eq!(buf.get(7, 3), 1);
    assert_eq!(buf.get(9, 0), 0);
  }

  /// Test 1x1 matrix multiplication
  #[test]
  fn test_simple_1x1() {
    let mut array = SystolicArray::default();
    load(&mut array, &[vec![5]], &[vec![7]]);
    array.start(false);
    run_to_completion(&mut array);
    assert_eq!(array.read_row(0)[0], 35);
    assert_eq!(array.total_cycles(), 1 + TimingParams::default().overhead);
  }

  /// Test non-square multiplication against a direct triple loop
  #[test]
  fn test_different_dimensions() {
    let a: Vec<Vec<i64>> = (0..5).map(|i| (0..3).map(|k| (i * 3 + k) as i64 - 4).collect()).collect();
    let b: Vec<Vec<i64>> = (0..3).map(|k| (0..7).map(|j| (k * 7 + j) as i64 % 5 - 2).collect()).collect();
    let mut array = SystolicArray::default();
    load(&mut array, &a, &b);
    array.start(false);
    run_to_completion(&mut array);

    for i in 0..5 {
      let row = array.read_row(i);
      for j in 0..7 {
        let expected: i64 = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        assert_eq!(row[j], expected, "C[{}][{}]", i, j);
      }
      assert_eq!(row[7], 0);
    }
  }

  #[test]
  fn test_cycle_count_matches_wavefront() {
    let timing = TimingParams {
      overhead: 0,
      ..TimingParams::default()
    };
    let mut array = SystolicArray::new(timing);
    array.configure(8, 8, 8);
    array.start(false);
    run_to_completion(&mut array);
    assert_eq!(array.total_cycles(), 22);
  }

  #[test]
  fn test_accumulate_keeps_partial_sums() {
    let mut array = SystolicArray::default();
    load(&mut array, &[vec![2]], &[vec![3]]);
    array.start(false);
    run_to_completion(&mut array);
    array.start(true);
    run_to_completion(&mut array);
    assert_eq!(array.read_row(0)[0], 12);

    // changing only K keeps the bank, changing M clears it
    array.configure(1, 1, 1);
    assert_eq!(array.partial_sum(0, 0), 12);
    array.configure(2, 1, 1);
    assert_eq!(array.partial_sum(0, 0), 0);
  }

  #[test]
  fn test_status_flags_switch_together() {
    let mut array = SystolicArray::default();
    array.configure(2, 2, 2);
    assert_eq!(array.status(), (false, false));
    array.start(false);
    assert_eq!(array.status(), (true, false));
    assert_eq!(array.state(), SystolicState::Running);
    run_to_completion(&mut array);
    assert_eq!(array.status(), (false, true));
  }

  #[test]
  fn test_stale_done_without_clearing() {
    let timing = TimingParams {
      clear_done_on_start: false,
      ..TimingParams::default()
    };
    let mut array = SystolicArray::new(timing);
    array.configure(1, 1, 1);
    array.start(false);
    run_to_completion(&mut array);
    array.start(false);
    assert_eq!(array.status(), (true, true));
  }

  #[test]
  fn test_stalled_array_never_completes() {
    let timing = TimingParams {
      stall: true,
      ..TimingParams::default()
    };
    let mut array = SystolicArray::new(timing);
    array.configure(1, 1, 1);
    array.start(false);
    array.tick(10_000);
    assert_eq!(array.status(), (true, false));
  }
}
