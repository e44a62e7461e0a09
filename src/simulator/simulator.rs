// Simulated coprocessor bundle: the machine behind a vector unit, the
// caller-owned scratch and the poll policy, built from one AppConfig.

use super::config::AppConfig;
use crate::arch::{Element, Machine, Region};
use crate::error::Result;
use crate::isa::{asm, InstWord};
use crate::kernels::{exp_table, scalar, softmax_vec, vec, KernelScratch, SoftmaxScratch};
use crate::systolic::{matmul_i8_scale_clip_systolic, Poller, SystolicStats};
use crate::vector::{Coprocessor, VectorUnit};

/// Outputs and costs of one int8 matmul run three ways
#[derive(Debug, Clone)]
pub struct MatmulReport {
  pub scalar: Vec<i16>,
  pub vector: Vec<i16>,
  pub systolic: Vec<i16>,
  pub vector_cycles: u64,
  pub systolic_cycles: u64,
  pub systolic_stats: SystolicStats,
}

impl MatmulReport {
  /// Element-wise disagreements with the scalar reference: (vector, systolic)
  pub fn mismatches(&self) -> (usize, usize) {
    let count = |other: &[i16]| self.scalar.iter().zip(other).filter(|(a, b)| a != b).count();
    (count(&self.vector), count(&self.systolic))
  }

  pub fn agree(&self) -> bool {
    self.mismatches() == (0, 0)
  }
}

pub struct Simulator {
  vu: VectorUnit<Machine>,
  scratch: KernelScratch,
  softmax: SoftmaxScratch,
  poller: Poller,
  lut: Option<Region>,
}

impl Simulator {
  pub fn new(config: &AppConfig) -> Result<Self> {
    let mut machine = Machine::from_config(config)?;
    let scratch = KernelScratch::with_defaults(machine.memory_mut())?;
    log::info!(
      "simulator: {} KiB device memory at {:#x}, {} KiB free after scratch",
      config.memory.size / 1024,
      config.memory.base,
      machine.memory().available() / 1024
    );
    Ok(Self {
      vu: VectorUnit::new(machine),
      scratch,
      softmax: SoftmaxScratch::new(),
      poller: Poller::from_config(&config.driver),
      lut: None,
    })
  }

  pub fn unit(&mut self) -> &mut VectorUnit<Machine> {
    &mut self.vu
  }

  pub fn machine(&self) -> &Machine {
    self.vu.device()
  }

  pub fn scratch(&self) -> &KernelScratch {
    &self.scratch
  }

  pub fn set_poller(&mut self, poller: Poller) {
    self.poller = poller;
  }

  pub fn get_cycles(&self) -> u64 {
    self.vu.cycles()
  }

  /// Assemble one line and issue it.
  pub fn execute(&mut self, line: &str) -> Result<InstWord> {
    let word = asm::assemble(line)?;
    self.vu.issue(word);
    Ok(word)
  }

  /// Copy host data into freshly allocated device memory. Allocations live
  /// as long as the simulator.
  pub fn upload<T: Element>(&mut self, data: &[T]) -> Result<Region> {
    self.vu.mem_mut().upload(data, 8)
  }

  pub fn alloc<T: Element>(&mut self, count: usize) -> Result<Region> {
    self.vu.mem_mut().alloc(count * T::WIDTH.bytes(), 8)
  }

  pub fn read<T: Element>(&self, region: Region, count: usize) -> Result<Vec<T>> {
    self.vu.mem().read_slice(region.addr, count)
  }

  /// Run `body` with device allocations scoped to the call.
  fn scoped<R>(&mut self, body: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
    let mark = self.vu.mem().mark();
    let result = body(self);
    self.vu.mem_mut().release_to(mark);
    result
  }

  /// Run C = clip(A*B / scale) through the scalar reference, the vector
  /// kernel and the systolic array. Operand buffers are freed on return.
  pub fn matmul_i8(&mut self, a: &[i8], b: &[i8], m: usize, n: usize, k: usize, scale: i32) -> Result<MatmulReport> {
    let mut reference = vec![0i16; m * n];
    scalar::matmul_i8_scale_clip(a, b, &mut reference, m, n, k, scale)?;
    self.scoped(|sim| sim.matmul_i8_on_device(a, b, (m, n, k), scale, reference))
  }

  fn matmul_i8_on_device(
    &mut self,
    a: &[i8],
    b: &[i8],
    (m, n, k): (usize, usize, usize),
    scale: i32,
    reference: Vec<i16>,
  ) -> Result<MatmulReport> {
    let ra = self.upload(a)?;
    let rb = self.upload(b)?;
    let rv = self.alloc::<i16>(m * n)?;
    let rs = self.alloc::<i16>(m * n)?;

    let before = self.vu.cycles();
    vec::matmul_i8_scale_clip_vec(&mut self.vu, &self.scratch, ra.addr, rb.addr, rv.addr, m, n, k, scale)?;
    let vector_cycles = self.vu.cycles() - before;

    let systolic_stats = matmul_i8_scale_clip_systolic(
      &mut self.vu,
      &self.scratch,
      &self.poller,
      ra.addr,
      rb.addr,
      rs.addr,
      m,
      n,
      k,
      scale,
    )?;

    Ok(MatmulReport {
      scalar: reference,
      vector: self.read(rv, m * n)?,
      systolic: self.read(rs, m * n)?,
      vector_cycles,
      systolic_cycles: systolic_stats.cycles,
      systolic_stats,
    })
  }

  /// Q16.16 softmax of `logits` on the device against a generated table.
  ///
  /// The table stays resident after the first call; the logits and output
  /// buffers are freed on return.
  pub fn softmax(&mut self, logits: &[i32]) -> Result<Vec<i32>> {
    let lut = match self.lut {
      Some(region) => region,
      None => {
        let region = self.upload(&exp_table())?;
        self.lut = Some(region);
        region
      },
    };
    self.scoped(|sim| {
      let src = sim.upload(logits)?;
      let dst = sim.alloc::<i32>(logits.len())?;
      softmax_vec(
        &mut sim.vu,
        &sim.scratch,
        src.addr,
        dst.addr,
        lut.addr,
        logits.len(),
        &mut sim.softmax,
      )?;
      sim.read(dst, logits.len())
    })
  }
}
