// Functional and timing model of the coprocessor: decodes every issued
// word and executes it against the register files, memory and the array.

use super::memory::Dram;
use super::systolic_array::{SystolicArray, TimingParams};
use super::vpu::{self, Lanes, VectorRegFile};
use crate::error::Result;
use crate::isa::{decode, AluSrc, ElemWidth, Inst, InstWord, VReg, XReg, LANES};
use crate::simulator::config::{AppConfig, DeviceSection};
use crate::simulator::trace::TraceWriter;
use crate::vector::Coprocessor;

pub struct Machine {
  xregs: [u64; 32],
  vrf: VectorRegFile,
  array: SystolicArray,
  mem: Dram,
  device: DeviceSection,
  cycles: u64,
  retired: u64,
  trace: Option<TraceWriter>,
}

impl Machine {
  pub fn new(mem: Dram, device: DeviceSection) -> Self {
    let array = SystolicArray::new(timing_of(&device));
    Self {
      xregs: [0; 32],
      vrf: VectorRegFile::default(),
      array,
      mem,
      device,
      cycles: 0,
      retired: 0,
      trace: None,
    }
  }

  /// Build a machine from the `[memory]`, `[device]` and `[simulation]` sections.
  pub fn from_config(config: &AppConfig) -> Result<Self> {
    let mem = Dram::new(config.memory.base, config.memory.size);
    let mut machine = Self::new(mem, config.device.clone());
    if !config.simulation.trace_file.is_empty() {
      machine.trace = Some(TraceWriter::create(&config.simulation.trace_file)?);
    }
    Ok(machine)
  }

  pub fn set_trace(&mut self, trace: Option<TraceWriter>) {
    self.trace = trace;
  }

  pub fn xreg(&self, reg: XReg) -> u64 {
    self.xregs[reg.index()]
  }

  pub fn vreg(&self, reg: VReg) -> Lanes {
    self.vrf.read(reg)
  }

  /// Write a vector register directly, bypassing the instruction stream.
  pub fn poke_vreg(&mut self, reg: VReg, lanes: Lanes) {
    self.vrf.write(reg, lanes);
  }

  pub fn systolic(&self) -> &SystolicArray {
    &self.array
  }

  pub fn device_config(&self) -> &DeviceSection {
    &self.device
  }

  /// Apply new device parameters, e.g. to inject a stall mid-run.
  pub fn set_device_config(&mut self, device: DeviceSection) {
    self.array.set_timing(timing_of(&device));
    self.device = device;
  }

  /// Words executed since construction
  pub fn retired(&self) -> u64 {
    self.retired
  }

  fn bus_addr(&self, addr: u64) -> u64 {
    if self.device.aligned_only && addr & 7 != 0 {
      log::warn!("unaligned wide access at {:#x} rounded down", addr);
      addr & !7
    } else {
      addr
    }
  }

  fn alu_operand(&self, src: AluSrc) -> Lanes {
    match src {
      AluSrc::Vector(vs1) => self.vrf.read(vs1),
      AluSrc::Scalar(rs1) => [self.xregs[rs1.index()] as i64; LANES],
      AluSrc::Imm(imm) => [imm; LANES],
    }
  }

  /// Execute one decoded instruction, returning its latency in cycles.
  fn execute(&mut self, inst: Inst) -> u64 {
    let alu = self.device.alu_latency;
    let mem = self.device.mem_latency;
    match inst {
      Inst::Alu { op, vd, vs2, src } => {
        let b = self.alu_operand(src);
        let result = vpu::alu(op, &self.vrf.read(vs2), &b);
        self.vrf.write(vd, result);
        alu
      },
      Inst::MvVX { vd, rs1 } => {
        self.vrf.write(vd, [self.xregs[rs1.index()] as i64; LANES]);
        alu
      },
      Inst::Reduce { op, vd, vs2, vs1 } => {
        let folded = vpu::reduce(op, &self.vrf.read(vs2), self.vrf.lane(vs1, 0));
        self.vrf.set_lane(vd, 0, folded);
        alu
      },
      Inst::Vle64 { vd, rs1 } => {
        let base = self.bus_addr(self.xregs[rs1.index()]);
        let mut lanes = [0; LANES];
        for (i, lane) in lanes.iter_mut().enumerate() {
          *lane = self.mem.bus_load(base + 8 * i as u64, ElemWidth::B64, true);
        }
        self.vrf.write(vd, lanes);
        mem
      },
      Inst::Vse64 { vs3, rs1 } => {
        let base = self.bus_addr(self.xregs[rs1.index()]);
        let lanes = self.vrf.read(vs3);
        for (i, lane) in lanes.iter().enumerate() {
          self.mem.bus_store(base + 8 * i as u64, ElemWidth::B64, *lane);
        }
        mem
      },
      Inst::Vlx {
        vd,
        rs1,
        offset,
        width,
        num,
        signed,
      } => {
        let addr = self.xregs[rs1.index()].wrapping_add(offset as i64 as u64);
        let base = self.bus_addr(addr);
        let step = width.bytes() as u64;
        let mut lanes = [0; LANES];
        for (i, lane) in lanes.iter_mut().enumerate().take(num as usize) {
          *lane = self.mem.bus_load(base + step * i as u64, width, signed);
        }
        self.vrf.write(vd, lanes);
        mem
      },
      Inst::Vsx { vs3, rs1, width, num } => {
        let base = self.bus_addr(self.xregs[rs1.index()]);
        let step = width.bytes() as u64;
        let lanes = self.vrf.read(vs3);
        for (i, lane) in lanes.iter().enumerate().take(num as usize) {
          self.mem.bus_store(base + step * i as u64, width, *lane);
        }
        mem
      },
      Inst::VsaConfig { m, n, k } => {
        self.array.configure(m as usize, n as usize, k as usize);
        alu
      },
      Inst::VsaLoadX { vs, idx } => {
        self.array.load_x(idx as usize, self.vrf.read(vs));
        alu
      },
      Inst::VsaLoadW { vs, idx } => {
        self.array.load_w(idx as usize, self.vrf.read(vs));
        alu
      },
      Inst::VsaStart { accumulate } => {
        self.array.start(accumulate);
        alu
      },
      Inst::VsaReadY { vd, row } => {
        self.vrf.write(vd, self.array.read_row(row as usize));
        alu
      },
      Inst::VsaStatus { vd } => {
        let (busy, done) = self.array.status();
        let mut lanes = [0; LANES];
        lanes[0] = busy as i64;
        lanes[1] = done as i64;
        self.vrf.write(vd, lanes);
        alu
      },
      Inst::Unknown(word) => {
        log::error!("coprocessor: encountered unknown instruction word {}", word);
        1
      },
    }
  }

  fn advance(&mut self, cycles: u64) {
    self.cycles += cycles;
    self.array.tick(cycles);
  }
}

fn timing_of(device: &DeviceSection) -> TimingParams {
  TimingParams {
    overhead: device.systolic_overhead,
    clear_done_on_start: device.clear_done_on_start,
    stall: device.stall_systolic,
  }
}

impl Coprocessor for Machine {
  fn set_xreg(&mut self, reg: XReg, value: u64) {
    // x0 is hardwired to zero
    if reg != XReg::ZERO {
      self.xregs[reg.index()] = value;
    }
  }

  fn issue(&mut self, word: InstWord) {
    let inst = decode(word);
    log::debug!("[{}] {} {}", self.cycles, word, inst);
    if let Some(trace) = self.trace.as_mut() {
      if let Err(e) = trace.record(self.cycles, word, &inst) {
        log::warn!("trace write failed, tracing disabled: {}", e);
        self.trace = None;
      }
    }
    let latency = self.execute(inst);
    self.retired += 1;
    self.advance(latency);
  }

  fn memory(&self) -> &Dram {
    &self.mem
  }

  fn memory_mut(&mut self) -> &mut Dram {
    &mut self.mem
  }

  fn cycles(&self) -> u64 {
    self.cycles
  }
}
