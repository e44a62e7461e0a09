// Scalar reference vs vectorized kernels on the simulated machine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rvsa::arch::{Dram, Element, Machine};
use rvsa::kernels::{scalar, vec, KernelScratch};
use rvsa::log::init_test_log;
use rvsa::simulator::config::{AppConfig, DeviceSection};
use rvsa::vector::{Coprocessor, VectorUnit};
use rvsa::Simulator;

const BASE: u64 = 0x8080_0000;

struct Rig {
  vu: VectorUnit<Machine>,
  scratch: KernelScratch,
}

impl Rig {
  fn new(device: DeviceSection) -> Self {
    init_test_log();
    let mut machine = Machine::new(Dram::new(BASE, 1 << 20), device);
    let scratch = KernelScratch::with_defaults(machine.memory_mut()).unwrap();
    Self {
      vu: VectorUnit::new(machine),
      scratch,
    }
  }

  /// Place `data` at an address `skew` bytes past an 8-byte boundary.
  fn place<T: Element>(&mut self, data: &[T], skew: u64) -> u64 {
    let region = self.vu.mem_mut().alloc(data.len() * T::WIDTH.bytes() + 8, 8).unwrap();
    let addr = region.addr + skew;
    self.vu.mem_mut().write_slice(addr, data).unwrap();
    addr
  }

  fn read<T: Element>(&self, addr: u64, count: usize) -> Vec<T> {
    self.vu.mem().read_slice(addr, count).unwrap()
  }
}

fn pattern_a(len: usize) -> Vec<i8> {
  (0..len).map(|i| (i * 37 + 3) as u8 as i8).collect()
}

fn pattern_b(len: usize) -> Vec<i8> {
  (0..len).map(|i| (i * 17).wrapping_sub(5) as u8 as i8).collect()
}

/// Run the int8 matmul both ways; outputs start from different sentinels.
fn matmul_i8_case(rig: &mut Rig, a: &[i8], b: &[i8], (m, n, k, scale): (usize, usize, usize, i32), skew: u64) {
  let mut want = vec![0x1234i16; m * n];
  scalar::matmul_i8_scale_clip(a, b, &mut want, m, n, k, scale).unwrap();

  let ra = rig.place(a, skew);
  let rb = rig.place(b, skew);
  let rc = rig.place(&vec![0x4321i16; m * n], 0);
  vec::matmul_i8_scale_clip_vec(&mut rig.vu, &rig.scratch, ra, rb, rc, m, n, k, scale).unwrap();
  assert_eq!(rig.read::<i16>(rc, m * n), want, "M={} N={} K={} scale={}", m, n, k, scale);
}

macro_rules! matmul_case {
  ($name:ident, $m:expr, $n:expr, $k:expr, $scale:expr) => {
    #[test]
    fn $name() {
      let mut rig = Rig::new(DeviceSection::default());
      let (a, b) = (pattern_a($m * $k), pattern_b($k * $n));
      matmul_i8_case(&mut rig, &a, &b, ($m, $n, $k, $scale), 0);
    }
  };
}

matmul_case!(matmul_1x1x1, 1, 1, 1, 1);
matmul_case!(matmul_1x4x3, 1, 4, 3, 1);
matmul_case!(matmul_4x4x3, 4, 4, 3, 1);
matmul_case!(matmul_5x3x7, 5, 3, 7, 2);
matmul_case!(matmul_8x8x8, 8, 8, 8, 4);
matmul_case!(matmul_9x7x5, 9, 7, 5, 3);
matmul_case!(matmul_12x6x9, 12, 6, 9, 5);
matmul_case!(matmul_3x10x2, 3, 10, 2, 2);
matmul_case!(matmul_16x16x16, 16, 16, 16, 8);
matmul_case!(matmul_15x15x15, 15, 15, 15, 1);

#[test]
fn test_concrete_8x8x8_scale4_output() {
  let (a, b) = (pattern_a(64), pattern_b(64));
  let mut want = vec![0i16; 64];
  scalar::matmul_i8_scale_clip(&a, &b, &mut want, 8, 8, 8, 4).unwrap();
  // Hand-checked corner: row 0 of A is 3, 40, 77, 114, -105, -68, -31, 6
  // and column 0 of B is -5, -125, 11, -109, 27, -93, 43, -77: the dot
  // product is -14900, so C[0] clamps to 0.
  let a_row0: Vec<i32> = a[..8].iter().map(|&v| v as i32).collect();
  let b_col0: Vec<i32> = (0..8).map(|kk| b[kk * 8] as i32).collect();
  assert_eq!(a_row0, vec![3, 40, 77, 114, -105, -68, -31, 6]);
  assert_eq!(b_col0, vec![-5, -125, 11, -109, 27, -93, 43, -77]);
  let dot: i32 = a_row0.iter().zip(&b_col0).map(|(x, y)| x * y).sum();
  assert_eq!(dot, -14900);
  assert_eq!(want[0], 0);

  let mut rig = Rig::new(DeviceSection::default());
  matmul_i8_case(&mut rig, &a, &b, (8, 8, 8, 4), 0);
}

#[test]
fn test_randomized_matmul_cases() {
  let mut rng = StdRng::seed_from_u64(20231225);
  let mut rig = Rig::new(DeviceSection::default());
  for _ in 0..30 {
    let m = rng.gen_range(1..=16);
    let n = rng.gen_range(1..=16);
    let k = rng.gen_range(1..=16);
    let scale = rng.gen_range(0..=4);
    let a: Vec<i8> = (0..m * k).map(|_| rng.gen()).collect();
    let b: Vec<i8> = (0..k * n).map(|_| rng.gen()).collect();
    let skew = rng.gen_range(0..8);
    matmul_i8_case(&mut rig, &a, &b, (m, n, k, scale), skew);
  }
}

#[test]
fn test_unaligned_operands() {
  let mut rig = Rig::new(DeviceSection::default());
  for skew in 1..8 {
    let (a, b) = (pattern_a(6 * 19), pattern_b(19 * 5));
    matmul_i8_case(&mut rig, &a, &b, (6, 5, 19, 3), skew);
  }
}

#[test]
fn test_unaligned_operands_on_aligned_only_bus() {
  let device = DeviceSection {
    aligned_only: true,
    ..DeviceSection::default()
  };
  let mut rig = Rig::new(device);
  let (a, b) = (pattern_a(7 * 21), pattern_b(21 * 4));
  matmul_i8_case(&mut rig, &a, &b, (7, 4, 21, 2), 5);
}

#[test]
fn test_saturation_hits_clamp_bounds() {
  let mut rig = Rig::new(DeviceSection::default());
  let k = 16;
  // 16 * 127 * 127 = 258064 > 32767; all-negative products clamp to 0
  let a = vec![127i8; 2 * k];
  let mut b = vec![127i8; k * 2];
  for kk in 0..k {
    b[kk * 2 + 1] = -127;
  }
  matmul_i8_case(&mut rig, &a, &b, (2, 2, k, 1), 0);
  let mut want = vec![0i16; 4];
  scalar::matmul_i8_scale_clip(&a, &b, &mut want, 2, 2, k, 1).unwrap();
  assert_eq!(want, vec![32767, 0, 32767, 0]);
}

#[test]
fn test_wide_matmuls() {
  let mut rng = StdRng::seed_from_u64(7);
  let mut rig = Rig::new(DeviceSection::default());
  for _ in 0..6 {
    let (m, n, k) = (rng.gen_range(1..=9), rng.gen_range(1..=9), rng.gen_range(1..=20));
    let scale = rng.gen_range(-3..=3);

    let a16: Vec<i16> = (0..m * k).map(|_| rng.gen()).collect();
    let b16: Vec<i16> = (0..k * n).map(|_| rng.gen()).collect();
    let mut want = vec![0i32; m * n];
    scalar::matmul_i16_scale_clip(&a16, &b16, &mut want, m, n, k, scale).unwrap();
    let (ra, rb) = (rig.place(&a16, 2), rig.place(&b16, 0));
    let rc = rig.place(&vec![0i32; m * n], 0);
    vec::matmul_i16_scale_clip_vec(&mut rig.vu, &rig.scratch, ra, rb, rc, m, n, k, scale).unwrap();
    assert_eq!(rig.read::<i32>(rc, m * n), want);

    let a32: Vec<i32> = (0..m * k).map(|_| rng.gen()).collect();
    let b32: Vec<i32> = (0..k * n).map(|_| rng.gen()).collect();
    scalar::matmul_i32_scale_clip(&a32, &b32, &mut want, m, n, k, scale).unwrap();
    let (ra, rb) = (rig.place(&a32, 4), rig.place(&b32, 0));
    vec::matmul_i32_scale_clip_vec(&mut rig.vu, &rig.scratch, ra, rb, rc, m, n, k, scale).unwrap();
    assert_eq!(rig.read::<i32>(rc, m * n), want);
  }
}

#[test]
fn test_nhwc_matmul() {
  let mut rig = Rig::new(DeviceSection::default());
  let (m, n, k) = (6, 9, 27);
  let (a, b) = (pattern_a(m * k), pattern_b(k * n));
  let mut want = vec![0i16; m * n];
  scalar::matmul_i8_scale_clip_nhwc(&a, &b, &mut want, m, n, k, 2).unwrap();
  let (ra, rb) = (rig.place(&a, 0), rig.place(&b, 0));
  let rc = rig.place(&vec![0i16; m * n], 0);
  vec::matmul_i8_scale_clip_nhwc_vec(&mut rig.vu, &rig.scratch, ra, rb, rc, m, n, k, 2).unwrap();
  assert_eq!(rig.read::<i16>(rc, m * n), want);
}

#[test]
fn test_elementwise_kernels() {
  let mut rng = StdRng::seed_from_u64(99);
  let mut rig = Rig::new(DeviceSection::default());
  for len in [1usize, 7, 8, 9, 30] {
    let data: Vec<i16> = (0..len).map(|_| rng.gen()).collect();
    let mut want = data.clone();
    scalar::relu_i16(&mut want);
    let rd = rig.place(&data, 0);
    vec::relu_i16_vec(&mut rig.vu, rd, len).unwrap();
    assert_eq!(rig.read::<i16>(rd, len), want);

    let a: Vec<i32> = (0..len).map(|_| rng.gen()).collect();
    let b: Vec<i32> = (0..len).map(|_| rng.gen()).collect();
    let mut sum = vec![0i32; len];
    scalar::matadd_i32(&a, &b, &mut sum).unwrap();
    let (ra, rb) = (rig.place(&a, 0), rig.place(&b, 0));
    let rc = rig.place(&vec![0i32; len], 0);
    vec::matadd_i32_vec(&mut rig.vu, ra, rb, rc, len).unwrap();
    assert_eq!(rig.read::<i32>(rc, len), sum);

    let src: Vec<i16> = (0..len).map(|_| rng.gen()).collect();
    let rs = rig.place(&src, 0);
    let rdst = rig.place(&vec![0i16; len], 0);
    vec::flatten_i16_vec(&mut rig.vu, rs, rdst, len).unwrap();
    assert_eq!(rig.read::<i16>(rdst, len), src);
    let issued = rig.vu.issued();
    vec::flatten_i16_vec(&mut rig.vu, rs, rs, len).unwrap();
    assert_eq!(rig.vu.issued(), issued);
    assert_eq!(rig.read::<i16>(rs, len), src);
  }
}

#[test]
fn test_pool_and_transposes() {
  let mut rng = StdRng::seed_from_u64(3);
  let mut rig = Rig::new(DeviceSection::default());
  for (c, h, w) in [(1usize, 4usize, 4usize), (8, 6, 6), (11, 5, 7), (16, 2, 2)] {
    let src: Vec<i16> = (0..c * h * w).map(|_| rng.gen()).collect();
    let rs = rig.place(&src, 0);

    let pooled_len = (h / 2) * (w / 2) * c;
    let mut want = vec![0i16; pooled_len];
    scalar::maxpool_i16(&src, &mut want, c, h, w).unwrap();
    let rp = rig.place(&vec![0i16; pooled_len], 0);
    vec::maxpool_i16_vec(&mut rig.vu, rs, rp, c, h, w).unwrap();
    assert_eq!(rig.read::<i16>(rp, pooled_len), want);

    let mut chw = vec![0i16; src.len()];
    scalar::transpose_nhwc_to_nchw_i16(&src, &mut chw, c, h, w).unwrap();
    let rt = rig.place(&vec![0i16; src.len()], 0);
    vec::transpose_nhwc_to_nchw_i16_vec(&mut rig.vu, rs, rt, c, h, w).unwrap();
    assert_eq!(rig.read::<i16>(rt, src.len()), chw);
  }

  let src: Vec<i8> = (0..5 * 13).map(|_| rng.gen()).collect();
  let mut want = vec![0i8; src.len()];
  scalar::transpose_i8(&src, &mut want, 5, 13).unwrap();
  let rs = rig.place(&src, 0);
  let rt = rig.place(&vec![0i8; src.len()], 0);
  vec::transpose_i8_vec(&mut rig.vu, rs, rt, 5, 13).unwrap();
  assert_eq!(rig.read::<i8>(rt, src.len()), want);
}

#[test]
fn test_im2col_then_conv_matches() {
  let mut rng = StdRng::seed_from_u64(11);
  let mut rig = Rig::new(DeviceSection::default());
  let (cin, h, w, k, cout) = (2usize, 6usize, 6usize, 3usize, 4usize);
  let img: Vec<i8> = (0..h * w * cin).map(|_| rng.gen()).collect();
  let weight: Vec<i8> = (0..cout * k * k * cin).map(|_| rng.gen()).collect();
  let (ho, wo) = scalar::conv_out_dims(h, w, k).unwrap();
  let (rows, patches) = (k * k * cin, ho * wo);

  let mut wcol = vec![0i8; weight.len()];
  let mut icol = vec![0i8; rows * patches];
  scalar::im2col_weight_i8(&weight, &mut wcol, cout, cin, k).unwrap();
  scalar::im2col_input_i8(&img, &mut icol, cin, h, w, k).unwrap();
  let mut want = vec![0i16; cout * patches];
  scalar::matmul_i8_scale_clip_nhwc(&wcol, &icol, &mut want, cout, patches, rows, 16).unwrap();

  let rimg = rig.place(&img, 0);
  let rw = rig.place(&weight, 0);
  let rwcol = rig.place(&vec![0i8; weight.len()], 0);
  let ricol = rig.place(&vec![0i8; rows * patches], 0);
  let rout = rig.place(&vec![0i16; cout * patches], 0);
  vec::im2col_weight_i8_vec(&mut rig.vu, rw, rwcol, cout, cin, k).unwrap();
  vec::im2col_input_i8_vec(&mut rig.vu, &rig.scratch, rimg, ricol, cin, h, w, k).unwrap();
  assert_eq!(rig.read::<i8>(ricol, rows * patches), icol);
  vec::matmul_i8_scale_clip_nhwc_vec(&mut rig.vu, &rig.scratch, rwcol, ricol, rout, cout, patches, rows, 16).unwrap();
  assert_eq!(rig.read::<i16>(rout, cout * patches), want);
  assert_eq!(rig.vu.arena().leased(), (0, 0));
}

#[test]
fn test_three_paths_agree_on_partial_k_tiles() {
  init_test_log();
  let mut rng = StdRng::seed_from_u64(0x0005_1a7e);
  let mut sim = Simulator::new(&AppConfig::default()).unwrap();
  // partial K tiles force a reconfigure between starts
  for k in [1usize, 2, 3, 4, 5, 6, 7, 9, 17] {
    for _ in 0..3 {
      let (m, n) = (rng.gen_range(1..=12), rng.gen_range(1..=12));
      let scale = rng.gen_range(0..=4);
      let a: Vec<i8> = (0..m * k).map(|_| rng.gen()).collect();
      let b: Vec<i8> = (0..k * n).map(|_| rng.gen()).collect();
      let report = sim.matmul_i8(&a, &b, m, n, k, scale).unwrap();
      assert!(report.agree(), "M={} N={} K={}: {:?}", m, n, k, report.mismatches());
    }
  }
}

#[test]
fn test_empty_reduction_after_a_full_tile() {
  init_test_log();
  let mut sim = Simulator::new(&AppConfig::default()).unwrap();
  let ones = vec![1i8; 64];
  assert!(sim.matmul_i8(&ones, &ones, 8, 8, 8, 0).unwrap().agree());

  let report = sim.matmul_i8(&[], &[], 2, 2, 0, 0).unwrap();
  assert_eq!(report.scalar, vec![0; 4]);
  assert!(report.agree(), "{:?} {:?}", report.vector, report.systolic);
}
