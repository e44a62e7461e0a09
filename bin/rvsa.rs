use clap::{Parser, Subcommand};
use rvsa::isa::{asm, decode, InstWord};
use rvsa::log::init_log;
use rvsa::simulator::config::{load_and_merge_configs, CliOverrides};
use rvsa::Simulator;
use std::path::PathBuf;
use std::process::ExitCode;

/// rvsa - vector/systolic coprocessor driver tool
#[derive(Parser, Debug)]
#[command(name = "rvsa")]
#[command(version = "0.1.0")]
#[command(about = "Encode, decode and exercise the vector/systolic coprocessor", long_about = None)]
struct Args {
  /// Custom configuration file merged over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Quiet mode (suppress log messages)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Give up a systolic wait after this many status polls
  #[arg(long, value_name = "N")]
  max_polls: Option<u64>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Assemble one instruction and print its word
  Encode {
    /// e.g. "vadd.vv v3, v1, v2"
    asm: String,
  },
  /// Disassemble a 32-bit word
  Decode {
    /// Hex (0x...) or decimal
    word: String,
  },
  /// Run an int8 scale-and-clip matmul three ways and compare
  Matmul {
    #[arg(long, default_value_t = 8)]
    m: usize,
    #[arg(long, default_value_t = 8)]
    n: usize,
    #[arg(long, default_value_t = 8)]
    k: usize,
    #[arg(long, default_value_t = 4)]
    scale: i32,
  },
}

fn parse_word(text: &str) -> Option<u32> {
  let text = text.trim();
  match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
    Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16).ok(),
    None => text.parse().ok(),
  }
}

fn run(args: Args) -> rvsa::Result<bool> {
  let cli = CliOverrides {
    quiet: args.quiet,
    trace_file: args.trace_file.clone(),
    max_polls: args.max_polls,
  };
  let config = load_and_merge_configs(args.config.as_deref(), &cli)?;
  init_log(config.simulation.quiet);

  match args.command {
    Command::Encode { asm: line } => {
      let word = asm::assemble(&line)?;
      println!("{}", word);
      Ok(true)
    },
    Command::Decode { word } => match parse_word(&word) {
      Some(bits) => {
        println!("{}", decode(InstWord::from_bits(bits)));
        Ok(true)
      },
      None => Err(rvsa::Error::Asm(format!("not a 32-bit word: `{}`", word))),
    },
    Command::Matmul { m, n, k, scale } => {
      let a: Vec<i8> = (0..m * k).map(|i| (i * 37 + 3) as u8 as i8).collect();
      let b: Vec<i8> = (0..k * n).map(|i| (i * 17).wrapping_sub(5) as u8 as i8).collect();

      let mut sim = Simulator::new(&config)?;
      if !config.simulation.trace_file.is_empty() {
        log::info!("tracing to {}", config.simulation.trace_file);
      }
      let report = sim.matmul_i8(&a, &b, m, n, k, scale)?;
      let (vec_bad, sys_bad) = report.mismatches();

      println!("matmul {}x{}x{} scale={}", m, n, k, scale);
      println!("  vector:   {} cycles, {} mismatches", report.vector_cycles, vec_bad);
      println!(
        "  systolic: {} cycles, {} mismatches ({} tiles, {} starts, {} polls)",
        report.systolic_cycles,
        sys_bad,
        report.systolic_stats.tiles,
        report.systolic_stats.starts,
        report.systolic_stats.polls
      );
      println!("  C[0..{}] = {:?}", n.min(8), &report.scalar[..n.min(8).min(report.scalar.len())]);
      Ok(report.agree())
    },
  }
}

fn main() -> ExitCode {
  let args = Args::parse();
  match run(args) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => {
      eprintln!("results disagree");
      ExitCode::FAILURE
    },
    Err(e) => {
      eprintln!("error: {}", e);
      ExitCode::FAILURE
    },
  }
}

