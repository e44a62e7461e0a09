use crate::error::Result;
use crate::isa::{Inst, InstWord};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// JSON-lines trace: one object per issued word.
pub struct TraceWriter {
  writer: Box<dyn Write + Send>,
}

impl TraceWriter {
  pub fn create(path: impl AsRef<Path>) -> Result<Self> {
    let file = File::create(path.as_ref())?;
    Ok(Self::from_writer(BufWriter::new(file)))
  }

  pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
    Self {
      writer: Box::new(writer),
    }
  }

  pub fn record(&mut self, cycle: u64, word: InstWord, inst: &Inst) -> io::Result<()> {
    let trace_entry = serde_json::json!({
      "cycle": cycle,
      "word": word.to_string(),
      "asm": inst.to_string(),
    });
    writeln!(self.writer, "{}", trace_entry)?;
    self.writer.flush()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::isa::{decode, encode, VReg};
  use std::sync::{Arc, Mutex};

  #[derive(Clone, Default)]
  struct Shared(Arc<Mutex<Vec<u8>>>);

  impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn test_trace_lines_are_json() {
    let sink = Shared::default();
    let mut trace = TraceWriter::from_writer(sink.clone());
    let word = encode::vsa_status(VReg::new(0));
    trace.record(12, word, &decode(word)).unwrap();
    trace.record(13, word, &decode(word)).unwrap();

    let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(entry["cycle"], 12);
    assert_eq!(entry["word"], "0x0000007b");
    assert_eq!(entry["asm"], "vsa.status v0");
  }
}
