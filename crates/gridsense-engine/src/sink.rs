//! CSV sinks driven by the host: conditioned-frame recording and bias
//! export.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use gridsense_signal::Frame;

/// Streams conditioned frames to a CSV file.
///
/// The header is written lazily on the first frame, once the channel
/// count is known: `t,ch0,…,ch{N-1}` plus a `model` column when the
/// linear head was active on that first frame. The time column is
/// seconds from the session base.
pub struct FrameCsvSink {
    writer: BufWriter<File>,
    base_ns: Option<u64>,
    header_written: bool,
    include_model: bool,
}

impl FrameCsvSink {
    /// Create (truncate) the file at `path`. `base_ns` anchors the time
    /// column; pass `None` to anchor at the first written frame.
    pub fn create(path: impl AsRef<Path>, base_ns: Option<u64>) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            base_ns,
            header_written: false,
            include_model: false,
        })
    }

    /// Append one conditioned frame; `model` carries the linear-head
    /// output when it ran.
    pub fn write(&mut self, frame: &Frame, model: Option<f32>) -> io::Result<()> {
        if !self.header_written {
            self.include_model = model.is_some();
            write!(self.writer, "t")?;
            for ch in 0..frame.x.len() {
                write!(self.writer, ",ch{ch}")?;
            }
            if self.include_model {
                write!(self.writer, ",model")?;
            }
            writeln!(self.writer)?;
            self.header_written = true;
        }

        let base = *self.base_ns.get_or_insert(frame.t_ns);
        let t_secs = frame.t_ns.saturating_sub(base) as f64 * 1e-9;
        write!(self.writer, "{t_secs}")?;
        for v in &frame.x {
            write!(self.writer, ",{v}")?;
        }
        if self.include_model {
            write!(self.writer, ",{}", model.unwrap_or(0.0))?;
        }
        writeln!(self.writer)?;
        Ok(())
    }

    /// Flush buffered rows to disk.
    pub fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Write a stored bias vector as a two-row CSV: a `ch0,…,ch{N-1}` header
/// and one row of values in the same column order.
pub fn write_bias_csv(path: impl AsRef<Path>, bias: &[f32]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (i, _) in bias.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write!(writer, "ch{i}")?;
    }
    writeln!(writer)?;
    for (i, v) in bias.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write!(writer, "{v}")?;
    }
    writeln!(writer)?;
    writer.flush()
}
