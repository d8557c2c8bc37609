//! Upload progress bars and a log writer that prints above them.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static BARS: OnceLock<MultiProgress> = OnceLock::new();

fn bars() -> &'static MultiProgress {
    BARS.get_or_init(|| MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(10)))
}

/// A bar for a batch of `len` files, drawn on stderr
pub fn upload_bar(len: u64) -> ProgressBar {
    let bar = bars().add(ProgressBar::new(len));
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {wide_msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// `MakeWriter` for `tracing_subscriber` that keeps log lines from tearing active bars
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressAwareWriter;

/// Buffers bytes and hands complete lines to the bar manager.
///
/// When the bars are hidden (stderr is not a terminal) indicatif drops
/// `println` output, so lines go straight to `fallback` instead.
pub struct LineWriter<W: Write = io::Stderr> {
    pending: Vec<u8>,
    bars: Option<&'static MultiProgress>,
    fallback: W,
}

impl<W: Write> LineWriter<W> {
    fn emit(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        match self.bars {
            Some(bars) => {
                let _ = bars.println(text);
            }
            None => {
                let _ = writeln!(self.fallback, "{}", text);
            }
        }
    }
}

impl<W: Write> Write for LineWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.emit(&line[..line.len() - 1]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest);
        }
        self.fallback.flush()
    }
}

impl<W: Write> Drop for LineWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for ProgressAwareWriter {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let target = bars();
        LineWriter {
            pending: Vec::new(),
            bars: (!target.is_hidden()).then_some(target),
            fallback: io::stderr(),
        }
    }
}
