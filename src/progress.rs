//! Progress bars that coexist with log output.
//!
//! All bars hang off one process-wide `MultiProgress`. Log lines are routed
//! through [`LogWriterFactory`], which prints them above the bars instead of
//! through them.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static BARS: OnceLock<MultiProgress> = OnceLock::new();

fn bars() -> &'static MultiProgress {
    BARS.get_or_init(|| {
        let bars = MultiProgress::new();
        bars.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        bars
    })
}

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}";
const SPINNER_TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Bar for `len` items. Hidden when `visible` is false, so JSON output
/// stays clean.
pub fn start_progress_bar(len: usize, message: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = bars().add(ProgressBar::new(len as u64));
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars(SPINNER_TICKS)
        .progress_chars("#>-");
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

pub fn finish_progress(bar: &ProgressBar, message: &str) {
    bar.finish_with_message(message.to_string());
}

/// Print one log line above the bars. Bars are not drawn when stderr is
/// not a terminal (a detached daemon's log file), so lines go straight out.
fn emit(line: &str) {
    let line = line.trim_end_matches('\r');
    if io::stderr().is_terminal() {
        let _ = bars().println(line);
    } else {
        eprintln!("{}", line);
    }
}

/// `tracing_subscriber` writer factory for [`LineWriter`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriterFactory;

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter::default()
    }
}

/// Buffers bytes until a newline, then hands whole lines to the bars
#[derive(Debug, Default)]
pub struct LineWriter {
    pending: String,
}

impl LineWriter {
    fn drain_lines(&mut self) {
        while let Some(end) = self.pending.find('\n') {
            emit(&self.pending[..end]);
            self.pending.drain(..=end);
        }
    }
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.push_str(&String::from_utf8_lossy(buf));
        self.drain_lines();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain_lines();
        if !self.pending.is_empty() {
            emit(&self.pending);
            self.pending.clear();
        }
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
