use std::{
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use dot_core::{OutputSinks, SinkFactory};
use dot_model::Job;

/// Longest job name shown in output prefixes; longer names are cut and end in `...`.
pub const MAX_NAME_LENGTH: usize = 20;

/// ANSI foreground colours handed out to jobs in turn.
const PALETTE: [&str; 5] = ["33", "32", "31", "37", "35"];

/// Name as shown in the output prefix.
pub fn display_name(name: &str) -> String {
    if name.chars().count() <= MAX_NAME_LENGTH {
        return name.to_string();
    }
    let mut short: String = name.chars().take(MAX_NAME_LENGTH - 3).collect();
    short.push_str("...");
    short
}

/// Writer that prefixes every line with `<job> | `.
///
/// Each `write` call reaches the inner writer as a single `write_all`, so concurrent jobs
/// sharing a terminal interleave at line granularity at worst.
pub struct JobOutput<W> {
    prefix: Vec<u8>,
    inner: W,
    line_start: bool,
}

impl<W: Write> JobOutput<W> {
    pub fn new(name: &str, inner: W) -> Self {
        Self {
            prefix: format!("{} | ", display_name(name)).into_bytes(),
            inner,
            line_start: true,
        }
    }

    /// Colour the prefix with palette entry `slot` (wrapping).
    pub fn with_color(mut self, slot: usize) -> Self {
        let code = PALETTE[slot % PALETTE.len()];
        let plain = String::from_utf8_lossy(&self.prefix).into_owned();
        self.prefix = format!("\x1b[{code}m{plain}\x1b[0m").into_bytes();
        self
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for JobOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = Vec::with_capacity(buf.len() + self.prefix.len());
        for line in buf.split_inclusive(|b| *b == b'\n') {
            if self.line_start {
                out.extend_from_slice(&self.prefix);
            }
            out.extend_from_slice(line);
            self.line_start = line.ends_with(b"\n");
        }
        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Sink factory writing each job to the process stdout/stderr behind its own prefix.
pub fn job_output_sinks(use_color: bool) -> SinkFactory {
    let next = Arc::new(AtomicUsize::new(0));
    Arc::new(move |job: &Job| {
        let stdout = JobOutput::new(&job.name, io::stdout());
        let stderr = JobOutput::new(&job.name, io::stderr());
        if use_color {
            let slot = next.fetch_add(1, Ordering::Relaxed);
            OutputSinks::new(stdout.with_color(slot), stderr.with_color(slot))
        } else {
            OutputSinks::new(stdout, stderr)
        }
    })
}
