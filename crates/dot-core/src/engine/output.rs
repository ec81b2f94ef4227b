use std::{
    io::{self, Write},
    sync::Arc,
};

use dot_model::Job;

use super::LogStream;

/// Destinations for a job's container output.
pub struct OutputSinks {
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

impl OutputSinks {
    pub fn new(stdout: impl Write + Send + 'static, stderr: impl Write + Send + 'static) -> Self {
        Self {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }

    pub fn write(&mut self, stream: LogStream, bytes: &[u8]) -> io::Result<()> {
        match stream {
            LogStream::Stdout => self.stdout.write_all(bytes),
            LogStream::Stderr => self.stderr.write_all(bytes),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()?;
        self.stderr.flush()
    }
}

impl Default for OutputSinks {
    fn default() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl std::fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSinks").finish_non_exhaustive()
    }
}

/// Builds the sinks for each job as it is launched.
pub type SinkFactory = Arc<dyn Fn(&Job) -> OutputSinks + Send + Sync>;

/// Factory writing every job straight to the process stdout/stderr.
pub fn std_sinks() -> SinkFactory {
    Arc::new(|_job: &Job| OutputSinks::default())
}
