use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use ingest::error::IngestError;
use ingest::policy::build_error_handling_policy;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Captured backtrace wrapper to avoid thiserror's unstable feature detection.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the runner binary.
///
/// Wraps [`IngestError`] for load failures and provides variants for infrastructure errors.
#[derive(Debug)]
pub enum RunnerError {
    /// Load run error.
    Ingest(IngestError),
    /// Configuration error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error.
    Io(std::io::Error, CapturedBacktrace),
    /// Any other error raised while wiring the run.
    Other(anyhow::Error),
}

impl RunnerError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            RunnerError::Ingest(_) => "load error",
            RunnerError::Config(_, _) => "configuration error",
            RunnerError::Io(_, _) => "i/o error",
            RunnerError::Other(_) => "runner error",
        }
    }

    /// Returns the backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            RunnerError::Ingest(err) => err.backtrace(),
            RunnerError::Config(_, cb) => Some(&cb.0),
            RunnerError::Io(_, cb) => Some(&cb.0),
            RunnerError::Other(err) => Some(err.backtrace()),
        }
    }

    /// Creates a configuration error from any source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        RunnerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("ingest run failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        if let RunnerError::Ingest(err) = self
            && let Some(solution) = build_error_handling_policy(err).solution()
        {
            out.push_str(&format!("hint: {solution}\n"));
        }

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Ingest(err) => write!(f, "{err}"),
            RunnerError::Config(source, _) => write!(f, "configuration error: {source}"),
            RunnerError::Io(source, _) => write!(f, "i/o error: {source}"),
            RunnerError::Other(err) => write!(f, "{err:#}"),
        }
    }
}

impl Error for RunnerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunnerError::Ingest(err) => err.source(),
            RunnerError::Config(source, _) => Some(source.as_ref()),
            RunnerError::Io(source, _) => Some(source),
            RunnerError::Other(err) => err.source(),
        }
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<IngestError> for RunnerError {
    fn from(err: IngestError) -> Self {
        RunnerError::Ingest(err)
    }
}

impl From<anyhow::Error> for RunnerError {
    /// Unwraps load errors carried by `err`, keeping their classification.
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<IngestError>() {
            Ok(err) => RunnerError::Ingest(err),
            Err(err) => RunnerError::Other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use ingest::error::ErrorKind;
    use ingest::ingest_error;

    use super::*;

    #[test]
    fn test_anyhow_errors_keep_their_load_error() {
        let err = anyhow::Error::new(ingest_error!(
            ErrorKind::SwapPartialFailure,
            "Swap failed midway"
        ));

        let err = RunnerError::from(err);

        assert!(matches!(&err, RunnerError::Ingest(err) if err.kind() == ErrorKind::SwapPartialFailure));
        assert_eq!(err.category(), "load error");
    }

    #[test]
    fn test_report_lists_category_and_error() {
        let err = RunnerError::config(std::io::Error::other("missing base configuration"));

        let report = err.render_report();

        assert!(report.starts_with("ingest run failed\n"));
        assert!(report.contains("category: configuration error\n"));
        assert!(report.contains("missing base configuration"));
    }
}
