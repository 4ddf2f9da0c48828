//! Output sinks for tunnel messages

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Informational and error streams shared by all tunnels of a forwarder
#[derive(Clone)]
pub struct Sinks {
    out: SharedWriter,
    err: SharedWriter,
}

impl Sinks {
    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            err: Arc::new(Mutex::new(err)),
        }
    }

    /// Process stdout and stderr
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Discard everything
    #[cfg(test)]
    pub fn sink() -> Self {
        Self::new(io::sink(), io::sink())
    }

    pub fn info(&self, message: impl Display) {
        Self::write_line(&self.out, message);
    }

    pub fn error(&self, message: impl Display) {
        Self::write_line(&self.err, message);
    }

    fn write_line(writer: &SharedWriter, message: impl Display) {
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = writeln!(writer, "{message}").and_then(|()| writer.flush()) {
            debug!(?error, "Failed to write to sink");
        }
    }
}

/// In-memory writer for inspecting sink output in tests
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Captured(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Captured {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_go_to_their_stream() {
        let out = Captured::default();
        let err = Captured::default();
        let sinks = Sinks::new(out.clone(), err.clone());

        sinks.info("Forwarding from 127.0.0.1:30650 -> 650");
        sinks.error(format_args!("an error occurred forwarding {} -> {}", 30650, 650));

        assert_eq!(out.contents(), "Forwarding from 127.0.0.1:30650 -> 650\n");
        assert_eq!(err.contents(), "an error occurred forwarding 30650 -> 650\n");
    }
}
