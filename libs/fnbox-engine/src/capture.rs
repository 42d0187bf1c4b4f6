//! Output Capture: accumulates stdout/stderr chunks from either runner
//! variant into one [`RunOutput`].

use bollard::container::LogOutput;

/// What a finished execution unit produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Default)]
pub struct OutputCapture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from buffers that were read whole, as the process runner does
    pub fn from_buffers(stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self { stdout, stderr }
    }

    pub fn push_stdout(&mut self, bytes: &[u8]) {
        self.stdout.extend_from_slice(bytes);
    }

    pub fn push_stderr(&mut self, bytes: &[u8]) {
        self.stderr.extend_from_slice(bytes);
    }

    /// Route a demultiplexed Docker frame to the right stream
    pub fn push_log(&mut self, frame: LogOutput) {
        match frame {
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                self.push_stdout(&message)
            }
            LogOutput::StdErr { message } => self.push_stderr(&message),
            LogOutput::StdIn { .. } => {}
        }
    }

    pub fn finish(self, exit_code: i64) -> RunOutput {
        RunOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_keep_stream_order() {
        let mut capture = OutputCapture::new();
        capture.push_log(LogOutput::StdOut { message: "he".into() });
        capture.push_log(LogOutput::StdErr { message: "warn\n".into() });
        capture.push_log(LogOutput::StdOut { message: "llo\n".into() });

        let output = capture.finish(0);
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "warn\n");
        assert!(output.succeeded());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let capture = OutputCapture::from_buffers(vec![b'o', b'k', 0xff], Vec::new());
        let output = capture.finish(1);
        assert_eq!(output.stdout, "ok\u{fffd}");
        assert!(!output.succeeded());
    }
}
