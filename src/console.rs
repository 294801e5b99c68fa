//! Console I/O: `PRINT` writes to stdout, `INPUT` reads one trimmed line
//! from stdin. A second, buffer-backed implementation makes `INPUT`-driven
//! programs testable without a real terminal.

use std::io::{self, BufRead, Write};

pub trait Console {
    fn print(&mut self, s: &str);
    /// Reads one line, trimmed of its trailing newline. Returns `None`
    /// at end of input.
    fn read_line(&mut self) -> Option<String>;
}

pub struct StdConsole {
    stdout: io::Stdout,
    stdin: io::Stdin,
}

impl StdConsole {
    pub fn new() -> StdConsole {
        StdConsole { stdout: io::stdout(), stdin: io::stdin() }
    }
}

impl Default for StdConsole {
    fn default() -> StdConsole {
        StdConsole::new()
    }
}

impl Console for StdConsole {
    fn print(&mut self, s: &str) {
        let _ = self.stdout.write_all(s.as_bytes());
        let _ = self.stdout.flush();
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.stdin.lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
            Err(_) => None,
        }
    }
}

/// A console backed by an in-memory input queue and output buffer, used
/// by the integration tests to drive `INPUT`-dependent programs and
/// capture `PRINT` output for exact comparison.
#[derive(Default)]
pub struct BufferConsole {
    pub output: String,
    input_lines: std::collections::VecDeque<String>,
}

impl BufferConsole {
    pub fn new(input: &str) -> BufferConsole {
        BufferConsole {
            output: String::new(),
            input_lines: input.lines().map(|s| s.to_string()).collect(),
        }
    }
}

impl Console for BufferConsole {
    fn print(&mut self, s: &str) {
        self.output.push_str(s);
    }

    fn read_line(&mut self) -> Option<String> {
        self.input_lines.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_console_round_trip() {
        let mut c = BufferConsole::new("59\n60\n");
        assert_eq!(c.read_line(), Some("59".to_string()));
        assert_eq!(c.read_line(), Some("60".to_string()));
        assert_eq!(c.read_line(), None);
    }

    #[test]
    fn test_buffer_console_accumulates_output() {
        let mut c = BufferConsole::default();
        c.print("A");
        c.print("B\n");
        assert_eq!(c.output, "AB\n");
    }
}
