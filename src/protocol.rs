//! Line protocol with the upstream process.
//!
//! Input (stdin), one command per line, prefix matched case-insensitively:
//!
//! | Command                      | Effect                                   |
//! |------------------------------|------------------------------------------|
//! | `goto <x> <y>`               | navigate to (x, y)                       |
//! | `speed <s>`                  | navigation speed scale, clamped to [0,1] |
//! | `setpwm <min> <max>`         | drive effort bounds, clamped to [20,100] |
//! | `setpos <x> <y> <heading>`   | overwrite the pose estimate              |
//! | `stop`                       | halt, clear goal, write telemetry        |
//! | `pulse <left_ns> <right_ns>` | manual ESC pulse widths                  |
//! | `q`                          | exit                                     |
//!
//! Output (stdout): `READY`, `OK ...` acknowledgements,
//! `STATUS <x> <y> <heading> <state>` and `ARRIVED`. Lines that do not parse
//! get no reply.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::navigation::NavState;

/// A parsed input line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Goto { x: f64, y: f64 },
    Speed(f64),
    SetPwm { min: i32, max: i32 },
    SetPos { x: f64, y: f64, heading: f64 },
    Stop,
    Pulse { left_ns: i64, right_ns: i64 },
    Quit,
}

/// Parse one input line. Returns `None` for anything unrecognised or
/// missing arguments.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let lower = line.to_ascii_lowercase();

    if let Some(rest) = strip_keyword(line, &lower, "goto") {
        let [x, y] = parse_args::<f64, 2>(rest)?;
        return finite(&[x, y]).then_some(Command::Goto { x, y });
    }
    if let Some(rest) = strip_keyword(line, &lower, "speed") {
        let [s] = parse_args::<f64, 1>(rest)?;
        return finite(&[s]).then_some(Command::Speed(s));
    }
    if let Some(rest) = strip_keyword(line, &lower, "setpwm") {
        let [min, max] = parse_args::<i32, 2>(rest)?;
        return Some(Command::SetPwm { min, max });
    }
    if let Some(rest) = strip_keyword(line, &lower, "setpos") {
        let [x, y, heading] = parse_args::<f64, 3>(rest)?;
        return finite(&[x, y, heading]).then_some(Command::SetPos { x, y, heading });
    }
    if lower.starts_with("stop") {
        return Some(Command::Stop);
    }
    if lower == "q" || lower == "quit" {
        return Some(Command::Quit);
    }
    if let Some(rest) = strip_keyword(line, &lower, "pulse") {
        let [left_ns, right_ns] = parse_args::<i64, 2>(rest)?;
        return Some(Command::Pulse { left_ns, right_ns });
    }
    None
}

/// Text after `keyword` if the line starts with it (case-insensitive).
fn strip_keyword<'a>(line: &'a str, lower: &str, keyword: &str) -> Option<&'a str> {
    // ASCII lowercasing keeps byte offsets aligned with the original line
    lower.starts_with(keyword).then(|| &line[keyword.len()..])
}

/// Parse the first `N` whitespace-separated values. Extra tokens are ignored.
fn parse_args<T: FromStr + Copy + Default, const N: usize>(rest: &str) -> Option<[T; N]> {
    let mut out = [T::default(); N];
    let mut tokens = rest.split_whitespace();
    for slot in out.iter_mut() {
        *slot = tokens.next()?.parse().ok()?;
    }
    Some(out)
}

fn finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// An output line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feedback {
    Ready,
    Ack(Command),
    Status {
        x: f64,
        y: f64,
        heading: f64,
        state: NavState,
    },
    Arrived,
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feedback::Ready => write!(f, "READY"),
            Feedback::Arrived => write!(f, "ARRIVED"),
            Feedback::Status {
                x,
                y,
                heading,
                state,
            } => write!(f, "STATUS {:.2} {:.2} {:.2} {}", x, y, heading, state.code()),
            Feedback::Ack(cmd) => match cmd {
                Command::Goto { x, y } => write!(f, "OK goto {:.2} {:.2}", x, y),
                Command::Speed(s) => write!(f, "OK speed {:.2}", s),
                Command::SetPwm { min, max } => write!(f, "OK setpwm {} {}", min, max),
                Command::SetPos { x, y, heading } => {
                    write!(f, "OK setpos {:.2} {:.2} {:.2}", x, y, heading)
                }
                Command::Stop => write!(f, "OK stopall (log dumped)"),
                Command::Pulse { left_ns, right_ns } => {
                    write!(f, "OK pulse L:{} R:{}", left_ns, right_ns)
                }
                Command::Quit => write!(f, "OK quit"),
            },
        }
    }
}

/// Serialized writer for feedback lines. Each line is flushed immediately.
pub struct Reporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Reporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn emit(&self, line: Feedback) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            log::warn!("Failed to write '{}': {}", line, e);
        }
    }
}

/// In-memory line sink, for observing feedback in tests and tools.
#[derive(Clone, Default)]
pub struct LineCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LineCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every complete line written so far.
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.buf.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Drop everything captured so far.
    pub fn clear(&self) {
        self.buf.lock().clear();
    }
}

impl Write for LineCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_goto() {
        assert_eq!(
            parse_command("goto 30 30"),
            Some(Command::Goto { x: 30.0, y: 30.0 })
        );
        assert_eq!(
            parse_command("  GOTO -1.5 2.25 extra\n"),
            Some(Command::Goto { x: -1.5, y: 2.25 })
        );
        assert_eq!(parse_command("goto 1"), None);
        assert_eq!(parse_command("goto nan 1"), None);
        assert_eq!(parse_command("goto a b"), None);
    }

    #[test]
    fn test_parse_setpwm_keeps_raw_values() {
        // Clamping happens when applied, the ack echoes the applied values
        assert_eq!(
            parse_command("setpwm 10 150"),
            Some(Command::SetPwm { min: 10, max: 150 })
        );
        assert_eq!(parse_command("setpwm 10.5 20"), None);
    }

    #[test]
    fn test_parse_setpos_and_speed() {
        assert_eq!(
            parse_command("SetPos 1 2 270"),
            Some(Command::SetPos {
                x: 1.0,
                y: 2.0,
                heading: 270.0
            })
        );
        assert_eq!(parse_command("speed 0.5"), Some(Command::Speed(0.5)));
        assert_eq!(parse_command("speed inf"), None);
    }

    #[test]
    fn test_parse_stop_quit_pulse() {
        assert_eq!(parse_command("stop"), Some(Command::Stop));
        assert_eq!(parse_command("STOPALL"), Some(Command::Stop));
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("Q"), Some(Command::Quit));
        assert_eq!(parse_command("quiet"), None);
        assert_eq!(
            parse_command("pulse 1600000 1400000"),
            Some(Command::Pulse {
                left_ns: 1_600_000,
                right_ns: 1_400_000
            })
        );
    }

    #[test]
    fn test_parse_garbage_ignored() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("go 1 2"), None);
        assert_eq!(parse_command("✓ goto 1 2"), None);
    }

    #[test]
    fn test_feedback_format() {
        let status = Feedback::Status {
            x: 0.0,
            y: 15.0,
            heading: 90.0,
            state: NavState::Turning,
        };
        assert_eq!(status.to_string(), "STATUS 0.00 15.00 90.00 1");
        assert_eq!(
            Feedback::Ack(Command::Goto { x: 30.0, y: 30.0 }).to_string(),
            "OK goto 30.00 30.00"
        );
        assert_eq!(
            Feedback::Ack(Command::SetPwm { min: 20, max: 100 }).to_string(),
            "OK setpwm 20 100"
        );
        assert_eq!(
            Feedback::Ack(Command::Pulse {
                left_ns: 2_000_000,
                right_ns: 1_000_000
            })
            .to_string(),
            "OK pulse L:2000000 R:1000000"
        );
        assert_eq!(Feedback::Ack(Command::Stop).to_string(), "OK stopall (log dumped)");
    }

    #[test]
    fn test_reporter_lines() {
        let capture = LineCapture::new();
        let reporter = Reporter::new(Box::new(capture.clone()));
        reporter.emit(Feedback::Ready);
        reporter.emit(Feedback::Arrived);
        assert_eq!(capture.lines(), vec!["READY", "ARRIVED"]);
    }
}
