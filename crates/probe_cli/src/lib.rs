use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use engine::{Direction, Snapshot};
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 47001;
pub const DEFAULT_ROOM: &str = "lobby";
pub const DEFAULT_TOKEN: &str = "dev.probe";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_MS: u64 = 100;
pub const DEFAULT_QUIET_MS: u64 = 250;
const MAX_RETRY_BACKOFF_MS: u64 = 1_000;
const READ_POLL_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Control,
    Snapshot,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub kind: LineKind,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlLine {
    Welcome {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "netId")]
        net_id: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotLine {
    pub snapshot: Snapshot,
    #[serde(rename = "roomId")]
    pub room_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Press(Direction),
    Release(Direction),
    WaitMs(u64),
}

#[derive(Debug, Clone)]
pub struct CommonOptions {
    pub port: u16,
    pub room: String,
    pub token: String,
    pub timeout_ms: u64,
    pub retry_ms: u64,
    pub include_snapshots: bool,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            room: DEFAULT_ROOM.to_string(),
            token: DEFAULT_TOKEN.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_ms: DEFAULT_RETRY_MS,
            include_snapshots: false,
        }
    }
}

pub enum CommandKind {
    Join,
    Send { message: String },
    Script { path: String },
    Watch { count: u64 },
}

struct Session {
    writer: TcpStream,
    reader: LineReader,
}

/// Keeps a partially received line across read timeouts.
struct LineReader {
    reader: BufReader<TcpStream>,
    pending: String,
}

enum ReadOutcome {
    Line(String),
    NoData,
    Disconnected,
    DeadlineExceeded,
    IoError(io::Error),
}

pub fn parse_wire_line(raw: &str) -> ParsedLine {
    let payload = raw.trim_end_matches(['\r', '\n']).to_string();
    let kind = match serde_json::from_str::<serde_json::Value>(&payload) {
        Ok(value) if value.get("snapshot").is_some() => LineKind::Snapshot,
        Ok(value) if value.get("type").is_some() => LineKind::Control,
        _ => LineKind::Unknown,
    };
    ParsedLine { kind, payload }
}

pub fn should_print_line(line: &ParsedLine, include_snapshots: bool) -> bool {
    match line.kind {
        LineKind::Control => true,
        LineKind::Snapshot => include_snapshots,
        LineKind::Unknown => false,
    }
}

pub fn parse_control_line(payload: &str) -> Option<ControlLine> {
    serde_json::from_str(payload).ok()
}

pub fn parse_snapshot_line(payload: &str) -> Option<SnapshotLine> {
    serde_json::from_str(payload).ok()
}

/// One line per snapshot: tick, room, live entity count and state hash.
pub fn snapshot_summary(line: &SnapshotLine) -> String {
    format!(
        "tick:{} room:{} entities:{} hash:{}",
        line.snapshot.tick,
        line.room_id,
        line.snapshot.state.len(),
        line.snapshot.state_hash()
    )
}

pub fn join_message(room: &str, token: &str) -> String {
    serde_json::json!({ "type": "join", "roomId": room, "token": token }).to_string()
}

pub fn key_message(direction: Direction, is_down: bool) -> String {
    let kind = if is_down { "keypress" } else { "keyrelease" };
    serde_json::json!({ "type": kind, "direction": direction }).to_string()
}

/// Parses `press <dir>`, `release <dir>` and `wait <ms>` lines. Blank lines
/// and `#` comments are skipped.
pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>, String> {
    let mut steps = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line_no = index + 1;
        let mut parts = trimmed.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let arg = parts
            .next()
            .ok_or_else(|| format!("line {line_no}: '{verb}' needs an argument"))?;
        if let Some(extra) = parts.next() {
            return Err(format!("line {line_no}: unexpected argument '{extra}'"));
        }
        let step = match verb {
            "press" => ScriptStep::Press(parse_direction(arg, line_no)?),
            "release" => ScriptStep::Release(parse_direction(arg, line_no)?),
            "wait" => ScriptStep::WaitMs(
                arg.parse::<u64>()
                    .map_err(|_| format!("line {line_no}: invalid wait '{arg}' (expected ms)"))?,
            ),
            other => return Err(format!("line {line_no}: unknown step '{other}'")),
        };
        steps.push(step);
    }
    Ok(steps)
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptStep>, String> {
    let content = fs::read_to_string(path)
        .map_err(|error| format!("failed to read script file '{}': {error}", path.display()))?;
    parse_script(&content)
}

fn parse_direction(raw: &str, line_no: usize) -> Result<Direction, String> {
    match raw {
        "up" => Ok(Direction::Up),
        "down" => Ok(Direction::Down),
        "left" => Ok(Direction::Left),
        "right" => Ok(Direction::Right),
        other => Err(format!(
            "line {line_no}: unknown direction '{other}' (expected up/down/left/right)"
        )),
    }
}

pub fn run<W: Write>(kind: CommandKind, opts: CommonOptions, stdout: &mut W) -> Result<(), String> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let retry_base = Duration::from_millis(opts.retry_ms.max(1));
    let include_snapshots = opts.include_snapshots;
    let quiet = Duration::from_millis(DEFAULT_QUIET_MS);

    // Load the script up front so a bad file fails before joining.
    let script = match &kind {
        CommandKind::Script { path } => Some(load_script(Path::new(path))?),
        _ => None,
    };

    let mut session = connect_and_join(&opts, timeout, retry_base, |line| {
        emit_line(stdout, line, include_snapshots)
    })?;

    match kind {
        CommandKind::Join => Ok(()),
        CommandKind::Send { message } => {
            send_line(&mut session.writer, &message)?;
            read_until_quiet(&mut session.reader, timeout, quiet, |line| {
                emit_line(stdout, line, include_snapshots)
            })
        }
        CommandKind::Script { .. } => {
            for step in script.unwrap_or_default() {
                match step {
                    ScriptStep::Press(direction) => {
                        send_line(&mut session.writer, &key_message(direction, true))?
                    }
                    ScriptStep::Release(direction) => {
                        send_line(&mut session.writer, &key_message(direction, false))?
                    }
                    ScriptStep::WaitMs(ms) => {
                        read_for(&mut session.reader, Duration::from_millis(ms), |line| {
                            emit_line(stdout, line, include_snapshots)
                        })?
                    }
                }
            }
            read_until_quiet(&mut session.reader, timeout, quiet, |line| {
                emit_line(stdout, line, include_snapshots)
            })
        }
        CommandKind::Watch { count } => {
            watch_snapshots(&mut session.reader, timeout, count, |line| {
                if let Some(snapshot) = parse_snapshot_line(&line.payload) {
                    let _ = writeln!(stdout, "{}", snapshot_summary(&snapshot));
                } else {
                    emit_line(stdout, line, false);
                }
            })
        }
    }
}

fn connect_and_join<F>(
    opts: &CommonOptions,
    timeout: Duration,
    retry_base: Duration,
    mut on_line: F,
) -> Result<Session, String>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    while Instant::now() < deadline {
        if let Ok(writer) = TcpStream::connect(("127.0.0.1", opts.port)) {
            writer
                .set_read_timeout(Some(Duration::from_millis(READ_POLL_MS)))
                .map_err(|error| format!("failed to set socket read timeout: {error}"))?;
            let reader_stream = writer
                .try_clone()
                .map_err(|error| format!("failed to clone socket stream: {error}"))?;
            let mut session = Session {
                writer,
                reader: LineReader::new(reader_stream),
            };
            send_line(&mut session.writer, &join_message(&opts.room, &opts.token))?;
            wait_for_welcome(&mut session.reader, deadline, &mut on_line)?;
            return Ok(session);
        }

        let shift = attempt.min(8);
        let backoff_ms = (retry_base.as_millis() as u64)
            .saturating_mul(1u64 << shift)
            .min(MAX_RETRY_BACKOFF_MS);
        let sleep_for = Duration::from_millis(backoff_ms.max(1));
        if Instant::now() + sleep_for >= deadline {
            break;
        }
        thread::sleep(sleep_for);
        attempt = attempt.saturating_add(1);
    }

    Err(format!(
        "timed out connecting to arena server on 127.0.0.1:{}",
        opts.port
    ))
}

fn wait_for_welcome<F>(
    reader: &mut LineReader,
    deadline: Instant,
    on_line: &mut F,
) -> Result<(), String>
where
    F: FnMut(&ParsedLine),
{
    loop {
        match reader.read_line(deadline) {
            ReadOutcome::Line(raw) => {
                let parsed = parse_wire_line(&raw);
                on_line(&parsed);
                if parsed.kind != LineKind::Control {
                    continue;
                }
                match parse_control_line(&parsed.payload) {
                    Some(ControlLine::Welcome { .. }) => return Ok(()),
                    Some(ControlLine::Error { message }) => {
                        return Err(format!("join rejected: {message}"))
                    }
                    None => {}
                }
            }
            ReadOutcome::NoData => {}
            ReadOutcome::Disconnected => {
                return Err("socket disconnected while waiting for welcome".to_string())
            }
            ReadOutcome::DeadlineExceeded => {
                return Err("timed out waiting for welcome".to_string())
            }
            ReadOutcome::IoError(error) => {
                return Err(format!("socket read error while waiting for welcome: {error}"))
            }
        }
    }
}

fn watch_snapshots<F>(
    reader: &mut LineReader,
    timeout: Duration,
    count: u64,
    mut on_line: F,
) -> Result<(), String>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + timeout;
    let mut seen = 0u64;
    while seen < count {
        match reader.read_line(deadline) {
            ReadOutcome::Line(raw) => {
                let parsed = parse_wire_line(&raw);
                on_line(&parsed);
                if parsed.kind == LineKind::Snapshot {
                    seen += 1;
                }
            }
            ReadOutcome::NoData => {}
            ReadOutcome::Disconnected => {
                return Err(format!(
                    "socket disconnected after {seen} of {count} snapshots"
                ))
            }
            ReadOutcome::DeadlineExceeded => {
                return Err(format!("timed out after {seen} of {count} snapshots"))
            }
            ReadOutcome::IoError(error) => {
                return Err(format!("socket read error while watching: {error}"))
            }
        }
    }
    Ok(())
}

/// Reads and forwards lines for exactly `span` of wall time.
fn read_for<F>(reader: &mut LineReader, span: Duration, mut on_line: F) -> Result<(), String>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + span;
    loop {
        match reader.read_line(deadline) {
            ReadOutcome::Line(raw) => on_line(&parse_wire_line(&raw)),
            ReadOutcome::NoData => {}
            ReadOutcome::DeadlineExceeded => return Ok(()),
            ReadOutcome::Disconnected => {
                return Err("socket disconnected during wait".to_string())
            }
            ReadOutcome::IoError(error) => {
                return Err(format!("socket read error during wait: {error}"))
            }
        }
    }
}

fn read_until_quiet<F>(
    reader: &mut LineReader,
    timeout: Duration,
    quiet_window: Duration,
    mut on_line: F,
) -> Result<(), String>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + timeout;
    let mut last_line_at = Instant::now();

    loop {
        match reader.read_line(deadline) {
            ReadOutcome::Line(raw) => {
                let parsed = parse_wire_line(&raw);
                on_line(&parsed);
                // Snapshots stream every tick; only replies reset the window.
                if parsed.kind != LineKind::Snapshot {
                    last_line_at = Instant::now();
                }
            }
            ReadOutcome::NoData => {}
            ReadOutcome::Disconnected => {
                return Err("socket disconnected while waiting for output".to_string())
            }
            ReadOutcome::DeadlineExceeded => return Ok(()),
            ReadOutcome::IoError(error) => {
                return Err(format!(
                    "socket read error while waiting for output: {error}"
                ))
            }
        }

        if Instant::now().saturating_duration_since(last_line_at) >= quiet_window {
            return Ok(());
        }
    }
}

fn emit_line<W: Write>(stdout: &mut W, line: &ParsedLine, include_snapshots: bool) {
    if should_print_line(line, include_snapshots) {
        let _ = writeln!(stdout, "{}", line.payload);
    }
}

fn send_line(writer: &mut TcpStream, line: &str) -> Result<(), String> {
    writer
        .write_all(line.as_bytes())
        .map_err(|error| format!("failed to send message: {error}"))?;
    writer
        .write_all(b"\n")
        .map_err(|error| format!("failed to terminate message line: {error}"))?;
    writer
        .flush()
        .map_err(|error| format!("failed to flush message line: {error}"))
}

impl LineReader {
    fn new(stream: TcpStream) -> Self {
        Self {
            reader: BufReader::new(stream),
            pending: String::new(),
        }
    }

    fn read_line(&mut self, deadline: Instant) -> ReadOutcome {
        if Instant::now() >= deadline {
            return ReadOutcome::DeadlineExceeded;
        }

        match self.reader.read_line(&mut self.pending) {
            Ok(0) => ReadOutcome::Disconnected,
            Ok(_) if self.pending.ends_with('\n') => {
                ReadOutcome::Line(std::mem::take(&mut self.pending))
            }
            Ok(_) => ReadOutcome::NoData,
            Err(error)
                if error.kind() == io::ErrorKind::WouldBlock
                    || error.kind() == io::ErrorKind::TimedOut =>
            {
                ReadOutcome::NoData
            }
            Err(error) => ReadOutcome::IoError(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    use tempfile::TempDir;

    use super::*;

    const WELCOME: &str = r#"{"type":"welcome","roomId":"r1","userId":"probe","netId":"n-1"}"#;

    fn snapshot_payload(tick: u64) -> String {
        let x = 96.0 + tick as f64 * 2.0;
        serde_json::json!({
            "snapshot": {
                "tick": tick,
                "time_ms": tick * 16,
                "state": [{
                    "id": "n-1",
                    "tag": "player",
                    "x": x,
                    "y": 96.0,
                    "position": { "x": x, "y": 96.0, "z": 0.0, "w": 1.0 }
                }]
            },
            "roomId": "r1"
        })
        .to_string()
    }

    #[test]
    fn parse_wire_line_classifies_json_lines() {
        assert_eq!(parse_wire_line(&format!("{WELCOME}\r\n")).kind, LineKind::Control);
        assert_eq!(parse_wire_line(&snapshot_payload(1)).kind, LineKind::Snapshot);
        assert_eq!(
            parse_wire_line("not json\n"),
            ParsedLine {
                kind: LineKind::Unknown,
                payload: "not json".to_string(),
            }
        );
    }

    #[test]
    fn output_filter_defaults_to_control_only() {
        let control = parse_wire_line(WELCOME);
        let snapshot = parse_wire_line(&snapshot_payload(1));
        let unknown = parse_wire_line("raw");

        assert!(should_print_line(&control, false));
        assert!(!should_print_line(&snapshot, false));
        assert!(!should_print_line(&unknown, true));
        assert!(should_print_line(&snapshot, true));
    }

    #[test]
    fn control_and_snapshot_lines_decode() {
        assert_eq!(
            parse_control_line(WELCOME),
            Some(ControlLine::Welcome {
                room_id: "r1".to_string(),
                user_id: "probe".to_string(),
                net_id: "n-1".to_string(),
            })
        );
        assert_eq!(
            parse_control_line(r#"{"type":"error","message":"invalid token"}"#),
            Some(ControlLine::Error {
                message: "invalid token".to_string()
            })
        );

        let line = parse_snapshot_line(&snapshot_payload(3)).expect("snapshot line");
        assert_eq!(line.room_id, "r1");
        assert_eq!(line.snapshot.tick, 3);
        assert_eq!(line.snapshot.find("n-1").map(|entry| entry.x), Some(102.0));
        assert!(snapshot_summary(&line).starts_with("tick:3 room:r1 entities:1 hash:"));
    }

    #[test]
    fn outgoing_messages_use_wire_names() {
        let join: serde_json::Value =
            serde_json::from_str(&join_message("r1", "dev.amy")).expect("join json");
        assert_eq!(join["type"], "join");
        assert_eq!(join["roomId"], "r1");
        assert_eq!(join["token"], "dev.amy");

        let press: serde_json::Value =
            serde_json::from_str(&key_message(Direction::Left, true)).expect("press json");
        assert_eq!(press["type"], "keypress");
        assert_eq!(press["direction"], "left");
        let release: serde_json::Value =
            serde_json::from_str(&key_message(Direction::Up, false)).expect("release json");
        assert_eq!(release["type"], "keyrelease");
        assert_eq!(release["direction"], "up");
    }

    #[test]
    fn parse_script_ignores_blank_and_comment_lines() {
        let content = r#"
            # walk right then stop
            press right

            wait 250
            # another
            release right
        "#;
        assert_eq!(
            parse_script(content).expect("script"),
            vec![
                ScriptStep::Press(Direction::Right),
                ScriptStep::WaitMs(250),
                ScriptStep::Release(Direction::Right),
            ]
        );
    }

    #[test]
    fn parse_script_reports_line_numbers() {
        let err = parse_script("press right\njump up\n").expect_err("unknown step");
        assert_eq!(err, "line 2: unknown step 'jump'");
        let err = parse_script("press north").expect_err("bad direction");
        assert!(err.starts_with("line 1: unknown direction 'north'"));
        let err = parse_script("wait").expect_err("missing arg");
        assert_eq!(err, "line 1: 'wait' needs an argument");
        let err = parse_script("wait soon").expect_err("bad wait");
        assert_eq!(err, "line 1: invalid wait 'soon' (expected ms)");
    }

    #[test]
    fn load_script_reads_file_from_disk() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("walk.probe");
        fs::write(&path, "press down\nwait 10\nrelease down\n").expect("write script");

        let steps = load_script(&path).expect("load script");
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], ScriptStep::Press(Direction::Down));

        let missing = load_script(&temp.path().join("missing.probe")).expect_err("missing file");
        assert!(missing.starts_with("failed to read script file"));
    }

    #[test]
    fn watch_joins_and_prints_snapshot_summaries() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind fake server");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut join = String::new();
            reader.read_line(&mut join).expect("read join");
            let mut writer = stream;
            writeln!(writer, "{WELCOME}").expect("welcome");
            for tick in 1..=3 {
                writeln!(writer, "{}", snapshot_payload(tick)).expect("snapshot");
            }
            writer.flush().expect("flush");
            join
        });

        let opts = CommonOptions {
            port,
            room: "r1".to_string(),
            token: "dev.probe".to_string(),
            timeout_ms: 2_000,
            ..CommonOptions::default()
        };
        let mut out = Vec::new();
        run(CommandKind::Watch { count: 2 }, opts, &mut out).expect("watch");

        let join = server.join().expect("server thread");
        let join: serde_json::Value = serde_json::from_str(join.trim()).expect("join json");
        assert_eq!(join["roomId"], "r1");
        assert_eq!(join["token"], "dev.probe");

        let text = String::from_utf8(out).expect("utf8");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], WELCOME);
        assert!(lines[1].starts_with("tick:1 room:r1 entities:1 hash:"));
        assert!(lines[2].starts_with("tick:2 room:r1 entities:1 hash:"));
    }

    #[test]
    fn rejected_join_is_an_error() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind fake server");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut join = String::new();
            reader.read_line(&mut join).expect("read join");
            let mut writer = stream;
            writeln!(writer, r#"{{"type":"error","message":"invalid token"}}"#).expect("error");
            writer.flush().expect("flush");
        });

        let opts = CommonOptions {
            port,
            timeout_ms: 2_000,
            ..CommonOptions::default()
        };
        let mut out = Vec::new();
        let err = run(CommandKind::Join, opts, &mut out).expect_err("rejected");
        server.join().expect("server thread");
        assert_eq!(err, "join rejected: invalid token");
    }
}
