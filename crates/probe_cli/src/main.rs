use std::env;
use std::io;
use std::process::ExitCode;

use probe_cli::{run, CommandKind, CommonOptions};

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn run_cli() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(usage_text());
    }
    if args[0] == "-h" || args[0] == "--help" {
        print_usage();
        return Ok(());
    }

    let mut options = CommonOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--port" => {
                let value = flag_value(&args, index, "--port")?;
                options.port = value
                    .parse::<u16>()
                    .map_err(|_| format!("invalid --port value '{value}' (expected u16)"))?;
                index += 2;
            }
            "--room" => {
                options.room = flag_value(&args, index, "--room")?.to_string();
                index += 2;
            }
            "--token" => {
                options.token = flag_value(&args, index, "--token")?.to_string();
                index += 2;
            }
            "--timeout-ms" => {
                let value = flag_value(&args, index, "--timeout-ms")?;
                options.timeout_ms = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid --timeout-ms value '{value}' (expected u64)"))?;
                index += 2;
            }
            "--retry-ms" => {
                let value = flag_value(&args, index, "--retry-ms")?;
                options.retry_ms = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid --retry-ms value '{value}' (expected u64)"))?;
                index += 2;
            }
            "--include-snapshots" => {
                options.include_snapshots = true;
                index += 1;
            }
            _ => break,
        }
    }

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let command_args = &args[(index + 1)..];

    let kind = match command {
        "join" => {
            if !command_args.is_empty() {
                return Err("join takes no arguments".to_string());
            }
            CommandKind::Join
        }
        "send" => {
            if command_args.is_empty() {
                return Err("send requires a JSON message".to_string());
            }
            CommandKind::Send {
                message: command_args.join(" "),
            }
        }
        "script" => match command_args {
            [path] => CommandKind::Script { path: path.clone() },
            [] => return Err("script requires a file path".to_string()),
            [_, extra, ..] => return Err(format!("unknown script argument '{extra}'")),
        },
        "watch" => {
            let count = match command_args {
                [] => 1,
                [value] => value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid watch count '{value}' (expected u64)"))?,
                [_, extra, ..] => return Err(format!("unknown watch argument '{extra}'")),
            };
            CommandKind::Watch { count }
        }
        other => return Err(format!("unknown subcommand '{other}'")),
    };

    run(kind, options, &mut io::stdout())
}

fn flag_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, String> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn print_usage() {
    println!("{}", usage_text());
}

fn usage_text() -> String {
    [
        "probe_cli - deterministic arena client",
        "",
        "Usage:",
        "  probe_cli [options] join",
        "  probe_cli [options] send <json...>",
        "  probe_cli [options] script <file>",
        "  probe_cli [options] watch [count]",
        "",
        "Options:",
        "  --port <u16>          server port (default 47001)",
        "  --room <id>           room to join (default lobby)",
        "  --token <token>       join token (default dev.probe)",
        "  --timeout-ms <u64>    overall timeout (default 5000)",
        "  --retry-ms <u64>      connect retry base (default 100)",
        "  --include-snapshots   print raw snapshot lines",
        "",
        "Script lines: press <dir> | release <dir> | wait <ms>, # comments",
    ]
    .join("\n")
}
