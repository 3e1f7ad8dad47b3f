use std::path::PathBuf;

use thread_watch::RunOptions;

const USAGE: &str = "thread-watch: follow an imageboard thread from the terminal.

  --board NAME         Board the thread lives on
  --thread N           Thread number (refno of the opening post)
  --config PATH        Read configuration from PATH
  --once               Fetch the thread once, print it and exit
  --log-stderr         Write logs to stderr instead of the log file
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(Some(options)) => options,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(err) = thread_watch::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// `Ok(None)` means an informational flag was handled and there is nothing
/// left to run.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<RunOptions>, String> {
    let mut options = RunOptions::default();
    let mut board: Option<String> = None;
    let mut thread: Option<u64> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("thread-watch {}", thread_watch::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(None);
            }
            "--board" => board = Some(value_for(&arg, args.next())?),
            "--thread" => {
                let raw = value_for(&arg, args.next())?;
                let refno = raw
                    .parse::<u64>()
                    .map_err(|_| format!("--thread expects a number, got {raw:?}"))?;
                thread = Some(refno);
            }
            "--config" => options.config_file = Some(PathBuf::from(value_for(&arg, args.next())?)),
            "--once" => options.once = true,
            "--log-stderr" => options.log_stderr = true,
            other => return Err(format!("unknown argument {other:?}")),
        }
    }

    options.board = board.ok_or("--board is required")?;
    options.thread_refno = thread.ok_or("--thread is required")?;
    Ok(Some(options))
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, String> {
    value
        .filter(|value| !value.starts_with("--"))
        .ok_or_else(|| format!("{flag} needs a value"))
}
