use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::Context as _;
use clap::Parser;
use env_logger::Env;
use qjs_bridge::{
    Bridge, BridgeConfig, ContextId, EvalFlags, Handle, HostFunctions, RuntimeId, Scope,
};

const DEFAULT_MEMORY_LIMIT: usize = 16 << 20;
const PROMPT: &str = "qjsb > ";
const REPL_HELP: &str = "\
.help           show this list
.exit, .quit    leave the REPL
.clear          clear the screen
.history        list evaluated lines
.timing         toggle evaluation timing
.load <file>    evaluate a file
.info           show handle and arena usage
.gc             run the garbage collector
.reset          start over with a fresh context
";

#[derive(Debug, Parser)]
#[command(name = "qjsb", version, disable_help_flag = true)]
struct Args {
    #[arg(short = 'h', long = "help", action = clap::ArgAction::Help)]
    _help: Option<bool>,

    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    #[arg(short = 'i', long = "interactive", default_value_t = false)]
    interactive: bool,

    #[arg(short = 'm', long = "module", default_value_t = false)]
    module: bool,

    #[arg(long = "strict", default_value_t = false)]
    strict: bool,

    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[arg(long = "memory-limit", allow_hyphen_values = true)]
    memory_limit: Option<String>,

    #[arg(long = "stack-size", allow_hyphen_values = true)]
    stack_size: Option<String>,

    #[arg(short = 't', long = "timing", default_value_t = false)]
    timing: bool,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg()]
    files: Vec<String>,
}

#[derive(Debug)]
struct CliConfig {
    bridge: BridgeConfig,
    eval: Option<String>,
    files: Vec<String>,
    interactive: bool,
    flags: EvalFlags,
    timing: bool,
    verbose: u8,
}

#[derive(Debug, Eq, PartialEq)]
enum ParseError {
    MissingSize { flag: &'static str },
    InvalidSize { flag: &'static str },
    Config(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingSize { flag } => write!(f, "expecting a size for --{flag}"),
            ParseError::InvalidSize { flag } => write!(f, "invalid size for --{flag}"),
            ParseError::Config(msg) => write!(f, "{msg}"),
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = match build_config(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    match run_cli(config) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(2);
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn build_config(args: Args) -> Result<CliConfig, ParseError> {
    let mut bridge = match args.config.as_deref() {
        Some(path) => load_bridge_config(path)?,
        None => BridgeConfig::default(),
    };

    if let Some(limit) = args.memory_limit.as_deref() {
        bridge.memory_limit = Some(parse_size(limit, "memory-limit")?);
    }
    bridge.memory_limit.get_or_insert(DEFAULT_MEMORY_LIMIT);

    if let Some(size) = args.stack_size.as_deref() {
        bridge.max_stack_size = Some(parse_size(size, "stack-size")?);
    }

    bridge
        .validate()
        .map_err(|err| ParseError::Config(err.to_string()))?;

    let mut flags = EvalFlags::empty();
    if args.module {
        flags |= EvalFlags::MODULE;
    }
    if args.strict {
        flags |= EvalFlags::STRICT;
    }

    Ok(CliConfig {
        bridge,
        eval: args.eval,
        files: args.files,
        interactive: args.interactive,
        flags,
        timing: args.timing,
        verbose: args.verbose,
    })
}

fn load_bridge_config(path: &std::path::Path) -> Result<BridgeConfig, ParseError> {
    let text = fs::read_to_string(path)
        .map_err(|err| ParseError::Config(format!("could not read '{}': {err}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|err| ParseError::Config(format!("invalid config '{}': {err}", path.display())))
}

fn parse_size(input: &str, flag: &'static str) -> Result<usize, ParseError> {
    let trimmed = input.trim();
    let (number, multiplier) = match trimmed.char_indices().last() {
        Some((at, 'g' | 'G')) => (&trimmed[..at], 1024.0 * 1024.0 * 1024.0),
        Some((at, 'm' | 'M')) => (&trimmed[..at], 1024.0 * 1024.0),
        Some((at, 'k' | 'K')) => (&trimmed[..at], 1024.0),
        _ => (trimmed, 1.0),
    };
    if number.is_empty() {
        return Err(ParseError::MissingSize { flag });
    }

    let value: f64 = number
        .parse()
        .map_err(|_| ParseError::InvalidSize { flag })?;
    let value = value * multiplier;
    if value.is_sign_negative() || !value.is_finite() {
        return Err(ParseError::InvalidSize { flag });
    }
    Ok(value as usize)
}

/// A REPL line starting with `.` and a letter.
#[derive(Debug, Eq, PartialEq)]
enum Command<'a> {
    Help,
    Exit,
    Clear,
    History,
    Timing,
    Load(&'a str),
    Info,
    Gc,
    Reset,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// Returns `None` for JavaScript input such as `.5 + 1`.
    fn parse(line: &'a str) -> Option<Self> {
        let rest = line.trim().strip_prefix('.')?;
        if !rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '?') {
            return None;
        }
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        Some(match name {
            "help" | "h" | "?" => Command::Help,
            "exit" | "quit" | "q" => Command::Exit,
            "clear" | "cls" => Command::Clear,
            "history" => Command::History,
            "timing" | "time" => Command::Timing,
            "load" | "l" => Command::Load(arg),
            "info" | "i" => Command::Info,
            "gc" => Command::Gc,
            "reset" => Command::Reset,
            _ => Command::Unknown(name),
        })
    }
}

enum Outcome {
    Value(Option<String>),
    Thrown(String),
}

struct Session {
    bridge: Bridge,
    runtime: RuntimeId,
    context: ContextId,
    flags: EvalFlags,
    timing: bool,
}

fn run_cli(config: CliConfig) -> anyhow::Result<i32> {
    log::debug!("bridge config: {:?}", config.bridge);
    let mut bridge = Bridge::new(config.bridge).context("invalid bridge configuration")?;
    let runtime = bridge.new_runtime().context("could not create runtime")?;

    let host = HostFunctions::new().with_log_sink(|line| {
        let mut stdout = io::stdout().lock();
        let written = stdout.write_all(line.as_bytes()).and_then(|_| stdout.flush());
        if let Err(err) = written {
            log::warn!("cannot write console output: {err}");
        }
    });
    bridge.set_host(Rc::new(host));
    let context = open_context(&mut bridge, runtime)?;

    let mut session = Session {
        bridge,
        runtime,
        context,
        flags: config.flags,
        timing: config.timing,
    };

    if let Some(code) = config.eval.as_deref() {
        if !session.run("<cmdline>", code)? {
            return Ok(1);
        }
    }
    for file in &config.files {
        let source =
            fs::read_to_string(file).with_context(|| format!("could not load '{file}'"))?;
        if !session.run(file, &source)? {
            return Ok(1);
        }
    }

    if config.interactive || (config.eval.is_none() && config.files.is_empty()) {
        session.repl()?;
    }
    if config.verbose > 0 {
        let store = session.bridge.store();
        log::info!(
            "{} live handles, {} bytes of arena in use",
            store.live_handles(),
            store.arena_usage()
        );
    }
    Ok(0)
}

/// Creates a context with the console installed.
fn open_context(bridge: &mut Bridge, runtime: RuntimeId) -> anyhow::Result<ContextId> {
    let context = bridge.new_context(runtime).context("could not create context")?;
    if bridge.with_context(context, |scope| scope.add_console())? != 0 {
        anyhow::bail!("could not install console");
    }
    Ok(context)
}

impl Session {
    /// Evaluates one source, prints its result or exception, then drains
    /// queued jobs. Returns false when the evaluation threw.
    fn run(&self, name: &str, source: &str) -> anyhow::Result<bool> {
        let start = Instant::now();
        let flags = self.flags;
        let outcome = self.bridge.with_context(self.context, |scope| {
            let result = scope.eval_source(source, name, flags);
            let outcome = describe(scope, result, flags);
            scope.release(result);
            outcome
        })?;
        let jobs = self.bridge.execute_pending_jobs(self.runtime)?;
        self.bridge.store().reset_arena();

        let ok = match outcome {
            Outcome::Value(Some(text)) => {
                println!("{text}");
                true
            }
            Outcome::Value(None) => true,
            Outcome::Thrown(message) => {
                eprintln!("{message}");
                false
            }
        };
        if jobs < 0 {
            eprintln!("uncaught exception in pending job");
        }
        if self.timing {
            eprintln!("{name}: {:.3} ms", start.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(ok && jobs >= 0)
    }

    fn repl(&mut self) -> anyhow::Result<()> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        let mut history = Vec::new();
        loop {
            print!("{PROMPT}");
            io::stdout().flush()?;
            let Some(line) = lines.next() else {
                println!();
                return Ok(());
            };
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Some(command) => {
                    if !self.command(command, &history)? {
                        return Ok(());
                    }
                }
                None => {
                    self.run("<repl>", &line)?;
                    history.push(line);
                }
            }
        }
    }

    /// Runs one REPL command. Returns false on `.exit`.
    fn command(&mut self, command: Command<'_>, history: &[String]) -> anyhow::Result<bool> {
        match command {
            Command::Exit => return Ok(false),
            Command::Help => print!("{REPL_HELP}"),
            Command::Clear => {
                print!("\x1b[H\x1b[2J");
                io::stdout().flush()?;
            }
            Command::History => {
                for (n, entry) in history.iter().enumerate() {
                    println!("{:>4}  {entry}", n + 1);
                }
            }
            Command::Timing => {
                self.timing = !self.timing;
                println!("timing {}", if self.timing { "on" } else { "off" });
            }
            Command::Load("") => eprintln!("usage: .load <file>"),
            Command::Load(path) => match fs::read_to_string(path) {
                Ok(source) => {
                    self.run(path, &source)?;
                }
                Err(err) => eprintln!("could not load '{path}': {err}"),
            },
            Command::Info => {
                let store = self.bridge.store();
                println!(
                    "handles: {} live, {} free\narena: {} of {} bytes\ncall depth limit: {}",
                    store.live_handles(),
                    store.free_handles(),
                    store.arena_usage(),
                    store.arena_capacity(),
                    self.bridge.config().max_call_depth
                );
            }
            Command::Gc => {
                self.bridge.run_gc(self.runtime)?;
                println!("garbage collected");
            }
            Command::Reset => {
                self.reset()?;
                println!("context reset");
            }
            Command::Unknown(name) => eprintln!("unknown command .{name}, try .help"),
        }
        Ok(true)
    }

    /// Replaces the context, dropping every global the session defined.
    fn reset(&mut self) -> anyhow::Result<()> {
        self.bridge.free_context(self.context)?;
        self.context = open_context(&mut self.bridge, self.runtime)?;
        self.bridge.store().reset_arena();
        Ok(())
    }
}

fn describe(scope: &Scope<'_>, result: Handle, flags: EvalFlags) -> Outcome {
    if scope.is_exception(result) {
        let error = scope.get_exception();
        let message = exception_text(scope, error);
        scope.release(error);
        return Outcome::Thrown(message);
    }
    if flags.contains(EvalFlags::MODULE) || scope.is_undefined(result) {
        return Outcome::Value(None);
    }
    Outcome::Value(Some(format_value(scope, result)))
}

fn exception_text(scope: &Scope<'_>, error: Handle) -> String {
    let mut text = match scope.to_rust_string(error) {
        Some(text) => format!("Uncaught {text}"),
        None => "Uncaught exception".to_string(),
    };
    if scope.is_error(error) {
        let stack = scope.get_named(error, "stack");
        if scope.is_string(stack) {
            if let Some(frames) = scope.to_rust_string(stack) {
                let frames = frames.trim_end();
                if !frames.is_empty() {
                    text.push('\n');
                    text.push_str(frames);
                }
            }
        }
        scope.release(stack);
    }
    text
}

fn format_value(scope: &Scope<'_>, value: Handle) -> String {
    let text = scope.to_rust_string(value).unwrap_or_default();
    if scope.is_string(value) {
        return format!("{text:?}");
    }
    if scope.is_bigint(value) {
        return format!("{text}n");
    }
    if scope.is_function(value) {
        return "[Function]".to_string();
    }
    if scope.is_error(value) || !scope.is_object(value) {
        return text;
    }
    let json = scope.json_stringify(value);
    if scope.is_exception(json) {
        let cause = scope.get_exception();
        scope.release(cause);
        scope.release(json);
        return text;
    }
    let rendered = scope.to_rust_string(json);
    scope.release(json);
    rendered.unwrap_or(text)
}
