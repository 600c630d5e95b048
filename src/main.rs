//! Purpose: `evedata` CLI entry point.
//! Role: Binary crate root; parses args, builds the client from a settings document, emits JSON on stdout.
//! Invariants: Commands emit JSON (pretty on a terminal, compact otherwise) or JSONL for streams.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Partial failures are reported as notices on stderr, never mixed into stdout.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod serve;

use evedata::api::{
    ClientConfig, DEFAULT_BASE_URL, Document, Error, ErrorKind, EveClient, Projection, Resource,
    Sort, to_exit_code,
};
use evedata::notice::{Notice, notice_json};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    let globals = cli.globals;
    let result = command_dispatch::dispatch_command(cli.command, globals, color_mode);

    result
        .map_err(add_connectivity_hint)
        .map_err(add_conflict_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let replacement = arg.to_str().and_then(|value| match value {
                "---help" => Some("--help"),
                "---version" => Some("--version"),
                _ => None,
            });
            replacement.map(OsString::from).unwrap_or(arg)
        })
        .collect()
}

#[derive(Parser)]
#[command(
    name = "evedata",
    version,
    about = "Schema-driven client for Eve-style REST collections",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Resources, schemas and URLs come from the server's settings document (JSON).

Mental model:
  - `page` reads one page of a resource through the page cache
  - `dump` streams every matching document as JSONL
  - `partitions` fetches the whole collection in parallel, one page per partition
  - `insert` validates documents against the schema, then posts them in one batch
"#,
    after_help = r#"EXAMPLES
  $ evedata --settings settings.json resources
  $ evedata --settings settings.json count people --where '{"age": {"$gt": 30}}'
  $ evedata --settings settings.json page people --page 2 --sort=-age --table
  $ evedata --settings settings.json insert people people.jsonl
  $ evedata --settings settings.json serve --bind 127.0.0.1:5000

LEARN MORE
  $ evedata <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct GlobalArgs {
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_BASE_URL,
        help = "Server address; URL_PREFIX and API_VERSION from the settings are appended"
    )]
    url: String,
    #[arg(
        long,
        global = true,
        help = "Eve settings document (JSON) describing DOMAIN, URL_PREFIX and API_VERSION",
        value_hint = ValueHint::FilePath
    )]
    settings: Option<PathBuf>,
    #[arg(long, global = true, help = "Bearer token (dev only; prefer --token-file)")]
    token: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Read the bearer token from a file",
        value_hint = ValueHint::FilePath
    )]
    token_file: Option<PathBuf>,
    #[arg(long, global = true, help = "Base request timeout in milliseconds")]
    timeout_ms: Option<u64>,
    #[arg(long, global = true, help = "Extra timeout per requested item in milliseconds")]
    per_item_timeout_ms: Option<u64>,
    #[arg(
        long,
        global = true,
        visible_alias = "max-results",
        help = "Page size used by page, dump and partitions"
    )]
    items_per_page: Option<u64>,
    #[arg(long, global = true, help = "Worker threads for partitioned fetches")]
    workers: Option<usize>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

/// Filter, projection and sort shared by the read commands.
#[derive(Args, Clone, Debug, Default)]
struct QueryArgs {
    #[arg(
        long = "where",
        value_name = "JSON",
        help = "Mongo-style filter document, e.g. '{\"age\": {\"$gt\": 30}}'"
    )]
    filter: Option<String>,
    #[arg(
        long,
        value_name = "JSON",
        help = "Projection document, e.g. '{\"name\": 1}' or '{\"secret\": 0}'"
    )]
    projection: Option<String>,
    #[arg(long, value_name = "KEYS", help = "Sort keys, e.g. 'name,-age'")]
    sort: Option<String>,
}

/// Where documents for `insert` and `validate` come from.
#[derive(Args, Clone, Debug)]
struct InputArgs {
    #[arg(
        value_name = "FILE",
        help = "JSON array or JSON/JSONL stream of documents; '-' or omitted reads stdin",
        value_hint = ValueHint::FilePath
    )]
    file: Option<PathBuf>,
    #[arg(long, help = "Coerce string values to the schema's types before checking")]
    coerce: bool,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "List the resources described by the settings",
        after_help = r#"EXAMPLES
  $ evedata --settings settings.json resources"#
    )]
    Resources,
    #[command(
        arg_required_else_help = true,
        about = "Count the documents matching a filter",
        after_help = r#"EXAMPLES
  $ evedata count people
  $ evedata count people --where '{"name": {"$regex": "^A"}}'"#
    )]
    Count {
        #[arg(help = "Resource endpoint name (e.g. people or admin/users)")]
        resource: String,
        #[arg(long = "where", value_name = "JSON", help = "Mongo-style filter document")]
        filter: Option<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Fetch one page of a resource",
        after_help = r#"EXAMPLES
  $ evedata page people
  $ evedata page people --page 3 --projection '{"name": 1}'
  $ evedata page people --sort=-age --table

NOTES
  - Pages are numbered from 1; page 0 is always empty
  - --table emits {columns, index, data} instead of records"#
    )]
    Page {
        resource: String,
        #[arg(long, default_value_t = 1, help = "Page number (1-based)")]
        page: u64,
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long, help = "Emit a column table instead of records")]
        table: bool,
    },
    #[command(
        arg_required_else_help = true,
        visible_alias = "records",
        about = "Stream every matching document as JSONL",
        after_help = r#"EXAMPLES
  $ evedata dump people > people.jsonl
  $ evedata dump people --where '{"active": true}' --sort name"#
    )]
    Dump {
        resource: String,
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long, help = "Stop after this many documents")]
        limit: Option<u64>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Fetch one document by id",
        after_help = r#"EXAMPLES
  $ evedata get people 5f1c0a9e2d3b4c5d6e7f8a9b"#
    )]
    Get {
        resource: String,
        #[arg(help = "Document id (24 hex characters)")]
        id: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Validate documents and post them in one batch",
        after_help = r#"EXAMPLES
  $ evedata insert people people.json
  $ cat people.jsonl | evedata insert people --coerce
  $ evedata insert people people.json --dry-run

NOTES
  - Documents failing the schema are reported and never sent
  - The store accepts or rejects the whole batch; a rejected batch exits non-zero"#
    )]
    Insert {
        resource: String,
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, help = "Validate only; send nothing")]
        dry_run: bool,
        #[arg(long, help = "Skip schema validation and let the store decide")]
        no_validate: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Check documents against a resource schema without sending them",
        after_help = r#"EXAMPLES
  $ evedata validate people people.json"#
    )]
    Validate {
        resource: String,
        #[command(flatten)]
        input: InputArgs,
    },
    #[command(
        arg_required_else_help = true,
        about = "Delete one document by id",
        after_help = r#"EXAMPLES
  $ evedata delete people 5f1c0a9e2d3b4c5d6e7f8a9b"#
    )]
    Delete { resource: String, id: String },
    #[command(
        arg_required_else_help = true,
        about = "Fetch a whole resource as parallel page-sized partitions",
        after_help = r#"EXAMPLES
  $ evedata partitions people --workers 8
  $ evedata partitions people --records > people.jsonl

NOTES
  - Partition i holds page i + 1; divisions are the row offsets between partitions
  - A failed partition stays empty and is reported as a notice"#
    )]
    Partitions {
        resource: String,
        #[arg(long = "where", value_name = "JSON", help = "Mongo-style filter document")]
        filter: Option<String>,
        #[arg(long, value_name = "KEYS", help = "Sort keys, e.g. 'name,-age'")]
        sort: Option<String>,
        #[arg(long, help = "Emit every row as JSONL instead of the summary")]
        records: bool,
    },
    #[command(
        about = "Serve the settings' resources from an in-process store",
        after_help = r#"EXAMPLES
  $ evedata --settings settings.json serve
  $ evedata --settings settings.json serve --bind 127.0.0.1:5001 --seed seed.json

NOTES
  - Data lives in memory and is lost on exit
  - --seed takes a JSON object mapping resource URLs to arrays of documents"#
    )]
    Serve {
        #[arg(long, default_value = "127.0.0.1:5000", help = "Bind address")]
        bind: String,
        #[arg(long, help = "Initial documents per resource URL", value_hint = ValueHint::FilePath)]
        seed: Option<PathBuf>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ evedata completion bash > ~/.local/share/bash-completion/completions/evedata
  $ evedata completion zsh > ~/.zfunc/_evedata"#
    )]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn read_settings(path: Option<&Path>) -> Result<Value, Error> {
    let Some(path) = path else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("missing settings document")
            .with_hint("Pass --settings <file> with the same DOMAIN the server is configured with."));
    };
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("failed to read settings file")
            .with_path(path.display().to_string())
            .with_source(err)
    })?;
    let settings: Value = serde_json::from_str(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("settings file is not valid JSON")
            .with_path(path.display().to_string())
            .with_source(err)
    })?;
    if !settings.is_object() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("settings must be a JSON object")
            .with_path(path.display().to_string()));
    }
    Ok(settings)
}

fn client_config(globals: &GlobalArgs, settings: &Value) -> Result<ClientConfig, Error> {
    let mut config = ClientConfig::from_app_settings(&globals.url, settings)?;
    if let Some(token) = resolve_token_value(globals.token.clone(), globals.token_file.clone())? {
        config = config.with_token(token);
    }
    let defaults = config.timeouts;
    let base = globals
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.base);
    let per_item = globals
        .per_item_timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.per_item);
    config = config.with_timeouts(base, per_item);
    if let Some(items_per_page) = globals.items_per_page {
        config = config.with_items_per_page(items_per_page)?;
    }
    if let Some(workers) = globals.workers {
        config = config.with_workers(workers)?;
    }
    Ok(config)
}

fn connect(globals: &GlobalArgs) -> Result<EveClient, Error> {
    let settings = read_settings(globals.settings.as_deref())?;
    let config = client_config(globals, &settings)?;
    EveClient::connect(config, &settings)
}

fn read_token_file(path: &Path) -> Result<String, Error> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("failed to read token file")
            .with_path(path.display().to_string())
            .with_source(err)
    })?;
    let token = raw.trim().to_string();
    if token.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("token file is empty")
            .with_path(path.display().to_string()));
    }
    Ok(token)
}

fn resolve_token_value(
    token: Option<String>,
    token_file: Option<PathBuf>,
) -> Result<Option<String>, Error> {
    if token.is_some() && token_file.is_some() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--token cannot be combined with --token-file")
            .with_hint("Use --token-file for safer handling, or pass --token for local/dev use."));
    }
    if let Some(path) = token_file {
        return read_token_file(&path).map(Some);
    }
    Ok(token)
}

fn parse_inline_json(data: &str, flag: &str) -> Result<Value, Error> {
    serde_json::from_str(data).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{flag} is not valid json"))
            .with_hint("Provide a single JSON object (e.g. '{\"name\": \"alice\"}').")
            .with_source(err)
    })
}

fn parse_filter(raw: &str) -> Result<Document, Error> {
    match parse_inline_json(raw, "--where")? {
        Value::Object(filter) => Ok(filter),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message("--where must be a JSON object")
            .with_hint("Example: --where '{\"age\": {\"$gte\": 18}}'")),
    }
}

fn apply_query(resource: &mut Resource, query: &QueryArgs) -> Result<(), Error> {
    if let Some(raw) = &query.filter {
        resource.set_filters(parse_filter(raw)?);
    }
    if let Some(raw) = &query.projection {
        let projection = Projection::from_value(&parse_inline_json(raw, "--projection")?)?;
        resource.set_projection(projection)?;
    }
    if let Some(raw) = &query.sort {
        resource.set_sort(Sort::parse(raw)?);
    }
    Ok(())
}

/// Documents from a JSON array, or from a stream of JSON objects (JSONL included).
fn read_documents<R: Read>(reader: R) -> Result<Vec<Document>, Error> {
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();
    let mut docs = Vec::new();
    for item in stream {
        let value = item.map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid json input")
                .with_hint("Provide a JSON array of objects, or one JSON object per line.")
                .with_source(err)
        })?;
        match value {
            Value::Array(values) => {
                for value in values {
                    docs.push(expect_document(value, docs.len())?);
                }
            }
            value => docs.push(expect_document(value, docs.len())?),
        }
    }
    Ok(docs)
}

fn expect_document(value: Value, index: usize) -> Result<Document, Error> {
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "document {index} is not a JSON object (got {})",
                json_type_name(&other)
            ))
            .with_hint("Every input document must be a JSON object.")),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn read_input(input: &InputArgs) -> Result<Vec<Document>, Error> {
    match input.file.as_deref() {
        Some(path) if path != Path::new("-") => {
            let file = std::fs::File::open(path).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("failed to open input file")
                    .with_path(path.display().to_string())
                    .with_source(err)
            })?;
            read_documents(io::BufReader::new(file))
        }
        _ => {
            let stdin = io::stdin();
            if stdin.is_terminal() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("no input documents")
                    .with_hint("Pass a file, or pipe JSON/JSONL into stdin."));
            }
            read_documents(stdin.lock())
        }
    }
}

fn add_connectivity_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Connectivity || err.hint().is_some() {
        return err;
    }
    err.with_hint("Server unreachable. Check --url, the server process, and --timeout-ms.")
}

fn add_conflict_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Conflict || err.hint().is_some() {
        return err;
    }
    err.with_hint("The document changed on the server. Fetch it again and retry.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_version_output(color_mode: ColorMode) {
    if io::stdout().is_terminal() {
        println!("evedata {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(
            json!({
                "name": "evedata",
                "version": env!("CARGO_PKG_VERSION"),
            }),
            color_mode,
        );
    }
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let pretty = is_tty || color_mode.use_color(is_tty);
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

/// One compact JSON value per line, for streams.
fn emit_jsonl(value: &Value) {
    let line = serde_json::to_string(value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{line}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn notice(kind: &str, cmd: &str, resource: &str, message: String, details: Map<String, Value>) -> Notice {
    Notice {
        kind: kind.to_string(),
        time: notice_time_now().unwrap_or_default(),
        cmd: cmd.to_string(),
        resource: resource.to_string(),
        message,
        details,
    }
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (resource: {})", notice.message, notice.resource);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Conflict => "document changed on the server".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Invalid => "invalid document".to_string(),
        ErrorKind::Remote => "server error".to_string(),
        ErrorKind::Connectivity => "server unreachable".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {path}",
            colorize_label("path:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(status) = err.status() {
        lines.push(format!(
            "{} {status}",
            colorize_label("status:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `evedata --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "evedata") else {
        return "Try `evedata --help`.".to_string();
    };

    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `evedata --help`.".to_string();
    }
    format!("Try `evedata {} --help`.", parts.join(" "))
}
