//! Entrypoint to the protocoder CLI.

mod json;

use std::fs;
use std::io::{stdin, stdout, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use tracing::Level;

use protocoder::{MarshalOptions, Message, MessageInfo, Registry};

#[derive(Parser)]
#[command(
    version,
    about = "Encode and decode protobuf messages described by a JSON schema."
)]
struct Args {
    /// Schema file: message and extension descriptors as JSON.
    #[arg(short, long)]
    schema: PathBuf,

    /// Write logs to standard error as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Log more (repeat for even more).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Command {
    /// Encode a JSON value.
    ///
    /// Prints the encoding as hex, unless `--raw` is given.
    Encode {
        /// Full name of the message type.
        message: String,

        /// JSON file holding the value, or `-` for standard input.
        #[arg(default_value = "-")]
        value: PathBuf,

        /// Write raw bytes rather than hex.
        #[arg(short, long)]
        raw: bool,
    },

    /// Print the encoded length of a JSON value.
    Size {
        message: String,
        #[arg(default_value = "-")]
        value: PathBuf,
    },

    /// Print the SHA-256 digest of a JSON value's deterministic encoding.
    Digest {
        message: String,
        #[arg(default_value = "-")]
        value: PathBuf,
    },

    /// Decode an encoded message and print it as JSON.
    Decode {
        message: String,

        /// File holding the encoding as hex, or `-` for standard input.
        #[arg(default_value = "-")]
        input: PathBuf,

        /// Read raw bytes rather than hex.
        #[arg(short, long)]
        raw: bool,
    },

    /// Print the coder table built for a message type.
    Table { message: String },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.log_json);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn run(args: Args) -> Result<()> {
    let registry = json::load_schema(&args.schema)?;
    let options = MarshalOptions {
        use_cached_size: false,
        deterministic: true,
    };

    match args.command {
        Command::Encode {
            message,
            value,
            raw,
        } => {
            let message = read_message(&registry, &message, &value)?;
            let bytes = message.encode_to_vec(options)?;
            if raw {
                stdout().write_all(&bytes)?;
            } else {
                println!("{}", hex::encode(bytes));
            }
        }
        Command::Size { message, value } => {
            let message = read_message(&registry, &message, &value)?;
            println!("{}", message.size(options)?);
        }
        Command::Digest { message, value } => {
            let message = read_message(&registry, &message, &value)?;
            let mut hasher = Sha256::new();
            hasher.update(message.encode_to_vec(options)?);
            let hash = hasher.finalize();
            println!("{}", hex::encode(hash.as_slice()));
        }
        Command::Decode {
            message,
            input,
            raw,
        } => {
            let info = message_info(&registry, &message)?;
            let input = read_input(&input)?;
            let bytes = if raw {
                input
            } else {
                let text = String::from_utf8(input).context("Hex input is not UTF-8")?;
                hex::decode(text.trim()).context("Invalid hex input")?
            };
            let message = info.decode(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&json::from_message(&message))?);
        }
        Command::Table { message } => {
            let info = message_info(&registry, &message)?;
            println!("{}", serde_json::to_string_pretty(&describe_table(&info)?)?);
        }
    }
    Ok(())
}

fn message_info(registry: &Registry, name: &str) -> Result<Arc<MessageInfo>> {
    registry
        .message_info(name)
        .ok_or_else(|| anyhow!("Unknown message type '{name}'"))
}

/// Read a whole file, or standard input for `-`.
fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buffer = Vec::new();
        stdin()
            .read_to_end(&mut buffer)
            .context("Cannot read standard input")?;
        Ok(buffer)
    } else {
        fs::read(path).with_context(|| format!("Cannot read {}", path.display()))
    }
}

fn read_message(registry: &Registry, name: &str, path: &Path) -> Result<Message> {
    let info = message_info(registry, name)?;
    let value: JsonValue = serde_json::from_slice(&read_input(path)?)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    json::to_message(registry, &info, &value)
}

fn describe_table(info: &MessageInfo) -> Result<JsonValue> {
    let table = info.coder_table()?;
    let fields: Vec<JsonValue> = table
        .fields()
        .map(|field| {
            let coder = field.coder();
            json!({
                "number": field.number(),
                "kind": format!("{:?}", coder.kind()),
                "coding": format!("{:?}", coder.coding()),
                "wire_type": format!("{:?}", coder.wire_type()),
                "tag_size": coder.tag_size(),
                "pointer": field.is_pointer(),
                "required": field.is_required(),
                "oneof_group": field.oneof_group(),
                "message_type": coder.message_type(),
            })
        })
        .collect();
    let ordered: Vec<u32> = table.ordered_fields().map(|field| field.number()).collect();
    Ok(json!({
        "message_type": info.full_name(),
        "message_set": table.is_message_set(),
        "needs_init_check": table.needs_init_check(),
        "required_fields": table.required_field_count(),
        "dense_len": table.dense_len(),
        "marshal_order": ordered,
        "fields": fields,
    }))
}
