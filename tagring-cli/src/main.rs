//! Command-line front end for the six catalog verbs (spec.md §6), speaking
//! the same length-prefixed JSON wire protocol the node listens for on its
//! client port. Every verb is one request, one reply, one process.

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tagring_proto::{command, Envelope, Header, TransportError};
use tagring_transport::{unicast_call, WAIT_CHECK};

#[derive(Parser)]
#[command(name = "tagring", about = "Client for a tagring node's catalog")]
struct Cli {
    /// Client-port address of any ring node, e.g. 127.0.0.1:10000
    #[arg(long, default_value = "127.0.0.1:10000")]
    node: String,

    #[command(subcommand)]
    verb: Verb,
}

#[derive(Subcommand)]
enum Verb {
    /// Upload a file with its tag set
    Add(AddArgs),
    /// Delete every file matching a tag query
    Delete(TagQueryArgs),
    /// List files matching a tag query
    List(TagQueryArgs),
    /// Attach tags to every file matching a tag query
    AddTags(TagMutationArgs),
    /// Remove tags from every file matching a tag query
    DeleteTags(TagMutationArgs),
    /// Resolve (or create) a user id by name
    GetUserId { user_name: String },
}

#[derive(Args)]
struct AddArgs {
    name: String,
    file_type: String,
    user_id: u64,
    /// Inline file content (UTF-8). Mutually exclusive with `--path`.
    #[arg(long, conflicts_with = "path")]
    content: Option<String>,
    /// Read file content from a local path instead of `--content`.
    #[arg(long)]
    path: Option<PathBuf>,
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Args)]
struct TagQueryArgs {
    #[arg(long = "tag")]
    tag_query: Vec<String>,
}

#[derive(Args)]
struct TagMutationArgs {
    #[arg(long = "tag")]
    tag_query: Vec<String>,
    #[arg(long = "set")]
    tags: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt::try_init();
    let cli = Cli::parse();

    let (header, data) = match build_request(cli.verb) {
        Ok(pair) => pair,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    let request = Envelope::new(header, data);
    match unicast_call::<Envelope, Value>(&cli.node, &request, WAIT_CHECK).await {
        Ok(reply) => print_reply(&reply),
        Err(err) => {
            eprintln!("{}", transport_message(&err));
            ExitCode::from(1)
        }
    }
}

fn build_request(verb: Verb) -> Result<(Header, Value), String> {
    match verb {
        Verb::Add(args) => {
            let content = match (args.content, args.path) {
                (Some(inline), None) => inline,
                (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| format!("reading {}: {e}", path.display()))?,
                (Some(_), Some(_)) => return Err("--content and --path are mutually exclusive".into()),
                (None, None) => return Err("one of --content or --path is required".into()),
            };
            let size = content.len() as u64;
            let header = Header::new(command::CREATE, "add", vec!["file".into(), "tags".into()]);
            let data = json!({
                "file": {
                    "name": args.name,
                    "file_type": args.file_type,
                    "size": size,
                    "user_id": args.user_id,
                    "content": content,
                },
                "tags": args.tags,
            });
            Ok((header, data))
        }
        Verb::Delete(args) => {
            let header = Header::new(command::DELETE, "delete", vec!["tag_query".into()]);
            Ok((header, json!({ "tag_query": args.tag_query })))
        }
        Verb::List(args) => {
            let header = Header::new(command::GET_ALL, "list_files", vec!["tag_query".into()]);
            Ok((header, json!({ "tag_query": args.tag_query })))
        }
        Verb::AddTags(args) => {
            let header = Header::new(command::CREATE, "add_tags", vec!["tag_query".into(), "tags".into()]);
            Ok((header, json!({ "tag_query": args.tag_query, "tags": args.tags })))
        }
        Verb::DeleteTags(args) => {
            let header = Header::new(command::DELETE, "delete_tags", vec!["tag_query".into(), "tags".into()]);
            Ok((header, json!({ "tag_query": args.tag_query, "tags": args.tags })))
        }
        Verb::GetUserId { user_name } => {
            let header = Header::new(command::GET, "get_user_id", vec!["user_name".into()]);
            Ok((header, json!({ "user_name": user_name })))
        }
    }
}

/// Maps the wire reply to an exit code (spec.md §6): a bare `{"error":...}`
/// body is treated as malformed input (exit 2) since this CLI never issues
/// requests that could fail for any other client-visible reason.
fn print_reply(reply: &Value) -> ExitCode {
    if let Some(error) = reply.get("error") {
        eprintln!("{}", error.as_str().unwrap_or("unknown error"));
        return ExitCode::from(2);
    }
    let payload = reply.get("result").unwrap_or(reply);
    match serde_json::to_string_pretty(payload) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{payload}"),
    }
    ExitCode::SUCCESS
}

fn transport_message(err: &TransportError) -> String {
    match err {
        TransportError::Refused => "connection refused".to_string(),
        TransportError::Timeout => "request timed out".to_string(),
        TransportError::Malformed(m) => format!("malformed reply: {m}"),
        TransportError::RemoteError(m) => format!("remote error: {m}"),
    }
}
