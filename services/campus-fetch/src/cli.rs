//! Command-line arguments

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "campus-fetch", version, about = "Call the campus content API")]
pub struct Cli {
    /// Config file path
    #[arg(
        long,
        global = true,
        env = "CONFIG_PATH",
        default_value = "campus-fetch.toml"
    )]
    pub config: PathBuf,

    /// Print Prometheus counters to stderr before exiting
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch an endpoint through the response cache
    Get(CallArgs),
    Post(CallArgs),
    Put(CallArgs),
    Delete(CallArgs),
    /// Clear the stored credential and cached responses
    Logout,
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Endpoint path relative to the API base, e.g. `/news`
    pub endpoint: String,

    /// Query parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// JSON request body
    #[arg(long, value_name = "JSON", value_parser = parse_body)]
    pub body: Option<Value>,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,
}

impl CallArgs {
    pub fn param_map(&self) -> BTreeMap<String, String> {
        self.params.iter().cloned().collect()
    }
}

impl Command {
    /// The HTTP method and arguments of a call, or `None` for `logout`.
    pub fn call(&self) -> Option<(Method, &CallArgs)> {
        match self {
            Command::Get(args) => Some((Method::GET, args)),
            Command::Post(args) => Some((Method::POST, args)),
            Command::Put(args) => Some((Method::PUT, args)),
            Command::Delete(args) => Some((Method::DELETE, args)),
            Command::Logout => None,
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String)> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| Error::InvalidParam(raw.to_string()))
}

fn parse_body(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| Error::InvalidBody(e.to_string()))
}
