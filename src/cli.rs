use crate::config::ConfigOverrides;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "circonus-backend", version, about="statsd flush backend for circonus http traps", long_about = None, arg_required_else_help(true), propagate_version(true))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(arg_required_else_help = true)]
    GenerateAutoComplete { shell: Shell },

    /// Flush every batch read from the input, one JSON batch per line
    Run {
        #[command(flatten)]
        backend: BackendArgs,
        #[arg(
            short,
            long,
            required = false,
            help = "read batches from this file instead of stdin"
        )]
        input: Option<PathBuf>,
    },

    /// Flush a single batch file
    Flush {
        #[command(flatten)]
        backend: BackendArgs,
        #[arg(short, long, required = true)]
        batch: ExistingJsonFile,
    },

    /// Print the status fields reported by the backend
    StatusKeys,
}

#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    #[arg(short, long, env = "CIRCONUS_BACKEND_CONFIG")]
    pub config: Option<ExistingJsonFile>,
    #[arg(short, long, env = "CIRCONUS_HTTP_TRAP_URL")]
    pub trap_url: Option<Url>,
    #[arg(long, env = "CIRCONUS_CA_CERT_PATH")]
    pub ca_cert: Option<PathBuf>,
    #[arg(
        short,
        long,
        value_delimiter = ',',
        help = "percentile thresholds, e.g. 90,99.9"
    )]
    pub percentiles: Option<Vec<f64>>,
    #[arg(long, env = "CIRCONUS_PROMETHEUS_ADDR")]
    pub prometheus_addr: Option<SocketAddr>,
    #[arg(short, long, help = "log request and response details")]
    pub debug: bool,
    #[arg(long, help = "print the stats as JSON instead of sending them")]
    pub dry_run: bool,
}

impl BackendArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            trap_url: self.trap_url.clone(),
            debug: self.debug,
            ca_cert_path: self.ca_cert.clone(),
            percent_threshold: self.percentiles.clone(),
            prometheus_addr: self.prometheus_addr,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExistingJsonFile(PathBuf);

impl ExistingJsonFile {
    pub fn path(&self) -> &PathBuf {
        &self.0
    }
}
impl FromStr for ExistingJsonFile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = PathBuf::from(s);

        if !path.exists() {
            return Err(format!("File does not exist: {}", s));
        }

        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            return Err(format!("File must have a .json extension: {}", s));
        }

        Ok(ExistingJsonFile(path))
    }
}
