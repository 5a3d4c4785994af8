mod fs_daemon;

use clap::Parser;
use httpfs_lib::{HttpFsConfig, HttpFsResult};
use log::error;
use std::path::PathBuf;

use crate::fs_daemon::{read_json_config, run_fs_daemon, FsDaemonRunOptions, MountIdentity};

/// Mount a web server directory listing as a read-only filesystem.
#[derive(Parser, Debug)]
#[command(name = "httpfs_daemon", version)]
struct Cli {
    /// Directory to mount on
    mountpoint: PathBuf,

    /// Base URL of the served tree
    #[arg(long = "http.addr", value_name = "URL")]
    http_addr: Option<String>,

    /// Basic auth credentials as user:pass
    #[arg(long = "http.auth", value_name = "USER:PASS")]
    http_auth: Option<String>,

    /// Accept any TLS certificate
    #[arg(
        long = "http.insecure-skip-verify",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    insecure_skip_verify: Option<bool>,

    /// Ask the server for JSON listings
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    json: Option<bool>,

    /// JSON file with an HttpFsConfig; flags given on the command line win
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn build_config(cli: &Cli) -> HttpFsResult<HttpFsConfig> {
    let mut config = match &cli.config {
        Some(path) => read_json_config::<HttpFsConfig>(path)?,
        None => HttpFsConfig::default(),
    };
    if let Some(addr) = &cli.http_addr {
        config.base_url = addr.clone();
    }
    if let Some(auth) = &cli.http_auth {
        config.auth = auth.clone();
    }
    if let Some(skip) = cli.insecure_skip_verify {
        config.insecure_skip_verify = skip;
    }
    if let Some(json) = cli.json {
        config.accept_json = json;
    }
    Ok(config)
}

fn main() {
    // a missing mountpoint prints usage and exits with status 2
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = match build_config(&cli) {
        Ok(v) => v,
        Err(err) => {
            error!("load config failed: {}", err);
            std::process::exit(1);
        }
    };

    let options = FsDaemonRunOptions {
        mountpoint: cli.mountpoint,
        config,
        identity: MountIdentity::current(),
    };
    if let Err(err) = run_fs_daemon(options) {
        error!("run httpfs_daemon failed: {}", err);
        std::process::exit(1);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let tmp = tempfile::TempDir::new().expect("create temp dir");
        let path = tmp.path().join("httpfs.json");
        std::fs::write(
            &path,
            r#"{"base_url": "http://files.example/", "auth": "a:b", "json": true}"#,
        )
        .expect("write config");

        let cli = Cli::try_parse_from([
            "httpfs_daemon",
            "/mnt/web",
            "--config",
            path.to_str().expect("utf8 path"),
            "--http.addr",
            "https://other.example/pub",
            "--json=false",
        ])
        .expect("parse args");
        let config = build_config(&cli).expect("build config");
        assert_eq!(config.base_url, "https://other.example/pub");
        assert_eq!(config.auth, "a:b");
        assert!(!config.accept_json);
        assert!(config.insecure_skip_verify);
    }

    #[test]
    fn test_bare_bool_flags() {
        let cli = Cli::try_parse_from([
            "httpfs_daemon",
            "/mnt/web",
            "--json",
            "--http.insecure-skip-verify=false",
        ])
        .expect("parse args");
        let config = build_config(&cli).expect("build config");
        assert!(config.accept_json);
        assert!(!config.insecure_skip_verify);
        assert_eq!(config.base_url, httpfs_lib::DEFAULT_BASE_URL);
    }

    #[test]
    fn test_missing_mountpoint_is_usage_error() {
        let err = Cli::try_parse_from(["httpfs_daemon"]).expect_err("mountpoint required");
        assert_eq!(err.exit_code(), 2);
    }
}
