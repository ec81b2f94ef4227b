use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dot", about = "Run a staged CI pipeline locally, one container per job")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Option<Cmd>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Show version, build date and commit
    Version,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the job file
    #[arg(short = 'f', long = "job-file-path", default_value = "dot.yml")]
    pub job_file: PathBuf,

    /// Mount the Docker socket into every job container
    #[arg(short = 'm', long = "mount-docker-socket")]
    pub mount_docker_socket: bool,

    /// Username for the container registry
    #[arg(
        short = 'u',
        long = "registry-username",
        env = "DOT_REGISTRY_USERNAME",
        default_value = ""
    )]
    pub username: String,

    /// Password or token for the container registry
    #[arg(
        short = 'p',
        long = "registry-password",
        env = "DOT_REGISTRY_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub password: String,

    /// Environment variable for every job, KEY=VALUE (repeatable)
    #[arg(
        short = 'e',
        long = "environment-variable",
        value_name = "KEY=VALUE",
        value_parser = parse_env
    )]
    pub env: Vec<(String, String)>,

    /// Per-job timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 3600)]
    pub timeout: u64,

    /// Host directory used to pass artifacts between jobs (wiped on start, so it may not
    /// contain the working directory, the job file or job sources)
    #[arg(long, default_value = ".artifacts")]
    pub artifacts_dir: PathBuf,

    /// Unpack all published artifacts under DIR once the run succeeds
    #[arg(long, value_name = "DIR")]
    pub export_artifacts: Option<PathBuf>,

    /// Cancel the remaining jobs of a stage as soon as one fails
    #[arg(long)]
    pub cancel_on_failure: bool,

    /// Do not print image pull progress
    #[arg(long)]
    pub quiet_pull: bool,

    /// Log level or filter directive
    #[arg(long, env = "DOT_LOG", default_value = "info")]
    pub log_level: String,

    /// Log format: text, json or journald
    #[arg(long, default_value = "text")]
    pub log_format: String,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    let mut parts = s.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(k), Some(v), None) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("environment variables must be KEY=VALUE, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_needs_exactly_one_equals() {
        assert_eq!(parse_env("CI=true"), Ok(("CI".into(), "true".into())));
        assert_eq!(parse_env("EMPTY="), Ok(("EMPTY".into(), String::new())));
        assert!(parse_env("NOVALUE").is_err());
        assert!(parse_env("A=b=c").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["dot"]).unwrap();
        assert!(cli.cmd.is_none());
        assert_eq!(cli.run.job_file, PathBuf::from("dot.yml"));
        assert_eq!(cli.run.timeout, 3600);
        assert_eq!(cli.run.artifacts_dir, PathBuf::from(".artifacts"));
        assert!(!cli.run.mount_docker_socket);
    }

    #[test]
    fn repeatable_env_and_short_flags() {
        let cli = Cli::try_parse_from([
            "dot", "-f", "ci.yml", "-m", "-e", "A=1", "-e", "B=2", "--timeout", "5",
        ])
        .unwrap();
        assert_eq!(cli.run.job_file, PathBuf::from("ci.yml"));
        assert!(cli.run.mount_docker_socket);
        assert_eq!(
            cli.run.env,
            vec![("A".into(), "1".into()), ("B".into(), "2".into())]
        );
        assert_eq!(cli.run.timeout, 5);
    }

    #[test]
    fn malformed_env_is_a_usage_error() {
        assert!(Cli::try_parse_from(["dot", "-e", "A=b=c"]).is_err());
    }

    #[test]
    fn version_subcommand() {
        let cli = Cli::try_parse_from(["dot", "version"]).unwrap();
        assert!(matches!(cli.cmd, Some(Cmd::Version)));
    }
}
