use std::path::PathBuf;

use clap::{Args, Subcommand};
use pipestream_codec::ColumnType;
use pipestream_process::ResourceLimits;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod stream;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream a tab-separated input file through a child process.
    Stream(StreamArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Stream(args) => stream::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Command line run with `/bin/sh -c`.
    pub command: String,
    /// Tab-separated input file (`-` or omitted reads stdin).
    #[arg(long, short = 'i', value_name = "PATH")]
    pub input: Option<PathBuf>,
    /// Transfer format: tsv, df or feather.
    #[arg(long, short = 'f', default_value = "tsv")]
    pub format: String,
    /// Output column types (comma-separated; df and feather only).
    #[arg(long, value_delimiter = ',')]
    pub types: Option<Vec<String>>,
    /// Output column names (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub names: Option<Vec<String>>,
    /// Output rows per chunk (df and feather only).
    #[arg(long)]
    pub chunk_size: Option<i64>,
    /// Input column types (comma-separated). Default: every column is a string.
    #[arg(long, value_delimiter = ',', value_parser = parse_column_type)]
    pub input_types: Option<Vec<ColumnType>>,
    /// Treat the first input line as column names.
    #[arg(long)]
    pub header: bool,
    /// Input rows per batch sent to the child.
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_rows: u64,
    /// Interval between cancellation checks while waiting on the child, in milliseconds.
    #[arg(long, value_name = "MS", default_value = "100")]
    pub poll_interval: u64,
    /// CPU time limit for the child, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub limit_cpu: Option<u64>,
    /// Address space limit for the child, in bytes.
    #[arg(long, value_name = "BYTES")]
    pub limit_memory: Option<u64>,
    /// Open file limit for the child.
    #[arg(long, value_name = "N")]
    pub limit_nofile: Option<u64>,
    /// Process limit for the child's user.
    #[arg(long, value_name = "N")]
    pub limit_nproc: Option<u64>,
    /// Floor the open file limit is raised to.
    #[arg(long, value_name = "N")]
    pub nofile_floor: Option<u64>,
}

impl StreamArgs {
    /// Settings parameters in `key=value` form.
    pub fn params(&self) -> Vec<String> {
        let mut params = vec![format!("format={}", self.format)];
        if let Some(types) = &self.types {
            params.push(format!("types=({})", types.join(",")));
        }
        if let Some(names) = &self.names {
            params.push(format!("names=({})", names.join(",")));
        }
        if let Some(chunk_size) = self.chunk_size {
            params.push(format!("chunk_size={chunk_size}"));
        }
        params
    }

    pub fn limits(&self) -> ResourceLimits {
        let mut limits = ResourceLimits {
            address_space: self.limit_memory,
            cpu_seconds: self.limit_cpu,
            max_processes: self.limit_nproc,
            max_open_files: self.limit_nofile,
            ..ResourceLimits::default()
        };
        if let Some(floor) = self.nofile_floor {
            limits = limits.with_nofile_floor(floor);
        }
        limits
    }
}

fn parse_column_type(value: &str) -> Result<ColumnType, String> {
    value.trim().parse().map_err(|err| format!("{err}"))
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(format: &str) -> StreamArgs {
        StreamArgs {
            command: "cat".to_string(),
            input: None,
            format: format.to_string(),
            types: None,
            names: None,
            chunk_size: None,
            input_types: None,
            header: false,
            batch_rows: 1000,
            poll_interval: 100,
            limit_cpu: None,
            limit_memory: None,
            limit_nofile: None,
            limit_nproc: None,
            nofile_floor: None,
        }
    }

    #[test]
    fn params_carry_every_setting() {
        let mut stream = args("df");
        stream.types = Some(vec!["int32".into(), "string".into()]);
        stream.names = Some(vec!["n".into(), "s".into()]);
        stream.chunk_size = Some(10);
        assert_eq!(
            stream.params(),
            vec![
                "format=df".to_string(),
                "types=(int32,string)".to_string(),
                "names=(n,s)".to_string(),
                "chunk_size=10".to_string(),
            ]
        );
    }

    #[test]
    fn limits_default_to_empty() {
        assert!(args("tsv").limits().is_empty());
    }

    #[test]
    fn nofile_floor_is_clamped() {
        let mut stream = args("tsv");
        stream.limit_nofile = Some(2);
        stream.nofile_floor = Some(1);
        assert_eq!(stream.limits().effective_open_files(), Some(5));
    }
}
