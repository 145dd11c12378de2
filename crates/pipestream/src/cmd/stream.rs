use std::fs::File;
use std::io::{self, BufReader};
use std::time::Duration;

use pipestream_codec::MemorySink;
use pipestream_process::{CancelToken, ProcessConfig};
use pipestream_session::{OutputSchema, SessionOptions, StreamSession, StreamSettings};

use crate::cmd::StreamArgs;
use crate::exit::{io_error, session_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::input::{self, InputOptions, ParsedInput};
use crate::output::{self, OutputFormat};

pub fn run(args: StreamArgs, format: OutputFormat) -> CliResult<i32> {
    let settings = StreamSettings::parse(args.command.as_str(), args.params())
        .map_err(|err| session_error("invalid stream settings", err))?;
    let schema = OutputSchema::infer(&settings, 1)
        .map_err(|err| session_error("invalid stream settings", err))?;

    let input = read_input(&args)?;
    tracing::debug!(
        rows = input.rows(),
        batches = input.batches.len(),
        columns = input.schema.len(),
        "input loaded"
    );

    let cancel = CancelToken::new();
    install_ctrlc_handler(cancel.clone())?;

    let options = SessionOptions {
        limits: args.limits(),
        process: ProcessConfig {
            poll_timeout: Duration::from_millis(args.poll_interval.max(1)),
            ..ProcessConfig::default()
        },
        cancel,
        ..SessionOptions::default()
    };

    let session = StreamSession::launch(settings, &input.schema, options)
        .map_err(|err| session_error("failed to start stream", err))?;
    tracing::info!(pid = session.pid(), "child launched");

    let mut sink = MemorySink::new(schema.attributes.len());
    let summary = session
        .run(input.batches, &mut sink)
        .map_err(|err| session_error("stream failed", err))?;
    tracing::info!(
        batches = summary.batches,
        rows_sent = summary.rows_sent,
        rows_received = sink.len(),
        "stream complete"
    );

    output::print_rows(&sink, &schema, format)?;
    Ok(SUCCESS)
}

fn read_input(args: &StreamArgs) -> CliResult<ParsedInput> {
    let batch_rows = usize::try_from(args.batch_rows)
        .map_err(|_| CliError::new(USAGE, "--batch-rows is too large"))?;
    let options = InputOptions {
        types: args.input_types.clone(),
        header: args.header,
        batch_rows,
    };

    match &args.input {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(path)
                .map_err(|err| io_error(&format!("failed to open {}", path.display()), err))?;
            input::parse(BufReader::new(file), &options)
        }
        _ => input::parse(io::stdin().lock(), &options),
    }
}

fn install_ctrlc_handler(cancel: CancelToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
