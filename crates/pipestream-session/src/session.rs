use pipestream_codec::{Batch, InputSchema, OutputSink, TsvFormat};
use pipestream_process::{
    CancelToken, ChildCommand, ChildIo, ChildProcess, ProcessConfig, ResourceLimits,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::interface::{interface_for, StreamInterface};
use crate::settings::StreamSettings;

/// Everything about a session that is not part of the operator settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Instance coordinate written into every output position.
    pub instance_id: i64,
    pub limits: ResourceLimits,
    pub process: ProcessConfig,
    /// Explicit environment for the child; `None` inherits the host's.
    pub env: Option<Vec<(String, String)>>,
    pub cancel: CancelToken,
    pub tsv: TsvFormat,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            instance_id: 0,
            limits: ResourceLimits::default(),
            process: ProcessConfig::default(),
            env: None,
            cancel: CancelToken::new(),
            tsv: TsvFormat::default(),
        }
    }
}

/// Counters reported when a session finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Batches actually sent (zero-row batches are not counted).
    pub batches: usize,
    pub rows_sent: usize,
}

/// One child process streaming one sequence of batches.
///
/// The child is terminated on every exit path: after [`finish`](Self::finish),
/// after any error, and when the session is dropped.
pub struct StreamSession {
    settings: StreamSettings,
    child: ChildProcess,
    interface: Box<dyn StreamInterface>,
    summary: SessionSummary,
    finished: bool,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("command", &self.settings.command())
            .field("format", &self.settings.format())
            .field("pid", &self.child.pid())
            .field("summary", &self.summary)
            .field("finished", &self.finished)
            .finish()
    }
}

impl StreamSession {
    /// Validate the input schema for the chosen format, then launch the child.
    pub fn launch(
        settings: StreamSettings,
        input: &InputSchema,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut interface = interface_for(&settings, options.instance_id, options.tsv);
        interface.set_input_schema(input)?;

        let mut command = ChildCommand::shell(settings.command()).limits(options.limits);
        if let Some(env) = options.env {
            for (key, value) in env {
                command = command.env(key, value);
            }
        }
        let child = ChildProcess::spawn(&command, options.process, options.cancel)?;
        info!(
            pid = child.pid(),
            format = %settings.format(),
            command = settings.command(),
            "stream session started"
        );

        Ok(Self {
            settings,
            child,
            interface,
            summary: SessionSummary::default(),
            finished: false,
        })
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn pid(&self) -> u32 {
        self.child.pid()
    }

    pub fn is_alive(&self) -> bool {
        self.child.is_alive()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.child.cancel_token()
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Exchange one batch with the child. Any error ends the session.
    pub fn stream_batch(&mut self, batch: &Batch, sink: &mut dyn OutputSink) -> Result<()> {
        if self.finished {
            return Err(SessionError::Finished);
        }
        let rows = batch.num_rows();
        let result = self.interface.stream_batch(batch, &mut self.child, sink);
        match result {
            Ok(()) => {
                if rows > 0 {
                    self.summary.batches += 1;
                    self.summary.rows_sent += rows;
                }
                Ok(())
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    /// Send the sentinel, store the final response and stop the child.
    pub fn finish(mut self, sink: &mut dyn OutputSink) -> Result<SessionSummary> {
        if self.finished {
            return Err(SessionError::Finished);
        }
        if let Err(err) = self.interface.finalize(&mut self.child, sink) {
            return Err(self.abort(err));
        }
        self.finished = true;
        self.child.terminate();
        debug!(
            pid = self.child.pid(),
            batches = self.summary.batches,
            rows = self.summary.rows_sent,
            "stream session finished"
        );
        Ok(self.summary)
    }

    /// Stream every batch, then finish.
    pub fn run<I>(mut self, batches: I, sink: &mut dyn OutputSink) -> Result<SessionSummary>
    where
        I: IntoIterator<Item = Batch>,
    {
        for batch in batches {
            self.stream_batch(&batch, sink)?;
        }
        self.finish(sink)
    }

    fn abort(&mut self, err: SessionError) -> SessionError {
        self.finished = true;
        if err.is_cancelled() {
            debug!(pid = self.child.pid(), "stream session cancelled");
        } else {
            warn!(
                pid = self.child.pid(),
                phase = err.phase(),
                error = %err,
                "stream session failed"
            );
        }
        self.child.terminate();
        err
    }
}
