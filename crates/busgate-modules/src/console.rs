//! `console` – an interactive communication module for bench testing.
//!
//! Every transmitted message is written to the output as
//! `<path> <content>`, with ` (retained)` appended for retained messages.
//! On `start` a reader task consumes the input line by line:
//!
//! - `<path> <content>` is submitted to the bus as a subscribe message,
//! - `quit` requests an orderly gateway shutdown,
//! - blank lines are ignored.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use busgate_middleware::{
    CommunicationContext, CommunicationModule, Module, ModuleConfig, ReceiveQueue, ShutdownHandle,
};
use busgate_types::{ModuleError, PublishMessage, SubscribeMessage};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn Write + Send + Sync>;

/// Bench console: prints transmitted traffic and turns typed lines into
/// subscribe messages.
pub struct ConsoleModule {
    id: String,
    /// Taken by the reader task on `start`; `None` afterwards.
    input: Mutex<Option<Input>>,
    output: Output,
    receive: Option<ReceiveQueue>,
    shutdown: Option<ShutdownHandle>,
    reader: Option<JoinHandle<()>>,
}

impl ConsoleModule {
    /// Console bound to the process's stdin / stdout.
    pub fn stdio() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), std::io::stdout())
    }

    /// Console over arbitrary streams; tests use in-memory buffers.
    pub fn with_io(
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl Write + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: String::new(),
            input: Mutex::new(Some(Box::new(input))),
            output: Box::new(output),
            receive: None,
            shutdown: None,
            reader: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Input parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Empty,
    Quit,
    Submit(SubscribeMessage),
    Invalid,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if line.eq_ignore_ascii_case("quit") {
        return Command::Quit;
    }
    match line.split_once(char::is_whitespace) {
        Some((path, content)) => Command::Submit(SubscribeMessage::new(path, content.trim_start())),
        None => Command::Invalid,
    }
}

async fn read_commands(id: String, input: Input, receive: ReceiveQueue, shutdown: ShutdownHandle) {
    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_command(&line) {
                Command::Empty => {}
                Command::Quit => {
                    info!(module = %id, "quit requested from console");
                    shutdown.request(id.as_str());
                    break;
                }
                Command::Submit(message) => {
                    debug!(module = %id, path = %message.path, "console input");
                    if let Err(e) = receive.submit(message) {
                        warn!(module = %id, error = %e, "receive queue closed, console reader exiting");
                        break;
                    }
                }
                Command::Invalid => {
                    warn!(module = %id, line = %line, "expected '<path> <content>' or 'quit'");
                }
            },
            Ok(None) => {
                debug!(module = %id, "console input closed");
                break;
            }
            Err(e) => {
                warn!(module = %id, error = %e, "console input failed");
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module hooks
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl Module for ConsoleModule {
    async fn start(&mut self) -> Result<(), ModuleError> {
        let input = match self.input.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let (Some(input), Some(receive), Some(shutdown)) =
            (input, self.receive.clone(), self.shutdown.clone())
        else {
            return Err(ModuleError::failed("console started before load"));
        };
        self.reader = Some(tokio::spawn(read_commands(
            self.id.clone(),
            input,
            receive,
            shutdown,
        )));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ModuleError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl CommunicationModule for ConsoleModule {
    async fn load(
        &mut self,
        _config: &ModuleConfig,
        ctx: CommunicationContext,
    ) -> Result<(), ModuleError> {
        self.id = ctx.id;
        self.receive = Some(ctx.receive);
        self.shutdown = Some(ctx.shutdown);
        Ok(())
    }

    async fn transmit(&mut self, message: &PublishMessage) -> Result<(), ModuleError> {
        let marker = if message.retained { " (retained)" } else { "" };
        writeln!(self.output, "{} {}{marker}", message.path, message.content)
            .and_then(|()| self.output.flush())
            .map_err(|e| ModuleError::failed(format!("console write failed: {e}")))
    }
}
