//! Interactive session: reads lines, runs exchanges, prints answers.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::terminal::{Clear, ClearType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chat_agent_core::{AgentLoop, ConversationState, Error, ModelClient};

pub const EXIT_COMMAND: &str = "/bye";
pub const CLEAR_COMMAND: &str = "/clear";

const PROMPT: &str = "USER: ";
const WELCOME: &str = "Welcome to chat-agent! Type /bye to exit or /clear to clear the screen.";

/// What a line of input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Clear,
    Prompt(String),
    Blank,
}

pub fn parse_command(line: &str) -> Command {
    match line.trim() {
        "" => Command::Blank,
        EXIT_COMMAND => Command::Exit,
        CLEAR_COMMAND => Command::Clear,
        text => Command::Prompt(text.to_string()),
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ExitCommand,
    EndOfInput,
    Interrupted,
}

/// Forward stdin lines over a channel.
///
/// Runs on a plain thread: a blocked stdin read must not hold up runtime
/// shutdown once the session ends.
pub fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            if let Err(e) = forward_lines(std::io::stdin().lock(), &tx) {
                warn!(error = %e, "Failed to read from stdin");
            }
            debug!("stdin closed");
        })?;
    Ok(rx)
}

/// Send every line of `reader` until end of input or until the receiver
/// goes away. Bytes that are not valid UTF-8 are replaced, never fatal.
fn forward_lines<R: BufRead>(mut reader: R, tx: &mpsc::Sender<String>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        if tx.blocking_send(decode_line(&buf)).is_err() {
            return Ok(());
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

pub struct Session<C> {
    agent: AgentLoop<C>,
    conversation: ConversationState,
    shutdown: CancellationToken,
    /// Lines typed while an exchange was running.
    queued: VecDeque<String>,
    input_closed: bool,
}

impl<C: ModelClient> Session<C> {
    pub fn new(
        agent: AgentLoop<C>,
        conversation: ConversationState,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            agent,
            conversation,
            shutdown,
            queued: VecDeque::new(),
            input_closed: false,
        }
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Drive the session until `/bye`, end of input or shutdown.
    pub async fn run<W: Write>(
        &mut self,
        lines: &mut mpsc::Receiver<String>,
        out: &mut W,
    ) -> Result<SessionEnd> {
        writeln!(out, "{WELCOME}")?;

        loop {
            let line = match self.queued.pop_front() {
                Some(line) => {
                    writeln!(out, "{PROMPT}{line}")?;
                    line
                }
                None => {
                    if self.input_closed {
                        return Ok(SessionEnd::EndOfInput);
                    }
                    write!(out, "{PROMPT}")?;
                    out.flush()?;

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            writeln!(out)?;
                            return Ok(SessionEnd::Interrupted);
                        }
                        line = lines.recv() => match line {
                            Some(line) => line,
                            None => {
                                writeln!(out)?;
                                return Ok(SessionEnd::EndOfInput);
                            }
                        },
                    }
                }
            };

            match parse_command(&line) {
                Command::Exit => {
                    info!("Session ended by user");
                    return Ok(SessionEnd::ExitCommand);
                }
                Command::Clear => {
                    crossterm::execute!(out, Clear(ClearType::All), MoveTo(0, 0))?;
                }
                Command::Blank => {}
                Command::Prompt(text) => {
                    if let Some(end) = self.exchange(text, lines, out).await? {
                        return Ok(end);
                    }
                }
            }
        }
    }

    /// Run one exchange while still watching the input channel.
    ///
    /// `/bye` cancels the exchange; any other line is queued for later.
    async fn exchange<W: Write>(
        &mut self,
        text: String,
        lines: &mut mpsc::Receiver<String>,
        out: &mut W,
    ) -> Result<Option<SessionEnd>> {
        let cancel = self.shutdown.child_token();
        let baseline = std::mem::take(&mut self.conversation);
        let mut exit_requested = false;

        let outcome = {
            let run = self.agent.run(baseline, text, &cancel);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    outcome = &mut run => break outcome,
                    line = lines.recv(), if !self.input_closed => match line {
                        Some(line) if parse_command(&line) == Command::Exit => {
                            info!("Exit requested during exchange");
                            exit_requested = true;
                            cancel.cancel();
                        }
                        Some(line) => self.queued.push_back(line),
                        None => self.input_closed = true,
                    },
                }
            }
        };

        self.conversation = outcome.conversation;

        match outcome.result {
            Ok(answer) => {
                let text = answer.text.trim();
                let text = if text.is_empty() { "(no response)" } else { text };
                writeln!(out, "ASSISTANT: {text}")?;
            }
            Err(Error::Cancelled) => writeln!(out, "Request cancelled.")?,
            Err(e) => writeln!(out, "Error: {e}")?,
        }

        if exit_requested {
            return Ok(Some(SessionEnd::ExitCommand));
        }
        if self.shutdown.is_cancelled() {
            return Ok(Some(SessionEnd::Interrupted));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use chat_agent_core::{
        LoopConfig, Message, Role, ToolCallRequest, ToolRegistry, ToolSchema,
    };
    use chat_agent_tools::ListFilesTool;

    use super::*;

    /// Model stub replaying a fixed script.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<Message, Error>>>,
        calls: Mutex<usize>,
        delay: Duration,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<Message, Error>>) -> Arc<Self> {
            Self::with_delay(replies, Duration::ZERO)
        }

        fn with_delay(replies: Vec<Result<Message, Error>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn generate(
            &self,
            _history: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<Message, Error> {
            *self.calls.lock().unwrap() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Message::assistant("(script exhausted)")))
        }
    }

    struct HangingModel;

    #[async_trait]
    impl ModelClient for HangingModel {
        async fn generate(
            &self,
            _history: &[Message],
            _tools: &[ToolSchema],
        ) -> Result<Message, Error> {
            std::future::pending().await
        }
    }

    fn session<C: ModelClient>(client: C, registry: ToolRegistry) -> Session<C> {
        let agent = AgentLoop::new(client, Arc::new(registry), LoopConfig::default());
        Session::new(agent, ConversationState::new(), CancellationToken::new())
    }

    /// Channel preloaded with `lines`, closed afterwards.
    fn input(lines: &[&str]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.try_send(line.to_string()).unwrap();
        }
        rx
    }

    fn output(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_invalid_utf8_line_does_not_end_input() {
        let (tx, mut rx) = mpsc::channel(8);
        let input = std::io::Cursor::new(b"caf\xe9\nhello\r\n/bye".to_vec());

        forward_lines(input, &tx).unwrap();
        drop(tx);

        assert_eq!(rx.try_recv().unwrap(), "caf\u{FFFD}");
        assert_eq!(rx.try_recv().unwrap(), "hello");
        assert_eq!(rx.try_recv().unwrap(), "/bye");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/bye"), Command::Exit);
        assert_eq!(parse_command("  /bye \n"), Command::Exit);
        assert_eq!(parse_command("/clear"), Command::Clear);
        assert_eq!(parse_command("   "), Command::Blank);
        assert_eq!(
            parse_command(" hello "),
            Command::Prompt("hello".to_string())
        );
        assert_eq!(
            parse_command("/bye now"),
            Command::Prompt("/bye now".to_string())
        );
    }

    #[tokio::test]
    async fn test_bye_exits_without_model_call() {
        let model = ScriptedModel::new(vec![]);
        let mut session = session(model.clone(), ToolRegistry::new());
        let mut out = Vec::new();

        let end = session.run(&mut input(&["/bye"]), &mut out).await.unwrap();

        assert_eq!(end, SessionEnd::ExitCommand);
        assert_eq!(model.calls(), 0);
        assert!(session.conversation().is_empty());
        assert!(output(out).starts_with(WELCOME));
    }

    #[tokio::test]
    async fn test_tool_exchange() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(ListFilesTool::new(dir.path())).unwrap();

        let model = ScriptedModel::new(vec![
            Ok(Message::assistant_with_tool_calls(
                "",
                vec![ToolCallRequest::new("call_1", "list_files", json!({}))],
            )),
            Ok(Message::assistant("Here are your files: a.txt")),
        ]);
        let mut session = session(model.clone(), registry);
        let mut out = Vec::new();

        let end = session
            .run(&mut input(&["list files here"]), &mut out)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::EndOfInput);
        assert_eq!(model.calls(), 2);
        assert!(output(out).contains("ASSISTANT: Here are your files: a.txt"));

        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::Tool);
        assert!(messages[2].content.contains("file: a.txt"));
    }

    #[tokio::test]
    async fn test_error_then_success() {
        let model = ScriptedModel::new(vec![
            Err(Error::Backend("503 - unavailable".into())),
            Ok(Message::assistant("hi there")),
        ]);
        let mut session = session(model.clone(), ToolRegistry::new());
        let mut out = Vec::new();

        let end = session
            .run(&mut input(&["first", "second"]), &mut out)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::EndOfInput);
        let out = output(out);
        assert!(out.contains("Error: Model backend error: 503 - unavailable"));
        assert!(out.contains("ASSISTANT: hi there"));

        let messages = session.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "second");
    }

    #[tokio::test]
    async fn test_clear_and_blank_lines() {
        let model = ScriptedModel::new(vec![]);
        let mut session = session(model.clone(), ToolRegistry::new());
        let mut out = Vec::new();

        let end = session
            .run(&mut input(&["", "/clear", "   "]), &mut out)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::EndOfInput);
        assert_eq!(model.calls(), 0);
        assert!(output(out).contains("\x1b[2J"));
    }

    #[tokio::test]
    async fn test_bye_cancels_running_exchange() {
        let mut session = session(HangingModel, ToolRegistry::new());
        let mut out = Vec::new();

        let end = session
            .run(&mut input(&["hello", "/bye"]), &mut out)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::ExitCommand);
        assert!(output(out).contains("Request cancelled."));
        assert!(session.conversation().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_typed_during_exchange_are_queued() {
        let model = ScriptedModel::with_delay(
            vec![Ok(Message::assistant("one")), Ok(Message::assistant("two"))],
            Duration::from_secs(1),
        );
        let mut session = session(model.clone(), ToolRegistry::new());
        let mut out = Vec::new();

        let end = session
            .run(&mut input(&["a", "b"]), &mut out)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::EndOfInput);
        assert_eq!(model.calls(), 2);
        let out = output(out);
        assert!(out.contains("USER: b\nASSISTANT: two"));
        assert_eq!(session.conversation().exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_prompt() {
        let shutdown = CancellationToken::new();
        let agent = AgentLoop::new(
            ScriptedModel::new(vec![]),
            Arc::new(ToolRegistry::new()),
            LoopConfig::default(),
        );
        let mut session = Session::new(agent, ConversationState::new(), shutdown.clone());
        let (_tx, mut rx) = mpsc::channel::<String>(1);
        shutdown.cancel();

        let mut out = Vec::new();
        let end = session.run(&mut rx, &mut out).await.unwrap();
        assert_eq!(end, SessionEnd::Interrupted);
    }
}
