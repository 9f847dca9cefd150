use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::platform::{GenericMessage, User};

const NO_MATCH_HEADER: &str =
    "Your message did not match any command.\nPossible case-sensitive commands are:\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no capture named {0:?}")]
    Missing(String),

    #[error("no capture at position {0}")]
    MissingPosition(usize),

    #[allow(dead_code)]
    #[error("capture {name:?} is not an integer: {value:?}")]
    NotAnInteger { name: String, value: String },
}

/// A handler failed. `reply` is still worth sending back to the user.
#[derive(Debug, Error)]
#[error("{cause:#}")]
pub struct CommandError {
    pub reply: GenericMessage,
    pub cause: anyhow::Error,
}

impl CommandError {
    pub fn new(reply: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            reply: GenericMessage::text(reply),
            cause: cause.into(),
        }
    }
}

/// Values captured by a matched command pattern.
#[derive(Debug, Clone, Default)]
pub struct Captures {
    positional: Vec<String>,
    named: HashMap<String, String>,
}

impl Captures {
    /// The `index`-th capture group, counting from zero.
    pub fn positional(&self, index: usize) -> Result<&str, CaptureError> {
        self.positional
            .get(index)
            .map(String::as_str)
            .ok_or(CaptureError::MissingPosition(index))
    }

    pub fn string(&self, name: &str) -> Result<&str, CaptureError> {
        self.named
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| CaptureError::Missing(name.to_string()))
    }

    #[allow(dead_code)]
    pub fn integer(&self, name: &str) -> Result<i64, CaptureError> {
        let value = self.string(name)?;
        value.parse().map_err(|_| CaptureError::NotAnInteger {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<GenericMessage, CommandError>>;
pub type Handler = Arc<dyn Fn(Captures, Arc<dyn User>) -> HandlerFuture + Send + Sync>;

/// Wrap an async fn as a command handler.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Captures, Arc<dyn User>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GenericMessage, CommandError>> + Send + 'static,
{
    Arc::new(move |captures, sender| Box::pin(f(captures, sender)))
}

/// Compile a command template into an anchored regex.
///
/// `<name:string>` matches one word, `<name:integer>` one number. Everything
/// else is taken as regex, so `(.*)` is a positional capture.
fn compile_pattern(pattern: &str) -> Result<Regex> {
    let placeholder = Regex::new(r"<(\w+):(\w+)>").context("Invalid placeholder regex")?;

    let mut expr = String::from("^");
    let mut last = 0;
    for caps in placeholder.captures_iter(pattern) {
        let (Some(whole), Some(name), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        expr.push_str(&pattern[last..whole.start()]);
        let class = match kind.as_str() {
            "string" => r"[^\s]+",
            "integer" => r"[0-9]+",
            other => anyhow::bail!("Unknown placeholder type {:?} in {:?}", other, pattern),
        };
        expr.push_str(&format!("(?P<{}>{})", name.as_str(), class));
        last = whole.end();
    }
    expr.push_str(&pattern[last..]);
    expr.push('$');

    Regex::new(&expr).with_context(|| format!("Invalid command pattern: {}", pattern))
}

struct Command {
    pattern: String,
    matcher: Regex,
    handler: Handler,
}

impl Command {
    fn matches(&self, request: &str) -> Option<Captures> {
        let caps = self.matcher.captures(request)?;
        let positional = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();
        let named = self
            .matcher
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        Some(Captures { positional, named })
    }
}

/// Routes chat text to the first registered command whose pattern matches.
#[derive(Default)]
pub struct CommandRouter {
    commands: Vec<Command>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the built-in commands, in dispatch order.
    pub fn with_default_commands() -> Result<Self> {
        let mut router = Self::new();
        router.register("echo (.*)", handler(handle_echo))?;
        router.register("welcome <user:string>", handler(handle_welcome))?;
        router.register(
            "annoy me about <alertgroup:string> alerts",
            handler(handle_add_to_alert_group),
        )?;
        router.register(
            "don't bug me about <alertgroup:string> alerts",
            handler(handle_del_from_alert_group),
        )?;
        Ok(router)
    }

    pub fn register(&mut self, pattern: &str, handler: Handler) -> Result<()> {
        let matcher = compile_pattern(pattern)?;
        self.commands.push(Command {
            pattern: pattern.to_string(),
            matcher,
            handler,
        });
        Ok(())
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|c| c.pattern.as_str())
    }

    /// Run the command matching `incoming.content_text`.
    ///
    /// The reply, successful or not, is addressed to the thread and space of
    /// the incoming message. Text matching no command gets the command list.
    pub async fn handle(&self, incoming: &GenericMessage) -> Result<GenericMessage, CommandError> {
        debug!("Incoming message: {:?}", incoming.content_text);
        let request = incoming.content_text.trim();

        let routed = self
            .commands
            .iter()
            .find_map(|cmd| cmd.matches(request).map(|caps| (cmd, caps)));

        let result = match routed {
            Some((cmd, captures)) => match incoming.sender.clone() {
                Some(sender) => {
                    debug!("Dispatching to {:?}", cmd.pattern);
                    (cmd.handler)(captures, sender).await
                }
                None => Err(CommandError::new(
                    "I could not tell who sent this message",
                    anyhow::anyhow!("message without sender matched {:?}", cmd.pattern),
                )),
            },
            None => Ok(GenericMessage::text(self.help_text())),
        };

        match result {
            Ok(reply) => Ok(addressed_like(reply, incoming)),
            Err(mut err) => {
                err.reply = addressed_like(err.reply, incoming);
                Err(err)
            }
        }
    }

    fn help_text(&self) -> String {
        let mut text = String::from(NO_MATCH_HEADER);
        for pattern in self.patterns() {
            text.push_str(&format!(" {}\n", pattern));
        }
        text
    }
}

fn addressed_like(mut reply: GenericMessage, incoming: &GenericMessage) -> GenericMessage {
    reply.thread = incoming.thread.clone();
    reply.message_path = incoming.message_path.clone();
    reply
}

async fn handle_echo(
    captures: Captures,
    _sender: Arc<dyn User>,
) -> Result<GenericMessage, CommandError> {
    let echo = captures
        .positional(0)
        .map_err(|e| CommandError::new("I had issues when parsing your words", e))?;
    Ok(GenericMessage::text(format!("What you said: \"{}\"", echo)))
}

async fn handle_welcome(
    captures: Captures,
    _sender: Arc<dyn User>,
) -> Result<GenericMessage, CommandError> {
    let user = captures
        .string("user")
        .map_err(|e| CommandError::new("I had issues identifying who to welcome", e))?;
    Ok(GenericMessage::text(format!(
        "Welcome {} - nice to meet you here :)",
        user
    )))
}

async fn handle_add_to_alert_group(
    captures: Captures,
    sender: Arc<dyn User>,
) -> Result<GenericMessage, CommandError> {
    let group = captures
        .string("alertgroup")
        .map_err(|e| CommandError::new("I had issues identifying the alert group", e))?;
    let text = format!(
        "User {} added to alert group {}",
        sender.user_info().friendly_name,
        group
    );
    match sender.add_to_alert_group(group).await {
        Ok(()) => Ok(GenericMessage::text(text)),
        Err(e) => Err(CommandError::new(text, e)),
    }
}

async fn handle_del_from_alert_group(
    captures: Captures,
    sender: Arc<dyn User>,
) -> Result<GenericMessage, CommandError> {
    let group = captures
        .string("alertgroup")
        .map_err(|e| CommandError::new("I had issues identifying the alert group", e))?;
    let text = format!(
        "User {} removed from alert group {}",
        sender.user_info().friendly_name,
        group
    );
    match sender.del_from_alert_group(group).await {
        Ok(()) => Ok(GenericMessage::text(text)),
        Err(e) => Err(CommandError::new(text, e)),
    }
}
