//! Line-oriented interactive console for a [`PeerAgent`].
//!
//! Each command may carry its arguments on the same line (`search alice a.txt`)
//! or prompt for whatever is missing. A single-argument command takes the rest
//! of the line verbatim, so filenames may contain spaces. End of input behaves
//! like `exit`.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::agent::PeerAgent;
use crate::errors::AgentError;

pub const COMMAND_PROMPT: &str =
    "Enter a command (register, download, search, list, deregister, exit): ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Register,
    Download,
    Search,
    List,
    Deregister,
    Exit,
    Help,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Register,
        Command::Download,
        Command::Search,
        Command::List,
        Command::Deregister,
        Command::Exit,
        Command::Help,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Register => "register",
            Command::Download => "download",
            Command::Search => "search",
            Command::List => "list",
            Command::Deregister => "deregister",
            Command::Exit => "exit",
            Command::Help => "help",
        }
    }

    fn usage(&self) -> &'static str {
        match self {
            Command::Register => "register [FILENAME]      serve a file from the shared directory",
            Command::Download => "download [PEER] [FILE]   fetch a file from a peer and serve it",
            Command::Search => "search [PEER] [FILE]     show where a peer serves a file",
            Command::List => "list                     show one provider per registered file",
            Command::Deregister => "deregister [FILENAME]    stop serving a file",
            Command::Exit => "exit                     deregister everything and quit",
            Command::Help => "help                     show this help",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Command::ALL
            .into_iter()
            .find(|command| command.as_str() == lowered)
            .ok_or_else(|| s.trim().to_string())
    }
}

pub struct Console<R, W> {
    lines: Lines<R>,
    output: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            lines: input.lines(),
            output,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Print `prompt` and read one trimmed line; `None` at end of input.
    pub async fn prompt(&mut self, prompt: &str) -> std::io::Result<Option<String>> {
        self.output.write_all(prompt.as_bytes()).await?;
        self.output.flush().await?;
        Ok(self
            .lines
            .next_line()
            .await?
            .map(|line| line.trim().to_string()))
    }

    async fn say(&mut self, text: impl AsRef<str>) -> std::io::Result<()> {
        self.output.write_all(text.as_ref().as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await
    }

    /// Use the inline argument or prompt for it.
    async fn argument(
        &mut self,
        inline: Option<&str>,
        prompt: &str,
    ) -> std::io::Result<Option<String>> {
        match inline {
            Some(value) => Ok(Some(value.to_string())),
            None => self.prompt(prompt).await,
        }
    }

    /// Run commands against `agent` until `exit` or end of input, then
    /// deregister everything the agent serves.
    pub async fn run(&mut self, agent: &PeerAgent) -> std::io::Result<()> {
        loop {
            let Some(line) = self.prompt(COMMAND_PROMPT).await? else {
                self.say("").await?;
                break;
            };
            if line.is_empty() {
                continue;
            }
            let (verb, rest) = match line.split_once(char::is_whitespace) {
                Some((verb, rest)) => (verb, rest.trim()),
                None => (line.as_str(), ""),
            };
            let whole = Some(rest).filter(|rest| !rest.is_empty());
            let words: Vec<&str> = rest.split_whitespace().collect();

            let command = match verb.parse::<Command>() {
                Ok(command) => command,
                Err(unknown) => {
                    self.say(format!(
                        "Unknown command '{}'. Valid commands: register, download, search, list, deregister, exit, help",
                        unknown
                    ))
                    .await?;
                    continue;
                }
            };

            match command {
                Command::Exit => break,
                Command::Help => {
                    let help: Vec<&str> = Command::ALL.iter().map(Command::usage).collect();
                    self.say(help.join("\n")).await?;
                }
                Command::Download | Command::Search if words.len() > 2 => {
                    self.say(format!("Usage: {}", command.usage())).await?;
                }
                Command::List => self.list(agent).await?,
                Command::Register => {
                    let Some(filename) = self
                        .argument(whole, "Enter filename to register: ")
                        .await?
                    else {
                        break;
                    };
                    match agent.register(&filename).await {
                        Ok(port) => {
                            self.say(format!("Registered '{}', serving on port {}", filename, port))
                                .await?
                        }
                        Err(e) => self.say(format!("Registration failed: {}", e)).await?,
                    }
                }
                Command::Download => {
                    let Some(peer) = self
                        .argument(words.first().copied(), "Enter peer name: ")
                        .await?
                    else {
                        break;
                    };
                    let Some(filename) = self
                        .argument(words.get(1).copied(), "Enter filename to download: ")
                        .await?
                    else {
                        break;
                    };
                    match agent.download(&peer, &filename).await {
                        Ok(report) => {
                            self.say(format!(
                                "Downloaded '{}' ({} bytes) from {}, now serving on port {}",
                                filename, report.bytes, report.source, report.port
                            ))
                            .await?
                        }
                        Err(e @ AgentError::Reregistration { .. }) => {
                            self.say(format!("Download kept on disk but not served: {}", e))
                                .await?
                        }
                        Err(e) => self.say(format!("Download failed: {}", e)).await?,
                    }
                }
                Command::Search => {
                    let Some(peer) = self
                        .argument(words.first().copied(), "Enter peer name: ")
                        .await?
                    else {
                        break;
                    };
                    let Some(filename) = self
                        .argument(words.get(1).copied(), "Enter filename to search: ")
                        .await?
                    else {
                        break;
                    };
                    match agent.search(&peer, &filename).await {
                        Ok(address) => {
                            self.say(format!("'{}' from {} is at {}", filename, peer, address))
                                .await?
                        }
                        Err(e) => self.say(format!("Search failed: {}", e)).await?,
                    }
                }
                Command::Deregister => {
                    let Some(filename) = self
                        .argument(whole, "Enter filename to deregister: ")
                        .await?
                    else {
                        break;
                    };
                    match agent.deregister(&filename).await {
                        Ok(()) => self.say(format!("Deregistered '{}'", filename)).await?,
                        Err(e) => self.say(format!("Deregistration failed: {}", e)).await?,
                    }
                }
            }
        }

        self.say("Deregistering served files and exiting...").await?;
        for (filename, e) in agent.shutdown().await {
            self.say(format!("Could not deregister '{}': {}", filename, e))
                .await?;
        }
        Ok(())
    }

    async fn list(&mut self, agent: &PeerAgent) -> std::io::Result<()> {
        match agent.list().await {
            Ok(replicas) => {
                self.say("Available files:").await?;
                for replica in replicas {
                    self.say(format!("  {}", replica)).await?;
                }
                Ok(())
            }
            Err(e) => self.say(format!("List failed: {}", e)).await,
        }
    }
}
