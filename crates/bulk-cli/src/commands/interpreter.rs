//! Line-oriented session directives.
//!
//! One directive per line: `connect <BS>`, `receive <ID> <DATA>`,
//! `disconnect <ID>`, `list`, `help`, `exit`. Blank lines and lines
//! starting with `#` are skipped. In non-interactive mode errors and
//! `list`/`help` output are suppressed.

use anyhow::{anyhow, bail, Result};
use bulk_core::{BulkContext, SessionRegistry};
use std::io::{self, Write};
use tracing::{debug, info};

const HELP: &str = "\
Available commands:
  connect <BS>          - Open a new session with bulk size BS
  receive <ID> <DATA>   - Send DATA to session ID (use \\n between commands)
  disconnect <ID>       - Close session ID
  list                  - List active sessions
  help                  - Show this help
  exit                  - Exit program
";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Connect(usize),
    Receive { id: u64, data: String },
    Disconnect(u64),
    List,
    Help,
    Exit,
}

impl Directive {
    /// Parse one line. `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim_start();
        let (cmd, rest) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));
        let cmd = cmd.trim_end();
        if cmd.is_empty() || cmd.starts_with('#') {
            return Ok(None);
        }

        let directive = match cmd {
            "connect" => {
                let size = first_token(rest)
                    .and_then(|t| t.parse::<usize>().ok())
                    .ok_or_else(|| anyhow!("missing or invalid bulk size"))?;
                Self::Connect(size)
            }
            "receive" => {
                let rest = rest.trim_start();
                let (id, data) = rest
                    .split_once(char::is_whitespace)
                    .unwrap_or((rest, ""));
                let id = id
                    .trim_end()
                    .parse::<u64>()
                    .map_err(|_| anyhow!("invalid arguments"))?;
                if data.is_empty() {
                    bail!("invalid arguments");
                }
                Self::Receive {
                    id,
                    data: unescape(data),
                }
            }
            "disconnect" => {
                let id = first_token(rest)
                    .and_then(|t| t.parse::<u64>().ok())
                    .ok_or_else(|| anyhow!("missing session ID"))?;
                Self::Disconnect(id)
            }
            "list" => Self::List,
            "help" => Self::Help,
            "exit" => Self::Exit,
            _ => bail!("unknown command. Type 'help' for available commands."),
        };
        Ok(Some(directive))
    }
}

fn first_token(s: &str) -> Option<&str> {
    s.split_whitespace().next()
}

/// Turn literal `\n` sequences into newlines and drop leading blanks.
fn unescape(data: &str) -> String {
    data.replace("\\n", "\n")
        .trim_start_matches([' ', '\t'])
        .to_string()
}

/// Executes directives against a [`BulkContext`], tracking user-facing IDs.
pub struct Interpreter<'a> {
    ctx: &'a BulkContext,
    registry: SessionRegistry,
    interactive: bool,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a BulkContext, interactive: bool) -> Self {
        Self {
            ctx,
            registry: SessionRegistry::new(),
            interactive,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Greeting and command summary shown when an interactive driver starts.
    pub fn banner(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Interactive bulk command processor")?;
        write!(out, "{HELP}")?;
        out.flush()
    }

    /// Parse and run one line. Only I/O failures on `out`/`err` are
    /// returned; directive errors are reported on `err` when interactive.
    pub fn execute_line(&self, line: &str, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()> {
        let result = Directive::parse(line).and_then(|directive| match directive {
            Some(d) => self.execute(d, out),
            None => Ok(()),
        });
        if let Err(e) = result {
            debug!(line, error = %e, "directive failed");
            if self.interactive {
                writeln!(err, "Error: {e}")?;
                err.flush()?;
            }
        }
        Ok(())
    }

    fn execute(&self, directive: Directive, out: &mut dyn Write) -> Result<()> {
        match directive {
            Directive::Connect(size) => {
                let handle = self.ctx.open(size)?;
                let id = self.registry.open(handle);
                if self.interactive {
                    writeln!(out, "Connected #{id}")?;
                    out.flush()?;
                }
            }
            Directive::Receive { id, data } => {
                let handle = self
                    .registry
                    .lookup(id)
                    .filter(|_| !data.is_empty())
                    .ok_or_else(|| anyhow!("invalid session ID or empty data"))?;
                self.ctx.feed(handle, data.as_bytes())?;
            }
            Directive::Disconnect(id) => {
                let handle = self
                    .registry
                    .lookup(id)
                    .ok_or_else(|| anyhow!("session not found"))?;
                self.ctx.close(handle);
                self.registry.close(id);
            }
            Directive::List => {
                if self.interactive {
                    self.write_list(out)?;
                }
            }
            Directive::Help => {
                if self.interactive {
                    write!(out, "{HELP}")?;
                    out.flush()?;
                }
            }
            Directive::Exit => self.registry.request_close(),
        }
        Ok(())
    }

    fn write_list(&self, out: &mut dyn Write) -> io::Result<()> {
        let sessions = self.registry.list_all();
        if sessions.is_empty() {
            writeln!(out, "No active sessions")?;
        } else {
            writeln!(out, "Active sessions:")?;
            for (handle, id) in sessions {
                writeln!(out, "  #{id} (handle: {handle})")?;
            }
        }
        out.flush()
    }

    /// True once `exit` has been executed.
    pub fn should_stop(&self) -> bool {
        self.registry.is_close_requested()
    }

    /// Close every registered session in ID order. Returns how many.
    pub fn disconnect_all(&self) -> usize {
        let sessions = self.registry.list_all();
        for (handle, id) in &sessions {
            self.ctx.close(*handle);
            self.registry.close(*id);
        }
        if !sessions.is_empty() {
            info!(count = sessions.len(), "disconnected remaining sessions");
        }
        sessions.len()
    }
}
