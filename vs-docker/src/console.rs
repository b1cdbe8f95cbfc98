use crossterm::{
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use std::{
    collections::BTreeSet as Set,
    fmt,
    io::{self, Write},
};

use crate::errors::Result;

/// Named append-only output channels.
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq)]
pub enum Channel {
    Build,
    Logs,
    Push,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Build => "Container Build",
            Channel::Logs => "Container Logs",
            Channel::Push => "Container Push",
        };
        f.write_str(name)
    }
}

/// User facing output: notifications plus the named channels, each opened
/// the first time something is written to it.
pub struct Console {
    out: Box<dyn Write>,
    opened: Set<Channel>,
}

impl Console {
    pub fn new(out: Box<dyn Write>) -> Console {
        Console {
            out,
            opened: Set::new(),
        }
    }

    pub fn stdout() -> Console {
        Console::new(Box::new(io::stdout()))
    }

    pub fn info(&mut self, message: &str) -> Result<()> {
        self.out
            .queue(style::PrintStyledContent("INFO: ".cyan().bold()))?
            .queue(style::Print(format!("{}\n", message)))?
            .flush()?;
        Ok(())
    }

    pub fn error(&mut self, message: &str) -> Result<()> {
        self.out
            .queue(style::PrintStyledContent("ERROR: ".red().bold()))?
            .queue(style::Print(format!("{}\n", message)))?
            .flush()?;
        Ok(())
    }

    fn open(&mut self, channel: Channel) -> Result<()> {
        if self.opened.insert(channel) {
            self.out
                .queue(style::PrintStyledContent(
                    style::style(format!("==> {}\n", channel)).green().bold(),
                ))?
                .flush()?;
        }
        Ok(())
    }

    pub fn line(&mut self, channel: Channel, line: &str) -> Result<()> {
        self.open(channel)?;
        self.out.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn bytes(&mut self, channel: Channel, bytes: &[u8]) -> Result<()> {
        self.open(channel)?;
        self.out.write_all(bytes)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
