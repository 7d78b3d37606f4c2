// Simulated Bridge Link
// Scripted in-memory stand-in for the serial bridge, used to exercise the protocol stack

use crate::cancel::CancelToken;
use crate::link::{Link, LinkError, LinkState, LinkStats};
use std::collections::VecDeque;
use std::time::Duration;

/// How the simulated bridge answers commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Responder {
    /// Echo parameters verbatim and answer every command with ACK
    #[default]
    Ack,
    /// Answer every command with NAK
    Nak,
    /// Never answer
    Silent,
}

/// In-memory link driven by a script of inbound lines
#[derive(Debug, Default)]
pub struct SimLink {
    inbound: VecDeque<Option<String>>,
    overrides: VecDeque<Vec<String>>,
    time_replies: VecDeque<String>,
    fallback_counter: Option<u32>,
    writes: Vec<String>,
    responder: Responder,
    state: LinkState,
    stats: LinkStats,
    disconnected: bool,
    reopen_fails: bool,
    drained: Option<CancelToken>,
    flushes: u32,
}

impl SimLink {
    /// Create an open link that ACKs every command
    pub fn new() -> Self {
        Self {
            state: LinkState::Open,
            ..Self::default()
        }
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = responder;
        self
    }

    /// Queue counter values returned to successive time queries
    pub fn with_time_replies<I: IntoIterator<Item = u32>>(mut self, counters: I) -> Self {
        self.time_replies
            .extend(counters.into_iter().map(|c| c.to_string()));
        self
    }

    /// Answer time queries with `counter` once the scripted replies run out
    pub fn with_fallback_counter(mut self, counter: u32) -> Self {
        self.fallback_counter = Some(counter);
        self
    }

    pub fn set_responder(&mut self, responder: Responder) {
        self.responder = responder;
    }

    /// Queue a line that will be delivered by a later read
    pub fn push_line(&mut self, line: &str) {
        self.inbound.push_back(Some(line.to_string()));
    }

    /// Queue several lines
    pub fn push_lines(&mut self, lines: &[&str]) {
        for line in lines {
            self.push_line(line);
        }
    }

    /// Queue a read that times out
    pub fn push_timeout(&mut self) {
        self.inbound.push_back(None);
    }

    /// Queue a time-query reply (raw text, so non-numeric replies can be scripted)
    pub fn push_time_reply(&mut self, text: &str) {
        self.time_replies.push_back(text.to_string());
    }

    /// Replace the normal reply to the next command with `lines`
    pub fn reply_once_with(&mut self, lines: &[&str]) {
        self.overrides
            .push_back(lines.iter().map(|l| l.to_string()).collect());
    }

    /// Make every subsequent read fail as if the device was unplugged
    pub fn set_disconnected(&mut self, disconnected: bool) {
        self.disconnected = disconnected;
        if disconnected {
            self.state = LinkState::Disconnected;
        }
    }

    /// Raise `token` the first time a read finds the script exhausted
    pub fn cancel_when_drained(&mut self, token: CancelToken) {
        self.drained = Some(token);
    }

    /// Make reopen attempts fail
    pub fn set_reopen_fails(&mut self, fails: bool) {
        self.reopen_fails = fails;
    }

    /// Everything written so far, one entry per write call
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// Single-character commands written so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.writes
            .iter()
            .filter(|w| !w.ends_with('\r'))
            .cloned()
            .collect()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Lines still waiting to be read
    pub fn pending_lines(&self) -> usize {
        self.inbound.len()
    }

    pub fn flush_count(&self) -> u32 {
        self.flushes
    }

    fn reply_front(&mut self, lines: Vec<String>) {
        for line in lines.into_iter().rev() {
            self.inbound.push_front(Some(line));
        }
    }

    fn respond_to(&mut self, written: &str) {
        if written == "\r" || self.responder == Responder::Silent {
            return;
        }
        if let Some(lines) = self.overrides.pop_front() {
            self.reply_front(lines);
            return;
        }

        if let Some(param) = written.strip_suffix('\r') {
            let reply = match self.responder {
                Responder::Nak => vec!["NAK".to_string()],
                _ => vec![param.to_string(), "ACK".to_string()],
            };
            self.reply_front(reply);
        } else if written == "t" {
            let reply = self
                .time_replies
                .pop_front()
                .or_else(|| self.fallback_counter.map(|c| c.to_string()));
            if let Some(reply) = reply {
                self.reply_front(vec![reply]);
            }
        } else {
            let reply = match self.responder {
                Responder::Nak => "NAK",
                _ => "ACK",
            };
            self.reply_front(vec![reply.to_string()]);
        }
    }
}

impl Link for SimLink {
    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, LinkError> {
        if self.disconnected {
            return Err(LinkError::Disconnected("simulated unplug".to_string()));
        }
        if !self.state.is_open() {
            return Err(LinkError::NotOpen);
        }
        match self.inbound.pop_front() {
            Some(Some(line)) => {
                self.stats.lines_received += 1;
                Ok(Some(line.trim().to_string()))
            }
            Some(None) => {
                self.stats.read_timeouts += 1;
                Ok(None)
            }
            None => {
                if let Some(token) = &self.drained {
                    token.cancel();
                }
                self.stats.read_timeouts += 1;
                Ok(None)
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.state.is_open() {
            return Err(LinkError::NotOpen);
        }
        let written = String::from_utf8_lossy(bytes).to_string();
        self.stats.bytes_sent += bytes.len() as u64;
        self.writes.push(written.clone());
        self.respond_to(&written);
        Ok(())
    }

    fn flush_input(&mut self) -> Result<(), LinkError> {
        self.flushes += 1;
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), LinkError> {
        self.stats.reopens += 1;
        if self.reopen_fails {
            self.state = LinkState::Closed;
            return Err(LinkError::OpenFailed {
                port: "sim".to_string(),
                reason: "simulated open failure".to_string(),
            });
        }
        self.disconnected = false;
        self.state = LinkState::Open;
        Ok(())
    }

    fn close(&mut self) {
        self.state = LinkState::Closed;
    }

    fn state(&self) -> LinkState {
        self.state
    }

    fn stats(&self) -> LinkStats {
        self.stats.clone()
    }
}
