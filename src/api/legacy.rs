//! The line-oriented operator command protocol
//!
//! A vaguely SMTP-esque text protocol: three-digit response codes, a
//! challenge-response USER command, a command table with per-command
//! parameter lists, and a multi-line input mode terminated by a lone dot.
//! Sub-commands (the PM family) are dispatched on the longest matching
//! responder name.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tracing::{debug, info};

use crate::api::auth;
use crate::api::notify::NotificationRegistry;
use crate::models::events::{EventState, SubIndex};
use crate::models::pm::{MatchType, PmKind};
use crate::runtime::Runtime;

/// Every command the server answers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    User,
    Quit,
    Help,
    Version,
    Authtest,
    Caseids,
    Getattrs,
    Gethist,
    Getlog,
    Addhist,
    Setstate,
    Community,
    Ntie,
    Pollrtr,
    Pollintf,
    Clearflap,
    PmHelp,
    PmList,
    PmAdd,
    PmCancel,
    PmDetails,
    PmMatching,
    PmAddlog,
    PmLog,
}

/// One row of the command table
struct CommandSpec {
    name: &'static str,
    command: Command,
    requires_auth: bool,
    args: &'static [&'static str],
    /// Whether the first argument is a case id that must resolve
    translates_id: bool,
}

#[rustfmt::skip]
static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "USER",        command: Command::User,       requires_auth: false, args: &["user", "response"], translates_id: false },
    CommandSpec { name: "QUIT",        command: Command::Quit,       requires_auth: false, args: &[], translates_id: false },
    CommandSpec { name: "HELP",        command: Command::Help,       requires_auth: false, args: &[], translates_id: false },
    CommandSpec { name: "VERSION",     command: Command::Version,    requires_auth: true,  args: &[], translates_id: false },
    CommandSpec { name: "AUTHTEST",    command: Command::Authtest,   requires_auth: true,  args: &[], translates_id: false },
    CommandSpec { name: "CASEIDS",     command: Command::Caseids,    requires_auth: true,  args: &[], translates_id: false },
    CommandSpec { name: "GETATTRS",    command: Command::Getattrs,   requires_auth: true,  args: &["caseid"], translates_id: true },
    CommandSpec { name: "GETHIST",     command: Command::Gethist,    requires_auth: true,  args: &["caseid"], translates_id: true },
    CommandSpec { name: "GETLOG",      command: Command::Getlog,     requires_auth: true,  args: &["caseid"], translates_id: true },
    CommandSpec { name: "ADDHIST",     command: Command::Addhist,    requires_auth: true,  args: &["caseid"], translates_id: true },
    CommandSpec { name: "SETSTATE",    command: Command::Setstate,   requires_auth: true,  args: &["caseid", "state"], translates_id: true },
    CommandSpec { name: "COMMUNITY",   command: Command::Community,  requires_auth: true,  args: &["router"], translates_id: false },
    CommandSpec { name: "NTIE",        command: Command::Ntie,       requires_auth: true,  args: &["nonce"], translates_id: false },
    CommandSpec { name: "POLLRTR",     command: Command::Pollrtr,    requires_auth: true,  args: &["router"], translates_id: false },
    CommandSpec { name: "POLLINTF",    command: Command::Pollintf,   requires_auth: true,  args: &["router", "ifindex"], translates_id: false },
    CommandSpec { name: "CLEARFLAP",   command: Command::Clearflap,  requires_auth: true,  args: &["router", "ifindex"], translates_id: false },
    CommandSpec { name: "PM HELP",     command: Command::PmHelp,     requires_auth: true,  args: &[], translates_id: false },
    CommandSpec { name: "PM LIST",     command: Command::PmList,     requires_auth: true,  args: &[], translates_id: false },
    CommandSpec { name: "PM ADD",      command: Command::PmAdd,      requires_auth: true,  args: &["from_t", "to_t", "type", "m_type", "m_expr"], translates_id: false },
    CommandSpec { name: "PM CANCEL",   command: Command::PmCancel,   requires_auth: true,  args: &["pm_id"], translates_id: false },
    CommandSpec { name: "PM DETAILS",  command: Command::PmDetails,  requires_auth: true,  args: &["pm_id"], translates_id: false },
    CommandSpec { name: "PM MATCHING", command: Command::PmMatching, requires_auth: true,  args: &["pm_id"], translates_id: false },
    CommandSpec { name: "PM ADDLOG",   command: Command::PmAddlog,   requires_auth: true,  args: &["pm_id"], translates_id: false },
    CommandSpec { name: "PM LOG",      command: Command::PmLog,      requires_auth: true,  args: &["pm_id"], translates_id: false },
];

/// Finds the longest responder name matching the start of the tokenized
/// input, and returns it with the remaining tokens as arguments
fn lookup_command<'a>(tokens: &'a [&'a str]) -> Option<(&'static CommandSpec, &'a [&'a str])> {
    for take in (1..=tokens.len().min(2)).rev() {
        let name = tokens[..take].join(" ").to_uppercase();
        if let Some(spec) = COMMANDS.iter().find(|spec| spec.name == name) {
            return Some((spec, &tokens[take..]));
        }
    }
    None
}

/// One connected command-channel session
pub struct Session<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    runtime: Arc<Runtime>,
    notifications: Arc<NotificationRegistry>,
    challenge: String,
    authenticated: bool,
    user: String,
}

impl<S: AsyncRead + AsyncWrite> Session<S> {
    pub fn new(
        stream: S,
        runtime: Arc<Runtime>,
        notifications: Arc<NotificationRegistry>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            runtime,
            notifications,
            challenge: auth::get_challenge(),
            authenticated: false,
            user: String::new(),
        }
    }

    /// Serves the session until QUIT or disconnect
    pub async fn run(mut self) -> std::io::Result<()> {
        let greeting = format!("{} Hello, there", self.challenge);
        self.respond(200, &greeting).await?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let message = line.trim_end_matches(['\r', '\n']).to_string();
            if message.is_empty() {
                continue;
            }
            debug!("api input: {:?}", message);
            if !self.dispatch(&message).await? {
                return Ok(());
            }
        }
    }

    /// Reads multi-line input, terminated by a line containing only `.`.
    /// Both CR-LF and bare LF line endings are accepted; bare CR is not.
    async fn read_multiline(&mut self) -> std::io::Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(lines);
            }
            let message = line.trim_end_matches(['\r', '\n']);
            if message == "." {
                return Ok(lines);
            }
            lines.push(message.to_string());
        }
    }

    async fn respond(&mut self, code: u16, message: &str) -> std::io::Result<()> {
        self.raw_line(&format!("{} {}", code, message)).await
    }

    async fn respond_ok(&mut self, message: &str) -> std::io::Result<()> {
        self.respond(200, message).await
    }

    async fn respond_error(&mut self, message: &str) -> std::io::Result<()> {
        self.respond(500, message).await
    }

    /// Multi-line responses repeat the code with a dash on every line except
    /// the last
    async fn respond_multiline(&mut self, code: u16, lines: &[String]) -> std::io::Result<()> {
        if lines.is_empty() {
            return self.raw_line(&format!("{}  ", code)).await;
        }
        for (position, message) in lines.iter().enumerate() {
            let out = if position + 1 < lines.len() {
                format!("{}- {}", code, message)
            } else {
                format!("{}  {}", code, message)
            };
            self.raw_line(&out).await?;
        }
        Ok(())
    }

    async fn raw_line(&mut self, message: &str) -> std::io::Result<()> {
        self.writer
            .write_all(format!("{}\r\n", message).as_bytes())
            .await
    }

    /// Parses and runs one command line.  Returns false when the session
    /// should close.
    async fn dispatch(&mut self, message: &str) -> std::io::Result<bool> {
        let tokens: Vec<&str> = message.split(' ').filter(|token| !token.is_empty()).collect();
        if tokens.is_empty() {
            return Ok(true);
        }

        let (spec, args) = match lookup_command(&tokens) {
            Some(found) => found,
            None => {
                self.respond_error(&format!("unknown command: \"{}\"", tokens[0]))
                    .await?;
                return Ok(true);
            }
        };

        if spec.requires_auth && !self.authenticated {
            self.respond_error("Not authenticated").await?;
            return Ok(true);
        }
        if args.len() < spec.args.len() {
            let summary = if spec.args.is_empty() {
                String::new()
            } else {
                format!(" ({})", spec.args.join(", "))
            };
            self.respond_error(&format!(
                "{} needs {} parameters{}",
                spec.name,
                spec.args.len(),
                summary
            ))
            .await?;
            return Ok(true);
        }
        if spec.translates_id {
            let valid = args[0]
                .parse::<u32>()
                .ok()
                .map(|id| self.runtime.state.read().events.get_by_id(id).is_some())
                .unwrap_or(false);
            if !valid {
                self.respond_error(&format!("no such case id: {}", args[0])).await?;
                return Ok(true);
            }
        }

        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        match spec.command {
            Command::User => self.do_user(&args).await?,
            Command::Quit => {
                self.respond(205, "Bye").await?;
                return Ok(false);
            }
            Command::Help => self.do_help().await?,
            Command::Version => {
                let version = format!("zino version {}", env!("CARGO_PKG_VERSION"));
                self.respond_ok(&version).await?;
            }
            // Verifies connection authentication status; any reply at all
            // means the session is authenticated
            Command::Authtest => self.respond_ok("ok").await?,
            Command::Caseids => self.do_caseids().await?,
            Command::Getattrs => self.do_getattrs(&args).await?,
            Command::Gethist => self.do_gethist(&args).await?,
            Command::Getlog => self.do_getlog(&args).await?,
            Command::Addhist => self.do_addhist(&args).await?,
            Command::Setstate => self.do_setstate(&args).await?,
            Command::Community => self.do_community(&args).await?,
            Command::Ntie => self.do_ntie(&args).await?,
            Command::Pollrtr => self.do_pollrtr(&args).await?,
            Command::Pollintf => self.do_pollintf(&args).await?,
            Command::Clearflap => self.do_clearflap(&args).await?,
            Command::PmHelp => self.do_pm_help().await?,
            Command::PmList => self.do_pm_list().await?,
            Command::PmAdd => self.do_pm_add(&args).await?,
            Command::PmCancel => self.do_pm_cancel(&args).await?,
            Command::PmDetails => self.do_pm_details(&args).await?,
            Command::PmMatching => self.do_pm_matching(&args).await?,
            Command::PmAddlog => self.do_pm_addlog(&args).await?,
            Command::PmLog => self.do_pm_log(&args).await?,
        }
        Ok(true)
    }

    async fn do_user(&mut self, args: &[String]) -> std::io::Result<()> {
        if self.authenticated {
            return self.respond_error("already authenticated").await;
        }
        let users = match auth::read_users(&self.runtime.config().authentication.file) {
            Ok(users) => users,
            Err(error) => {
                info!("could not read secrets file: {}", error);
                return self.respond_error("Authentication failure").await;
            }
        };
        match auth::authenticate(&args[0], &args[1], &self.challenge, &users) {
            Ok(()) => {
                self.authenticated = true;
                self.user = args[0].clone();
                self.respond_ok("welcome").await
            }
            Err(error) => {
                info!("authentication failed for {:?}: {}", args[0], error);
                self.respond_error("Authentication failure").await
            }
        }
    }

    async fn do_help(&mut self) -> std::io::Result<()> {
        let mut names: Vec<&str> = COMMANDS
            .iter()
            .filter(|spec| self.authenticated || !spec.requires_auth)
            .map(|spec| spec.name)
            .collect();
        names.sort_unstable();
        let mut lines = vec!["commands are:".to_string()];
        lines.extend(wrap_words(&names, 56));
        self.respond_multiline(200, &lines).await
    }

    async fn do_caseids(&mut self) -> std::io::Result<()> {
        let ids: Vec<String> = {
            let state = self.runtime.state.read();
            state
                .events
                .open_event_ids()
                .iter()
                .map(|id| id.to_string())
                .collect()
        };
        self.respond_multiline(300, &ids).await
    }

    async fn do_getattrs(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        let lines: Vec<String> = {
            let state = self.runtime.state.read();
            match state.events.get_by_id(id) {
                Some(event) => event
                    .attrs()
                    .into_iter()
                    .map(|(name, value)| format!("{}: {}", name, value))
                    .collect(),
                None => Vec::new(),
            }
        };
        self.respond_multiline(300, &lines).await
    }

    async fn do_gethist(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        let lines: Vec<String> = {
            let state = self.runtime.state.read();
            match state.events.get_by_id(id) {
                Some(event) => event
                    .history
                    .iter()
                    .flat_map(|entry| entry.api_lines())
                    .collect(),
                None => Vec::new(),
            }
        };
        self.respond_multiline(301, &lines).await
    }

    async fn do_getlog(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        let lines: Vec<String> = {
            let state = self.runtime.state.read();
            match state.events.get_by_id(id) {
                Some(event) => event.log.iter().flat_map(|entry| entry.api_lines()).collect(),
                None => Vec::new(),
            }
        };
        self.respond_multiline(300, &lines).await
    }

    async fn do_addhist(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        self.respond(302, "please provide new history entry, terminate with '.'")
            .await?;
        let lines = self.read_multiline().await?;

        let result = {
            let mut state = self.runtime.state.write();
            match state.events.checkout(id) {
                Ok(mut event) => {
                    let mut message = self.user.clone();
                    for line in &lines {
                        message.push('\n');
                        message.push_str(line);
                    }
                    event.add_history(message);
                    state.events.commit(event, &self.user)
                }
                Err(error) => Err(error),
            }
        };
        match result {
            Ok(_) => self.respond_ok("ok").await,
            Err(error) => self.respond_error(&error.to_string()).await,
        }
    }

    async fn do_setstate(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        let new_state = match EventState::from_api_name(&args[1]) {
            Some(state) => state,
            None => {
                return self
                    .respond_error(&format!("unknown event state: {}", args[1]))
                    .await
            }
        };
        let result = {
            let mut state = self.runtime.state.write();
            match state.events.checkout(id) {
                Ok(mut event) => event
                    .set_state(new_state, &self.user)
                    .and_then(|()| state.events.commit(event, &self.user)),
                Err(error) => Err(error),
            }
        };
        match result {
            Ok(_) => self.respond_ok("ok").await,
            Err(error) => self.respond_error(&error.to_string()).await,
        }
    }

    async fn do_community(&mut self, args: &[String]) -> std::io::Result<()> {
        match self.runtime.get_polldev(&args[0]) {
            Some(device) => {
                let community = device.community.clone();
                self.respond(201, &community).await
            }
            None => self.respond_error("router unknown").await,
        }
    }

    async fn do_ntie(&mut self, args: &[String]) -> std::io::Result<()> {
        if self.notifications.tie(&args[0]) {
            self.respond_ok("ok").await
        } else {
            self.respond_error("Could not find your notify socket").await
        }
    }

    async fn do_pollrtr(&mut self, args: &[String]) -> std::io::Result<()> {
        if crate::runtime::queue_device_poll(&self.runtime, &args[0]) {
            self.respond_ok(&format!("polling {}", args[0])).await
        } else {
            self.respond_error(&format!("router {} unknown", args[0])).await
        }
    }

    async fn do_pollintf(&mut self, args: &[String]) -> std::io::Result<()> {
        let ifindex: u32 = match args[1].parse() {
            Ok(ifindex) => ifindex,
            Err(_) => {
                return self
                    .respond_error(&format!("{} is not an interface index", args[1]))
                    .await
            }
        };
        if crate::runtime::queue_interface_poll(&self.runtime, &args[0], ifindex, Duration::ZERO)
        {
            self.respond_ok(&format!("polling {} ix {}", args[0], ifindex)).await
        } else {
            self.respond_error(&format!("router {} unknown", args[0])).await
        }
    }

    async fn do_clearflap(&mut self, args: &[String]) -> std::io::Result<()> {
        let ifindex: u32 = match args[1].parse() {
            Ok(ifindex) => ifindex,
            Err(_) => {
                return self
                    .respond_error(&format!("{} is not an interface index", args[1]))
                    .await
            }
        };
        let router = args[0].clone();
        {
            let mut state = self.runtime.state.write();
            state.flapping.unflap(&(router.clone(), ifindex));
            let open = state
                .events
                .get(&router, SubIndex::Interface(ifindex), crate::models::events::EventKind::PortState)
                .and_then(|event| event.id);
            if let Some(id) = open {
                if let Ok(mut event) = state.events.checkout(id) {
                    if let Some(payload) = event.port_state() {
                        payload.flapstate = Some(crate::models::events::FlapState::Stable);
                    }
                    event.add_log(format!("flapping state cleared by {}", self.user));
                    let _ = state.events.commit(event, &self.user);
                }
            }
        }
        crate::runtime::queue_interface_poll(&self.runtime, &router, ifindex, Duration::ZERO);
        self.respond_ok(&format!("cleared flap state for {} ix {}", router, ifindex))
            .await
    }

    async fn do_pm_help(&mut self) -> std::io::Result<()> {
        let names: Vec<&str> = COMMANDS
            .iter()
            .filter(|spec| spec.name.starts_with("PM "))
            .map(|spec| spec.name)
            .collect();
        let mut lines = vec!["PM subcommands are:".to_string()];
        lines.extend(wrap_words(&names, 56));
        self.respond_multiline(200, &lines).await
    }

    async fn do_pm_list(&mut self) -> std::io::Result<()> {
        let ids: Vec<String> = {
            let state = self.runtime.state.read();
            state
                .planned_maintenances
                .all()
                .map(|pm| pm.id.to_string())
                .collect()
        };
        self.respond_multiline(300, &ids).await
    }

    async fn do_pm_add(&mut self, args: &[String]) -> std::io::Result<()> {
        let start = match parse_timestamp(&args[0]) {
            Some(start) => start,
            None => return self.respond_error("illegal from_t (param 1), must be time_t").await,
        };
        let end = match parse_timestamp(&args[1]) {
            Some(end) => end,
            None => return self.respond_error("illegal to_t (param 2), must be time_t").await,
        };
        if end <= start {
            return self.respond_error("ending time is before starting time").await;
        }
        let pm_kind = match PmKind::from_api_name(&args[2]) {
            Some(kind) => kind,
            None => return self.respond_error(&format!("unknown PM type: {}", args[2])).await,
        };
        let match_type = match MatchType::from_api_name(&args[3]) {
            Some(match_type) => match_type,
            None => {
                return self
                    .respond_error(&format!("unknown match type: {}", args[3]))
                    .await
            }
        };
        let match_device = args.get(5).cloned();
        if match_type == MatchType::IntfRegexp && match_device.is_none() {
            return self.respond_error("intf-regexp requires a match device").await;
        }

        let id = {
            let mut state = self.runtime.state.write();
            state.planned_maintenances.create(
                start,
                end,
                pm_kind,
                match_type,
                args[4].clone(),
                match_device,
            )
        };
        self.respond_ok(&format!("PM id {} successfully added", id)).await
    }

    async fn do_pm_cancel(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        let removed = {
            let mut state = self.runtime.state.write();
            state
                .planned_maintenances
                .close(id, "PM cancelled", &self.user)
        };
        if removed {
            self.respond_ok("ok").await
        } else {
            self.respond_error(&format!("no such PM id: {}", args[0])).await
        }
    }

    async fn do_pm_details(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        let details = {
            let state = self.runtime.state.read();
            state.planned_maintenances.get(id).map(|pm| {
                format!(
                    "{} {} {} {} {} {} {}",
                    pm.id,
                    pm.start_time.timestamp(),
                    pm.end_time.timestamp(),
                    pm.pm_kind,
                    pm.match_type,
                    pm.match_device.as_deref().unwrap_or(""),
                    pm.match_expression,
                )
            })
        };
        match details {
            Some(details) => self.respond(200, &details).await,
            None => self.respond_error(&format!("no such PM id: {}", args[0])).await,
        }
    }

    async fn do_pm_matching(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        let lines: Option<Vec<String>> = {
            let state = self.runtime.state.read();
            state.planned_maintenances.get(id).map(|pm| {
                state
                    .events
                    .open_events()
                    .filter(|event| pm.matches_event(event, &state.devices))
                    .filter_map(|event| {
                        Some(format!(
                            "{} {} {} {}",
                            event.id?,
                            event.kind(),
                            event.router,
                            event.sub_index
                        ))
                    })
                    .collect()
            })
        };
        match lines {
            Some(lines) => self.respond_multiline(300, &lines).await,
            None => self.respond_error(&format!("no such PM id: {}", args[0])).await,
        }
    }

    async fn do_pm_addlog(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        if self.runtime.state.read().planned_maintenances.get(id).is_none() {
            return self.respond_error(&format!("no such PM id: {}", args[0])).await;
        }
        self.respond(302, "please provide new PM log entry, terminate with '.'")
            .await?;
        let lines = self.read_multiline().await?;
        {
            let mut state = self.runtime.state.write();
            if let Some(pm) = state.planned_maintenances.get_mut(id) {
                let mut message = self.user.clone();
                for line in &lines {
                    message.push('\n');
                    message.push_str(line);
                }
                pm.add_log(message);
            }
        }
        self.respond_ok("ok").await
    }

    async fn do_pm_log(&mut self, args: &[String]) -> std::io::Result<()> {
        let id: u32 = args[0].parse().unwrap_or(0);
        let lines: Option<Vec<String>> = {
            let state = self.runtime.state.read();
            state
                .planned_maintenances
                .get(id)
                .map(|pm| pm.log.iter().flat_map(|entry| entry.api_lines()).collect())
        };
        match lines {
            Some(lines) => self.respond_multiline(300, &lines).await,
            None => self.respond_error(&format!("no such PM id: {}", args[0])).await,
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let seconds: i64 = text.parse().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

/// Greedy word wrapping for HELP output
fn wrap_words(words: &[&str], width: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in words {
        if !current.is_empty() && current.len() + word.len() + 1 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_responder_name_wins() {
        let tokens = vec!["PM", "LIST"];
        let (spec, args) = lookup_command(&tokens).unwrap();
        assert_eq!(spec.name, "PM LIST");
        assert!(args.is_empty());

        let tokens = vec!["SETSTATE", "7", "working"];
        let (spec, args) = lookup_command(&tokens).unwrap();
        assert_eq!(spec.name, "SETSTATE");
        assert_eq!(args, ["7", "working"]);
    }

    #[test]
    fn command_lookup_is_case_insensitive() {
        let tokens = vec!["caseids"];
        let (spec, _) = lookup_command(&tokens).unwrap();
        assert_eq!(spec.name, "CASEIDS");
    }

    #[test]
    fn unknown_commands_yield_nothing() {
        assert!(lookup_command(&["BOGUS"]).is_none());
    }

    #[test]
    fn word_wrap_respects_width() {
        let words = ["ALPHA", "BETA", "GAMMA", "DELTA"];
        let wrapped = wrap_words(&words, 12);
        assert!(wrapped.iter().all(|line| line.len() <= 12));
        assert_eq!(wrapped.join(" "), "ALPHA BETA GAMMA DELTA");
    }
}
