//! Console commands and the terminal alert surface

use std::str::FromStr;

use anyhow::{anyhow, bail};
use tracing::info;

use pushcall_client_core::{AlertPresenter, AlertSpec, CallInvitation, Identity};

pub const HELP: &str = "\
commands:
  login <identity>       save identity and connect
  logout                 hang up, unregister and forget identity
  call <identity>        place a call
  hangup                 end or cancel the current call
  accept | reject        answer the pending invitation
  push-invite <from>     simulate an invitation push from <from>
  push-cancel            simulate the caller giving up
  remote-hangup          simulate the remote side hanging up
  drop <cause>           simulate the call dropping
  status                 show the current screen
  help                   show this text
  quit                   exit";

/// One line typed at the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Login(Identity),
    Logout,
    Call(Identity),
    HangUp,
    Accept,
    Reject,
    PushInvite(Identity),
    PushCancel,
    RemoteHangUp,
    Drop(String),
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let identity = |what: &str| -> anyhow::Result<Identity> {
            if rest.is_empty() {
                bail!("{} needs an identity", what);
            }
            Identity::new(rest).map_err(|e| anyhow!("{}", e))
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "login" => Self::Login(identity("login")?),
            "logout" => Self::Logout,
            "call" | "dial" => Self::Call(identity("call")?),
            "hangup" | "bye" => Self::HangUp,
            "accept" | "answer" => Self::Accept,
            "reject" | "decline" => Self::Reject,
            "push-invite" => Self::PushInvite(identity("push-invite")?),
            "push-cancel" => Self::PushCancel,
            "remote-hangup" => Self::RemoteHangUp,
            "drop" => {
                let cause = if rest.is_empty() { "network lost" } else { rest };
                Self::Drop(cause.to_string())
            }
            "status" | "" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command '{}'", other),
        };
        Ok(command)
    }
}

/// Shows incoming-call alerts as a console banner
#[derive(Debug, Default)]
pub struct ConsoleAlerts;

impl AlertPresenter for ConsoleAlerts {
    fn show(&self, channel: &str, spec: &AlertSpec, invitation: &CallInvitation) {
        info!(channel, call_sid = %invitation.call_sid, urgency = ?spec.urgency, "Showing alert");
        println!("*** {}: {} (accept / reject) ***", spec.title, spec.body);
    }

    fn withdraw(&self, channel: &str) {
        info!(channel, "Withdrawing alert");
    }
}
