//! Terminal prompts and server notices.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};

use mailreach_proto::tls::CertificateFailure;
use mailreach_proto::{Credentials, HandleObserver, Observers, UserCallbacks};

use crate::accounts::Account;

/// Environment variable consulted before prompting for a password.
pub const PASSWORD_ENV: &str = "MAILREACH_PASSWORD";

/// Answers credential and certificate questions for one account.
pub struct Prompt {
    account: String,
    user: String,
    password: Mutex<Option<String>>,
}

impl Prompt {
    /// Uses the password from the account, then [`PASSWORD_ENV`], then asks.
    pub fn new(account: &Account) -> Self {
        Self::with_password(
            account,
            account
                .password
                .clone()
                .or_else(|| std::env::var(PASSWORD_ENV).ok()),
        )
    }

    fn with_password(account: &Account, password: Option<String>) -> Self {
        Self {
            account: account.name.clone(),
            user: account.username.clone(),
            password: Mutex::new(password),
        }
    }
}

impl UserCallbacks for Prompt {
    fn user_pass(&self, mechanism: &str) -> Option<Credentials> {
        let mut password = self.password.lock().unwrap_or_else(PoisonError::into_inner);
        if password.is_none() {
            *password = ask(&format!("Password for {} ({mechanism}): ", self.account));
        }
        password
            .clone()
            .map(|password| Credentials::new(self.user.clone(), password))
    }

    fn user(&self, _mechanism: &str) -> Option<String> {
        Some(self.user.clone())
    }

    fn verify_tls_failure(&self, failure: &CertificateFailure, _certificate: &[u8]) -> bool {
        let question = format!(
            "{}: server certificate not trusted ({failure}). Connect anyway? [y/N] ",
            self.account
        );
        ask(&question).is_some_and(|answer| answer.eq_ignore_ascii_case("y"))
    }
}

/// Shows server alerts on the terminal.
struct Notices {
    account: String,
}

impl HandleObserver for Notices {
    fn on_alert(&self, text: &str) {
        eprintln!("{}: ALERT: {text}", self.account);
    }

    fn on_info(&self, text: &str) {
        tracing::debug!(account = %self.account, %text, "server notice");
    }
}

/// Observers attached to every handle of `account`.
pub fn observers(account: &Account) -> Observers {
    Observers::new().with(Arc::new(Notices {
        account: account.name.clone(),
    }))
}

/// Prints `question` to stderr and reads one line. `None` on end of input.
fn ask(question: &str) -> Option<String> {
    eprint!("{question}");
    io::stderr().flush().ok();
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}
