//! Opening fully established IMAP handles.

use std::sync::Arc;

use super::{ImapHandle, ImapOptions};
use crate::Result;
use crate::callbacks::UserCallbacks;
use crate::connection::{self, Config, HandleContext};
use crate::observer::Observers;

/// Everything needed to open an authenticated IMAP handle for one account.
#[derive(Clone, Debug)]
pub struct ImapConnector {
    config: Config,
    context: HandleContext,
    options: ImapOptions,
}

impl ImapConnector {
    /// Creates a connector for `config`, answering prompts with `callbacks`.
    #[must_use]
    pub fn new(config: Config, callbacks: Arc<dyn UserCallbacks>) -> Self {
        let context = HandleContext::new(config.host.clone(), callbacks).io_timeout(config.io_timeout);
        Self {
            config,
            context,
            options: ImapOptions::default(),
        }
    }

    /// Attaches observers to every handle this connector opens.
    #[must_use]
    pub fn observers(mut self, observers: Observers) -> Self {
        self.context = self.context.observers(observers);
        self
    }

    /// Sets IMAP options.
    #[must_use]
    pub fn options(mut self, options: ImapOptions) -> Self {
        self.options = options;
        self
    }

    /// Connection settings.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Connects, negotiates TLS and authenticates.
    ///
    /// # Errors
    ///
    /// Fails on connection, TLS or authentication errors. A handle that
    /// failed halfway is dropped.
    pub async fn open(&self) -> Result<ImapHandle> {
        let stream = connection::connect(&self.config, self.context.callbacks.as_ref()).await?;
        let mut handle =
            ImapHandle::from_stream(stream, self.context.clone(), self.options.clone()).await?;
        handle.establish(self.config.security).await?;
        tracing::info!(server = %self.config.display_host(), "IMAP session ready");
        Ok(handle)
    }
}
