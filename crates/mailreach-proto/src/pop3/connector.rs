//! Opening fully established POP3 handles.

use std::sync::Arc;

use super::{Pop3Handle, Pop3Options};
use crate::Result;
use crate::callbacks::UserCallbacks;
use crate::connection::{self, Config, HandleContext};
use crate::observer::Observers;

/// Everything needed to open an authenticated POP3 handle for one account.
#[derive(Clone, Debug)]
pub struct Pop3Connector {
    config: Config,
    context: HandleContext,
    options: Pop3Options,
}

impl Pop3Connector {
    /// Creates a connector for `config`, answering prompts with `callbacks`.
    #[must_use]
    pub fn new(config: Config, callbacks: Arc<dyn UserCallbacks>) -> Self {
        let context = HandleContext::new(config.host.clone(), callbacks).io_timeout(config.io_timeout);
        Self {
            config,
            context,
            options: Pop3Options::default(),
        }
    }

    /// Attaches observers to every handle this connector opens.
    #[must_use]
    pub fn observers(mut self, observers: Observers) -> Self {
        self.context = self.context.observers(observers);
        self
    }

    /// Sets POP3 options.
    #[must_use]
    pub const fn options(mut self, options: Pop3Options) -> Self {
        self.options = options;
        self
    }

    /// Connection settings.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Connects, negotiates TLS, authenticates and reads STAT.
    ///
    /// # Errors
    ///
    /// Fails on connection, TLS or authentication errors.
    pub async fn open(&self) -> Result<Pop3Handle> {
        let stream = connection::connect(&self.config, self.context.callbacks.as_ref()).await?;
        let mut handle =
            Pop3Handle::from_stream(stream, self.context.clone(), self.options).await?;
        handle.establish(self.config.security).await?;
        tracing::info!(
            server = %self.config.display_host(),
            messages = handle.message_count(),
            "POP3 session ready"
        );
        Ok(handle)
    }
}
