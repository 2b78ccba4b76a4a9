use std::{fmt, time::Duration};

use crate::{
    protocol::Progress,
    session::CancelToken,
    settings::{Parameters, Setting, Settings},
};

/// Callback invoked with the accumulated progress after every Progress packet.
pub type ProgressHook = Box<dyn FnMut(&Progress) + Send>;

/// SQL text plus the per-query options sent with it.
pub struct Query {
    pub(crate) sql: String,
    pub(crate) query_id: String,
    pub(crate) settings: Settings,
    pub(crate) parameters: Parameters,
    pub(crate) cancel: Option<CancelToken>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) on_progress: Option<ProgressHook>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            query_id: String::new(),
            settings: Settings::new(),
            parameters: Parameters::new(),
            cancel: None,
            timeout: None,
            on_progress: None,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = query_id.into();
        self
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.settings.set(name, value);
        self
    }

    /// Adds a setting with explicit flags.
    pub fn with_setting_flags(mut self, setting: Setting) -> Self {
        self.settings.insert(setting);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.parameters.set(name, value);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Deadline for the whole statement, counted from when it is sent.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_progress(mut self, hook: impl FnMut(&Progress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(hook));
        self
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Query::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Query::new(sql)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql)
            .field("query_id", &self.query_id)
            .field("settings", &self.settings)
            .field("parameters", &self.parameters)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
