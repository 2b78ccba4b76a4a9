//! Per-query settings and query parameters.
//!
//! Settings are sent as free-form strings; the server validates names and values.

/// A single `name = value` setting with its wire flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub name: String,
    pub value: String,
    /// The server must fail the query if it does not know the setting.
    pub important: bool,
    pub custom: bool,
    pub obsolete: bool,
}

const FLAG_IMPORTANT: u64 = 0x01;
const FLAG_CUSTOM: u64 = 0x02;
const FLAG_OBSOLETE: u64 = 0x04;

impl Setting {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
            important: false,
            custom: false,
            obsolete: false,
        }
    }

    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }

    pub fn custom(mut self) -> Self {
        self.custom = true;
        self
    }

    pub fn obsolete(mut self) -> Self {
        self.obsolete = true;
        self
    }

    pub(crate) fn flags(&self) -> u64 {
        let mut flags = 0;
        if self.important {
            flags |= FLAG_IMPORTANT;
        }
        if self.custom {
            flags |= FLAG_CUSTOM;
        }
        if self.obsolete {
            flags |= FLAG_OBSOLETE;
        }
        flags
    }
}

/// Ordered settings, one entry per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings(Vec<Setting>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a setting, replacing any earlier one with the same name.
    pub fn insert(&mut self, setting: Setting) -> &mut Self {
        match self.0.iter_mut().find(|s| s.name == setting.name) {
            Some(existing) => *existing = setting,
            None => self.0.push(setting),
        }
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        self.insert(Setting::new(name, value))
    }

    pub fn get(&self, name: &str) -> Option<&Setting> {
        self.0.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `self` overlaid with `overrides`.
    pub fn merged(&self, overrides: &Settings) -> Settings {
        let mut merged = self.clone();
        for setting in overrides.iter() {
            merged.insert(setting.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Settings::new();
        for (name, value) in iter {
            settings.set(name, value);
        }
        settings
    }
}

/// Values for `{name:Type}` placeholders in the query text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(Vec<(String, String)>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        let name = name.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.0.push((name, value)),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut parameters = Parameters::new();
        for (name, value) in iter {
            parameters.set(name, value);
        }
        parameters
    }
}

/// Single-quoted literal, the form in which the server expects parameter values.
pub(crate) fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}
