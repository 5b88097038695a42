use std::collections::BTreeMap;
use serde::Serialize;

/// Merged configuration data handed to template rendering.
///
/// Keys are kept sorted so the same data always renders and hashes the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, String>);

impl Context {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// True when every required field is present with a non-empty value.
pub fn is_complete(context: &Context, required: &[String]) -> bool {
    required
        .iter()
        .all(|name| context.get(name).is_some_and(|value| !value.is_empty()))
}

/// Required fields the context does not supply, for logging rejections.
pub fn missing_fields<'a>(context: &Context, required: &'a [String]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| context.get(name).map_or(true, str::is_empty))
        .map(String::as_str)
        .collect()
}
