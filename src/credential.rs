//! Credential & retry glue: password prompting, caching and validation,
//! expressed as a safe, owned, zeroizing secret type rather than a raw
//! reference-counted string.

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An owned secret that is wiped from memory on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Secret(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// What a credential unlocks — distinct login flows need distinct prompts
/// and distinct cache slots, since the same passphrase is rarely right for
/// both archive encryption and a remote login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Archive,
    Ftp,
    Ssh,
    WebDav,
    Device,
}

/// Cache/lookup key: the kind plus the named target it applies to (host,
/// device path, or empty for the archive passphrase itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub kind: CredentialKind,
    pub name: String,
}

impl CredentialKey {
    pub fn new(kind: CredentialKind, name: impl Into<String>) -> Self {
        CredentialKey { kind, name: name.into() }
    }
}

#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("no credential available for {0:?} and interactive prompting is disabled")]
    PromptRefused(CredentialKey),
    #[error("credential callback failed: {0}")]
    CallbackFailed(String),
    #[error("all {0} login attempts exhausted")]
    AttemptsExhausted(usize),
}

/// Implemented by front ends (CLI, GUI, test harness) to supply secrets
/// interactively. The engine never reads a terminal directly.
pub trait CredentialCallback: Send + Sync {
    /// Prompt for a credential. `name` identifies the target (host, device
    /// path, empty for the archive passphrase). `prompt` is front-end
    /// display text. `validate` requests the callback re-ask until a
    /// non-empty answer is given; `weak_check` requests a strength warning
    /// be shown for short/common passphrases. Returns `None` if refused or
    /// the user cancels.
    fn get_password(&self, name: &str, kind: CredentialKind, prompt: &str, validate: bool, weak_check: bool) -> Option<Secret>;
}

/// A callback that never prompts — used for batch/non-interactive mode,
/// where any unresolved credential must surface as [`AuthenticationError::PromptRefused`].
pub struct NoPrompt;

impl CredentialCallback for NoPrompt {
    fn get_password(&self, _name: &str, _kind: CredentialKind, _prompt: &str, _validate: bool, _weak_check: bool) -> Option<Secret> {
        None
    }
}

/// Caches resolved credentials for the lifetime of one [`EngineContext`] so
/// that, e.g., the same storage login isn't re-prompted per file. Scoped
/// per-context rather than a process-wide global, so two concurrent
/// `EngineContext`s never share or clobber each other's cached secrets.
#[derive(Default)]
pub struct DefaultPasswordCache {
    entries: Mutex<HashMap<CredentialKey, Secret>>,
}

impl DefaultPasswordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CredentialKey) -> Option<Secret> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: CredentialKey, secret: Secret) {
        self.entries.lock().unwrap().insert(key, secret);
    }

    pub fn clear(&self, key: &CredentialKey) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// Resolve a credential: cache hit, then callback, honoring retry semantics.
/// `max_attempts` bounds how many times the callback may be re-invoked after
/// the caller reports a rejected secret via `retry_validator`. `prompt` and
/// `weak_check` are forwarded to the callback unchanged; `validate` is
/// implied by `retry_validator` rejecting empty secrets.
#[allow(clippy::too_many_arguments)]
pub fn resolve<F>(
    cache: &DefaultPasswordCache,
    callback: &dyn CredentialCallback,
    kind: CredentialKind,
    name: &str,
    prompt: &str,
    weak_check: bool,
    max_attempts: usize,
    mut retry_validator: F,
) -> Result<Secret, AuthenticationError>
where
    F: FnMut(&Secret) -> bool,
{
    let key = CredentialKey::new(kind, name);
    if let Some(cached) = cache.get(&key) {
        if retry_validator(&cached) {
            return Ok(cached);
        }
        cache.clear(&key);
    }

    let mut retry = false;
    for attempt in 0..max_attempts {
        let secret = callback
            .get_password(name, kind, prompt, retry, weak_check)
            .ok_or_else(|| AuthenticationError::PromptRefused(key.clone()))?;
        if retry_validator(&secret) {
            cache.put(key, secret.clone());
            return Ok(secret);
        }
        retry = true;
        let _ = attempt;
    }
    Err(AuthenticationError::AttemptsExhausted(max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);
    impl CredentialCallback for Fixed {
        fn get_password(&self, _name: &str, _kind: CredentialKind, _prompt: &str, _validate: bool, _weak_check: bool) -> Option<Secret> {
            Some(Secret::new(self.0.to_string()))
        }
    }

    #[test]
    fn resolve_caches_on_success() {
        let cache = DefaultPasswordCache::new();
        let key = CredentialKey::new(CredentialKind::Archive, "");
        let secret = resolve(&cache, &Fixed("correct horse"), CredentialKind::Archive, "", "archive passphrase", false, 3, |s| {
            s.as_str() == "correct horse"
        })
        .unwrap();
        assert_eq!(secret.as_str(), "correct horse");
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn no_prompt_refuses_immediately() {
        let cache = DefaultPasswordCache::new();
        let err = resolve(&cache, &NoPrompt, CredentialKind::Archive, "", "archive passphrase", false, 3, |_| true).unwrap_err();
        assert!(matches!(err, AuthenticationError::PromptRefused(_)));
    }

    #[test]
    fn attempts_exhausted_when_validator_never_accepts() {
        let cache = DefaultPasswordCache::new();
        let err = resolve(&cache, &Fixed("wrong"), CredentialKind::Ftp, "ftp.example.com", "ftp login", false, 2, |_| false).unwrap_err();
        assert!(matches!(err, AuthenticationError::AttemptsExhausted(2)));
    }

    #[test]
    fn distinct_names_of_the_same_kind_cache_separately() {
        let cache = DefaultPasswordCache::new();
        cache.put(CredentialKey::new(CredentialKind::Ftp, "host-a"), Secret::new("a-pass".into()));
        cache.put(CredentialKey::new(CredentialKind::Ftp, "host-b"), Secret::new("b-pass".into()));
        assert_eq!(cache.get(&CredentialKey::new(CredentialKind::Ftp, "host-a")).unwrap().as_str(), "a-pass");
        assert_eq!(cache.get(&CredentialKey::new(CredentialKind::Ftp, "host-b")).unwrap().as_str(), "b-pass");
    }
}
