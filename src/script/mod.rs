//! Scripted checks: in-process plugins and dynamically loaded libraries.
//!
//! A scripted check receives only the target URL and answers with a verdict.
//! Anything else it needs (its own HTTP stack included) is the script's own
//! business; the engine just dispatches and records.

use crate::error::ScanError;
use std::collections::HashMap;
use std::ffi::{c_char, CString};
use std::path::PathBuf;
use std::sync::Arc;

pub trait ScriptCheck: Send + Sync {
    fn vulnerability_check(&self, url: &str) -> anyhow::Result<bool>;
}

/// Checks loaded from shared libraries resolve this symbol.
const ENTRY_SYMBOL: &[u8] = b"vulnerability_check";

struct DylibCheck {
    library: libloading::Library,
}

impl DylibCheck {
    fn load(path: &PathBuf) -> Result<Self, ScanError> {
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| ScanError::Script(format!("cannot load {}: {e}", path.display())))?;
        Ok(Self { library })
    }
}

impl ScriptCheck for DylibCheck {
    fn vulnerability_check(&self, url: &str) -> anyhow::Result<bool> {
        let entry: libloading::Symbol<'_, unsafe extern "C" fn(*const c_char) -> bool> =
            unsafe { self.library.get(ENTRY_SYMBOL) }
                .map_err(|e| anyhow::anyhow!("missing entry symbol: {e}"))?;
        let url = CString::new(url).map_err(|e| anyhow::anyhow!("url contains NUL: {e}"))?;
        Ok(unsafe { entry(url.as_ptr()) })
    }
}

/// Resolves a script reference to a runnable check.
#[derive(Default)]
pub struct ScriptRegistry {
    registered: HashMap<String, Arc<dyn ScriptCheck>>,
    scripts_dir: Option<PathBuf>,
}

impl ScriptRegistry {
    pub fn new(scripts_dir: Option<PathBuf>) -> Self {
        Self {
            registered: HashMap::new(),
            scripts_dir,
        }
    }

    /// In-process checks take priority over anything on disk.
    pub fn register(&mut self, reference: impl Into<String>, check: Arc<dyn ScriptCheck>) {
        self.registered.insert(reference.into(), check);
    }

    fn dylib_path(&self, reference: &str) -> Option<PathBuf> {
        let dir = self.scripts_dir.as_ref()?;
        Some(dir.join(format!(
            "{}{reference}{}",
            std::env::consts::DLL_PREFIX,
            std::env::consts::DLL_SUFFIX
        )))
    }

    /// Runs the referenced check against one target. Libraries are loaded
    /// per call; script failures are per-task errors, never run-fatal.
    pub fn invoke(&self, reference: &str, url: &str) -> Result<bool, ScanError> {
        if let Some(check) = self.registered.get(reference) {
            return check
                .vulnerability_check(url)
                .map_err(|e| ScanError::Script(format!("{reference}: {e}")));
        }
        let path = self.dylib_path(reference).ok_or_else(|| {
            ScanError::Script(format!("unknown script reference {reference}"))
        })?;
        let check = DylibCheck::load(&path)?;
        check
            .vulnerability_check(url)
            .map_err(|e| ScanError::Script(format!("{reference}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCheck(bool);

    impl ScriptCheck for FixedCheck {
        fn vulnerability_check(&self, _url: &str) -> anyhow::Result<bool> {
            Ok(self.0)
        }
    }

    struct FailingCheck;

    impl ScriptCheck for FailingCheck {
        fn vulnerability_check(&self, url: &str) -> anyhow::Result<bool> {
            anyhow::bail!("cannot reach {url}")
        }
    }

    #[test]
    fn registered_checks_resolve_first() {
        let mut registry = ScriptRegistry::new(None);
        registry.register("check_one", Arc::new(FixedCheck(true)));
        assert!(registry.invoke("check_one", "http://example.com").unwrap());
    }

    #[test]
    fn unknown_reference_without_a_scripts_dir_is_a_script_error() {
        let registry = ScriptRegistry::new(None);
        let err = registry.invoke("missing", "http://example.com").unwrap_err();
        assert!(matches!(err, ScanError::Script(_)));
    }

    #[test]
    fn script_failures_carry_the_reference() {
        let mut registry = ScriptRegistry::new(None);
        registry.register("flaky", Arc::new(FailingCheck));
        let err = registry.invoke("flaky", "http://example.com").unwrap_err();
        assert!(err.to_string().contains("flaky"));
    }
}
