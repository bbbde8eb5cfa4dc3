/// Static Guard - Pre-Execution Textual Filter
///
/// **Core Responsibility:**
/// Reject source text containing obviously dangerous constructs before any
/// process is spawned.
///
/// **Properties:**
/// - Case-insensitive substring search against two fixed lists
/// - First match wins; the rejection names the offending token
/// - Pure and deterministic: no side effects, same input → same verdict
///
/// This is a coarse filter, not a verifier. Imports split across lines or
/// aliased through allowed names slip through; the runner's restricted
/// built-ins and OS limits are the layers behind it.
use thiserror::Error;

/// Modules granting filesystem, network, process, or reflection access
pub const BLOCKED_MODULES: &[&str] = &[
    "os",
    "subprocess",
    "sys",
    "shutil",
    "pathlib",
    "socket",
    "requests",
    "urllib",
    "http",
    "multiprocessing",
    "threading",
    "asyncio",
    "pickle",
    "marshal",
    "shelve",
    "ctypes",
    "cffi",
    "importlib",
    "builtins",
    "__builtins__",
    "code",
    "codeop",
    "compile",
];

/// Dynamic evaluation, introspection, and unsanctioned I/O
pub const BLOCKED_TOKENS: &[&str] = &[
    "__import__",
    "exec(",
    "eval(",
    "compile(",
    "open(",
    "file(",
    "globals(",
    "locals(",
    "vars(",
    "getattr(",
    "setattr(",
    "delattr(",
    "__class__",
    "__bases__",
    "__subclasses__",
    "__mro__",
    "__code__",
    "__globals__",
    "breakpoint(",
    "help(",
    // Escape hatches back to the unrestricted interpreter
    "__self__",
    "__dict__",
    "__traceback__",
    "tb_frame",
    "gi_frame",
    "cr_frame",
    "f_back",
    "f_globals",
    "f_builtins",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardRejection {
    #[error("import '{0}' is not allowed")]
    DisallowedImport(String),
    #[error("construct '{0}' is not allowed")]
    DisallowedToken(String),
}

impl GuardRejection {
    /// The token that triggered the rejection
    pub fn token(&self) -> &str {
        match self {
            GuardRejection::DisallowedImport(name) => name,
            GuardRejection::DisallowedToken(token) => token,
        }
    }
}

/// Import spellings checked for every blocked module
fn import_spellings(module: &str) -> [String; 4] {
    [
        format!("import {}", module),
        format!("from {}", module),
        format!("__import__(\"{}\"", module),
        format!("__import__('{}'", module),
    ]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StaticGuard;

impl StaticGuard {
    pub fn new() -> Self {
        Self
    }

    /// Scan source text; `Err` carries a human-readable reason
    pub fn scan(&self, source: &str) -> Result<(), GuardRejection> {
        let lowered = source.to_lowercase();

        for module in BLOCKED_MODULES {
            if import_spellings(module)
                .iter()
                .any(|spelling| lowered.contains(spelling.as_str()))
            {
                return Err(GuardRejection::DisallowedImport(module.to_string()));
            }
        }

        for token in BLOCKED_TOKENS {
            if lowered.contains(token) {
                return Err(GuardRejection::DisallowedToken(token.to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_source_passes() {
        let guard = StaticGuard::new();
        let source = "n = int(input())\nprint(sum(range(n)))\n";
        assert_eq!(guard.scan(source), Ok(()));
    }

    #[test]
    fn test_filesystem_import_rejected() {
        let guard = StaticGuard::new();
        let rejection = guard.scan("import os\nprint(os.listdir('.'))").unwrap_err();

        assert_eq!(rejection, GuardRejection::DisallowedImport("os".to_string()));
        assert!(rejection.to_string().contains("'os'"));
    }

    #[test]
    fn test_from_import_rejected() {
        let guard = StaticGuard::new();
        let rejection = guard.scan("from subprocess import run").unwrap_err();
        assert_eq!(rejection.token(), "subprocess");
    }

    #[test]
    fn test_dunder_import_spellings_rejected() {
        let guard = StaticGuard::new();
        assert!(guard.scan("m = __import__(\"socket\")").is_err());
        assert!(guard.scan("m = __import__('socket')").is_err());
    }

    #[test]
    fn test_case_insensitive() {
        let guard = StaticGuard::new();
        assert!(guard.scan("IMPORT OS").is_err());
        assert!(guard.scan("x = EVAL('1+1')").is_err());
    }

    #[test]
    fn test_dangerous_tokens_rejected() {
        let guard = StaticGuard::new();
        for source in [
            "eval('1+1')",
            "exec('print(1)')",
            "f = open('x.txt')",
            "print(().__class__.__bases__)",
            "getattr(x, 'y')",
            "breakpoint()",
            "b = print.__self__",
            "try:\n    1/0\nexcept Exception as e:\n    f = e.__traceback__.tb_frame",
        ] {
            assert!(guard.scan(source).is_err(), "should reject: {}", source);
        }
    }

    #[test]
    fn test_first_match_wins() {
        let guard = StaticGuard::new();
        // Module list is checked before the token list
        let rejection = guard.scan("eval('1')\nimport os").unwrap_err();
        assert_eq!(rejection, GuardRejection::DisallowedImport("os".to_string()));
    }

    #[test]
    fn test_input_is_sanctioned() {
        let guard = StaticGuard::new();
        assert_eq!(guard.scan("name = input()\nprint(name)"), Ok(()));
    }

    #[test]
    fn test_deterministic() {
        let guard = StaticGuard::new();
        let source = "import shutil";
        assert_eq!(guard.scan(source), guard.scan(source));
    }
}
