//! Homebrew as an install-on-demand prerequisite for deploy scripts.

use crate::exec::CommandExecutor;

const BREW_PATHS: &str = r#"export PATH="/opt/homebrew/bin:/usr/local/bin:$PATH""#;

const BREW_INSTALL: &str = r#"/bin/bash -c "$(curl -fsSL https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh)""#;

const BREW_SHELLENV: &str = r#"if [ -x /opt/homebrew/bin/brew ]; then eval "$(/opt/homebrew/bin/brew shellenv)"; fi
if [ -x /usr/local/bin/brew ]; then eval "$(/usr/local/bin/brew shellenv)"; fi"#;

/// Script that reports the brew version, installing brew first if needed.
pub fn ensure_script() -> String {
    format!(
        r#"{paths}
if command -v brew >/dev/null 2>&1; then
  brew --version | head -n 1
  exit 0
fi
echo "Homebrew not found, installing..."
{install}
{paths}
{shellenv}
command -v brew >/dev/null 2>&1 || {{ echo "Homebrew installation failed or incomplete"; exit 1; }}
brew --version | head -n 1"#,
        paths = BREW_PATHS,
        install = BREW_INSTALL,
        shellenv = BREW_SHELLENV,
    )
}

/// Prefixes `inner` with a brew bootstrap; the combined script fails before
/// running `inner` if brew is still unavailable.
pub fn wrap_with_ensure(inner: &str) -> String {
    format!(
        r#"{paths}
if ! command -v brew >/dev/null 2>&1; then
  echo "Homebrew not found, installing..."
  {install}
  {paths}
  {shellenv}
fi
command -v brew >/dev/null 2>&1 || {{ echo "Homebrew is not ready, finish installing it and retry"; exit 1; }}
{inner}"#,
        paths = BREW_PATHS,
        install = BREW_INSTALL,
        shellenv = BREW_SHELLENV,
        inner = inner,
    )
}

/// Blocking check-and-install. Returns whether brew is usable afterwards.
pub fn ensure_installed(executor: &dyn CommandExecutor, log: &dyn Fn(&str)) -> bool {
    let code = executor.execute(&ensure_script(), None, &mut |line| {
        let text = line.trim();
        if !text.is_empty() {
            log(text);
        }
    });
    code == 0
}
