//! Layered YAML configuration loading.
//!
//! Files are merged in order, each overriding the previous at the YAML
//! mapping level:
//!
//! `/etc/herald/herald.yaml` < `~/.config/herald/herald.yaml` <
//! `./herald.yaml` < `$HERALD_CONFIG`
//!
//! Environment-variable references (`$VAR` / `${VAR}`) are substituted in
//! the file contents before parsing, and a small set of environment
//! overrides is applied afterwards.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::{Config, HeraldError};

/// Load configuration from the layered search paths plus env overrides.
pub fn load() -> Result<Config, HeraldError> {
    let mut merged = base_value()?;

    for path in search_paths() {
        merge_file(&mut merged, &path)?;
    }

    finish(merged)
}

/// Load configuration from one explicit file (plus defaults and env overrides).
pub fn load_from_file(path: &Path) -> Result<Config, HeraldError> {
    let mut merged = base_value()?;
    if !path.exists() {
        return Err(HeraldError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    merge_file(&mut merged, path)?;
    finish(merged)
}

fn base_value() -> Result<Value, HeraldError> {
    serde_yaml::to_value(Config::default())
        .map_err(|e| HeraldError::Config(format!("serializing defaults: {e}")))
}

fn finish(merged: Value) -> Result<Config, HeraldError> {
    let mut cfg: Config = serde_yaml::from_value(merged)
        .map_err(|e| HeraldError::Config(format!("parsing merged config: {e}")))?;

    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/herald/herald.yaml")];

    if let Some(home) = std::env::var_os("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".config")
                .join("herald")
                .join("herald.yaml"),
        );
    }

    paths.push(PathBuf::from("herald.yaml"));

    if let Ok(env_path) = std::env::var("HERALD_CONFIG") {
        if !env_path.is_empty() {
            paths.push(PathBuf::from(env_path));
        }
    }

    paths
}

/// Environment variables win over YAML values.
fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(token) = std::env::var("HERALD_NGROK_AUTHTOKEN") {
        if !token.is_empty() {
            cfg.tunnel.auth_token = token;
        }
    }
}

fn merge_file(merged: &mut Value, path: &Path) -> Result<(), HeraldError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(HeraldError::Config(format!(
                "reading {}: {e}",
                path.display()
            )));
        }
    };

    debug!(path = %path.display(), "loading config file");

    let expanded = expand_env(&data);
    let overlay: Value = serde_yaml::from_str(&expanded)
        .map_err(|e| HeraldError::Config(format!("parsing {}: {e}", path.display())))?;

    merge_value(merged, overlay);
    Ok(())
}

/// Recursively merge `overlay` into `base`. Mappings merge key-by-key;
/// every other value kind replaces outright.
fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Substitute `$VAR` and `${VAR}` references with environment values.
/// Unset variables expand to the empty string.
pub(crate) fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&std::env::var(&name).unwrap_or_default());
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some((_, c2)) if c2.is_ascii_alphabetic() || *c2 == '_' => {
                let mut name = String::new();
                while let Some((_, c2)) = chars.peek() {
                    if c2.is_ascii_alphanumeric() || *c2 == '_' {
                        name.push(*c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }

    out
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_home(path: &str) -> String {
    if !path.starts_with('~') {
        return path.to_string();
    }
    match std::env::var("HOME") {
        Ok(home) => format!("{}{}", home, &path[1..]),
        Err(_) => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn expand_env_braced_and_bare() {
        std::env::set_var("HERALD_TEST_TOKEN", "tok123");
        assert_eq!(expand_env("key: ${HERALD_TEST_TOKEN}"), "key: tok123");
        assert_eq!(expand_env("key: $HERALD_TEST_TOKEN!"), "key: tok123!");
        assert_eq!(expand_env("price: $5"), "price: $5");
        assert_eq!(expand_env("unset: ${HERALD_TEST_MISSING_VAR}"), "unset: ");
    }

    #[test]
    fn expand_home_prefix() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_home("~/.config/herald"), "/home/tester/.config/herald");
        assert_eq!(expand_home("/abs/path"), "/abs/path");
    }

    #[test]
    fn load_from_file_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 9999\nexecution:\n  max_concurrent: 5"
        )
        .unwrap();

        let cfg = load_from_file(file.path()).unwrap();
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.execution.max_concurrent, 5);
        // Untouched fields retain defaults.
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.execution.claude_path, "claude");
    }

    #[test]
    fn load_from_file_substitutes_env() {
        std::env::set_var("HERALD_TEST_SECRET", "s3cr3t");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "auth:\n  client_secret: ${{HERALD_TEST_SECRET}}").unwrap();

        let cfg = load_from_file(file.path()).unwrap();
        assert_eq!(cfg.auth.client_secret, "s3cr3t");
    }

    #[test]
    fn load_from_file_rejects_missing_path() {
        let err = load_from_file(Path::new("/nonexistent/herald.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn invalid_config_file_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  host: 0.0.0.0").unwrap();
        assert!(load_from_file(file.path()).is_err());
    }

    #[test]
    fn merge_value_is_deep() {
        let mut base: Value =
            serde_yaml::from_str("a:\n  x: 1\n  y: 2\nb: keep").unwrap();
        let overlay: Value = serde_yaml::from_str("a:\n  y: 3").unwrap();
        merge_value(&mut base, overlay);

        assert_eq!(base["a"]["x"], Value::from(1));
        assert_eq!(base["a"]["y"], Value::from(3));
        assert_eq!(base["b"], Value::from("keep"));
    }
}
