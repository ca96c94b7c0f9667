//! External usage fetch
//!
//! Live balances come from a separate command that talks to the provider
//! and rewrites the cache file. The command receives the keys on stdin, one
//! per line in index order, and finds the data directory and cache path in
//! `OROIO_DIR` and `OROIO_CACHE`. Keys it fails to look up are simply left
//! out of the cache.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{KeyError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Regenerates the usage cache for a set of keys
pub trait UsageFetcher: Send + Sync {
    fn fetch(&self, secrets: &[String], cache_path: &Path) -> Result<()>;
}

/// Runs a configured command to regenerate the cache
pub struct CommandFetcher {
    argv: Option<Vec<String>>,
    data_dir: PathBuf,
    timeout: Duration,
}

impl CommandFetcher {
    pub fn new(argv: Option<Vec<String>>, data_dir: &Path, timeout: Duration) -> Self {
        Self {
            argv,
            data_dir: data_dir.to_path_buf(),
            timeout,
        }
    }
}

impl UsageFetcher for CommandFetcher {
    fn fetch(&self, secrets: &[String], cache_path: &Path) -> Result<()> {
        let (program, args) = self
            .argv
            .as_deref()
            .and_then(|argv| argv.split_first())
            .ok_or_else(|| KeyError::Fetch("no usage fetch command configured".to_string()))?;

        debug!(%program, keys = secrets.len(), "running usage fetch");

        let mut child = Command::new(program)
            .args(args)
            .env("OROIO_DIR", &self.data_dir)
            .env("OROIO_CACHE", cache_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KeyError::Fetch(format!("failed to run {}: {}", program, e)))?;

        // Drain stderr on a thread so a chatty command cannot block on a full pipe
        let stderr = child.stderr.take();
        let stderr_reader = thread::spawn(move || {
            let mut output = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut output);
            }
            output
        });

        let deadline = Instant::now() + self.timeout;

        // Fed from a thread so a command that never reads stdin still times out
        if let Some(mut stdin) = child.stdin.take() {
            let secrets = secrets.to_vec();
            thread::spawn(move || {
                for secret in &secrets {
                    if let Err(e) = writeln!(stdin, "{}", secret) {
                        debug!("fetch command closed stdin early: {}", e);
                        break;
                    }
                }
            });
        }
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(KeyError::Fetch(format!(
                        "{} timed out after {}s",
                        program,
                        self.timeout.as_secs_f64()
                    )));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(KeyError::Fetch(format!("failed to wait for {}: {}", program, e))),
            }
        };

        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            let stderr = stderr.trim();
            return Err(KeyError::Fetch(if stderr.is_empty() {
                format!("{} exited with {}", program, status)
            } else {
                stderr.to_string()
            }));
        }

        info!(%program, "usage cache refreshed");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sh(script: &str, dir: &Path, timeout: Duration) -> CommandFetcher {
        CommandFetcher::new(
            Some(vec!["sh".to_string(), "-c".to_string(), script.to_string()]),
            dir,
            timeout,
        )
    }

    #[test]
    fn test_no_command_configured() {
        let temp = TempDir::new().unwrap();
        let fetcher = CommandFetcher::new(None, temp.path(), Duration::from_secs(1));
        let err = fetcher.fetch(&[], &temp.path().join("cache")).unwrap_err();
        assert!(matches!(err, KeyError::Fetch(_)));

        let empty = CommandFetcher::new(Some(vec![]), temp.path(), Duration::from_secs(1));
        assert!(empty.fetch(&[], &temp.path().join("cache")).is_err());
    }

    #[test]
    fn test_command_receives_keys_and_paths() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("list_cache.b64");
        let fetcher = sh(
            r#"cat > "$OROIO_CACHE"; echo "$OROIO_DIR" >> "$OROIO_CACHE""#,
            temp.path(),
            Duration::from_secs(10),
        );

        fetcher
            .fetch(&["sk-a".to_string(), "sk-b".to_string()], &cache)
            .unwrap();

        let written = fs::read_to_string(&cache).unwrap();
        assert_eq!(written, format!("sk-a\nsk-b\n{}\n", temp.path().display()));
    }

    #[test]
    fn test_failure_surfaces_stderr() {
        let temp = TempDir::new().unwrap();
        let fetcher = sh(
            "echo 'provider unreachable' >&2; exit 3",
            temp.path(),
            Duration::from_secs(10),
        );

        let err = fetcher.fetch(&[], &temp.path().join("cache")).unwrap_err();
        match err {
            KeyError::Fetch(message) => assert_eq!(message, "provider unreachable"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_failure_without_stderr_reports_status() {
        let temp = TempDir::new().unwrap();
        let fetcher = sh("exit 2", temp.path(), Duration::from_secs(10));

        let err = fetcher.fetch(&[], &temp.path().join("cache")).unwrap_err();
        assert!(err.to_string().contains("sh exited with"));
    }

    #[test]
    fn test_missing_program() {
        let temp = TempDir::new().unwrap();
        let fetcher = CommandFetcher::new(
            Some(vec!["oroio-definitely-not-installed".to_string()]),
            temp.path(),
            Duration::from_secs(1),
        );

        let err = fetcher.fetch(&[], &temp.path().join("cache")).unwrap_err();
        assert!(err.to_string().contains("failed to run oroio-definitely-not-installed"));
    }

    #[test]
    fn test_timeout_kills_command() {
        let temp = TempDir::new().unwrap();
        let fetcher = sh("sleep 5", temp.path(), Duration::from_millis(200));

        let started = Instant::now();
        let err = fetcher.fetch(&[], &temp.path().join("cache")).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_when_command_ignores_stdin() {
        let temp = TempDir::new().unwrap();
        let fetcher = sh("sleep 5", temp.path(), Duration::from_millis(200));

        // Far more than a pipe buffer holds
        let secrets: Vec<String> = (0..4096).map(|i| format!("sk-{:0>60}", i)).collect();

        let started = Instant::now();
        let err = fetcher.fetch(&secrets, &temp.path().join("cache")).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
