//! Git-backed storage
//!
//! Every operation is one or two `git` subprocess calls in the sync
//! directory. Subprocesses go through a [`CommandRunner`] so tests can record
//! and script them instead of touching a real repository.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::StorageBackend;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::types::CommitOutcome;

/// Exit status git uses for "nothing to commit"
const NOTHING_TO_DO_STATUS: i32 = 1;

/// Captured result of a subprocess
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal
    pub status: Option<i32>,
    /// stdout and stderr, combined
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external programs
pub trait CommandRunner: Send + Sync {
    /// Run `program args..` in `dir` and capture its output
    fn run(&self, dir: &Path, program: &Path, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs programs with `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, dir: &Path, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        tracing::info!("{} {}", program.display(), args.join(" "));

        let out = Command::new(program).args(args).current_dir(dir).output()?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(CommandOutput {
            status: out.status.code(),
            output,
        })
    }
}

/// Locate an executable on `PATH`
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Storage backend driving the `git` command line
pub struct GitBackend {
    runner: Box<dyn CommandRunner>,
    git: PathBuf,
    root: PathBuf,
    remote: String,
    branch: String,
}

impl GitBackend {
    /// Create a backend for the configured sync directory.
    ///
    /// Fails with [`SyncError::ToolNotFound`] if `git` is not on `PATH`.
    pub fn new(config: &Config) -> Result<Self> {
        let git = find_on_path("git").ok_or_else(|| SyncError::ToolNotFound("git".to_string()))?;
        Ok(Self::with_runner(
            config.root(),
            git,
            Box::new(ProcessRunner),
            &config.remote,
            &config.branch,
        ))
    }

    /// Create a backend with an explicit git path and runner
    pub fn with_runner(
        root: impl Into<PathBuf>,
        git: impl Into<PathBuf>,
        runner: Box<dyn CommandRunner>,
        remote: &str,
        branch: &str,
    ) -> Self {
        Self {
            runner,
            git: git.into(),
            root: root.into(),
            remote: remote.to_string(),
            branch: branch.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run one git command, turning a non-zero exit into [`SyncError::Backend`]
    fn git(&self, args: &[&str]) -> Result<CommandOutput> {
        let out = self.runner.run(&self.root, &self.git, args)?;

        if !out.output.trim().is_empty() {
            tracing::debug!(output = %out.output.trim_end(), "git {}", args[0]);
        }

        if out.success() {
            return Ok(out);
        }

        Err(SyncError::Backend {
            command: format!("{} {}", self.git.display(), args.join(" ")),
            status: out.status.unwrap_or(-1),
            output: out.output,
        })
    }
}

impl StorageBackend for GitBackend {
    fn check(&self) -> Result<()> {
        self.git(&["status"]).map(|_| ()).map_err(|_| {
            SyncError::Setup(format!("{} is not a git repository", self.root.display()))
        })
    }

    fn is_online(&self) -> bool {
        self.git(&["remote", "show", self.remote.as_str()]).is_ok()
    }

    fn pull(&self) -> Result<()> {
        self.git(&["fetch", self.remote.as_str()])?;
        let upstream = format!("{}/{}", self.remote, self.branch);
        self.git(&["merge", upstream.as_str()])?;
        Ok(())
    }

    fn add_all(&self) -> Result<()> {
        self.git(&["add", "--all"]).map(|_| ())
    }

    fn commit(&self, message: &str) -> Result<CommitOutcome> {
        let message_arg = format!("--message={}", message);
        match self.git(&["commit", "--all", message_arg.as_str()]) {
            Ok(_) => Ok(CommitOutcome::Committed),
            Err(SyncError::Backend { status, .. }) if status == NOTHING_TO_DO_STATUS => {
                tracing::debug!("Nothing to commit");
                Ok(CommitOutcome::NothingToCommit)
            }
            Err(e) => Err(e),
        }
    }

    fn push(&self) -> Result<()> {
        self.git(&["push", self.remote.as_str()]).map(|_| ())
    }

    fn name(&self) -> &str {
        "git"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Records every command and answers with a scripted exit status
    #[derive(Default, Clone)]
    struct ScriptedRunner {
        calls: Arc<Mutex<Vec<String>>>,
        statuses: Arc<Mutex<HashMap<String, i32>>>,
    }

    impl ScriptedRunner {
        fn fail(&self, subcommand: &str, status: i32) {
            self.statuses.lock().insert(subcommand.to_string(), status);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, _dir: &Path, program: &Path, args: &[&str]) -> Result<CommandOutput> {
            self.calls
                .lock()
                .push(format!("{} {}", program.display(), args.join(" ")));
            let status = self.statuses.lock().get(args[0]).copied().unwrap_or(0);
            Ok(CommandOutput {
                status: Some(status),
                output: String::new(),
            })
        }
    }

    fn backend(runner: &ScriptedRunner) -> GitBackend {
        GitBackend::with_runner(
            "/tmp/fake",
            "/usr/bin/git",
            Box::new(runner.clone()),
            "origin",
            "master",
        )
    }

    #[test]
    fn test_cycle_commands() {
        let runner = ScriptedRunner::default();
        let git = backend(&runner);

        assert!(git.is_online());
        git.pull().unwrap();
        git.add_all().unwrap();
        assert_eq!(git.commit("Edit: one.txt").unwrap(), CommitOutcome::Committed);
        git.push().unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "/usr/bin/git remote show origin",
                "/usr/bin/git fetch origin",
                "/usr/bin/git merge origin/master",
                "/usr/bin/git add --all",
                "/usr/bin/git commit --all --message=Edit: one.txt",
                "/usr/bin/git push origin",
            ]
        );
    }

    #[test]
    fn test_commit_status_one_is_benign() {
        let runner = ScriptedRunner::default();
        runner.fail("commit", 1);
        let git = backend(&runner);

        assert_eq!(git.commit("msg").unwrap(), CommitOutcome::NothingToCommit);
    }

    #[test]
    fn test_commit_other_failure_is_error() {
        let runner = ScriptedRunner::default();
        runner.fail("commit", 128);
        let git = backend(&runner);

        let err = git.commit("msg").unwrap_err();
        assert_eq!(err.exit_status(), Some(128));
    }

    #[test]
    fn test_fetch_failure_skips_merge() {
        let runner = ScriptedRunner::default();
        runner.fail("fetch", 128);
        let git = backend(&runner);

        assert!(git.pull().is_err());
        assert_eq!(runner.calls(), vec!["/usr/bin/git fetch origin"]);
    }

    #[test]
    fn test_offline_when_remote_show_fails() {
        let runner = ScriptedRunner::default();
        runner.fail("remote", 128);
        assert!(!backend(&runner).is_online());
    }

    #[test]
    fn test_check_reports_setup_error() {
        let runner = ScriptedRunner::default();
        runner.fail("status", 128);
        let err = backend(&runner).check().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("/tmp/fake"));
    }

    #[test]
    fn test_backend_name() {
        let runner = ScriptedRunner::default();
        assert_eq!(backend(&runner).name(), "git");
    }

    #[test]
    fn test_find_on_path_missing() {
        assert!(find_on_path("definitely-not-a-real-tool-7f3a").is_none());
    }
}
