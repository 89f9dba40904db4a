// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process execution.
//!
//! The model never runs anything itself: docker-compose, rsync, and ssh sit
//! behind the [`Invoker`] seam so commands can be recorded instead of
//! executed (tests) or merely logged (dry runs). The core only consumes
//! pass/fail and captured output; it never interprets exit codes further.

use std::process::Command;
use tracing::info;

/// Outcome of one external command.
#[derive(Clone, Debug, Default)]
pub struct RunOutcome {
    /// Whether the command exited successfully.
    pub success: bool,

    /// Captured stdout and stderr, concatenated.
    pub output: String,
}

/// Layer of indirection for running external commands.
pub trait Invoker {
    /// Run `program` with `args`, capturing combined output.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if the program cannot be started at
    ///   all. A started program that exits non-zero is NOT an error here;
    ///   that shows up in [`RunOutcome::success`].
    fn run(&self, program: &str, args: &[String]) -> Result<RunOutcome>;

    /// True when invocations are logged instead of executed.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Runs commands for real through [`std::process::Command`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessInvoker {
    dry_run: bool,
}

impl ProcessInvoker {
    /// Construct new process invoker.
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl Invoker for ProcessInvoker {
    fn run(&self, program: &str, args: &[String]) -> Result<RunOutcome> {
        if self.dry_run {
            info!("would run: {program} {}", args.join(" "));
            return Ok(RunOutcome {
                success: true,
                output: String::new(),
            });
        }

        info!("running: {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ExecError::Spawn {
                program: program.to_owned(),
                source: err,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(RunOutcome {
            success: output.status.success(),
            output: text,
        })
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Run a command and require it to succeed.
///
/// # Errors
///
/// - Return [`ExecError::Spawn`] if the program cannot be started.
/// - Return [`ExecError::Failed`] if it exits non-zero.
pub fn run_checked(invoker: &dyn Invoker, program: &str, args: &[String]) -> Result<RunOutcome> {
    let outcome = invoker.run(program, args)?;
    if !outcome.success {
        return Err(ExecError::Failed {
            command: format!("{program} {}", args.join(" ")),
            output: outcome.output,
        });
    }

    Ok(outcome)
}

/// Process execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Program cannot be started.
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// Program ran but reported failure.
    #[error("'{command}' failed:\n{output}")]
    Failed { command: String, output: String },
}

/// Friendly result alias :3
type Result<T, E = ExecError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// Records every invocation instead of executing, optionally canning
    /// outputs per program.
    #[derive(Debug)]
    pub(crate) struct RecordingInvoker {
        pub(crate) calls: RefCell<Vec<String>>,
        pub(crate) canned: Vec<(String, RunOutcome)>,
        pub(crate) dry: bool,
    }

    impl Default for RecordingInvoker {
        fn default() -> Self {
            Self {
                calls: RefCell::default(),
                canned: Vec::new(),
                // Dry by default, which keeps filesystem probes out of
                // operation tests.
                dry: true,
            }
        }
    }

    impl RecordingInvoker {
        pub(crate) fn with_output(program: &str, output: &str) -> Self {
            Self {
                canned: vec![(
                    program.to_owned(),
                    RunOutcome {
                        success: true,
                        output: output.to_owned(),
                    },
                )],
                ..Self::default()
            }
        }

        pub(crate) fn commands(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Invoker for RecordingInvoker {
        fn run(&self, program: &str, args: &[String]) -> Result<RunOutcome> {
            self.calls
                .borrow_mut()
                .push(format!("{program} {}", args.join(" ")));

            let outcome = self
                .canned
                .iter()
                .find(|(name, _)| name == program)
                .map(|(_, outcome)| outcome.clone())
                .unwrap_or(RunOutcome {
                    success: true,
                    output: String::new(),
                });
            Ok(outcome)
        }

        fn is_dry_run(&self) -> bool {
            self.dry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dry_run_invoker_succeeds_without_executing() {
        let invoker = ProcessInvoker::new(true);
        let outcome = invoker
            .run("definitely-not-a-real-program", &["--flag".to_owned()])
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.output, "");
    }

    #[test]
    fn run_checked_surfaces_failures() {
        let invoker = testing::RecordingInvoker {
            canned: vec![(
                "rsync".to_owned(),
                RunOutcome {
                    success: false,
                    output: "boom".to_owned(),
                },
            )],
            ..Default::default()
        };

        let error = run_checked(&invoker, "rsync", &["-rlptJ".to_owned()]).unwrap_err();
        assert_eq!(error.to_string(), "'rsync -rlptJ' failed:\nboom");
    }
}
