//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use crate::cloud::{ApiCall, CloudApi, CloudError};
use crate::process::{CommandOutput, CommandRunner, RunnerError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Interactive runs consume the same queue and return the queued exit code.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Whether the invocation was attached to the terminal.
    pub interactive: bool,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn next(
        &self,
        program: &str,
        args: &[OsString],
        interactive: bool,
    ) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            interactive,
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        self.next(program, args, false)
    }

    fn run_interactive(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<Option<i32>, RunnerError> {
        self.next(program, args, true).map(|output| output.code)
    }
}

/// Cloud double answering calls from per-operation scripts.
///
/// Queued responses are consumed first; once an operation's queue is empty
/// its standing response (if any) answers every further call. Operations
/// with neither fail with the provider code `Unscripted`.
#[derive(Debug, Default)]
pub struct ScriptedCloud {
    queued: RefCell<HashMap<String, VecDeque<Result<Value, CloudError>>>>,
    standing: RefCell<HashMap<String, Value>>,
    calls: RefCell<Vec<ApiCall>>,
}

impl ScriptedCloud {
    /// Creates a cloud with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one successful response for `operation`.
    pub fn push(&self, operation: &str, response: Value) {
        self.queue(operation, Ok(response));
    }

    /// Queues one provider error with `code` for `operation`.
    pub fn push_error(&self, operation: &str, code: &str) {
        self.queue(operation, Err(api_error(operation, code)));
    }

    /// Answers every call to `operation` with `response` once its queue is
    /// drained.
    pub fn respond(&self, operation: &str, response: Value) {
        self.standing
            .borrow_mut()
            .insert(operation.to_owned(), response);
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.borrow().clone()
    }

    /// Returns the calls made to `operation`.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> Vec<ApiCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.operation() == operation)
            .cloned()
            .collect()
    }

    /// Returns the operations called so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|call| call.operation().to_owned())
            .collect()
    }

    /// Number of calls that create or attach something.
    #[must_use]
    pub fn creation_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.is_creation())
            .count()
    }

    /// Forgets recorded calls while keeping the scripts.
    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn queue(&self, operation: &str, response: Result<Value, CloudError>) {
        self.queued
            .borrow_mut()
            .entry(operation.to_owned())
            .or_default()
            .push_back(response);
    }
}

impl CloudApi for ScriptedCloud {
    fn invoke(&self, call: &ApiCall) -> Result<Value, CloudError> {
        self.calls.borrow_mut().push(call.clone());
        let queued = self
            .queued
            .borrow_mut()
            .get_mut(call.operation())
            .and_then(VecDeque::pop_front);
        if let Some(response) = queued {
            return response;
        }
        self.standing
            .borrow()
            .get(call.operation())
            .cloned()
            .ok_or_else(|| api_error(call.operation(), "Unscripted"))
    }
}

/// Builds a provider error as the AWS CLI would report it.
#[must_use]
pub fn api_error(operation: &str, code: &str) -> CloudError {
    CloudError::Api {
        operation: operation.to_owned(),
        code: Some(code.to_owned()),
        message: format!("simulated {code}"),
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// Pairs with a `None` value are removed for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
