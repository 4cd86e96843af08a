//! Resource types and providers shipped with marionette
//!
//! Each module exposes `descriptor()` (the type schema) and `providers()`
//! (every backend for it); [`registry`] puts them together. Providers never
//! touch the host except through the [`reconcile::ProviderContext`] they are
//! handed, apart from direct filesystem calls in `file`.

pub mod exec;
pub mod file;
pub mod package;
pub mod service;

use reconcile::{TypeRegistry, Value};

/// All built-in types with their providers, in preference order
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();

    registry.register_type(file::descriptor());
    registry.register_type(service::descriptor());
    registry.register_type(package::descriptor());
    registry.register_type(exec::descriptor());

    let providers = file::providers()
        .into_iter()
        .chain(service::providers())
        .chain(package::providers())
        .chain(exec::providers());
    for provider in providers {
        registry.register_provider(provider);
    }

    registry
}

pub(crate) fn munge_bool(raw: &Value) -> Result<Value, String> {
    raw.as_bool()
        .map(Value::Boolean)
        .ok_or_else(|| format!("'{raw}' is not a boolean"))
}

/// Scripted command runner for provider tests
#[cfg(test)]
pub mod testing {
    use anyhow::Result;
    use reconcile::{CommandOutput, CommandRunner};
    use std::cell::RefCell;
    use std::path::Path;

    struct Response {
        prefix: String,
        output: CommandOutput,
        once: bool,
    }

    /// Records every command line and answers from a script
    ///
    /// The most recently added response whose prefix matches wins; `once`
    /// responses are used up on first match. Unscripted commands succeed
    /// with no output.
    #[derive(Default)]
    pub struct RecordingRunner {
        calls: RefCell<Vec<String>>,
        responses: RefCell<Vec<Response>>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        fn push(self, prefix: &str, status: i32, stdout: &str, once: bool) -> Self {
            self.responses.borrow_mut().push(Response {
                prefix: prefix.to_string(),
                output: CommandOutput {
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: if status == 0 {
                        Vec::new()
                    } else {
                        format!("{prefix} failed").into_bytes()
                    },
                    success: status == 0,
                    status: Some(status),
                },
                once,
            });
            self
        }

        pub fn respond(self, prefix: &str, status: i32, stdout: &str) -> Self {
            self.push(prefix, status, stdout, false)
        }

        pub fn respond_once(self, prefix: &str, status: i32, stdout: &str) -> Self {
            self.push(prefix, status, stdout, true)
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        /// Recorded command lines starting with `prefix`
        pub fn calls_to(&self, prefix: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c.starts_with(prefix))
                .collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run_in(&self, cwd: Option<&Path>, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
            let mut line = std::iter::once(cmd)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            if let Some(dir) = cwd {
                line = format!("{line} (in {})", dir.display());
            }
            self.calls.borrow_mut().push(line.clone());

            let mut responses = self.responses.borrow_mut();
            let Some(index) = responses.iter().rposition(|r| line.starts_with(&r.prefix)) else {
                return Ok(CommandOutput {
                    success: true,
                    status: Some(0),
                    ..CommandOutput::default()
                });
            };
            if responses[index].once {
                Ok(responses.remove(index).output)
            } else {
                Ok(responses[index].output.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_every_type() {
        let registry = registry();
        let names: Vec<_> = registry.types().map(|t| t.name).collect();
        assert_eq!(names, vec!["exec", "file", "package", "service"]);
        assert_eq!(registry.providers_for("package").len(), 3);
        assert_eq!(registry.providers_for("service").len(), 2);
    }

    #[test]
    fn test_munge_bool() {
        assert_eq!(munge_bool(&Value::from("yes")), Ok(Value::Boolean(true)));
        assert_eq!(munge_bool(&Value::Boolean(false)), Ok(Value::Boolean(false)));
        assert!(munge_bool(&Value::from("maybe")).is_err());
    }
}
