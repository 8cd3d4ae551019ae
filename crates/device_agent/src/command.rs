//! Command descriptors and the builder that turns them into invocations
//!
//! A provider maps each logical action (`connect`, `reset`, `launch`, ...) to a
//! [`CommandDescriptor`]. Arguments are a vector of templates where `{N}` is
//! replaced with the Nth parameter, so every parameter lands in exactly one
//! argv slot and nothing is ever passed through a shell.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{DeviceError, Result};

/// Post-processing applied to the raw output of a command
pub type OutputTransform = Arc<dyn Fn(&str) -> std::result::Result<Value, String> + Send + Sync>;

/// Actions callers invoke unconditionally; a missing entry is not worth a warning
const SILENT_WHEN_MISSING: &[&str] = &["disconnect"];

/// Tool + argument templates + optional output transform for one action
#[derive(Clone)]
pub struct CommandDescriptor {
    pub tool: String,
    pub args: Vec<String>,
    pub transform: Option<OutputTransform>,
}

impl CommandDescriptor {
    pub fn new<I, S>(tool: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool: tool.into(),
            args: args.into_iter().map(Into::into).collect(),
            transform: None,
        }
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("tool", &self.tool)
            .field("args", &self.args)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Action name -> descriptor. A `None` entry marks a deliberate no-op.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: HashMap<String, Option<CommandDescriptor>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, action: impl Into<String>, descriptor: CommandDescriptor) -> Self {
        self.entries.insert(action.into(), Some(descriptor));
        self
    }

    pub fn with_no_op(mut self, action: impl Into<String>) -> Self {
        self.entries.insert(action.into(), None);
        self
    }

    pub fn insert(&mut self, action: impl Into<String>, descriptor: Option<CommandDescriptor>) {
        self.entries.insert(action.into(), descriptor);
    }

    pub fn contains(&self, action: &str) -> bool {
        self.entries.contains_key(action)
    }

    pub fn get(&self, action: &str) -> Option<&Option<CommandDescriptor>> {
        self.entries.get(action)
    }
}

/// Concrete program and argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Resolved, ready-to-execute form of a descriptor
#[derive(Clone)]
pub struct BuiltCommand {
    pub action: String,
    pub invocation: Option<Invocation>,
    pub transform: Option<OutputTransform>,
}

impl BuiltCommand {
    pub fn no_op(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            invocation: None,
            transform: None,
        }
    }

    pub fn is_no_op(&self) -> bool {
        self.invocation.is_none()
    }

    /// Append arguments verbatim after the substituted template
    pub fn with_trailing_args(mut self, extra: &[String]) -> Self {
        if let Some(invocation) = self.invocation.as_mut() {
            invocation.args.extend(extra.iter().cloned());
        }
        self
    }
}

impl fmt::Debug for BuiltCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltCommand")
            .field("action", &self.action)
            .field("invocation", &self.invocation)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Builds invocations from a command table, resolving tools against an SDK root or PATH
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    table: CommandTable,
    sdk_root: Option<PathBuf>,
}

impl CommandBuilder {
    pub fn new(table: CommandTable, sdk_root: Option<PathBuf>) -> Self {
        Self { table, sdk_root }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn sdk_root(&self) -> Option<&Path> {
        self.sdk_root.as_deref()
    }

    pub fn build(&self, action: &str, params: &[&str]) -> Result<BuiltCommand> {
        let descriptor = match self.table.get(action) {
            None => {
                if SILENT_WHEN_MISSING.contains(&action) {
                    debug!("No '{}' command configured; skipping", action);
                } else {
                    warn!("No '{}' command configured for this platform; skipping", action);
                }
                return Ok(BuiltCommand::no_op(action));
            }
            Some(None) => {
                debug!("'{}' is a no-op for this platform", action);
                return Ok(BuiltCommand::no_op(action));
            }
            Some(Some(descriptor)) => descriptor,
        };

        let program = resolve_tool(&descriptor.tool, self.sdk_root.as_deref())?;
        let args = substitute(action, &descriptor.args, params)?;

        Ok(BuiltCommand {
            action: action.to_string(),
            invocation: Some(Invocation { program, args }),
            transform: descriptor.transform.clone(),
        })
    }
}

/// Resolve a tool name to a path, against `sdk_root` when given, otherwise PATH
pub fn resolve_tool(tool: &str, sdk_root: Option<&Path>) -> Result<PathBuf> {
    let direct = Path::new(tool);
    if direct.is_absolute() {
        return if direct.exists() {
            Ok(direct.to_path_buf())
        } else {
            Err(DeviceError::ToolNotFound {
                tool: tool.to_string(),
                searched: direct.display().to_string(),
            })
        };
    }

    if let Some(root) = sdk_root {
        let candidate = root.join(tool);
        if candidate.is_file() {
            return Ok(candidate);
        }
        let suffix = std::env::consts::EXE_SUFFIX;
        if !suffix.is_empty() {
            let with_suffix = root.join(format!("{}{}", tool, suffix));
            if with_suffix.is_file() {
                return Ok(with_suffix);
            }
        }
        return Err(DeviceError::ToolNotFound {
            tool: tool.to_string(),
            searched: root.display().to_string(),
        });
    }

    which::which(tool).map_err(|_| DeviceError::ToolNotFound {
        tool: tool.to_string(),
        searched: "PATH".to_string(),
    })
}

/// Replace `{N}` placeholders in each template with `params[N]`
fn substitute(action: &str, templates: &[String], params: &[&str]) -> Result<Vec<String>> {
    let mut highest: Option<usize> = None;
    let mut args = Vec::with_capacity(templates.len());

    for template in templates {
        let fail = |message: String| DeviceError::Template {
            action: action.to_string(),
            template: template.clone(),
            message,
        };

        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            Some(other) => {
                                return Err(fail(format!("unexpected '{}' in placeholder", other)))
                            }
                            None => return Err(fail("unterminated placeholder".to_string())),
                        }
                    }
                    let index: usize = digits
                        .parse()
                        .map_err(|_| fail("placeholder must be a parameter index".to_string()))?;
                    let value = params.get(index).ok_or_else(|| {
                        fail(format!(
                            "placeholder {{{}}} but only {} parameter(s) given",
                            index,
                            params.len()
                        ))
                    })?;
                    highest = Some(highest.map_or(index, |h| h.max(index)));
                    out.push_str(value);
                }
                '}' => return Err(fail("unmatched '}'".to_string())),
                other => out.push(other),
            }
        }
        args.push(out);
    }

    let used = highest.map_or(0, |h| h + 1);
    if used != params.len() {
        return Err(DeviceError::Template {
            action: action.to_string(),
            template: templates.join(" "),
            message: format!(
                "template takes {} parameter(s) but {} were given",
                used,
                params.len()
            ),
        });
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with a debug-level subscriber and return everything it logged
    fn captured_logs(f: impl FnOnce()) -> String {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn sdk_with_tool(name: &str) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(name), b"").unwrap();
        dir
    }

    #[test]
    fn test_missing_action_is_no_op() {
        let builder = CommandBuilder::new(CommandTable::new(), None);
        let built = builder.build("screenshot", &[]).unwrap();
        assert!(built.is_no_op());
        assert_eq!(built.action, "screenshot");
    }

    #[test]
    fn test_only_actions_absent_from_table_warn() {
        let table = CommandTable::new().with_no_op("reset");
        let builder = CommandBuilder::new(table, None);

        let missing = captured_logs(|| {
            assert!(builder.build("screenshot", &[]).unwrap().is_no_op());
        });
        assert!(missing.contains("WARN"), "{missing}");
        assert!(missing.contains("'screenshot'"), "{missing}");

        let explicit = captured_logs(|| {
            assert!(builder.build("reset", &[]).unwrap().is_no_op());
        });
        assert!(!explicit.contains("WARN"), "{explicit}");
        assert!(explicit.contains("DEBUG"), "{explicit}");

        let disconnect = captured_logs(|| {
            assert!(builder.build("disconnect", &[]).unwrap().is_no_op());
        });
        assert!(!disconnect.contains("WARN"), "{disconnect}");
        assert!(disconnect.contains("DEBUG"), "{disconnect}");
    }

    #[test]
    fn test_explicit_no_op_is_no_op() {
        let table = CommandTable::new().with_no_op("disconnect");
        let builder = CommandBuilder::new(table, None);
        assert!(builder.table().contains("disconnect"));
        assert!(builder.build("disconnect", &[]).unwrap().is_no_op());
    }

    #[test]
    fn test_substitutes_positionally_into_argv() {
        let sdk = sdk_with_tool("devtool");
        let table = CommandTable::new().with(
            "launch",
            CommandDescriptor::new("devtool", ["run", "--target={0}", "{1}", "{0}:{1}"]),
        );
        let builder = CommandBuilder::new(table, Some(sdk.path().to_path_buf()));

        let built = builder.build("launch", &["dev kit", "game.exe"]).unwrap();
        let invocation = built.invocation.unwrap();
        assert_eq!(invocation.program, sdk.path().join("devtool"));
        assert_eq!(
            invocation.args,
            vec!["run", "--target=dev kit", "game.exe", "dev kit:game.exe"]
        );
    }

    #[test]
    fn test_brace_escapes_are_literal() {
        let args = substitute("x", &["{{json}}".to_string()], &[]).unwrap();
        assert_eq!(args, vec!["{json}"]);
    }

    #[test]
    fn test_too_few_parameters_names_action_and_template() {
        let sdk = sdk_with_tool("devtool");
        let table =
            CommandTable::new().with("connect", CommandDescriptor::new("devtool", ["{0}", "{1}"]));
        let builder = CommandBuilder::new(table, Some(sdk.path().to_path_buf()));

        match builder.build("connect", &["only-one"]).unwrap_err() {
            DeviceError::Template {
                action, template, ..
            } => {
                assert_eq!(action, "connect");
                assert_eq!(template, "{1}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_too_many_parameters_is_rejected() {
        let err = substitute("reset", &["reboot".to_string()], &["extra"]).unwrap_err();
        assert!(matches!(err, DeviceError::Template { .. }));
    }

    #[test]
    fn test_malformed_placeholder_is_rejected() {
        assert!(substitute("a", &["{x}".to_string()], &["v"]).is_err());
        assert!(substitute("a", &["{0".to_string()], &["v"]).is_err());
        assert!(substitute("a", &["0}".to_string()], &["v"]).is_err());
    }

    #[test]
    fn test_missing_tool_in_sdk_root_is_fatal() {
        let sdk = tempdir().unwrap();
        let table = CommandTable::new().with("poweron", CommandDescriptor::new("nope", ["on"]));
        let builder = CommandBuilder::new(table, Some(sdk.path().to_path_buf()));

        match builder.build("poweron", &[]).unwrap_err() {
            DeviceError::ToolNotFound { tool, .. } => assert_eq!(tool, "nope"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_tool_on_path_is_fatal() {
        let err = resolve_tool("definitely-not-a-real-tool-7f3a", None).unwrap_err();
        assert!(matches!(err, DeviceError::ToolNotFound { .. }));
    }

    #[test]
    fn test_transform_is_carried_into_built_command() {
        let sdk = sdk_with_tool("devtool");
        let table = CommandTable::new().with(
            "getstatus",
            CommandDescriptor::new("devtool", ["status"])
                .with_transform(|raw| Ok(Value::String(raw.trim().to_uppercase()))),
        );
        let builder = CommandBuilder::new(table, Some(sdk.path().to_path_buf()));

        let built = builder.build("getstatus", &[]).unwrap();
        let transform = built.transform.expect("transform");
        assert_eq!(transform(" ok\n").unwrap(), Value::String("OK".into()));
    }

    #[test]
    fn test_invocation_display_quotes_spaces() {
        let invocation = Invocation {
            program: PathBuf::from("tool"),
            args: vec!["a".into(), "b c".into()],
        };
        assert_eq!(invocation.to_string(), "tool a \"b c\"");
    }
}
