//! Dockerfile parsing.
//!
//! Two phases: the scanner folds physical lines into logical
//! instructions (continuations, comments, the `# escape=` directive),
//! then the parser turns instructions into [`BuildOp`]s, applying
//! variable substitution and the ENV/ARG scoping rules. Scopes reset at
//! every `FROM`; `ARG` values feed `RUN` environments only, `ENV`
//! values persist into the image configuration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use skiff_core::error::{Result, SkiffError};

use super::{BuildOp, ImageBuilder, PositionedOp};

/// Default shell for shell-form RUN/CMD/ENTRYPOINT.
const DEFAULT_SHELL: &[&str] = &["/bin/sh", "-c"];

/// A parsed Dockerfile: the ordered build operations.
#[derive(Debug, Clone)]
pub struct Dockerfile {
    ops: Vec<PositionedOp>,
    warnings: Vec<String>,
}

impl Dockerfile {
    /// Parse Dockerfile source with the given build-arg overrides.
    pub fn load(src: &str, build_args: &HashMap<String, String>) -> Result<Self> {
        let (instructions, escape) = scan_instructions(src)?;
        let mut parser = Parser::new(build_args, escape);
        for instruction in &instructions {
            parser.read(instruction).map_err(|e| {
                e.context(&format!(
                    "line {}: {}",
                    instruction.line,
                    instruction.keyword.to_lowercase()
                ))
                .context("load dockerfile")
            })?;
        }
        if !parser.seen_from {
            return Err(SkiffError::InvalidInput(
                "load dockerfile: no FROM instruction".to_string(),
            ));
        }
        Ok(Self {
            ops: parser.ops,
            warnings: parser.warnings,
        })
    }

    /// Parse a Dockerfile from disk.
    pub fn from_file(path: &Path, build_args: &HashMap<String, String>) -> Result<Self> {
        let src = std::fs::read_to_string(path).map_err(|e| {
            SkiffError::InvalidInput(format!("read dockerfile {}: {e}", path.display()))
        })?;
        Self::load(&src, build_args)
    }

    pub fn ops(&self) -> &[PositionedOp] {
        &self.ops
    }

    /// Warnings collected during parsing (also logged).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Drive a builder through the parsed operations.
    pub fn apply(&self, context_dir: &Path, builder: &mut dyn ImageBuilder) -> Result<()> {
        super::apply(&self.ops, context_dir, builder)
    }
}

/// One logical instruction from phase 1.
#[derive(Debug, Clone)]
struct RawInstruction {
    keyword: String,
    rest: String,
    line: usize,
}

/// Fold physical lines into logical instructions.
///
/// Returns the instructions and the escape character (configurable via
/// the `# escape=` parser directive on the leading comment lines).
fn scan_instructions(src: &str) -> Result<(Vec<RawInstruction>, char)> {
    let mut escape = '\\';
    let mut directives_done = false;
    let mut instructions = Vec::new();

    let mut pending = String::new();
    let mut pending_line = 0usize;

    for (idx, raw_line) in src.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();

        if trimmed.starts_with('#') {
            if !directives_done {
                if let Some(value) = parse_directive(trimmed, "escape") {
                    escape = match value.as_str() {
                        "\\" => '\\',
                        "`" => '`',
                        other => {
                            return Err(SkiffError::InvalidInput(format!(
                                "line {line_no}: invalid escape directive {other:?}"
                            )))
                        }
                    };
                }
            }
            // Comment lines are dropped, even inside continuations.
            continue;
        }

        if trimmed.is_empty() {
            if pending.is_empty() {
                continue;
            }
            // A blank line ends nothing; continuations span it.
            continue;
        }
        directives_done = true;

        if pending.is_empty() {
            pending_line = line_no;
        }

        let continued = trimmed.ends_with(escape);
        if continued {
            pending.push_str(trimmed[..trimmed.len() - escape.len_utf8()].trim_end());
            pending.push(' ');
        } else {
            pending.push_str(trimmed);
            let (keyword, rest) = split_first_word(&pending);
            instructions.push(RawInstruction {
                keyword: keyword.to_uppercase(),
                rest: rest.to_string(),
                line: pending_line,
            });
            pending.clear();
        }
    }

    if !pending.is_empty() {
        let (keyword, rest) = split_first_word(&pending);
        instructions.push(RawInstruction {
            keyword: keyword.to_uppercase(),
            rest: rest.to_string(),
            line: pending_line,
        });
    }

    Ok((instructions, escape))
}

fn parse_directive(line: &str, name: &str) -> Option<String> {
    let body = line.trim_start_matches('#').trim();
    let (key, value) = body.split_once('=')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim().to_string())
    } else {
        None
    }
}

fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Phase 2 state: variable scopes, the active shell, accumulated ops.
struct Parser<'a> {
    build_args: &'a HashMap<String, String>,
    var_scope: HashMap<String, String>,
    env_keys: HashSet<String>,
    run_env: BTreeMap<String, String>,
    shell: Vec<String>,
    escape: char,
    seen_from: bool,
    ops: Vec<PositionedOp>,
    warnings: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(build_args: &'a HashMap<String, String>, escape: char) -> Self {
        Self {
            build_args,
            var_scope: HashMap::new(),
            env_keys: HashSet::new(),
            run_env: BTreeMap::new(),
            shell: DEFAULT_SHELL.iter().map(|s| s.to_string()).collect(),
            escape,
            seen_from: false,
            ops: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn reset_scope(&mut self) {
        self.var_scope.clear();
        self.env_keys.clear();
        self.run_env.clear();
        self.shell = DEFAULT_SHELL.iter().map(|s| s.to_string()).collect();
    }

    fn push(&mut self, op: BuildOp, instruction: &RawInstruction) {
        self.ops.push(PositionedOp {
            op,
            line: instruction.line,
            instruction: instruction.keyword.to_lowercase(),
        });
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    fn read(&mut self, instruction: &RawInstruction) -> Result<()> {
        if !self.seen_from && !matches!(instruction.keyword.as_str(), "FROM" | "ARG") {
            return Err(SkiffError::InvalidInput(
                "first instruction must be FROM (only ARG may precede it)".to_string(),
            ));
        }
        match instruction.keyword.as_str() {
            "FROM" => self.from(instruction),
            "RUN" => self.run(instruction),
            "CMD" => self.cmd(instruction),
            "ENTRYPOINT" => self.entrypoint(instruction),
            "COPY" => self.copy(instruction),
            "ADD" => self.addi(instruction),
            "ENV" => self.env(instruction),
            "ARG" => self.arg(instruction),
            "LABEL" => self.label(instruction),
            "MAINTAINER" => self.maintainer(instruction),
            "WORKDIR" => self.workdir(instruction),
            "USER" => self.user(instruction),
            "EXPOSE" => self.expose(instruction),
            "VOLUME" => self.volume(instruction),
            "SHELL" => self.use_shell(instruction),
            "STOPSIGNAL" => self.stopsignal(instruction),
            other => Err(SkiffError::InvalidInput(format!(
                "unsupported instruction {other:?}"
            ))),
        }
    }

    // --- Instruction readers ---

    fn from(&mut self, instruction: &RawInstruction) -> Result<()> {
        let rest = self.subst(&instruction.rest)?;
        let words: Vec<&str> = rest.split_whitespace().collect();
        let (image, alias) = match words.as_slice() {
            [image] => (image.to_string(), None),
            [image, kw, alias] if kw.eq_ignore_ascii_case("as") => {
                (image.to_string(), Some(alias.to_string()))
            }
            _ => {
                return Err(SkiffError::InvalidInput(format!(
                    "expected 'image [AS name]' but was {:?}",
                    instruction.rest
                )))
            }
        };
        if image.is_empty() {
            return Err(SkiffError::InvalidInput("empty image reference".to_string()));
        }
        self.reset_scope();
        self.seen_from = true;
        self.push(BuildOp::From { image, alias }, instruction);
        Ok(())
    }

    fn run(&mut self, instruction: &RawInstruction) -> Result<()> {
        let args = self.command_args(&instruction.rest)?;
        let env: Vec<(String, String)> = self
            .run_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.push(BuildOp::Run { args, env }, instruction);
        Ok(())
    }

    fn cmd(&mut self, instruction: &RawInstruction) -> Result<()> {
        let cmd = self.command_args(&instruction.rest)?;
        self.push(BuildOp::SetCmd { cmd }, instruction);
        Ok(())
    }

    fn entrypoint(&mut self, instruction: &RawInstruction) -> Result<()> {
        let entrypoint = self.command_args(&instruction.rest)?;
        self.push(BuildOp::SetEntrypoint { entrypoint }, instruction);
        Ok(())
    }

    fn copy(&mut self, instruction: &RawInstruction) -> Result<()> {
        let (from, chown, patterns, dest) = self.copy_args(&instruction.rest)?;
        self.push(
            BuildOp::Copy {
                from,
                patterns,
                dest,
                chown,
            },
            instruction,
        );
        Ok(())
    }

    fn addi(&mut self, instruction: &RawInstruction) -> Result<()> {
        let (from, chown, patterns, dest) = self.copy_args(&instruction.rest)?;
        if from.is_some() {
            return Err(SkiffError::InvalidInput(
                "ADD does not support the --from option. Use COPY instead".to_string(),
            ));
        }
        self.push(
            BuildOp::Add {
                patterns,
                dest,
                chown,
            },
            instruction,
        );
        Ok(())
    }

    fn env(&mut self, instruction: &RawInstruction) -> Result<()> {
        let pairs = self.key_value_pairs(&instruction.rest)?;
        for (key, value) in &pairs {
            self.env_keys.insert(key.clone());
            self.var_scope.insert(key.clone(), value.clone());
        }
        self.push(BuildOp::AddEnv { env: pairs }, instruction);
        Ok(())
    }

    fn arg(&mut self, instruction: &RawInstruction) -> Result<()> {
        let rest = instruction.rest.trim();
        if rest.is_empty() {
            return Err(SkiffError::InvalidInput("ARG requires a name".to_string()));
        }
        let (name, default) = match rest.split_once('=') {
            Some((name, default)) => (name.trim().to_string(), unquote(default.trim())),
            None => (rest.to_string(), String::new()),
        };
        let value = match self.build_args.get(&name) {
            Some(overridden) => overridden.clone(),
            None => {
                if default.is_empty() {
                    self.warn(format!("undefined build arg {name:?}"));
                }
                self.subst(&default)?
            }
        };
        if self.env_keys.contains(&name) {
            self.warn(format!("arg {name:?} is shadowed by env var"));
        } else if !value.is_empty() {
            self.run_env.insert(name.clone(), value.clone());
            self.var_scope.insert(name, value);
        }
        Ok(())
    }

    fn label(&mut self, instruction: &RawInstruction) -> Result<()> {
        let mut pairs = self.key_value_pairs(&instruction.rest)?;
        if let Some(pos) = pairs.iter().position(|(k, _)| k == "maintainer") {
            let (_, author) = pairs.remove(pos);
            self.push(BuildOp::SetAuthor { author }, instruction);
        }
        if !pairs.is_empty() {
            self.push(BuildOp::AddLabels { labels: pairs }, instruction);
        }
        Ok(())
    }

    fn maintainer(&mut self, instruction: &RawInstruction) -> Result<()> {
        let author = self.subst(instruction.rest.trim())?;
        self.push(BuildOp::SetAuthor { author }, instruction);
        Ok(())
    }

    fn workdir(&mut self, instruction: &RawInstruction) -> Result<()> {
        let dir = self.single_arg(&instruction.rest, "WORKDIR requires a path")?;
        self.push(BuildOp::SetWorkingDir { dir }, instruction);
        Ok(())
    }

    fn user(&mut self, instruction: &RawInstruction) -> Result<()> {
        let user = self.single_arg(&instruction.rest, "USER requires a user")?;
        self.push(BuildOp::SetUser { user }, instruction);
        Ok(())
    }

    fn expose(&mut self, instruction: &RawInstruction) -> Result<()> {
        let rest = self.subst(&instruction.rest)?;
        let ports: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
        if ports.is_empty() {
            return Err(SkiffError::InvalidInput("EXPOSE requires a port".to_string()));
        }
        self.push(BuildOp::AddExposedPorts { ports }, instruction);
        Ok(())
    }

    fn volume(&mut self, instruction: &RawInstruction) -> Result<()> {
        let volumes = match parse_exec_form(&instruction.rest) {
            Some(volumes) => volumes,
            None => {
                let rest = self.subst(&instruction.rest)?;
                rest.split_whitespace().map(str::to_string).collect()
            }
        };
        if volumes.is_empty() {
            return Err(SkiffError::InvalidInput("VOLUME requires a path".to_string()));
        }
        self.push(BuildOp::AddVolumes { volumes }, instruction);
        Ok(())
    }

    fn use_shell(&mut self, instruction: &RawInstruction) -> Result<()> {
        let shell = parse_exec_form(&instruction.rest).ok_or_else(|| {
            SkiffError::InvalidInput("SHELL requires a JSON array argument".to_string())
        })?;
        if shell.is_empty() {
            return Err(SkiffError::InvalidInput("SHELL must not be empty".to_string()));
        }
        self.shell = shell;
        Ok(())
    }

    fn stopsignal(&mut self, instruction: &RawInstruction) -> Result<()> {
        let signal = self.single_arg(&instruction.rest, "STOPSIGNAL requires a signal")?;
        self.push(BuildOp::SetStopSignal { signal }, instruction);
        Ok(())
    }

    // --- Shared argument handling ---

    /// RUN/CMD/ENTRYPOINT bodies: exec form verbatim, shell form
    /// wrapped in the active shell. No variable expansion.
    fn command_args(&self, rest: &str) -> Result<Vec<String>> {
        if rest.trim().is_empty() {
            return Err(SkiffError::InvalidInput("missing command".to_string()));
        }
        Ok(match parse_exec_form(rest) {
            Some(args) => args,
            None => {
                let mut args = self.shell.clone();
                args.push(rest.trim().to_string());
                args
            }
        })
    }

    /// COPY/ADD argument lists: leading `--from`/`--chown` flags, then
    /// sources and a destination, all variable-expanded.
    #[allow(clippy::type_complexity)]
    fn copy_args(
        &self,
        rest: &str,
    ) -> Result<(Option<String>, Option<String>, Vec<String>, String)> {
        let words = split_words(rest, self.escape);
        let mut from = None;
        let mut chown = None;
        let mut paths = Vec::new();

        for word in words {
            if paths.is_empty() && word.starts_with("--") {
                let (flag, value) = word.split_once('=').unwrap_or((word.as_str(), ""));
                match flag {
                    "--from" => from = Some(self.subst(value)?),
                    "--chown" => chown = Some(self.subst(value)?),
                    other => {
                        return Err(SkiffError::InvalidInput(format!(
                            "unsupported flag {other:?}"
                        )))
                    }
                }
            } else {
                paths.push(self.subst(&word)?);
            }
        }

        if paths.len() < 2 {
            return Err(SkiffError::InvalidInput(
                "expected at least one source and a destination".to_string(),
            ));
        }
        let dest = paths.pop().expect("len checked above");
        Ok((from, chown, paths, dest))
    }

    /// `k=v ...` pairs (or the legacy `k v` form), values expanded,
    /// keys not.
    fn key_value_pairs(&self, rest: &str) -> Result<Vec<(String, String)>> {
        let words = split_words(rest, self.escape);
        if words.is_empty() {
            return Err(SkiffError::InvalidInput("missing key=value".to_string()));
        }
        if !words[0].contains('=') {
            // Legacy form: single key, everything else is the value.
            let (key, value) = split_first_word(rest.trim());
            return Ok(vec![(key.to_string(), self.subst(value)?)]);
        }
        let mut pairs = Vec::new();
        for word in words {
            let (key, value) = word.split_once('=').ok_or_else(|| {
                SkiffError::InvalidInput(format!("expected key=value but was {word:?}"))
            })?;
            pairs.push((key.to_string(), self.subst(value)?));
        }
        Ok(pairs)
    }

    fn single_arg(&self, rest: &str, missing: &str) -> Result<String> {
        let value = self.subst(rest.trim())?;
        let mut words = value.split_whitespace();
        match (words.next(), words.next()) {
            (Some(first), None) => Ok(first.to_string()),
            (None, _) => Err(SkiffError::InvalidInput(missing.to_string())),
            _ => Err(SkiffError::InvalidInput(format!(
                "expected a single argument but was {rest:?}"
            ))),
        }
    }

    /// `$VAR` / `${VAR}` / `${VAR:-default}` / `${VAR:+alternative}`
    /// expansion from the variable scope. The escape character makes
    /// the following `$` literal; unknown variables expand to nothing.
    fn subst(&self, s: &str) -> Result<String> {
        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            if c == self.escape {
                match chars.peek() {
                    Some('$') => {
                        out.push('$');
                        chars.next();
                    }
                    Some(e) if *e == self.escape => {
                        out.push(self.escape);
                        chars.next();
                    }
                    _ => out.push(c),
                }
                continue;
            }
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('{') => {
                    chars.next();
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => body.push(c),
                            None => {
                                return Err(SkiffError::InvalidInput(format!(
                                    "unterminated variable expansion in {s:?}"
                                )))
                            }
                        }
                    }
                    out.push_str(&self.expand_braced(&body)?);
                }
                Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                    let mut name = String::new();
                    while let Some(c) = chars.peek() {
                        if c.is_ascii_alphanumeric() || *c == '_' {
                            name.push(*c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push_str(self.var_scope.get(&name).map(String::as_str).unwrap_or(""));
                }
                _ => out.push('$'),
            }
        }
        Ok(out)
    }

    fn expand_braced(&self, body: &str) -> Result<String> {
        if let Some((name, default)) = body.split_once(":-") {
            let value = self.var_scope.get(name).map(String::as_str).unwrap_or("");
            if value.is_empty() {
                return self.subst(default);
            }
            return Ok(value.to_string());
        }
        if let Some((name, alternative)) = body.split_once(":+") {
            let value = self.var_scope.get(name).map(String::as_str).unwrap_or("");
            if value.is_empty() {
                return Ok(String::new());
            }
            return self.subst(alternative);
        }
        Ok(self
            .var_scope
            .get(body)
            .map(String::as_str)
            .unwrap_or("")
            .to_string())
    }
}

/// Detect and parse an exec-form (JSON array) argument.
fn parse_exec_form(rest: &str) -> Option<Vec<String>> {
    static JSON_ARRAY: OnceLock<Regex> = OnceLock::new();
    let re = JSON_ARRAY.get_or_init(|| Regex::new(r"^\s*\[.*\]\s*$").expect("static regex"));
    if !re.is_match(rest) {
        return None;
    }
    serde_json::from_str::<Vec<String>>(rest.trim()).ok()
}

/// Split on whitespace honouring single/double quotes and the escape
/// character.
fn split_words(s: &str, escape: char) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some('"') => {
                if c == '"' {
                    quote = None;
                } else if c == escape {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else {
                    current.push(c);
                }
            }
            _ => {
                if c.is_whitespace() {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                } else if c == '\'' || c == '"' {
                    quote = Some(c);
                    in_word = true;
                } else if c == escape {
                    in_word = true;
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else {
                    in_word = true;
                    current.push(c);
                }
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
