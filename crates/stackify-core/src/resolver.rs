//! Glob resolution.
//!
//! Turns a comma-joined glob string, an optional ignore file and the
//! engine's own output paths into one [`GlobSpec`]: a list of absolute,
//! forward-slash patterns that is either included or negated. The result
//! can then be expanded against the filesystem or asked about a single
//! path (which is how watch events get filtered).
//!
//! Ignore-file lines keep their gitignore meaning (anchoring, directory
//! rules, `!` re-includes, escapes) through `ignore::gitignore`; only the
//! comma globs, the VCS exclusion and the outputs go through `glob`.
//!
//! Everything here is recomputed per call. Nothing caches the ignore
//! file, so edits to it are picked up on the next resolve.

use crate::error::{Result, StackifyError};
use glob::{MatchOptions, Pattern};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Version-control metadata is never part of a match set.
pub const VCS_EXCLUSION: &str = "!**/.git/**";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// One entry of a glob list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobRule {
    pub pattern: String,
    pub negated: bool,
}

impl GlobRule {
    /// Parses one item of a glob list. A leading `!` negates it.
    ///
    /// Returns `None` for blank items.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (pattern, negated) = match raw.strip_prefix('!') {
            Some(rest) => (rest.trim(), true),
            None => (raw, false),
        };
        if pattern.is_empty() {
            return None;
        }
        Some(Self {
            pattern: pattern.replace('\\', "/"),
            negated,
        })
    }

    /// The rule written back as a single glob string.
    pub fn to_glob_string(&self) -> String {
        if self.negated {
            format!("!{}", self.pattern)
        } else {
            self.pattern.clone()
        }
    }

    fn rooted(&self, root: &str) -> Self {
        Self {
            pattern: absolutize(root, &self.pattern),
            negated: self.negated,
        }
    }
}

/// Splits a comma-joined glob string into rules.
pub fn split_globs(raw: &str) -> Vec<GlobRule> {
    raw.split(',').filter_map(GlobRule::parse).collect()
}

/// Reads a `.gitignore`-style file into negated patterns.
///
/// Comment lines and blank lines are skipped, every other line comes back
/// trimmed and prefixed with `!`. A missing file is an empty list.
pub fn read_ignore_file(path: &Path) -> Result<Vec<String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No ignore file at {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(StackifyError::io(path, e)),
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| format!("!{}", line))
        .collect())
}

/// Compiles ignore-file lines (as returned by [`read_ignore_file`]) into a
/// gitignore matcher anchored at `root`. Invalid lines are logged and skipped.
fn build_gitignore(root: &Path, lines: &[String]) -> Gitignore {
    if lines.is_empty() {
        return Gitignore::empty();
    }
    let mut builder = GitignoreBuilder::new(root);
    for line in lines {
        let line = line.strip_prefix('!').unwrap_or(line);
        if let Err(e) = builder.add_line(None, line) {
            warn!("Ignoring invalid ignore line '{}': {}", line, e);
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!("Could not build ignore rules for {}: {}", root.display(), e);
        Gitignore::empty()
    })
}

/// Everything needed to resolve a [`GlobSpec`].
#[derive(Debug, Clone, Default)]
pub struct GlobConfig {
    /// Directory all patterns are relative to.
    pub root: PathBuf,

    /// Comma-joined globs, `!` negates.
    pub source_glob: String,

    /// Optional ignore file, relative to `root`.
    pub ignore_file: Option<PathBuf>,

    /// Files the engine writes. Always excluded from the match set.
    pub output_paths: Vec<PathBuf>,
}

impl GlobConfig {
    pub fn new(root: impl Into<PathBuf>, source_glob: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            source_glob: source_glob.into(),
            ignore_file: None,
            output_paths: Vec::new(),
        }
    }

    pub fn with_ignore_file(mut self, ignore_file: Option<PathBuf>) -> Self {
        self.ignore_file = ignore_file;
        self
    }

    pub fn with_outputs(mut self, output_paths: Vec<PathBuf>) -> Self {
        self.output_paths = output_paths;
        self
    }

    /// Same globs and ignore file, anchored at a different root.
    ///
    /// The ignore file is still read from the original root.
    pub fn rooted_at(&self, root: impl Into<PathBuf>) -> Self {
        let ignore_file = self.ignore_file.as_ref().map(|f| self.root.join(f));
        Self {
            root: root.into(),
            source_glob: self.source_glob.clone(),
            ignore_file,
            output_paths: self.output_paths.clone(),
        }
    }

    /// Resolves the configuration into absolute patterns.
    ///
    /// Order: source globs, ignore-file exclusions, the VCS exclusion,
    /// then one exclusion per output path.
    pub fn resolve(&self) -> Result<GlobSpec> {
        let root = absolute_root(&self.root)?;
        let root_str = path_to_slash(&root);

        let mut rules = split_globs(&self.source_glob);
        let ignore_at = rules.len();

        let ignore_lines = match &self.ignore_file {
            Some(ignore_file) => read_ignore_file(&root.join(ignore_file))?,
            None => Vec::new(),
        };

        rules.extend(GlobRule::parse(VCS_EXCLUSION));

        for output in &self.output_paths {
            let output = path_to_slash(output);
            rules.push(GlobRule {
                pattern: Pattern::escape(&output),
                negated: true,
            });
        }

        let rules = rules.iter().map(|rule| rule.rooted(&root_str)).collect();
        let mut spec = GlobSpec::from_rules(root, rules);
        spec.ignore = build_gitignore(&spec.root, &ignore_lines);
        spec.ignore_lines = ignore_lines;
        spec.ignore_at = ignore_at;
        Ok(spec)
    }
}

/// Shorthand for resolving without output exclusions.
pub fn resolve(root: &Path, source_glob: &str, ignore_file: Option<&Path>) -> Result<GlobSpec> {
    GlobConfig::new(root, source_glob)
        .with_ignore_file(ignore_file.map(Path::to_path_buf))
        .resolve()
}

#[derive(Debug, Clone)]
struct Exclusion {
    pattern: Pattern,
    /// `pattern` without a trailing `/**`, so the directory itself counts.
    subtree: Option<Pattern>,
}

impl Exclusion {
    fn hits(&self, candidate: &str) -> bool {
        self.pattern.matches_with(candidate, MATCH_OPTIONS)
            || self
                .subtree
                .as_ref()
                .is_some_and(|p| p.matches_with(candidate, MATCH_OPTIONS))
    }
}

/// A resolved, absolute glob list.
#[derive(Debug, Clone)]
pub struct GlobSpec {
    root: PathBuf,
    root_str: String,
    rules: Vec<GlobRule>,
    include: Vec<Pattern>,
    exclude: Vec<Exclusion>,
    ignore: Gitignore,
    /// Ignore-file lines, `!`-prefixed, and where they sit in `patterns()`.
    ignore_lines: Vec<String>,
    ignore_at: usize,
}

impl GlobSpec {
    /// Compiles already-absolute rules.
    ///
    /// Malformed patterns are logged and dropped, so they match nothing.
    pub fn from_rules(root: PathBuf, rules: Vec<GlobRule>) -> Self {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for rule in &rules {
            let pattern = match Pattern::new(&rule.pattern) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Ignoring invalid glob '{}': {}", rule.pattern, e);
                    continue;
                }
            };
            if rule.negated {
                let subtree = rule
                    .pattern
                    .strip_suffix("/**")
                    .and_then(|base| Pattern::new(base).ok());
                exclude.push(Exclusion { pattern, subtree });
            } else {
                include.push(pattern);
            }
        }

        let root_str = path_to_slash(&root);
        Self {
            root,
            root_str,
            rules,
            include,
            exclude,
            ignore: Gitignore::empty(),
            ignore_lines: Vec::new(),
            ignore_at: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rules(&self) -> &[GlobRule] {
        &self.rules
    }

    /// The normalized pattern list, negations prefixed with `!`.
    ///
    /// Ignore-file lines appear right after the source globs, as read.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.rules.iter().map(GlobRule::to_glob_string).collect();
        let at = self.ignore_at.min(patterns.len());
        patterns.splice(at..at, self.ignore_lines.iter().cloned());
        patterns
    }

    /// Whether `path` is in the match set. The path does not need to exist.
    pub fn matches(&self, path: &Path) -> bool {
        self.matches_as(path, path.is_dir())
    }

    fn matches_file(&self, path: &Path) -> bool {
        self.matches_as(path, false)
    }

    fn matches_as(&self, path: &Path, is_dir: bool) -> bool {
        let slashed = path_to_slash(path);
        self.included(&slashed) && !self.excluded(&slashed) && !self.ignored(path, is_dir)
    }

    /// Whether the ignore file rules out `path` or one of its parents.
    fn ignored(&self, path: &Path, is_dir: bool) -> bool {
        if path == self.root || !path.starts_with(&self.root) {
            return false;
        }
        self.ignore
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }

    fn included(&self, path: &str) -> bool {
        self.include
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }

    /// A path is excluded when an exclusion hits it or any ancestor
    /// strictly inside the root.
    fn excluded(&self, path: &str) -> bool {
        let mut current = path;
        loop {
            if current.is_empty() || self.is_root_or_above(current) {
                return false;
            }
            if self.exclude.iter().any(|e| e.hits(current)) {
                return true;
            }
            match current.rfind('/') {
                Some(idx) => current = &current[..idx],
                None => return false,
            }
        }
    }

    fn is_root_or_above(&self, candidate: &str) -> bool {
        self.root_str == candidate
            || (self.root_str.starts_with(candidate)
                && self.root_str.as_bytes().get(candidate.len()) == Some(&b'/'))
    }

    /// Lists every regular file in the match set, sorted.
    ///
    /// Dot-files are included. Excluded directories are not descended into.
    pub fn expand(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(StackifyError::RootNotFound(self.root.clone()));
        }

        let mut found = BTreeSet::new();
        for base in self.walk_bases() {
            self.walk_into(&base, &mut found);
        }

        debug!("Expanded {} files under {}", found.len(), self.root.display());
        Ok(found.into_iter().collect())
    }

    /// Lists the matched files beneath `dir`, sorted. Used when a whole
    /// directory shows up at once, e.g. after a move into the root.
    pub fn expand_within(&self, dir: &Path) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();
        if dir.is_dir() && !self.ignored(dir, true) && !self.excluded(&path_to_slash(dir)) {
            self.walk_into(dir, &mut found);
        }
        found.into_iter().collect()
    }

    fn walk_into(&self, base: &Path, found: &mut BTreeSet<PathBuf>) {
        let walker = WalkDir::new(base)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !(self.excluded(&path_to_slash(entry.path()))
                        || self.ignored(entry.path(), true))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", base.display(), e);
                    continue;
                }
            };
            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if is_file && self.matches_file(entry.path()) {
                found.insert(entry.into_path());
            }
        }
    }

    /// Directories to walk: the literal prefix of each include pattern,
    /// with bases nested inside another base dropped.
    fn walk_bases(&self) -> Vec<PathBuf> {
        let mut bases: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| !rule.negated)
            .map(|rule| literal_prefix(&rule.pattern))
            .collect();
        bases.sort();
        bases.dedup();

        let mut kept: Vec<String> = Vec::new();
        for base in bases {
            let nested = kept.iter().any(|k| {
                k == "/"
                    || (base.starts_with(k.as_str()) && base.as_bytes().get(k.len()) == Some(&b'/'))
            });
            if !nested {
                kept.push(base);
            }
        }

        kept.into_iter()
            .map(PathBuf::from)
            .filter(|base| base.exists())
            .collect()
    }
}

/// Leading path components of a pattern that contain no glob syntax.
/// A fully literal pattern yields its parent directory.
fn literal_prefix(pattern: &str) -> String {
    let parts: Vec<&str> = pattern.split('/').collect();
    let first_glob = parts
        .iter()
        .position(|part| part.contains(['*', '?', '[']))
        .unwrap_or(parts.len().saturating_sub(1));
    let prefix = parts[..first_glob].join("/");
    if prefix.is_empty() {
        "/".to_string()
    } else {
        prefix
    }
}

/// Makes `root` absolute against the working directory and folds dots.
fn absolute_root(root: &Path) -> Result<PathBuf> {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| StackifyError::io(root, e))?;
        cwd.join(root)
    };
    Ok(PathBuf::from(fold_dots(&path_to_slash(&absolute))))
}

/// Joins a pattern onto a root unless it is already absolute.
fn absolutize(root: &str, pattern: &str) -> String {
    if is_absolute(pattern) {
        fold_dots(pattern)
    } else {
        fold_dots(&format!("{}/{}", root.trim_end_matches('/'), pattern))
    }
}

fn is_absolute(pattern: &str) -> bool {
    pattern.starts_with('/') || pattern.as_bytes().get(1) == Some(&b':')
}

/// Removes `.` segments, resolves `..` lexically and collapses `//`.
fn fold_dots(path: &str) -> String {
    let leading_slash = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if leading_slash {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Renders a path with forward slashes.
pub fn path_to_slash(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if cfg!(windows) {
        raw.replace('\\', "/")
    } else {
        raw.into_owned()
    }
}
